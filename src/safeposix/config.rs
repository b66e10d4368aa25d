//! Startup configuration
//!
//! The system boots from a JSON document naming the init program and its
//! arguments and environment, plus a filesystem table of RAM filesystems to
//! mount and populate:
//!
//! ```json
//! {
//!   "start": { "name": "/bin/run", "args": ["run", "/bin/echo", "hi"],
//!              "env": [{ "name": "HOME", "value": "/" }] },
//!   "fstab": [{ "type": "ram", "mount": "/", "dirs": ["/tmp"],
//!               "files": [{ "path": "/bin/echo", "image": "echo" },
//!                         { "path": "/etc/motd", "content": "hello\n" }] }]
//! }
//! ```

use crate::interface::{Terminal, Vfs, VfsError};

use super::dispatcher::System;
use super::filesystem::RamFileSystem;
use super::loader::ImageLoader;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot populate {mount}: {source}")]
    Populate {
        mount: String,
        #[source]
        source: VfsError,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub start: StartConfig,
    #[serde(default)]
    pub fstab: Vec<FstabEntry>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StartConfig {
    /// Path of the init image.
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FstabEntry {
    Ram {
        mount: String,
        #[serde(default)]
        dirs: Vec<String>,
        #[serde(default)]
        files: Vec<FileEntry>,
    },
}

/// A file to create: either literal `content` or an `image` naming a program.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        if config.start.name.is_empty() {
            return Err(ConfigError::Invalid("start.name is empty".to_string()));
        }
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_json(&text)
    }

    /// Arguments for init; defaults to just the image name.
    pub fn init_args(&self) -> Vec<String> {
        if self.start.args.is_empty() {
            vec![self.start.name.clone()]
        } else {
            self.start.args.clone()
        }
    }

    /// Environment string for init: `PWD="/"` followed by the configured
    /// pairs, values quoted, comma-joined.
    pub fn init_env(&self) -> String {
        std::iter::once("PWD=\"/\"".to_string())
            .chain(
                self.start
                    .env
                    .iter()
                    .map(|var| format!("{}=\"{}\"", var.name, var.value)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Builds the mount table described by the fstab.
    pub fn build_vfs(&self) -> Result<Arc<Vfs>, ConfigError> {
        let vfs = Vfs::new();
        for entry in self.fstab.iter() {
            match entry {
                FstabEntry::Ram { mount, dirs, files } => {
                    let ramfs = RamFileSystem::new();
                    let populate = |source| ConfigError::Populate {
                        mount: mount.clone(),
                        source,
                    };
                    for dir in dirs.iter() {
                        ramfs.mkdir_all(dir).map_err(populate)?;
                    }
                    for file in files.iter() {
                        let bytes = match (&file.content, &file.image) {
                            (Some(content), None) => content.as_bytes().to_vec(),
                            (None, Some(program)) => ImageLoader::image_bytes(program),
                            (None, None) => Vec::new(),
                            (Some(_), Some(_)) => {
                                return Err(ConfigError::Invalid(format!(
                                    "{} has both content and image",
                                    file.path
                                )))
                            }
                        };
                        ramfs.write_file(&file.path, &bytes).map_err(populate)?;
                    }
                    vfs.mount(mount, ramfs);
                }
            }
        }
        if vfs.mount_points().is_empty() {
            return Err(ConfigError::Invalid("fstab mounts nothing".to_string()));
        }
        Ok(vfs)
    }

    /// Builds the system and starts init. Returns the running system.
    pub fn boot(&self, loader: ImageLoader, terminal: Arc<dyn Terminal>) -> Result<Arc<System>, ConfigError> {
        let vfs = self.build_vfs()?;
        let system = System::init(vfs, loader, terminal);
        system
            .spawn_init(&self.start.name, self.init_args(), self.init_env())
            .map_err(|e| ConfigError::Invalid(format!("cannot start {}: {}", self.start.name, e)))?;
        Ok(system)
    }
}
