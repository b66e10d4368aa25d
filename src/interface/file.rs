// File related interface
//
// Filesystem backends are external collaborators reached through the
// `FileSystem` and `FileHandle` traits. `Vfs` is the mount table every
// process shares: it routes an absolute path to the backend mounted at the
// longest matching prefix and hands the backend a path relative to that
// mount point.

use crate::interface::errnos::VfsError;
use crate::interface::types::{Dirent, OpenFlags, StatData};

pub use std::path::{Component as RustPathComponent, Path as RustPath, PathBuf as RustPathBuf};

use parking_lot::RwLock;
use std::sync::Arc;

pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &str) -> Result<StatData, VfsError>;

    /// Returns the `index`th entry of directory `path`, or `None` past the end.
    fn dirent(&self, path: &str, index: usize) -> Result<Option<Dirent>, VfsError>;

    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>, VfsError>;
}

/// An open file. Dropping the handle closes it.
pub trait FileHandle: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, VfsError>;

    fn stat(&self) -> Result<StatData, VfsError>;
}

/// Resolves `path` against `cwd`, folding `.` and `..` components.
///
/// The result is always absolute; `..` at the root stays at the root.
pub fn normpath(path: &str, cwd: &str) -> String {
    let origp = RustPath::new(path);
    let mut newp = if origp.is_relative() {
        RustPathBuf::from(cwd)
    } else {
        RustPathBuf::from("/")
    };

    for comp in origp.components() {
        match comp {
            RustPathComponent::Normal(_) => newp.push(comp),
            RustPathComponent::ParentDir => {
                newp.pop();
            }
            _ => {}
        }
    }

    let normed = newp.to_string_lossy().into_owned();
    if normed.is_empty() {
        "/".to_string()
    } else {
        normed
    }
}

struct Mount {
    point: String,
    fs: Arc<dyn FileSystem>,
}

/// Mount table over filesystem backends.
#[derive(Default)]
pub struct Vfs {
    mounts: RwLock<Vec<Mount>>,
}

impl Vfs {
    pub fn new() -> Arc<Vfs> {
        Arc::new(Vfs::default())
    }

    /// Mounts `fs` at `point`, replacing any previous mount there.
    pub fn mount(&self, point: &str, fs: Arc<dyn FileSystem>) {
        let point = normpath(point, "/");
        let mut mounts = self.mounts.write();
        mounts.retain(|m| m.point != point);
        log::debug!("mounting filesystem at {}", point);
        mounts.push(Mount { point, fs });
    }

    pub fn mount_points(&self) -> Vec<String> {
        self.mounts.read().iter().map(|m| m.point.clone()).collect()
    }

    fn route(&self, path: &str) -> Result<(Arc<dyn FileSystem>, String), VfsError> {
        let mounts = self.mounts.read();
        let best = mounts
            .iter()
            .filter(|m| is_under(path, &m.point))
            .max_by_key(|m| m.point.len())
            .ok_or_else(|| VfsError::NotFound {
                path: path.to_string(),
            })?;

        let rest = &path[best.point.len()..];
        let inner = if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        };
        Ok((best.fs.clone(), inner))
    }
}

fn is_under(path: &str, point: &str) -> bool {
    if point == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(point) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl FileSystem for Vfs {
    fn stat(&self, path: &str) -> Result<StatData, VfsError> {
        let (fs, inner) = self.route(path)?;
        fs.stat(&inner)
    }

    fn dirent(&self, path: &str, index: usize) -> Result<Option<Dirent>, VfsError> {
        let (fs, inner) = self.route(path)?;
        fs.dirent(&inner, index)
    }

    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>, VfsError> {
        let (fs, inner) = self.route(path)?;
        fs.open(&inner, flags)
    }
}
