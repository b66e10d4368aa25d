//! Hosted programs and program images
//!
//! A hosted program is any value implementing [`Program`]. Image files in the
//! virtual filesystem refer to a program by name: they start with
//! [`IMAGE_MAGIC`] followed by the UTF-8 program name. The [`ImageLoader`]
//! keeps the registry of known programs and validates image files before a
//! process image is replaced.

use crate::interface::{syscall_error, Errno, FileSystem, OpenFlags, SyscallResult, Vfs};

use super::process::Process;
use super::session::Session;
use super::syscalls::fs_constants::*;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const IMAGE_MAGIC: &[u8; 4] = b"\x7fCPX";

// images are tiny; anything bigger is not one of ours
const IMAGE_MAX_LEN: u64 = 4096;

/// Code run by a process.
///
/// `run` starts a fresh image. `resume` continues a forked child at the
/// resume point its parent passed to fork.
pub trait Program: Send + Sync {
    fn run(&self, session: &mut Session) -> Exit;

    fn resume(&self, session: &mut Session, ip: usize, sp: usize) -> Exit {
        log::warn!(
            "pid {}: program cannot resume at ip={:#x} sp={:#x}",
            session.process().pid,
            ip,
            sp
        );
        Exit::Code(super::syscalls::EXIT_FAILURE)
    }
}

/// How a program's execution context ended.
pub enum Exit {
    Code(i32),
    /// The image was replaced by execve; the runner starts the new one.
    Exec(ExecTransfer),
}

/// Control-transfer token produced by a successful execve.
pub struct ExecTransfer {
    pub(crate) process: Arc<Process>,
}

impl ExecTransfer {
    pub fn pid(&self) -> i32 {
        self.process.pid
    }
}

impl fmt::Debug for ExecTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecTransfer").field("pid", &self.process.pid).finish()
    }
}

/// The program an image resolved to.
#[derive(Clone)]
pub struct Entrypoint {
    pub name: String,
    pub program: Arc<dyn Program>,
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entrypoint").field("name", &self.name).finish()
    }
}

#[derive(Default)]
pub struct ImageLoader {
    programs: RwLock<HashMap<String, Arc<dyn Program>>>,
}

impl ImageLoader {
    pub fn new() -> ImageLoader {
        ImageLoader::default()
    }

    pub fn register(&self, name: &str, program: Arc<dyn Program>) {
        log::debug!("registering program {}", name);
        self.programs.write().insert(name.to_string(), program);
    }

    pub fn entrypoint(&self, name: &str) -> SyscallResult<Entrypoint> {
        let program = self
            .programs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| syscall_error(Errno::Unsupported, "execve", "unknown program"))?;
        Ok(Entrypoint {
            name: name.to_string(),
            program,
        })
    }

    /// Bytes of an image file naming `program`.
    pub fn image_bytes(program: &str) -> Vec<u8> {
        let mut image = IMAGE_MAGIC.to_vec();
        image.extend_from_slice(program.as_bytes());
        image
    }

    /// Validates the image at absolute `path` and resolves its program.
    ///
    /// Nothing is modified; a failure leaves the caller free to carry on.
    pub fn load(&self, vfs: &Vfs, path: &str) -> SyscallResult<Entrypoint> {
        let st = vfs.stat(path).map_err(|e| {
            log::debug!("execve: {}", e);
            Errno::NotFound
        })?;
        if st.st_mode & S_FILETYPEFLAGS != S_IFREG {
            return Err(syscall_error(
                Errno::PermissionDenied,
                "execve",
                "image is not a regular file",
            ));
        }
        if st.st_size > IMAGE_MAX_LEN {
            return Err(syscall_error(Errno::Unsupported, "execve", "image too large"));
        }

        let mut handle = vfs.open(path, OpenFlags::RDONLY).map_err(Errno::from)?;
        let mut image = vec![0u8; st.st_size as usize];
        let mut filled = 0;
        while filled < image.len() {
            let n = handle.read(&mut image[filled..]).map_err(Errno::from)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        image.truncate(filled);

        let name = image
            .strip_prefix(IMAGE_MAGIC.as_slice())
            .ok_or_else(|| syscall_error(Errno::Unsupported, "execve", "bad image magic"))?;
        let name = std::str::from_utf8(name)
            .map_err(|_| syscall_error(Errno::Unsupported, "execve", "bad image name"))?;
        self.entrypoint(name.trim())
    }
}
