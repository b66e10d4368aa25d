//! I/O channels
//!
//! An [`IoChannel`] is what a file descriptor points at. It is a closed set
//! of variants dispatched with `match`; descriptor tables share channels
//! through `Arc`, and a channel is destroyed when the last descriptor that
//! refers to it goes away. Destroying a pipe end notifies the other end.

use crate::interface::{
    normpath, syscall_error, Dirent, DirentType, EmulatedPipe, Errno, FileHandle,
    FileSystem, OpenFlags, Registration, StatData, SyscallResult, Terminal, Vfs, WakeUpNotifier,
    WakeUpRegistry, WinSize,
};

use super::syscalls::fs_constants::*;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

const NULLDEVNO: u64 = (1 << 8) | 3;

/// Readiness of a channel, evaluated without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub rd: bool,
    pub wr: bool,
    pub ex: bool,
}

/// A file or directory opened through the VFS.
pub struct VfsChannel {
    vfs: Arc<Vfs>,
    path: String,
    flags: OpenFlags,
    handle: Mutex<Box<dyn FileHandle>>,
    cursor: Mutex<usize>,
}

pub enum ChannelKind {
    Vfs(VfsChannel),
    PipeSink(Arc<EmulatedPipe>),
    PipeSource(Arc<EmulatedPipe>),
    Terminal(Arc<dyn Terminal>),
    NullInput,
}

pub struct IoChannel {
    kind: ChannelKind,
    waiters: Arc<WakeUpRegistry>,
}

impl IoChannel {
    /// Opens `path` (already absolute) through the VFS.
    pub fn open_vfs(vfs: Arc<Vfs>, path: &str, flags: OpenFlags) -> SyscallResult<Arc<IoChannel>> {
        let handle = vfs.open(path, flags).map_err(|e| {
            log::debug!("open: {}", e);
            Errno::from(e)
        })?;
        Ok(Arc::new(IoChannel {
            kind: ChannelKind::Vfs(VfsChannel {
                vfs,
                path: path.to_string(),
                flags,
                handle: Mutex::new(handle),
                cursor: Mutex::new(0),
            }),
            waiters: WakeUpRegistry::new(),
        }))
    }

    /// Wraps both ends of `pipe`, returning `(source, sink)`.
    pub fn pipe_pair(pipe: Arc<EmulatedPipe>) -> (Arc<IoChannel>, Arc<IoChannel>) {
        let source = Arc::new(IoChannel {
            waiters: pipe.source_waiters(),
            kind: ChannelKind::PipeSource(pipe.clone()),
        });
        let sink = Arc::new(IoChannel {
            waiters: pipe.sink_waiters(),
            kind: ChannelKind::PipeSink(pipe),
        });
        (source, sink)
    }

    pub fn terminal(term: Arc<dyn Terminal>) -> Arc<IoChannel> {
        let waiters = WakeUpRegistry::new();
        term.connect_read_avail(waiters.clone());
        Arc::new(IoChannel {
            kind: ChannelKind::Terminal(term),
            waiters,
        })
    }

    pub fn null_input() -> Arc<IoChannel> {
        Arc::new(IoChannel {
            kind: ChannelKind::NullInput,
            waiters: WakeUpRegistry::new(),
        })
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn is_readable(&self) -> bool {
        match &self.kind {
            ChannelKind::Vfs(v) => v.flags.is_readable(),
            ChannelKind::PipeSink(_) => false,
            _ => true,
        }
    }

    pub fn is_writable(&self) -> bool {
        match &self.kind {
            ChannelKind::Vfs(v) => v.flags.is_writable(),
            ChannelKind::PipeSink(_) | ChannelKind::Terminal(_) => true,
            ChannelKind::PipeSource(_) | ChannelKind::NullInput => false,
        }
    }

    /// Reads what is available right now into `buf`.
    ///
    /// `WouldBlock` means nothing is available yet and the stream has not
    /// ended; the caller is expected to wait and retry.
    pub fn read(&self, buf: &mut [u8]) -> SyscallResult<usize> {
        match &self.kind {
            ChannelKind::Vfs(v) => v.handle.lock().read(buf).map_err(|e| {
                log::debug!("read: {}", e);
                Errno::from(e)
            }),
            ChannelKind::PipeSource(pipe) => {
                let n = pipe.read_from_pipe(buf);
                if n == 0 && !buf.is_empty() && !pipe.is_sink_closed() {
                    //another reader sharing this end drained it first
                    return Err(Errno::WouldBlock);
                }
                Ok(n)
            }
            ChannelKind::PipeSink(_) => Err(syscall_error(
                Errno::PermissionDenied,
                "read",
                "descriptor is the write end of a pipe",
            )),
            ChannelKind::Terminal(term) => {
                let n = term.read(buf);
                if n == 0 && !buf.is_empty() && !term.avail() {
                    return Err(Errno::WouldBlock);
                }
                Ok(n)
            }
            ChannelKind::NullInput => Ok(0),
        }
    }

    /// Writes as much of `data[*progress..]` as is immediately possible and
    /// advances `progress` by the amount accepted.
    pub fn write(&self, data: &[u8], progress: &mut usize) -> SyscallResult {
        let pending = &data[(*progress).min(data.len())..];
        let accepted = match &self.kind {
            ChannelKind::Vfs(v) => {
                let n = v.handle.lock().write(pending).map_err(|e| {
                    log::debug!("write: {}", e);
                    Errno::from(e)
                })?;
                // a file is always writable, so no progress would spin forever
                if n == 0 && !pending.is_empty() {
                    return Err(syscall_error(Errno::Generic, "write", "file accepted no data"));
                }
                n
            }
            ChannelKind::PipeSink(pipe) => pipe.write_to_pipe(pending)?,
            ChannelKind::PipeSource(_) => {
                return Err(syscall_error(
                    Errno::PermissionDenied,
                    "write",
                    "descriptor is the read end of a pipe",
                ))
            }
            ChannelKind::Terminal(term) => {
                let n = term.write(pending);
                if n == 0 && !pending.is_empty() {
                    return Err(syscall_error(Errno::Generic, "write", "terminal rejected output"));
                }
                n
            }
            ChannelKind::NullInput => {
                return Err(syscall_error(
                    Errno::PermissionDenied,
                    "write",
                    "descriptor is read-only",
                ))
            }
        };
        *progress += accepted;
        Ok(())
    }

    pub fn readiness(&self) -> Readiness {
        match &self.kind {
            ChannelKind::Vfs(_) | ChannelKind::NullInput => Readiness {
                rd: true,
                wr: true,
                ex: false,
            },
            ChannelKind::PipeSource(pipe) => Readiness {
                rd: pipe.check_select_read(),
                wr: false,
                ex: false,
            },
            ChannelKind::PipeSink(pipe) => Readiness {
                rd: false,
                wr: pipe.check_select_write(),
                ex: false,
            },
            ChannelKind::Terminal(term) => Readiness {
                rd: term.avail(),
                wr: true,
                ex: false,
            },
        }
    }

    /// True if any of the requested conditions holds right now.
    pub fn check_unblock(&self, rd: bool, wr: bool, ex: bool) -> bool {
        let ready = self.readiness();
        (rd && ready.rd) || (wr && ready.wr) || (ex && ready.ex)
    }

    pub fn fstat(&self) -> SyscallResult<StatData> {
        match &self.kind {
            ChannelKind::Vfs(v) => v.handle.lock().stat().map_err(Errno::from),
            ChannelKind::PipeSource(pipe) | ChannelKind::PipeSink(pipe) => Ok(StatData {
                st_dev: PIPEDEVNO,
                st_ino: 0,
                st_mode: S_IFIFO | S_IRUSR | S_IWUSR,
                st_uid: DEFAULT_UID,
                st_gid: DEFAULT_GID,
                st_size: pipe.buffered() as u64,
            }),
            ChannelKind::Terminal(_) => Ok(StatData {
                st_dev: TERMINALDEVNO,
                st_ino: 0,
                st_mode: S_IFCHR | 0o620,
                st_uid: DEFAULT_UID,
                st_gid: DEFAULT_GID,
                st_size: 0,
            }),
            ChannelKind::NullInput => Ok(StatData {
                st_dev: NULLDEVNO,
                st_ino: 0,
                st_mode: S_IFCHR | 0o666,
                st_uid: DEFAULT_UID,
                st_gid: DEFAULT_GID,
                st_size: 0,
            }),
        }
    }

    pub fn ioctl(&self, request: u32) -> SyscallResult<WinSize> {
        match (&self.kind, request) {
            (ChannelKind::Terminal(term), TIOCGWINSZ) => Ok(term.size()),
            _ => Err(syscall_error(
                Errno::Unsupported,
                "ioctl",
                "request not supported by this descriptor",
            )),
        }
    }

    pub fn fcntl(&self, cmd: i32, _arg: i64) -> SyscallResult<i64> {
        let status_flags = match &self.kind {
            ChannelKind::Vfs(v) => v.flags,
            ChannelKind::PipeSource(_) | ChannelKind::NullInput => OpenFlags::RDONLY,
            ChannelKind::PipeSink(_) => OpenFlags::WRONLY,
            ChannelKind::Terminal(_) => OpenFlags::RDWR,
        };
        match cmd {
            F_GETFL => Ok(status_flags.bits() as i64),
            //close-on-exec is not modelled, descriptor flags read back as zero
            F_GETFD | F_SETFD => Ok(0),
            _ => Err(syscall_error(Errno::Unsupported, "fcntl", "unknown command")),
        }
    }

    /// Returns the next directory entry, advancing this channel's cursor.
    ///
    /// "." and ".." come first; once the directory is exhausted every call
    /// returns an end marker.
    pub fn dirent(&self) -> SyscallResult<Dirent> {
        let v = match &self.kind {
            ChannelKind::Vfs(v) => v,
            _ => {
                return Err(syscall_error(
                    Errno::Unsupported,
                    "dirent",
                    "descriptor is not a directory",
                ))
            }
        };
        if !v.is_directory()? {
            return Err(syscall_error(Errno::NotFound, "dirent", "not a directory"));
        }

        let mut cursor = v.cursor.lock();
        let entry = match *cursor {
            0 => Dirent {
                fileno: v.vfs.stat(&v.path).map_err(Errno::from)?.st_ino,
                kind: DirentType::Directory,
                name: ".".to_string(),
            },
            1 => {
                let parent = normpath("..", &v.path);
                Dirent {
                    fileno: v.vfs.stat(&parent).map_err(Errno::from)?.st_ino,
                    kind: DirentType::Directory,
                    name: "..".to_string(),
                }
            }
            index => match v.vfs.dirent(&v.path, index - 2).map_err(Errno::from)? {
                Some(entry) => entry,
                None => return Ok(Dirent::end()),
            },
        };
        *cursor += 1;
        Ok(entry)
    }

    /// Returns the path to make the caller's working directory.
    pub fn fchdir(&self) -> SyscallResult<String> {
        match &self.kind {
            ChannelKind::Vfs(v) => {
                if !v.is_directory()? {
                    return Err(syscall_error(Errno::NotFound, "fchdir", "not a directory"));
                }
                Ok(v.path.clone())
            }
            _ => Err(syscall_error(
                Errno::Unsupported,
                "fchdir",
                "descriptor is not a directory",
            )),
        }
    }

    /// Adds `notifier` to this channel's waiter set until the returned guard
    /// is dropped.
    pub fn register_wake_up_notifier(&self, notifier: WakeUpNotifier) -> Registration {
        Registration::new(self.waiters.clone(), notifier)
    }

    pub fn unregister_wake_up_notifier(&self, id: u64) {
        self.waiters.unregister(id);
    }
}

impl VfsChannel {
    fn is_directory(&self) -> SyscallResult<bool> {
        let st = self.handle.lock().stat().map_err(Errno::from)?;
        Ok(st.st_mode & S_FILETYPEFLAGS == S_IFDIR)
    }
}

impl Drop for IoChannel {
    fn drop(&mut self) {
        match &self.kind {
            ChannelKind::PipeSink(pipe) => pipe.close_sink(),
            ChannelKind::PipeSource(pipe) => pipe.close_source(),
            _ => {}
        }
    }
}

impl fmt::Debug for IoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ChannelKind::Vfs(v) => format!("Vfs({})", v.path),
            ChannelKind::PipeSink(_) => "PipeSink".to_string(),
            ChannelKind::PipeSource(_) => "PipeSource".to_string(),
            ChannelKind::Terminal(_) => "Terminal".to_string(),
            ChannelKind::NullInput => "NullInput".to_string(),
        };
        f.debug_struct("IoChannel")
            .field("kind", &kind)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
