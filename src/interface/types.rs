//! Syscall transport types
//!
//! A hosted process talks to the emulation layer through one [`Sysio`]
//! buffer: it fills in the input variant for the opcode it issues, makes the
//! call, and reads the output variant (or the error slot) afterwards. The
//! buffer is owned by the calling side and reused across calls.

use crate::interface::errnos::{syscall_error, Errno, SyscallResult};

use bitflags::bitflags;
use std::time::Duration;

/// Syscall opcodes understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Syscall {
    Getcwd = 1,
    Write = 2,
    Read = 3,
    Stat = 4,
    Lstat = 5,
    Fstat = 6,
    Fcntl = 7,
    Open = 8,
    Close = 9,
    Ioctl = 10,
    Dirent = 11,
    Fchdir = 12,
    Execve = 13,
    Select = 14,
    Fork = 15,
    Getpid = 16,
    Wait4 = 17,
    Pipe = 18,
    Dup2 = 19,
    Getppid = 20,
    Chdir = 21,
    Dup = 22,
}

impl Syscall {
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Getcwd => "getcwd",
            Syscall::Write => "write",
            Syscall::Read => "read",
            Syscall::Stat => "stat",
            Syscall::Lstat => "lstat",
            Syscall::Fstat => "fstat",
            Syscall::Fcntl => "fcntl",
            Syscall::Open => "open",
            Syscall::Close => "close",
            Syscall::Ioctl => "ioctl",
            Syscall::Dirent => "dirent",
            Syscall::Fchdir => "fchdir",
            Syscall::Execve => "execve",
            Syscall::Select => "select",
            Syscall::Fork => "fork",
            Syscall::Getpid => "getpid",
            Syscall::Wait4 => "wait4",
            Syscall::Pipe => "pipe",
            Syscall::Dup2 => "dup2",
            Syscall::Getppid => "getppid",
            Syscall::Chdir => "chdir",
            Syscall::Dup => "dup",
        }
    }
}

impl TryFrom<u32> for Syscall {
    type Error = Errno;

    fn try_from(callnum: u32) -> Result<Syscall, Errno> {
        let sc = match callnum {
            1 => Syscall::Getcwd,
            2 => Syscall::Write,
            3 => Syscall::Read,
            4 => Syscall::Stat,
            5 => Syscall::Lstat,
            6 => Syscall::Fstat,
            7 => Syscall::Fcntl,
            8 => Syscall::Open,
            9 => Syscall::Close,
            10 => Syscall::Ioctl,
            11 => Syscall::Dirent,
            12 => Syscall::Fchdir,
            13 => Syscall::Execve,
            14 => Syscall::Select,
            15 => Syscall::Fork,
            16 => Syscall::Getpid,
            17 => Syscall::Wait4,
            18 => Syscall::Pipe,
            19 => Syscall::Dup2,
            20 => Syscall::Getppid,
            21 => Syscall::Chdir,
            22 => Syscall::Dup,
            _ => {
                return Err(syscall_error(
                    Errno::Unsupported,
                    "dispatcher",
                    "unknown syscall number",
                ))
            }
        };
        Ok(sc)
    }
}

bitflags! {
    /// Access mode and creation flags passed to open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn is_readable(&self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn is_writable(&self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

//derive eq attributes for testing whether the structs equal other statdata structs from stat/fstat
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct StatData {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentType {
    End,
    Directory,
    File,
    Symlink,
    Fifo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub fileno: u64,
    pub kind: DirentType,
    pub name: String,
}

impl Dirent {
    pub fn end() -> Dirent {
        Dirent {
            fileno: 0,
            kind: DirentType::End,
            name: String::new(),
        }
    }
}

/// One watched descriptor and the conditions select should wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectFd {
    pub fd: i32,
    pub rd: bool,
    pub wr: bool,
    pub ex: bool,
}

/// Result of select: the one descriptor reported plus its readiness.
///
/// With nothing ready (timeout expired) all counts are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectReady {
    pub fd: i32,
    pub num_rd: usize,
    pub num_wr: usize,
    pub num_ex: usize,
}

impl SelectReady {
    pub fn none() -> SelectReady {
        SelectReady::default()
    }

    pub fn total(&self) -> usize {
        self.num_rd + self.num_wr + self.num_ex
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WinSize {
    pub columns: u16,
    pub rows: u16,
}

/// Per-opcode input fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SysioIn {
    #[default]
    None,
    Write {
        fd: i32,
        chunk: Vec<u8>,
        count: usize,
    },
    Read {
        fd: i32,
        count: usize,
    },
    Stat {
        path: String,
    },
    Fstat {
        fd: i32,
    },
    Fcntl {
        fd: i32,
        cmd: i32,
        arg: i64,
    },
    Open {
        path: String,
        mode: OpenFlags,
    },
    Close {
        fd: i32,
    },
    Ioctl {
        fd: i32,
        request: u32,
    },
    Dirent {
        fd: i32,
    },
    Fchdir {
        fd: i32,
    },
    Chdir {
        path: String,
    },
    /// `args` and `env` are NUL-separated records ended by an extra NUL.
    Execve {
        filename: String,
        args: Vec<u8>,
        env: Vec<u8>,
    },
    /// A `timeout` of `None` waits forever, `Some(Duration::ZERO)` polls.
    Select {
        fds: Vec<SelectFd>,
        timeout: Option<Duration>,
    },
    Fork {
        ip: usize,
        sp: usize,
        parent_cap_addr: usize,
    },
    Wait4 {
        pid: i32,
        nohang: bool,
    },
    Dup2 {
        fd: i32,
        to_fd: i32,
    },
    Dup {
        fd: i32,
    },
}

/// Per-opcode output fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SysioOut {
    #[default]
    None,
    Getcwd { path: String },
    Write { count: usize },
    Read { chunk: Vec<u8>, count: usize },
    Stat { st: StatData },
    Fcntl { result: i64 },
    Open { fd: i32 },
    Ioctl { winsize: WinSize },
    Dirent { entry: Dirent },
    Select { ready: SelectReady },
    Fork { pid: i32 },
    Getpid { pid: i32 },
    Getppid { pid: i32 },
    Wait4 { pid: i32, status: i32 },
    Pipe { fd: [i32; 2] },
    Dup2 { fd: i32 },
    Dup { fd: i32 },
}

/// Request/response buffer shared between a process and the dispatcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sysio {
    pub input: SysioIn,
    pub output: SysioOut,
    pub error: Option<Errno>,
}

impl Sysio {
    pub const CHUNK_SIZE: usize = 4096;
    pub const PATH_MAX_LEN: usize = 512;
    pub const ARGS_MAX_LEN: usize = 4096;
    pub const ENV_MAX_LEN: usize = 4096;
    pub const SELECT_FDS_MAX: usize = 64;

    pub fn new() -> Sysio {
        Sysio::default()
    }

    /// Prepares the buffer for the next call.
    pub fn request(&mut self, input: SysioIn) {
        self.input = input;
        self.output = SysioOut::None;
        self.error = None;
    }
}

pub fn get_path(path: &str) -> SyscallResult<&str> {
    if path.is_empty() {
        return Err(syscall_error(Errno::NotFound, "dispatcher", "empty path"));
    }
    if path.len() >= Sysio::PATH_MAX_LEN {
        return Err(syscall_error(
            Errno::NotFound,
            "dispatcher",
            "path exceeds PATH_MAX_LEN",
        ));
    }
    Ok(path)
}

pub fn get_chunk(chunk: &[u8], count: usize) -> SyscallResult<&[u8]> {
    if count > Sysio::CHUNK_SIZE || count > chunk.len() {
        return Err(syscall_error(
            Errno::Generic,
            "dispatcher",
            "count exceeds the chunk buffer",
        ));
    }
    Ok(&chunk[..count])
}

pub fn get_count(count: usize) -> SyscallResult<usize> {
    if count > Sysio::CHUNK_SIZE {
        return Err(syscall_error(
            Errno::Generic,
            "dispatcher",
            "count exceeds CHUNK_SIZE",
        ));
    }
    Ok(count)
}

/// Serializes strings into NUL-separated records ended by an extra NUL.
pub fn pack_strings<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let mut buf = Vec::new();
    for s in strings {
        buf.extend_from_slice(s.as_ref().as_bytes());
        buf.push(0);
    }
    buf.push(0);
    buf
}

/// Reads NUL-separated records up to the terminating empty record.
pub fn unpack_strings(buf: &[u8]) -> Vec<String> {
    buf.split(|b| *b == 0)
        .take_while(|record| !record.is_empty())
        .map(|record| String::from_utf8_lossy(record).into_owned())
        .collect()
}

/// Turns an execve environment blob into the comma-joined `k=v,k2=v2` form
/// kept by a process.
pub fn env_blob_to_string(blob: &[u8]) -> SyscallResult<String> {
    if blob.len() > Sysio::ENV_MAX_LEN {
        return Err(syscall_error(
            Errno::Generic,
            "execve",
            "environment blob exceeds ENV_MAX_LEN",
        ));
    }
    let joined = unpack_strings(blob).join(",");
    if joined.len() >= Sysio::ENV_MAX_LEN {
        return Err(syscall_error(
            Errno::Generic,
            "execve",
            "environment exceeds ENV_MAX_LEN",
        ));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_blob_is_comma_joined() {
        let blob = pack_strings(&["HOME=/", "PATH=/bin"]);
        assert_eq!(env_blob_to_string(&blob).unwrap(), "HOME=/,PATH=/bin");
        assert_eq!(env_blob_to_string(&[0]).unwrap(), "");
    }

    #[test]
    fn oversized_env_blob_is_rejected() {
        // the first record's NUL lands on the last byte allowed
        let first = format!("K={}", "x".repeat(Sysio::ENV_MAX_LEN - 3));
        let blob = pack_strings(&[first.as_str(), "LAST=ok"]);
        assert!(blob.len() > Sysio::ENV_MAX_LEN);
        assert_eq!(env_blob_to_string(&blob), Err(Errno::Generic));
    }

    #[test]
    fn unknown_callnum_is_unsupported() {
        assert_eq!(Syscall::try_from(0), Err(Errno::Unsupported));
        assert_eq!(Syscall::try_from(17), Ok(Syscall::Wait4));
    }
}
