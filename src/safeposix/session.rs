//! Hosted-side syscall stub
//!
//! A [`Session`] is what a hosted program holds: its process and one reusable
//! [`Sysio`] buffer. [`Session::call`] is the raw transport (opcode in,
//! boolean out, details in the buffer); the typed wrappers below fill in the
//! request, make the call and unpack the matching output variant.

use crate::interface::{
    pack_strings, syscall_error, Dirent, Errno, OpenFlags, SelectFd, SelectReady, StatData,
    SyscallResult, Syscall, Sysio, SysioIn, SysioOut, WinSize,
};

use super::loader::ExecTransfer;
use super::process::{Pid, Process};

use std::sync::Arc;
use std::time::Duration;

macro_rules! expect_out {
    ($out:expr, $variant:ident { $($field:ident),* } => $val:expr) => {
        match $out {
            SysioOut::$variant { $($field),* } => Ok($val),
            _ => Err(syscall_error(Errno::Generic, "session", "unexpected sysio output")),
        }
    };
}

pub struct Session {
    process: Arc<Process>,
    sysio: Sysio,
}

impl Session {
    pub fn new(process: Arc<Process>) -> Session {
        Session {
            process,
            sysio: Sysio::new(),
        }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn args(&self) -> &[String] {
        &self.process.args
    }

    /// The environment as a comma-joined `key=value` string.
    pub fn env(&self) -> &str {
        &self.process.env
    }

    pub fn sysio(&mut self) -> &mut Sysio {
        &mut self.sysio
    }

    /// Issues `opcode` with whatever the buffer currently holds.
    pub fn call(&mut self, opcode: Syscall) -> bool {
        self.process.syscall(opcode, &mut self.sysio)
    }

    fn invoke(&mut self, opcode: Syscall, input: SysioIn) -> SyscallResult<SysioOut> {
        self.sysio.request(input);
        if self.call(opcode) {
            Ok(std::mem::take(&mut self.sysio.output))
        } else {
            Err(self.sysio.error.unwrap_or(Errno::Generic))
        }
    }

    pub fn getcwd(&mut self) -> SyscallResult<String> {
        let out = self.invoke(Syscall::Getcwd, SysioIn::None)?;
        expect_out!(out, Getcwd { path } => path)
    }

    /// Writes all of `data`, splitting it into chunk-sized calls.
    pub fn write(&mut self, fd: i32, data: &[u8]) -> SyscallResult<usize> {
        let mut total = 0;
        for chunk in data.chunks(Sysio::CHUNK_SIZE) {
            let out = self.invoke(
                Syscall::Write,
                SysioIn::Write {
                    fd,
                    chunk: chunk.to_vec(),
                    count: chunk.len(),
                },
            )?;
            total += expect_out!(out, Write { count } => count)?;
        }
        Ok(total)
    }

    /// Reads at most `count` bytes (capped at one chunk); an empty result
    /// means end-of-stream.
    pub fn read(&mut self, fd: i32, count: usize) -> SyscallResult<Vec<u8>> {
        let count = count.min(Sysio::CHUNK_SIZE);
        let out = self.invoke(Syscall::Read, SysioIn::Read { fd, count })?;
        expect_out!(out, Read { chunk, count } => {
            let mut chunk = chunk;
            chunk.truncate(count);
            chunk
        })
    }

    /// Reads until end-of-stream.
    pub fn read_to_end(&mut self, fd: i32) -> SyscallResult<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let chunk = self.read(fd, Sysio::CHUNK_SIZE)?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }

    pub fn stat(&mut self, path: &str) -> SyscallResult<StatData> {
        let out = self.invoke(
            Syscall::Stat,
            SysioIn::Stat {
                path: path.to_string(),
            },
        )?;
        expect_out!(out, Stat { st } => st)
    }

    pub fn lstat(&mut self, path: &str) -> SyscallResult<StatData> {
        let out = self.invoke(
            Syscall::Lstat,
            SysioIn::Stat {
                path: path.to_string(),
            },
        )?;
        expect_out!(out, Stat { st } => st)
    }

    pub fn fstat(&mut self, fd: i32) -> SyscallResult<StatData> {
        let out = self.invoke(Syscall::Fstat, SysioIn::Fstat { fd })?;
        expect_out!(out, Stat { st } => st)
    }

    pub fn fcntl(&mut self, fd: i32, cmd: i32, arg: i64) -> SyscallResult<i64> {
        let out = self.invoke(Syscall::Fcntl, SysioIn::Fcntl { fd, cmd, arg })?;
        expect_out!(out, Fcntl { result } => result)
    }

    pub fn open(&mut self, path: &str, mode: OpenFlags) -> SyscallResult<i32> {
        let out = self.invoke(
            Syscall::Open,
            SysioIn::Open {
                path: path.to_string(),
                mode,
            },
        )?;
        expect_out!(out, Open { fd } => fd)
    }

    pub fn close(&mut self, fd: i32) -> SyscallResult {
        self.invoke(Syscall::Close, SysioIn::Close { fd })?;
        Ok(())
    }

    pub fn ioctl(&mut self, fd: i32, request: u32) -> SyscallResult<WinSize> {
        let out = self.invoke(Syscall::Ioctl, SysioIn::Ioctl { fd, request })?;
        expect_out!(out, Ioctl { winsize } => winsize)
    }

    pub fn dirent(&mut self, fd: i32) -> SyscallResult<Dirent> {
        let out = self.invoke(Syscall::Dirent, SysioIn::Dirent { fd })?;
        expect_out!(out, Dirent { entry } => entry)
    }

    pub fn fchdir(&mut self, fd: i32) -> SyscallResult {
        self.invoke(Syscall::Fchdir, SysioIn::Fchdir { fd })?;
        Ok(())
    }

    pub fn chdir(&mut self, path: &str) -> SyscallResult {
        self.invoke(
            Syscall::Chdir,
            SysioIn::Chdir {
                path: path.to_string(),
            },
        )?;
        Ok(())
    }

    /// Replaces the process image. On success the returned token must be
    /// handed back to the runner as `Exit::Exec`.
    pub fn execve(&mut self, filename: &str, args: &[&str], env: &[&str]) -> SyscallResult<ExecTransfer> {
        self.invoke(
            Syscall::Execve,
            SysioIn::Execve {
                filename: filename.to_string(),
                args: pack_strings(args),
                env: pack_strings(env),
            },
        )?;
        let process = self
            .process
            .replacement()
            .ok_or_else(|| syscall_error(Errno::Generic, "execve", "no replacement process"))?;
        Ok(ExecTransfer { process })
    }

    pub fn select(&mut self, fds: &[SelectFd], timeout: Option<Duration>) -> SyscallResult<SelectReady> {
        let out = self.invoke(
            Syscall::Select,
            SysioIn::Select {
                fds: fds.to_vec(),
                timeout,
            },
        )?;
        expect_out!(out, Select { ready } => ready)
    }

    /// Forks; the child resumes the program at `ip`/`sp`. Returns the
    /// child's PID.
    pub fn fork(&mut self, ip: usize, sp: usize) -> SyscallResult<Pid> {
        let out = self.invoke(
            Syscall::Fork,
            SysioIn::Fork {
                ip,
                sp,
                parent_cap_addr: 0,
            },
        )?;
        expect_out!(out, Fork { pid } => pid)
    }

    pub fn getpid(&mut self) -> SyscallResult<Pid> {
        let out = self.invoke(Syscall::Getpid, SysioIn::None)?;
        expect_out!(out, Getpid { pid } => pid)
    }

    pub fn getppid(&mut self) -> SyscallResult<Pid> {
        let out = self.invoke(Syscall::Getppid, SysioIn::None)?;
        expect_out!(out, Getppid { pid } => pid)
    }

    /// Returns `(pid, status)`; `pid` is 0 when `nohang` found nothing.
    pub fn wait4(&mut self, pid: Pid, nohang: bool) -> SyscallResult<(Pid, i32)> {
        let out = self.invoke(Syscall::Wait4, SysioIn::Wait4 { pid, nohang })?;
        expect_out!(out, Wait4 { pid, status } => (pid, status))
    }

    /// Returns `(read_fd, write_fd)`.
    pub fn pipe(&mut self) -> SyscallResult<(i32, i32)> {
        let out = self.invoke(Syscall::Pipe, SysioIn::None)?;
        expect_out!(out, Pipe { fd } => (fd[0], fd[1]))
    }

    pub fn dup(&mut self, fd: i32) -> SyscallResult<i32> {
        let out = self.invoke(Syscall::Dup, SysioIn::Dup { fd })?;
        expect_out!(out, Dup { fd } => fd)
    }

    pub fn dup2(&mut self, fd: i32, to_fd: i32) -> SyscallResult<i32> {
        let out = self.invoke(Syscall::Dup2, SysioIn::Dup2 { fd, to_fd })?;
        expect_out!(out, Dup2 { fd } => fd)
    }

    pub fn attach_region(&mut self, size: usize) -> SyscallResult<usize> {
        let mut resources = self.process.resources.lock();
        let resources = &mut *resources;
        resources.regions.attach(&mut resources.pool, size)
    }

    pub fn detach_region(&mut self, base: usize) -> SyscallResult {
        let mut resources = self.process.resources.lock();
        let resources = &mut *resources;
        resources.regions.detach(&mut resources.pool, base)
    }

    pub fn read_region(&self, base: usize, offset: usize, len: usize) -> SyscallResult<Vec<u8>> {
        self.process.resources.lock().regions.read(base, offset, len)
    }

    pub fn write_region(&mut self, base: usize, offset: usize, data: &[u8]) -> SyscallResult {
        self.process.resources.lock().regions.write(base, offset, data)
    }
}
