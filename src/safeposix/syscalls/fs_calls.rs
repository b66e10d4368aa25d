// File system related system calls
use crate::interface::{
    self, new_pipe, syscall_error, Dirent, Errno, FileSystem, OpenFlags, SelectFd, SelectReady,
    StatData, SyscallResult, Sysio, WakeUpNotifier, WinSize, PIPE_BUFFER_SIZE,
};
use crate::safeposix::channel::IoChannel;
use crate::safeposix::process::Process;

use super::fs_constants::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

impl Process {
    fn resolve(&self, path: &str) -> String {
        interface::normpath(path, &self.cwd.read())
    }

    fn lookup_fd(&self, fd: i32) -> SyscallResult<Arc<IoChannel>> {
        self.fdtable.lock().lookup(fd)
    }

    /// Parks the calling process until `ready` holds.
    ///
    /// The process registers on every channel in `channels`, re-checks, and
    /// blocks; any wake-up leads to a fresh check. Returns `Ok(false)` if
    /// `deadline` passed first and fails with `Generic` once the process has
    /// been cancelled.
    fn block_until<F>(
        &self,
        syscall: &str,
        channels: &[Arc<IoChannel>],
        deadline: Option<Instant>,
        ready: F,
    ) -> SyscallResult<bool>
    where
        F: Fn() -> bool,
    {
        loop {
            if ready() {
                return Ok(true);
            }
            self.check_cancelled(syscall)?;

            let _registrations: Vec<_> = channels
                .iter()
                .map(|ch| ch.register_wake_up_notifier(WakeUpNotifier::new(self.blocker.clone())))
                .collect();
            // readiness may have flipped before we registered
            if ready() {
                return Ok(true);
            }
            match deadline {
                None => self.blocker.down(),
                Some(deadline) => {
                    if !self.blocker.down_until(deadline) {
                        return Ok(ready());
                    }
                }
            }
        }
    }

    pub fn getcwd_syscall(&self) -> String {
        self.cwd.read().clone()
    }

    /// ### Description
    ///
    /// `write_syscall` writes all of `buf` to the channel behind `fd`. It
    /// blocks whenever the channel cannot take more data (a full pipe) and
    /// resumes once it is woken, so a successful write is never short.
    ///
    /// ### Returns
    ///
    /// The number of bytes written, always `buf.len()`.
    ///
    /// ### Errors
    ///
    /// * `InvalidDescriptor` - `fd` is not open.
    /// * `PermissionDenied` - the descriptor is not open for writing, or the
    ///   read end of the pipe has been closed.
    /// * `Generic` - the process was cancelled while blocked.
    pub fn write_syscall(&self, fd: i32, buf: &[u8]) -> SyscallResult<usize> {
        let channel = self.lookup_fd(fd)?;
        if !channel.is_writable() {
            return Err(syscall_error(
                Errno::PermissionDenied,
                "write",
                "descriptor is not open for writing",
            ));
        }

        let mut progress = 0;
        while progress < buf.len() {
            let watched = [channel.clone()];
            self.block_until("write", &watched, None, || {
                channel.check_unblock(false, true, false)
            })?;
            channel.write(buf, &mut progress)?;
        }
        Ok(progress)
    }

    /// ### Description
    ///
    /// `read_syscall` blocks until the channel behind `fd` is readable and then
    /// performs a single read of at most `count` bytes. An empty result means
    /// end-of-stream.
    ///
    /// ### Errors
    ///
    /// * `InvalidDescriptor` - `fd` is not open.
    /// * `PermissionDenied` - the descriptor is not open for reading.
    /// * `Generic` - the process was cancelled while blocked.
    pub fn read_syscall(&self, fd: i32, count: usize) -> SyscallResult<Vec<u8>> {
        let channel = self.lookup_fd(fd)?;
        if !channel.is_readable() {
            return Err(syscall_error(
                Errno::PermissionDenied,
                "read",
                "descriptor is not open for reading",
            ));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; count];
        loop {
            let watched = [channel.clone()];
            self.block_until("read", &watched, None, || {
                channel.check_unblock(true, false, false)
            })?;
            match channel.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(Errno::WouldBlock) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn stat_syscall(&self, path: &str) -> SyscallResult<StatData> {
        let path = self.resolve(path);
        self.system.vfs().stat(&path).map_err(|e| {
            log::debug!("stat: {}", e);
            Errno::from(e)
        })
    }

    // there are no symbolic links, lstat and stat agree
    pub fn lstat_syscall(&self, path: &str) -> SyscallResult<StatData> {
        self.stat_syscall(path)
    }

    pub fn fstat_syscall(&self, fd: i32) -> SyscallResult<StatData> {
        self.lookup_fd(fd)?.fstat()
    }

    pub fn fcntl_syscall(&self, fd: i32, cmd: i32, arg: i64) -> SyscallResult<i64> {
        self.lookup_fd(fd)?.fcntl(cmd, arg)
    }

    /// Opens `path` relative to the working directory and installs it at the
    /// lowest free descriptor. Nothing is installed if any step fails.
    pub fn open_syscall(&self, path: &str, flags: OpenFlags) -> SyscallResult<i32> {
        let path = self.resolve(path);
        let channel = IoChannel::open_vfs(self.system.vfs().clone(), &path, flags)?;
        self.fdtable.lock().add(channel)
    }

    pub fn close_syscall(&self, fd: i32) -> SyscallResult {
        let channel = self.fdtable.lock().remove(fd)?;
        // last reference gone means the channel shuts down here
        drop(channel);
        Ok(())
    }

    pub fn ioctl_syscall(&self, fd: i32, request: u32) -> SyscallResult<WinSize> {
        self.lookup_fd(fd)?.ioctl(request)
    }

    pub fn dirent_syscall(&self, fd: i32) -> SyscallResult<Dirent> {
        self.lookup_fd(fd)?.dirent()
    }

    pub fn fchdir_syscall(&self, fd: i32) -> SyscallResult {
        let newcwd = self.lookup_fd(fd)?.fchdir()?;
        *self.cwd.write() = newcwd;
        Ok(())
    }

    pub fn chdir_syscall(&self, path: &str) -> SyscallResult {
        let truepath = self.resolve(path);
        let st = self.stat_syscall(&truepath)?;
        if st.st_mode & S_FILETYPEFLAGS != S_IFDIR {
            return Err(syscall_error(Errno::NotFound, "chdir", "not a directory"));
        }
        *self.cwd.write() = truepath;
        Ok(())
    }

    /// ### Description
    ///
    /// `select_syscall` reports the first watched descriptor that is ready
    /// for any of its requested conditions. Only one descriptor is reported
    /// per call, even if several are ready.
    ///
    /// ### Arguments
    ///
    /// * `fds` - watched descriptors with their read/write/exception flags.
    /// * `timeout` - `None` waits indefinitely, `Some(Duration::ZERO)` polls,
    ///   anything else bounds the wait.
    ///
    /// ### Returns
    ///
    /// The ready descriptor and its counts, or all-zero counts if the
    /// timeout expired first.
    ///
    /// ### Errors
    ///
    /// * `InvalidDescriptor` - a watched descriptor is not open.
    /// * `Generic` - too many descriptors, no condition to wait for without a
    ///   timeout, or the process was cancelled.
    pub fn select_syscall(&self, fds: &[SelectFd], timeout: Option<Duration>) -> SyscallResult<SelectReady> {
        if fds.len() > Sysio::SELECT_FDS_MAX {
            return Err(syscall_error(Errno::Generic, "select", "too many descriptors"));
        }
        let watched = {
            let fdtable = self.fdtable.lock();
            fds.iter()
                .map(|w| fdtable.lookup(w.fd).map(|ch| (*w, ch)))
                .collect::<SyscallResult<Vec<_>>>()?
        };
        // an entry asking for no condition can never be reported
        let watched: Vec<_> = watched
            .into_iter()
            .filter(|(w, _)| w.rd || w.wr || w.ex)
            .collect();
        if watched.is_empty() && timeout.is_none() {
            return Err(syscall_error(Errno::Generic, "select", "nothing to wait for"));
        }

        let scan = || {
            watched.iter().find_map(|(w, ch)| {
                let r = ch.readiness();
                let ready = SelectReady {
                    fd: w.fd,
                    num_rd: (w.rd && r.rd) as usize,
                    num_wr: (w.wr && r.wr) as usize,
                    num_ex: (w.ex && r.ex) as usize,
                };
                (ready.total() > 0).then_some(ready)
            })
        };

        if let Some(ready) = scan() {
            return Ok(ready);
        }
        if timeout == Some(Duration::ZERO) {
            return Ok(SelectReady::none());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let channels: Vec<Arc<IoChannel>> = watched.iter().map(|(_, ch)| ch.clone()).collect();
        self.block_until("select", &channels, deadline, || scan().is_some())?;
        Ok(scan().unwrap_or_else(SelectReady::none))
    }

    /// ### Description
    ///
    /// `pipe_syscall` creates a pipe and installs its read end, then its write
    /// end, at the lowest free descriptors.
    ///
    /// ### Returns
    ///
    /// `(read_fd, write_fd)`.
    ///
    /// ### Errors
    ///
    /// * `Generic` - the descriptor table is full; nothing stays installed.
    ///
    /// [pipe(2)](https://man7.org/linux/man-pages/man2/pipe.2.html)
    pub fn pipe_syscall(&self) -> SyscallResult<(i32, i32)> {
        let (source, sink) = IoChannel::pipe_pair(new_pipe(PIPE_BUFFER_SIZE));
        let mut fdtable = self.fdtable.lock();
        let readfd = fdtable.add(source)?;
        match fdtable.add(sink) {
            Ok(writefd) => Ok((readfd, writefd)),
            Err(e) => {
                let _ = fdtable.remove(readfd);
                Err(e)
            }
        }
    }

    pub fn dup_syscall(&self, fd: i32) -> SyscallResult<i32> {
        let mut fdtable = self.fdtable.lock();
        let channel = fdtable.lookup(fd)?;
        fdtable.add(channel)
    }

    /// ## `dup2_syscall`
    ///
    /// ### Description
    /// Makes `newfd` refer to the same channel as `oldfd`. If `newfd` was
    /// already open it is closed silently first. If both are equal, `newfd`
    /// is returned untouched.
    ///
    /// ### Errors
    /// * `InvalidDescriptor` - `oldfd` is not open, or `newfd` is out of range.
    ///
    /// [dup2(2)](https://linux.die.net/man/2/dup2)
    pub fn dup2_syscall(&self, oldfd: i32, newfd: i32) -> SyscallResult<i32> {
        let prior = {
            let mut fdtable = self.fdtable.lock();
            let channel = fdtable.lookup(oldfd)?;
            if oldfd == newfd {
                return Ok(newfd);
            }
            fdtable.add_at(channel, newfd)?
        };
        drop(prior);
        Ok(newfd)
    }
}
