// System related system calls
use crate::interface::{self, env_blob_to_string, syscall_error, unpack_strings, Errno, SyscallResult, Sysio};
use crate::safeposix::fdtable::FdTable;
use crate::safeposix::process::{Pid, Process, Resources};
use crate::safeposix::dispatcher::Start;

use super::sys_constants::*;

impl Process {
    /// Forks the calling process.
    ///
    /// The child gets a new PID, a copy of the descriptor table sharing every
    /// channel, a deep copy of the memory pool and regions, and starts on its
    /// own thread by resuming the program at `ip`/`sp`.
    pub fn fork_syscall(&self, ip: usize, sp: usize, parent_cap_addr: usize) -> SyscallResult<Pid> {
        //construct new process with a cloned fdtable and address space
        let fdtable = self.fdtable.lock().clone();
        let resources = self.resources.lock().clone();
        let cwd = self.cwd.read().clone();

        let child = {
            let mut tree = self.system.tree();
            let pid = tree.allocate_pid();
            let child = Process::new(
                self.system.clone(),
                pid,
                fdtable,
                cwd,
                self.args.clone(),
                self.env.clone(),
                resources,
            );
            tree.insert(pid, Some(self.pid), child.clone());
            child
        };
        log::info!(
            "pid {}: forked child {} (ip={:#x} sp={:#x} cap={:#x})",
            self.pid,
            child.pid,
            ip,
            sp,
            parent_cap_addr
        );

        let childpid = child.pid;
        if let Err(e) = self.system.start(child, Start::Resume { ip, sp }) {
            self.system.tree().remove(childpid);
            return Err(e);
        }
        Ok(childpid)
    }

    /// Replaces the process image.
    ///
    /// The image is validated before anything changes; on failure the caller
    /// carries on untouched. On success a new process with the same PID,
    /// parent and descriptors takes over the family-tree slot, and the
    /// caller's execution context must unwind (see `Session::execve`).
    pub fn execve_syscall(&self, filename: &str, args: &[u8], env: &[u8]) -> SyscallResult {
        self.check_cancelled("execve")?;
        if self.is_replaced() {
            return Err(syscall_error(Errno::Generic, "execve", "image already replaced"));
        }
        if args.len() > Sysio::ARGS_MAX_LEN {
            return Err(syscall_error(Errno::Generic, "execve", "arguments exceed ARGS_MAX_LEN"));
        }
        let env = env_blob_to_string(env)?;
        let args = unpack_strings(args);

        let cwd = self.cwd.read().clone();
        let path = interface::normpath(filename, &cwd);
        let entrypoint = self.system.loader().load(self.system.vfs(), &path)?;
        let name = entrypoint.name.clone();

        let newprocess = Process::new(
            self.system.clone(),
            self.pid,
            FdTable::new(),
            cwd,
            args,
            env,
            Resources::new(entrypoint),
        );
        self.system.tree().replace(self.pid, newprocess.clone())?;

        let fdtable = std::mem::take(&mut *self.fdtable.lock());
        *newprocess.fdtable.lock() = fdtable;
        self.set_replacement(newprocess);
        log::info!("pid {}: exec {} ({})", self.pid, path, name);
        Ok(())
    }

    pub fn getpid_syscall(&self) -> Pid {
        self.pid
    }

    // 0 once orphaned, and for init
    pub fn getppid_syscall(&self) -> Pid {
        self.system.tree().parent_of(self.pid).unwrap_or(0)
    }

    /// Waits for a child to exit and reaps it.
    ///
    /// `pid` selects one child; `WAIT_ANY` (or any value below 1) accepts
    /// any child. With `nohang` and no exited child the result is `(0, 0)`.
    /// Fails with `InvalidDescriptor` if no matching child exists, which
    /// includes a child that was already reaped.
    pub fn wait4_syscall(&self, pid: Pid, nohang: bool) -> SyscallResult<(Pid, i32)> {
        let target = if pid == WAIT_ANY || pid < INIT_PID {
            None
        } else {
            Some(pid)
        };

        loop {
            let reaped = self.system.tree().reap(self.pid, target)?;
            if let Some(reaped) = reaped {
                reaped.process.submit_exit_signal();
                log::info!(
                    "pid {}: reaped child {} (status {})",
                    self.pid,
                    reaped.pid,
                    reaped.status
                );
                return Ok((reaped.pid, reaped.status));
            }
            if nohang {
                return Ok((0, 0));
            }
            self.check_cancelled("wait4")?;
            self.blocker.down();
        }
    }
}
