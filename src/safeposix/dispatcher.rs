//! Syscall dispatcher and system lifecycle
//!
//! [`System`] owns everything processes share: the VFS mount table, the image
//! loader, the terminal and the family tree. Every process runs its program on
//! its own thread and enters the emulation layer through
//! [`Process::syscall`], which validates the sysio buffer, calls the matching
//! `*_syscall` method and writes back either the output or the error.

use crate::interface::{
    self, get_chunk, get_count, get_path, syscall_error, Errno, SyscallResult, Syscall, Sysio,
    SysioIn, SysioOut, Terminal, Vfs,
};

use super::channel::IoChannel;
use super::family::FamilyTree;
use super::fdtable::FdTable;
use super::loader::{Entrypoint, Exit, ImageLoader};
use super::process::{Pid, Process, Resources};
use super::session::Session;
use super::syscalls::fs_constants::*;
use super::syscalls::sys_constants::*;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

//this macro takes in a syscall invocation name (i.e. process.fork_syscall), and all of the arguments
//to the syscall. Then it unwraps the arguments, returning the error if any one of them is an error
//value, and returning the result of the syscall if not. It does this by using the ? operator in
//the body of a closure within the variadic macro
macro_rules! check_and_dispatch {
    ( $process:ident . $func:ident, $($arg:expr),* ) => {
        (|| $process.$func( $($arg?),* ))()
    };
}

/// How a process thread enters its program.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Start {
    Run,
    Resume { ip: usize, sp: usize },
}

#[derive(Default)]
struct InitState {
    pid: Option<Pid>,
    status: Option<i32>,
}

pub struct System {
    vfs: Arc<Vfs>,
    loader: ImageLoader,
    terminal: Arc<dyn Terminal>,
    tree: Mutex<FamilyTree>,
    init: Mutex<InitState>,
    init_cv: Condvar,
}

impl System {
    pub fn init(vfs: Arc<Vfs>, loader: ImageLoader, terminal: Arc<dyn Terminal>) -> Arc<System> {
        log::debug!("system initialized, mounts: {:?}", vfs.mount_points());
        Arc::new(System {
            vfs,
            loader,
            terminal,
            tree: Mutex::new(FamilyTree::new()),
            init: Mutex::new(InitState::default()),
            init_cv: Condvar::new(),
        })
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    pub(crate) fn tree(&self) -> MutexGuard<'_, FamilyTree> {
        self.tree.lock()
    }

    /// The running process with `pid`, if any.
    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.tree.lock().get(pid)
    }

    // stdin, stdout and stderr all share one terminal channel
    fn stdio_table(&self) -> SyscallResult<FdTable> {
        let mut fdtable = FdTable::new();
        let term = IoChannel::terminal(self.terminal.clone());
        for fd in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
            fdtable.add_at(term.clone(), fd)?;
        }
        Ok(fdtable)
    }

    fn create_init(
        self: &Arc<Self>,
        entrypoint: Entrypoint,
        args: Vec<String>,
        env: String,
    ) -> SyscallResult<Arc<Process>> {
        let fdtable = self.stdio_table()?;
        let mut tree = self.tree.lock();
        let mut init = self.init.lock();
        if init.pid.is_some() {
            return Err(syscall_error(Errno::Generic, "spawn", "init already exists"));
        }
        let pid = tree.allocate_pid();
        let process = Process::new(
            self.clone(),
            pid,
            fdtable,
            "/".to_string(),
            args,
            env,
            Resources::new(entrypoint),
        );
        tree.insert(pid, None, process.clone());
        init.pid = Some(pid);
        log::info!("pid {}: init created ({})", pid, process.entrypoint().name);
        Ok(process)
    }

    /// Loads the image at `path` and starts it as the parentless init
    /// process on its own thread.
    pub fn spawn_init(self: &Arc<Self>, path: &str, args: Vec<String>, env: String) -> SyscallResult<Pid> {
        let path = interface::normpath(get_path(path)?, "/");
        let entrypoint = self.loader.load(&self.vfs, &path)?;
        let process = self.create_init(entrypoint, args, env)?;
        let pid = process.pid;
        if let Err(e) = self.start(process, Start::Run) {
            self.tree.lock().remove(pid);
            *self.init.lock() = InitState::default();
            return Err(e);
        }
        Ok(pid)
    }

    /// Creates the init process without a thread of its own; the caller
    /// drives it through a [`Session`] and ends it with [`Process::exit`].
    pub fn attach_init(
        self: &Arc<Self>,
        entrypoint: Entrypoint,
        args: Vec<String>,
        env: String,
    ) -> SyscallResult<Session> {
        let process = self.create_init(entrypoint, args, env)?;
        Ok(Session::new(process))
    }

    /// Blocks until init has exited and returns its status.
    pub fn wait_for_init(&self) -> i32 {
        let mut init = self.init.lock();
        loop {
            if let Some(status) = init.status {
                return status;
            }
            self.init_cv.wait(&mut init);
        }
    }

    pub fn wait_for_init_timeout(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        let mut init = self.init.lock();
        while init.status.is_none() {
            if self.init_cv.wait_until(&mut init, deadline).timed_out() {
                break;
            }
        }
        init.status
    }

    /// Cancels every live process and empties the family tree.
    pub fn finalize(&self) {
        let running = self.tree.lock().clear();
        for process in running.iter() {
            process.cancel();
        }
        log::info!("system finalized, {} process(es) cancelled", running.len());
    }

    pub(crate) fn start(self: &Arc<Self>, process: Arc<Process>, start: Start) -> SyscallResult {
        let pid = process.pid;
        std::thread::Builder::new()
            .name(format!("pid-{}", pid))
            .stack_size(PROCESS_STACK_SIZE)
            .spawn(move || run_process(process, start))
            .map(|_| ())
            .map_err(|e| {
                log::error!("pid {}: cannot start thread: {}", pid, e);
                syscall_error(Errno::Generic, "spawn", "thread creation failed")
            })
    }

    pub(crate) fn process_exited(&self, process: &Process, status: i32) {
        let outcome = self.tree.lock().mark_exited(process.pid, status);
        log::info!("pid {}: exited with status {}", process.pid, status);

        if let Some(parent) = outcome.parent {
            if process.take_exit_notification() {
                parent.notify_child_exit();
            }
        }
        if outcome.reaped {
            log::debug!("pid {}: reaped without a waiting parent", process.pid);
        }

        let mut init = self.init.lock();
        if init.pid == Some(process.pid) && init.status.is_none() {
            init.status = Some(status);
            self.init_cv.notify_all();
        }
    }
}

fn run_process(mut process: Arc<Process>, mut start: Start) {
    loop {
        let entrypoint = process.entrypoint();
        log::info!("pid {}: running {}", process.pid, entrypoint.name);
        let mut session = Session::new(process.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match start {
            Start::Run => entrypoint.program.run(&mut session),
            Start::Resume { ip, sp } => entrypoint.program.resume(&mut session, ip, sp),
        }));
        let exit = outcome.unwrap_or_else(|_| {
            log::error!("pid {}: program {} panicked", process.pid, entrypoint.name);
            Exit::Code(EXIT_FAILURE)
        });

        let next = match exit {
            Exit::Exec(transfer) => transfer.process,
            Exit::Code(status) => match process.replacement() {
                Some(next) => {
                    log::warn!("pid {}: program returned after execve", process.pid);
                    next
                }
                None => {
                    process.exit(status);
                    return;
                }
            },
        };
        process = next;
        start = Start::Run;
    }
}

impl Process {
    /// Executes `callnum` with the request in `sysio`.
    ///
    /// Returns true on success with the output variant filled in, false with
    /// `sysio.error` set otherwise. A panic inside the handler is contained
    /// and reported as `Generic`.
    pub fn syscall(&self, callnum: Syscall, sysio: &mut Sysio) -> bool {
        log::trace!("pid {}: {}", self.pid, callnum.name());
        let input = std::mem::take(&mut sysio.input);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(callnum, &input)));
        sysio.input = input;

        match result {
            Ok(Ok(output)) => {
                sysio.output = output;
                sysio.error = None;
                true
            }
            Ok(Err(e)) => {
                sysio.output = SysioOut::None;
                sysio.error = Some(e);
                false
            }
            Err(_) => {
                log::error!("pid {}: {} panicked", self.pid, callnum.name());
                sysio.output = SysioOut::None;
                sysio.error = Some(Errno::Generic);
                false
            }
        }
    }

    /// Like [`Process::syscall`] for a raw opcode number.
    pub fn syscall_raw(&self, callnum: u32, sysio: &mut Sysio) -> bool {
        match Syscall::try_from(callnum) {
            Ok(sc) => self.syscall(sc, sysio),
            Err(e) => {
                sysio.output = SysioOut::None;
                sysio.error = Some(e);
                false
            }
        }
    }

    fn dispatch(&self, callnum: Syscall, input: &SysioIn) -> SyscallResult<SysioOut> {
        let process = self;
        match (callnum, input) {
            (Syscall::Getcwd, SysioIn::None) => Ok(SysioOut::Getcwd {
                path: process.getcwd_syscall(),
            }),
            (Syscall::Write, SysioIn::Write { fd, chunk, count }) => {
                check_and_dispatch!(process.write_syscall, Ok::<i32, Errno>(*fd), get_chunk(chunk, *count))
                    .map(|count| SysioOut::Write { count })
            }
            (Syscall::Read, SysioIn::Read { fd, count }) => {
                check_and_dispatch!(process.read_syscall, Ok::<i32, Errno>(*fd), get_count(*count))
                    .map(|chunk| {
                        let count = chunk.len();
                        SysioOut::Read { chunk, count }
                    })
            }
            (Syscall::Stat, SysioIn::Stat { path }) => {
                check_and_dispatch!(process.stat_syscall, get_path(path)).map(|st| SysioOut::Stat { st })
            }
            (Syscall::Lstat, SysioIn::Stat { path }) => {
                check_and_dispatch!(process.lstat_syscall, get_path(path)).map(|st| SysioOut::Stat { st })
            }
            (Syscall::Fstat, SysioIn::Fstat { fd }) => {
                process.fstat_syscall(*fd).map(|st| SysioOut::Stat { st })
            }
            (Syscall::Fcntl, SysioIn::Fcntl { fd, cmd, arg }) => process
                .fcntl_syscall(*fd, *cmd, *arg)
                .map(|result| SysioOut::Fcntl { result }),
            (Syscall::Open, SysioIn::Open { path, mode }) => {
                check_and_dispatch!(process.open_syscall, get_path(path), Ok::<_, Errno>(*mode))
                    .map(|fd| SysioOut::Open { fd })
            }
            (Syscall::Close, SysioIn::Close { fd }) => {
                process.close_syscall(*fd).map(|_| SysioOut::None)
            }
            (Syscall::Ioctl, SysioIn::Ioctl { fd, request }) => process
                .ioctl_syscall(*fd, *request)
                .map(|winsize| SysioOut::Ioctl { winsize }),
            (Syscall::Dirent, SysioIn::Dirent { fd }) => {
                process.dirent_syscall(*fd).map(|entry| SysioOut::Dirent { entry })
            }
            (Syscall::Fchdir, SysioIn::Fchdir { fd }) => {
                process.fchdir_syscall(*fd).map(|_| SysioOut::None)
            }
            (Syscall::Chdir, SysioIn::Chdir { path }) => {
                check_and_dispatch!(process.chdir_syscall, get_path(path)).map(|_| SysioOut::None)
            }
            (Syscall::Execve, SysioIn::Execve { filename, args, env }) => {
                check_and_dispatch!(
                    process.execve_syscall,
                    get_path(filename),
                    Ok::<_, Errno>(args.as_slice()),
                    Ok::<_, Errno>(env.as_slice())
                )
                .map(|_| SysioOut::None)
            }
            (Syscall::Select, SysioIn::Select { fds, timeout }) => process
                .select_syscall(fds, *timeout)
                .map(|ready| SysioOut::Select { ready }),
            (Syscall::Fork, SysioIn::Fork { ip, sp, parent_cap_addr }) => process
                .fork_syscall(*ip, *sp, *parent_cap_addr)
                .map(|pid| SysioOut::Fork { pid }),
            (Syscall::Getpid, SysioIn::None) => Ok(SysioOut::Getpid {
                pid: process.getpid_syscall(),
            }),
            (Syscall::Getppid, SysioIn::None) => Ok(SysioOut::Getppid {
                pid: process.getppid_syscall(),
            }),
            (Syscall::Wait4, SysioIn::Wait4 { pid, nohang }) => process
                .wait4_syscall(*pid, *nohang)
                .map(|(pid, status)| SysioOut::Wait4 { pid, status }),
            (Syscall::Pipe, SysioIn::None) => process
                .pipe_syscall()
                .map(|(readfd, writefd)| SysioOut::Pipe {
                    fd: [readfd, writefd],
                }),
            (Syscall::Dup2, SysioIn::Dup2 { fd, to_fd }) => {
                process.dup2_syscall(*fd, *to_fd).map(|fd| SysioOut::Dup2 { fd })
            }
            (Syscall::Dup, SysioIn::Dup { fd }) => {
                process.dup_syscall(*fd).map(|fd| SysioOut::Dup { fd })
            }
            (sc, _) => Err(syscall_error(
                Errno::Generic,
                sc.name(),
                "sysio input does not match the opcode",
            )),
        }
    }
}
