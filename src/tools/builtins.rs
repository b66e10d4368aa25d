// Builtin hosted programs
//
// Small utilities written against the session interface, registered under
// their names so image files in the VFS can refer to them.

use crate::interface::{Errno, OpenFlags, SyscallResult, Sysio};
use crate::safeposix::loader::{Exit, ImageLoader, Program};
use crate::safeposix::session::Session;
use crate::safeposix::syscalls::*;

use std::sync::Arc;

// resume points handed to fork
const RESUME_EXEC: usize = 1;
const RESUME_PIPELINE_LEFT: usize = 2;
const RESUME_PIPELINE_RIGHT: usize = 3;

pub fn register_builtins(loader: &ImageLoader) {
    loader.register("echo", Arc::new(Echo));
    loader.register("cat", Arc::new(Cat));
    loader.register("true", Arc::new(ExitWith(EXIT_SUCCESS)));
    loader.register("false", Arc::new(ExitWith(EXIT_FAILURE)));
    loader.register("pwd", Arc::new(Pwd));
    loader.register("env", Arc::new(Env));
    loader.register("run", Arc::new(Run));
    loader.register("pipeline", Arc::new(Pipeline));
}

fn status_of(result: SyscallResult) -> Exit {
    match result {
        Ok(()) => Exit::Code(EXIT_SUCCESS),
        Err(e) => {
            log::debug!("builtin failed: {}", e);
            Exit::Code(EXIT_FAILURE)
        }
    }
}

// execve with the caller's own environment; only returns on failure
fn exec_argv(session: &mut Session, argv: &[String]) -> Exit {
    let Some(path) = argv.first() else {
        return Exit::Code(EXIT_FAILURE);
    };
    let args: Vec<&str> = argv.iter().map(String::as_str).collect();
    let env_owned = session.env().to_string();
    let env: Vec<&str> = env_owned.split(',').filter(|kv| !kv.is_empty()).collect();
    match session.execve(path, &args, &env) {
        Ok(transfer) => Exit::Exec(transfer),
        Err(e) => {
            let msg = format!("{}: cannot execute: {}\n", path, e);
            let _ = session.write(STDERR_FILENO, msg.as_bytes());
            Exit::Code(EXIT_FAILURE)
        }
    }
}

fn copy_fd(session: &mut Session, from: i32, to: i32) -> SyscallResult {
    loop {
        let chunk = session.read(from, Sysio::CHUNK_SIZE)?;
        if chunk.is_empty() {
            return Ok(());
        }
        session.write(to, &chunk)?;
    }
}

struct Echo;

impl Program for Echo {
    fn run(&self, session: &mut Session) -> Exit {
        let line = format!("{}\n", session.args().get(1..).unwrap_or_default().join(" "));
        status_of(session.write(STDOUT_FILENO, line.as_bytes()).map(|_| ()))
    }
}

struct Cat;

impl Program for Cat {
    fn run(&self, session: &mut Session) -> Exit {
        let files: Vec<String> = session.args().iter().skip(1).cloned().collect();
        if files.is_empty() {
            return status_of(copy_fd(session, STDIN_FILENO, STDOUT_FILENO));
        }
        let result = files.iter().try_for_each(|path| {
            let fd = session.open(path, OpenFlags::RDONLY)?;
            let copied = copy_fd(session, fd, STDOUT_FILENO);
            session.close(fd)?;
            copied
        });
        status_of(result)
    }
}

struct ExitWith(i32);

impl Program for ExitWith {
    fn run(&self, _session: &mut Session) -> Exit {
        Exit::Code(self.0)
    }
}

struct Pwd;

impl Program for Pwd {
    fn run(&self, session: &mut Session) -> Exit {
        let result = session
            .getcwd()
            .and_then(|cwd| session.write(STDOUT_FILENO, format!("{}\n", cwd).as_bytes()));
        status_of(result.map(|_| ()))
    }
}

struct Env;

impl Program for Env {
    fn run(&self, session: &mut Session) -> Exit {
        let mut out = String::new();
        for var in session.env().split(',').filter(|kv| !kv.is_empty()) {
            out.push_str(var);
            out.push('\n');
        }
        status_of(session.write(STDOUT_FILENO, out.as_bytes()).map(|_| ()))
    }
}

/// `run PROGRAM [ARGS...]`: fork, exec PROGRAM in the child, wait for it and
/// exit with its status.
struct Run;

impl Program for Run {
    fn run(&self, session: &mut Session) -> Exit {
        if session.args().len() < 2 {
            let _ = session.write(STDERR_FILENO, b"usage: run PROGRAM [ARGS...]\n");
            return Exit::Code(EXIT_FAILURE);
        }
        let child = match session.fork(RESUME_EXEC, 0) {
            Ok(pid) => pid,
            Err(_) => return Exit::Code(EXIT_FAILURE),
        };
        match session.wait4(child, false) {
            Ok((_, status)) => Exit::Code(status),
            Err(_) => Exit::Code(EXIT_FAILURE),
        }
    }

    fn resume(&self, session: &mut Session, ip: usize, _sp: usize) -> Exit {
        match ip {
            RESUME_EXEC => {
                let argv: Vec<String> = session.args().iter().skip(1).cloned().collect();
                exec_argv(session, &argv)
            }
            _ => Exit::Code(EXIT_FAILURE),
        }
    }
}

/// `pipeline LEFT... | RIGHT...`: runs both commands with LEFT's stdout
/// connected to RIGHT's stdin and exits with RIGHT's status.
struct Pipeline;

impl Pipeline {
    fn split(args: &[String]) -> Option<(Vec<String>, Vec<String>)> {
        let bar = args.iter().position(|a| a == "|").filter(|bar| *bar > 0)?;
        let left = args[1..bar].to_vec();
        let right = args[bar + 1..].to_vec();
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some((left, right))
    }

    fn pack_fds(readfd: i32, writefd: i32) -> usize {
        ((readfd as usize) << 16) | (writefd as usize & 0xffff)
    }

    fn unpack_fds(sp: usize) -> (i32, i32) {
        ((sp >> 16) as i32, (sp & 0xffff) as i32)
    }

    fn spawn(session: &mut Session) -> SyscallResult<i32> {
        let (readfd, writefd) = session.pipe()?;
        // the children learn the pipe descriptors through the resume sp
        let fds = Pipeline::pack_fds(readfd, writefd);
        let left = session.fork(RESUME_PIPELINE_LEFT, fds)?;
        let right = session.fork(RESUME_PIPELINE_RIGHT, fds)?;
        session.close(readfd)?;
        session.close(writefd)?;

        let mut right_status = EXIT_FAILURE;
        for _ in 0..2 {
            let (pid, status) = session.wait4(WAIT_ANY, false)?;
            if pid == right {
                right_status = status;
            } else if pid != left {
                return Err(Errno::Generic);
            }
        }
        Ok(right_status)
    }
}

impl Program for Pipeline {
    fn run(&self, session: &mut Session) -> Exit {
        if Pipeline::split(session.args()).is_none() {
            let _ = session.write(STDERR_FILENO, b"usage: pipeline LEFT... | RIGHT...\n");
            return Exit::Code(EXIT_FAILURE);
        }
        match Pipeline::spawn(session) {
            Ok(status) => Exit::Code(status),
            Err(_) => Exit::Code(EXIT_FAILURE),
        }
    }

    fn resume(&self, session: &mut Session, ip: usize, sp: usize) -> Exit {
        let Some((left, right)) = Pipeline::split(session.args()) else {
            return Exit::Code(EXIT_FAILURE);
        };
        let (readfd, writefd) = Pipeline::unpack_fds(sp);
        let (argv, target, keep) = match ip {
            RESUME_PIPELINE_LEFT => (left, STDOUT_FILENO, writefd),
            RESUME_PIPELINE_RIGHT => (right, STDIN_FILENO, readfd),
            _ => return Exit::Code(EXIT_FAILURE),
        };
        let rewired = session
            .dup2(keep, target)
            .and_then(|_| session.close(readfd))
            .and_then(|_| session.close(writefd));
        if rewired.is_err() {
            return Exit::Code(EXIT_FAILURE);
        }
        exec_argv(session, &argv)
    }
}
