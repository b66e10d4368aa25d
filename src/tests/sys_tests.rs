#[cfg(test)]
pub mod sys_tests {
    use super::super::*;
    use crate::interface::{Errno, OpenFlags, Syscall, Sysio, SysioIn, SysioOut};
    use crate::safeposix::loader::Exit;
    use crate::safeposix::session::Session;
    use crate::safeposix::syscalls::*;

    use std::time::Duration;

    #[test]
    pub fn ut_capposix_getpid_getppid() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_report_ppid);

        assert_eq!(session.getpid().unwrap(), INIT_PID);
        assert_eq!(session.getppid().unwrap(), 0);

        let child = session.fork(1, 0).unwrap();
        assert_eq!(child, INIT_PID + 1);
        // the child exits with its parent's pid
        assert_eq!(session.wait4(child, false).unwrap(), (child, INIT_PID));
        ts.finish(session, EXIT_SUCCESS);
    }

    fn child_report_ppid(session: &mut Session, _ip: usize, _sp: usize) -> Exit {
        assert_eq!(session.getpid().unwrap(), INIT_PID + 1);
        Exit::Code(session.getppid().unwrap())
    }

    fn child_rewire(session: &mut Session, ip: usize, _sp: usize) -> Exit {
        match ip {
            // descriptor changes in the child are private to it
            1 => {
                session.close(STDERR_FILENO).unwrap();
                let fd = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
                session.dup2(fd, STDOUT_FILENO).unwrap();
                Exit::Code(EXIT_SUCCESS)
            }
            // inherited descriptors share the channel with the parent
            2 => {
                session.write(STDOUT_FILENO, b"from child\n").unwrap();
                Exit::Code(EXIT_SUCCESS)
            }
            _ => Exit::Code(EXIT_FAILURE),
        }
    }

    #[test]
    pub fn ut_capposix_fork_fd_isolation() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_rewire);

        let child = session.fork(1, 0).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_SUCCESS));
        session.write(STDOUT_FILENO, b"parent\n").unwrap();
        session.write(STDERR_FILENO, b"err\n").unwrap();
        assert_eq!(ts.terminal.output_string(), "parent\nerr\n");

        let child = session.fork(2, 0).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_SUCCESS));
        assert_eq!(ts.terminal.output_string(), "parent\nerr\nfrom child\n");
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_dup2() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let fd = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.dup2(fd, fd).unwrap(), fd);
        assert_eq!(session.dup2(fd, 10).unwrap(), 10);
        // offsets are shared between duplicates
        assert_eq!(session.read(10, 6).unwrap(), b"hello ");
        assert_eq!(session.read(fd, 64).unwrap(), b"capposix\n");

        assert_eq!(session.dup2(fd, MAXFD), Err(Errno::InvalidDescriptor));
        assert_eq!(session.dup2(30, 31), Err(Errno::InvalidDescriptor));
        assert_eq!(session.dup(30), Err(Errno::InvalidDescriptor));
        ts.finish(session, EXIT_SUCCESS);
    }

    fn child_exit_with_ip(_session: &mut Session, ip: usize, _sp: usize) -> Exit {
        Exit::Code(ip as i32)
    }

    #[test]
    pub fn ut_capposix_wait4_semantics() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_exit_with_ip);

        assert_eq!(session.wait4(WAIT_ANY, true), Err(Errno::InvalidDescriptor));

        let a = session.fork(3, 0).unwrap();
        let b = session.fork(4, 0).unwrap();
        assert_eq!(session.wait4(b, false).unwrap(), (b, 4));
        // a reaped child cannot be waited for again
        assert_eq!(session.wait4(b, true), Err(Errno::InvalidDescriptor));
        assert_eq!(session.wait4(WAIT_ANY, false).unwrap(), (a, 3));
        assert_eq!(session.wait4(WAIT_ANY, false), Err(Errno::InvalidDescriptor));
        ts.finish(session, EXIT_SUCCESS);
    }

    fn child_wait_for_stdin(session: &mut Session, _ip: usize, _sp: usize) -> Exit {
        match session.read(STDIN_FILENO, 16) {
            Ok(data) => Exit::Code(data.len() as i32),
            Err(_) => Exit::Code(EXIT_FAILURE),
        }
    }

    #[test]
    pub fn ut_capposix_wait4_nohang() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_wait_for_stdin);

        let child = session.fork(1, 0).unwrap();
        assert_eq!(session.wait4(child, true).unwrap(), (0, 0));
        assert_eq!(session.wait4(WAIT_ANY, true).unwrap(), (0, 0));

        ts.terminal.push_input(b"four");
        assert_eq!(session.wait4(child, false).unwrap(), (child, 4));
        assert_eq!(session.wait4(child, true), Err(Errno::InvalidDescriptor));
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_exit_signal_after_reap() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_exit_with_ip);

        let child = session.fork(5, 0).unwrap();
        let process = ts.system.process(child);
        assert_eq!(session.wait4(child, false).unwrap(), (child, 5));
        // a finished child is no longer a running process
        assert!(ts.system.process(child).is_none());
        if let Some(process) = process {
            assert!(process.exit_signaled());
        }
        ts.finish(session, EXIT_SUCCESS);
    }

    fn child_exec(session: &mut Session, ip: usize, _sp: usize) -> Exit {
        match ip {
            1 => {
                assert_eq!(
                    session.execve("/bin/missing", &["missing"], &[]).map(|t| t.pid()),
                    Err(Errno::NotFound)
                );
                assert_eq!(
                    session.execve("/etc/motd", &["motd"], &[]).map(|t| t.pid()),
                    Err(Errno::Unsupported)
                );
                assert_eq!(
                    session.execve("/tmp", &["tmp"], &[]).map(|t| t.pid()),
                    Err(Errno::PermissionDenied)
                );
                let big = format!("K={}", "x".repeat(Sysio::ENV_MAX_LEN - 3));
                assert_eq!(
                    session.execve("/bin/true", &["true"], &[big.as_str(), "LAST=ok"]).map(|t| t.pid()),
                    Err(Errno::Generic)
                );
                // still this program, still the same process
                session.write(STDOUT_FILENO, b"survived\n").unwrap();
                let pid = session.getpid().unwrap();
                match session.execve("/bin/echo", &["echo", "exec", "ok"], &[]) {
                    Ok(transfer) => {
                        assert_eq!(transfer.pid(), pid);
                        Exit::Exec(transfer)
                    }
                    Err(_) => Exit::Code(EXIT_FAILURE),
                }
            }
            2 => match session.execve("/bin/env", &["env"], &["A=1", "B=two"]) {
                Ok(transfer) => Exit::Exec(transfer),
                Err(_) => Exit::Code(EXIT_FAILURE),
            },
            3 => match session.execve("/bin/false", &["false"], &[]) {
                Ok(transfer) => Exit::Exec(transfer),
                Err(_) => Exit::Code(EXIT_SUCCESS),
            },
            _ => Exit::Code(EXIT_FAILURE),
        }
    }

    #[test]
    pub fn ut_capposix_execve() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_exec);

        let child = session.fork(1, 0).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_SUCCESS));
        assert_eq!(ts.terminal.output_string(), "survived\nexec ok\n");

        // the replaced image's status is what the parent sees
        let child = session.fork(3, 0).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_FAILURE));
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_execve_env() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_exec);

        let child = session.fork(2, 0).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_SUCCESS));
        assert_eq!(ts.terminal.output_string(), "A=1\nB=two\n");
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_sysio_validation() {
        let ts = capposix_init();
        let mut session = ts.attach();

        // input variant that does not belong to the opcode
        session.sysio().request(SysioIn::Read { fd: 0, count: 1 });
        assert!(!session.call(Syscall::Getpid));
        assert_eq!(session.sysio().error, Some(Errno::Generic));
        assert_eq!(session.sysio().output, SysioOut::None);

        session.sysio().request(SysioIn::Read {
            fd: STDIN_FILENO,
            count: Sysio::CHUNK_SIZE + 1,
        });
        assert!(!session.call(Syscall::Read));
        assert_eq!(session.sysio().error, Some(Errno::Generic));

        session.sysio().request(SysioIn::Write {
            fd: STDOUT_FILENO,
            chunk: b"ab".to_vec(),
            count: 3,
        });
        assert!(!session.call(Syscall::Write));
        assert_eq!(session.sysio().error, Some(Errno::Generic));

        // unknown opcodes are rejected before dispatch
        let process = session.process().clone();
        assert!(!process.syscall_raw(999, session.sysio()));
        assert_eq!(session.sysio().error, Some(Errno::Unsupported));

        session.sysio().request(SysioIn::None);
        assert!(process.syscall_raw(Syscall::Getpid as u32, session.sysio()));
        assert_eq!(session.sysio().output, SysioOut::Getpid { pid: INIT_PID });
        assert_eq!(session.sysio().error, None);
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_memory_regions() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_touch_region);

        let base = session.attach_region(4096).unwrap();
        session.write_region(base, 0, b"parent").unwrap();
        // the child gets a copy and scribbles over it
        let child = session.fork(1, base).unwrap();
        assert_eq!(session.wait4(child, false).unwrap(), (child, EXIT_SUCCESS));
        assert_eq!(session.read_region(base, 0, 6).unwrap(), b"parent");

        session.detach_region(base).unwrap();
        assert_eq!(session.read_region(base, 0, 1), Err(Errno::NotFound));
        assert_eq!(session.attach_region(RAM_QUOTA + 1), Err(Errno::Generic));
        ts.finish(session, EXIT_SUCCESS);
    }

    fn child_touch_region(session: &mut Session, _ip: usize, sp: usize) -> Exit {
        if session.read_region(sp, 0, 6).unwrap() != b"parent" {
            return Exit::Code(EXIT_FAILURE);
        }
        session.write_region(sp, 0, b"child!").unwrap();
        Exit::Code(EXIT_SUCCESS)
    }

    #[test]
    pub fn ut_capposix_finalize_cancels_blocked_read() {
        let ts = capposix_init();
        let mut session = ts.attach_with(child_wait_for_stdin);

        let child = session.fork(1, 0).unwrap();
        let blocked = ts.system.process(child).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        ts.system.finalize();
        assert!(blocked.is_cancelled());

        // the cancelled read returns and the child exits, closing its table
        let deadline = std::time::Instant::now() + SETTLE;
        while !blocked.fdtable.lock().is_empty() {
            assert!(std::time::Instant::now() < deadline, "child never woke up");
            std::thread::sleep(Duration::from_millis(5));
        }
        // the tree is gone, so there is nothing left to wait for
        assert_eq!(session.wait4(child, false), Err(Errno::Generic));
    }

    #[test]
    pub fn ut_capposix_spawn_init_builtins() {
        let ts = capposix_init();
        let pid = ts
            .system
            .spawn_init("/bin/run", vec!["run".into(), "/bin/echo".into(), "hi".into()], String::new())
            .unwrap();
        assert_eq!(pid, INIT_PID);
        assert_eq!(ts.system.wait_for_init_timeout(SETTLE), Some(EXIT_SUCCESS));
        assert_eq!(ts.terminal.output_string(), "hi\n");
        // only one init per system
        assert_eq!(
            ts.system.spawn_init("/bin/true", vec!["true".into()], String::new()),
            Err(Errno::Generic)
        );
        ts.system.finalize();
    }

    #[test]
    pub fn ut_capposix_spawn_init_failures() {
        let ts = capposix_init();
        assert_eq!(
            ts.system.spawn_init("/bin/nothing", vec![], String::new()),
            Err(Errno::NotFound)
        );
        assert_eq!(
            ts.system.spawn_init("/etc/motd", vec![], String::new()),
            Err(Errno::Unsupported)
        );
        // a failed start leaves room for a proper init
        assert!(ts.system.spawn_init("/bin/false", vec!["false".into()], String::new()).is_ok());
        assert_eq!(ts.system.wait_for_init_timeout(SETTLE), Some(EXIT_FAILURE));
        ts.system.finalize();
    }
}
