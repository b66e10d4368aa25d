#[cfg(test)]
pub mod fs_tests {
    use super::super::*;
    use crate::interface::{DirentType, Errno, OpenFlags, Sysio};
    use crate::safeposix::syscalls::*;

    #[test]
    pub fn ut_capposix_fs_open_lowest_fd() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let fd1 = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        let fd2 = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        assert_eq!((fd1, fd2), (3, 4));

        session.close(fd1).unwrap();
        assert_eq!(session.open("/etc/motd", OpenFlags::RDONLY).unwrap(), 3);
        assert_eq!(session.close(fd1), Ok(()));
        assert_eq!(session.close(fd1), Err(Errno::InvalidDescriptor));

        // every descriptor has its own offset
        assert_eq!(session.read_to_end(fd2).unwrap(), MOTD);
        let fd3 = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.read(fd3, 5).unwrap(), b"hello");
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_create_write_read() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let fd = session
            .open("/tmp/notes", OpenFlags::CREAT | OpenFlags::WRONLY)
            .unwrap();
        assert_eq!(session.write(fd, b"abc").unwrap(), 3);
        assert_eq!(session.read(fd, 3), Err(Errno::PermissionDenied));
        session.close(fd).unwrap();

        let fd = session
            .open("/tmp/notes", OpenFlags::WRONLY | OpenFlags::APPEND)
            .unwrap();
        session.write(fd, b"def").unwrap();
        session.close(fd).unwrap();
        assert_eq!(session.stat("/tmp/notes").unwrap().st_size, 6);

        let fd = session.open("/tmp/notes", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.write(fd, b"x"), Err(Errno::PermissionDenied));
        assert_eq!(session.read_to_end(fd).unwrap(), b"abcdef");
        session.close(fd).unwrap();

        let fd = session
            .open("/tmp/notes", OpenFlags::WRONLY | OpenFlags::TRUNC)
            .unwrap();
        session.close(fd).unwrap();
        assert_eq!(session.stat("/tmp/notes").unwrap().st_size, 0);
        assert_eq!(ts.ramfs.read_file("/tmp/notes").unwrap(), b"");
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_large_write() {
        let ts = capposix_init();
        let mut session = ts.attach();

        // larger than one sysio chunk, the session splits it
        let data: Vec<u8> = (0..3 * Sysio::CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let fd = session
            .open("/tmp/big", OpenFlags::CREAT | OpenFlags::RDWR)
            .unwrap();
        assert_eq!(session.write(fd, &data).unwrap(), data.len());
        session.close(fd).unwrap();
        assert_eq!(ts.ramfs.read_file("/tmp/big").unwrap(), data);
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_path_errors() {
        let ts = capposix_init();
        let mut session = ts.attach();

        assert_eq!(session.stat(""), Err(Errno::NotFound));
        assert_eq!(session.stat("/nope"), Err(Errno::NotFound));
        assert_eq!(session.stat("/etc/motd/inner"), Err(Errno::NotFound));
        assert_eq!(session.open("/nope", OpenFlags::RDONLY), Err(Errno::NotFound));
        let long = format!("/{}", "a".repeat(Sysio::PATH_MAX_LEN));
        assert_eq!(session.stat(&long), Err(Errno::NotFound));
        assert_eq!(session.open("/tmp", OpenFlags::WRONLY), Err(Errno::PermissionDenied));

        // lstat agrees with stat without symbolic links
        assert_eq!(session.lstat("/etc/motd"), session.stat("/etc/motd"));
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_fstat_kinds() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let st = session.fstat(STDOUT_FILENO).unwrap();
        assert_eq!(st.st_mode & S_FILETYPEFLAGS, S_IFCHR);

        let fd = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        let st = session.fstat(fd).unwrap();
        assert_eq!(st.st_mode & S_FILETYPEFLAGS, S_IFREG);
        assert_eq!(st.st_size, MOTD.len() as u64);
        assert_eq!(st.st_ino, session.stat("/etc/motd").unwrap().st_ino);

        let (readfd, writefd) = session.pipe().unwrap();
        session.write(writefd, b"xy").unwrap();
        let st = session.fstat(readfd).unwrap();
        assert_eq!(st.st_mode & S_FILETYPEFLAGS, S_IFIFO);
        assert_eq!(st.st_size, 2);

        assert_eq!(session.fstat(40), Err(Errno::InvalidDescriptor));
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_ioctl_fcntl() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let ws = session.ioctl(STDOUT_FILENO, TIOCGWINSZ).unwrap();
        assert_eq!((ws.columns, ws.rows), (80, 24));
        let fd = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.ioctl(fd, TIOCGWINSZ), Err(Errno::Unsupported));
        assert_eq!(session.ioctl(STDOUT_FILENO, 0x1234), Err(Errno::Unsupported));

        assert_eq!(session.fcntl(fd, F_GETFL, 0).unwrap(), 0);
        let rw = session
            .open("/tmp/rw", OpenFlags::CREAT | OpenFlags::RDWR)
            .unwrap();
        let flags = OpenFlags::from_bits_truncate(session.fcntl(rw, F_GETFL, 0).unwrap() as u32);
        assert!(flags.contains(OpenFlags::RDWR));
        assert_eq!(session.fcntl(rw, F_GETFD, 0).unwrap(), 0);
        assert_eq!(session.fcntl(rw, 999, 0), Err(Errno::Unsupported));
        ts.finish(session, EXIT_SUCCESS);
    }

    #[test]
    pub fn ut_capposix_fs_dirent_fchdir() {
        let ts = capposix_init();
        let mut session = ts.attach();

        let dirfd = session.open("/bin", OpenFlags::RDONLY).unwrap();
        let mut names = Vec::new();
        loop {
            let entry = session.dirent(dirfd).unwrap();
            if entry.kind == DirentType::End {
                break;
            }
            names.push(entry.name);
        }
        let mut expected = vec![".".to_string(), "..".to_string()];
        let mut builtins: Vec<String> = BUILTINS.iter().map(|s| s.to_string()).collect();
        builtins.sort();
        expected.extend(builtins);
        assert_eq!(names, expected);
        // exhausted directories keep returning the end marker
        assert_eq!(session.dirent(dirfd).unwrap().kind, DirentType::End);

        let filefd = session.open("/etc/motd", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.dirent(filefd), Err(Errno::NotFound));
        assert_eq!(session.fchdir(filefd), Err(Errno::NotFound));
        assert_eq!(session.dirent(STDIN_FILENO), Err(Errno::Unsupported));

        session.fchdir(dirfd).unwrap();
        assert_eq!(session.getcwd().unwrap(), "/bin");
        assert!(session.stat("echo").is_ok());

        assert_eq!(session.chdir("/etc/motd"), Err(Errno::NotFound));
        session.chdir("../etc").unwrap();
        assert_eq!(session.getcwd().unwrap(), "/etc");
        let fd = session.open("motd", OpenFlags::RDONLY).unwrap();
        assert_eq!(session.read_to_end(fd).unwrap(), MOTD);
        ts.finish(session, EXIT_SUCCESS);
    }
}
