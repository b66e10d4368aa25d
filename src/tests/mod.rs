#![allow(dead_code)] //helpers are only used by the test targets

mod fs_tests;
mod sys_tests;

use crate::interface::{MemoryTerminal, Vfs};
use crate::safeposix::dispatcher::System;
use crate::safeposix::filesystem::RamFileSystem;
use crate::safeposix::loader::{Entrypoint, Exit, ImageLoader, Program};
use crate::safeposix::session::Session;
use crate::tools::register_builtins;

use std::sync::Arc;
use std::time::Duration;

pub const BUILTINS: [&str; 8] = ["echo", "cat", "true", "false", "pwd", "env", "run", "pipeline"];

pub const MOTD: &[u8] = b"hello capposix\n";

// generous bound for anything that has to happen on another thread
pub const SETTLE: Duration = Duration::from_secs(10);

/// A freshly booted system with nothing running yet.
pub struct TestSystem {
    pub system: Arc<System>,
    pub terminal: Arc<MemoryTerminal>,
    pub ramfs: Arc<RamFileSystem>,
}

/// Test program: `run` exits successfully, forked children run `resume`.
pub struct Scripted {
    pub resume: fn(&mut Session, usize, usize) -> Exit,
}

impl Program for Scripted {
    fn run(&self, _session: &mut Session) -> Exit {
        Exit::Code(0)
    }

    fn resume(&self, session: &mut Session, ip: usize, sp: usize) -> Exit {
        (self.resume)(session, ip, sp)
    }
}

fn no_resume(_session: &mut Session, _ip: usize, _sp: usize) -> Exit {
    Exit::Code(1)
}

/// Root RAM filesystem with /bin holding every builtin, /tmp and /etc/motd.
pub fn capposix_init() -> TestSystem {
    let ramfs = RamFileSystem::new();
    ramfs.mkdir_all("/bin").unwrap();
    ramfs.mkdir_all("/tmp").unwrap();
    for name in BUILTINS {
        ramfs
            .write_file(&format!("/bin/{}", name), &ImageLoader::image_bytes(name))
            .unwrap();
    }
    ramfs.write_file("/etc/motd", MOTD).unwrap();

    let vfs = Vfs::new();
    vfs.mount("/", ramfs.clone());
    let loader = ImageLoader::new();
    register_builtins(&loader);
    let terminal = MemoryTerminal::new(80, 24);
    let system = System::init(vfs, loader, terminal.clone());
    TestSystem {
        system,
        terminal,
        ramfs,
    }
}

impl TestSystem {
    /// Attaches init to the calling thread; forked children resume `resume`.
    pub fn attach_with(&self, resume: fn(&mut Session, usize, usize) -> Exit) -> Session {
        let entrypoint = Entrypoint {
            name: "test".to_string(),
            program: Arc::new(Scripted { resume }),
        };
        self.system
            .attach_init(entrypoint, vec!["test".to_string()], "PWD=\"/\"".to_string())
            .unwrap()
    }

    pub fn attach(&self) -> Session {
        self.attach_with(no_resume)
    }

    /// Exits the attached init and tears the system down.
    pub fn finish(&self, session: Session, status: i32) {
        session.process().exit(status);
        assert_eq!(self.system.wait_for_init_timeout(SETTLE), Some(status));
        self.system.finalize();
    }
}
