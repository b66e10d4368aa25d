//! Process objects
//!
//! A [`Process`] owns everything one hosted program instance sees: its PID,
//! descriptor table, working directory, arguments and environment, and its
//! resources. Syscalls are methods on `Process` (see `syscalls/`), entered
//! through [`Process::syscall`] in the dispatcher.

use crate::interface::{syscall_error, Blocker, Errno, SyscallResult};

use super::dispatcher::System;
use super::fdtable::FdTable;
use super::loader::Entrypoint;
use super::syscalls::sys_constants::*;

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Pid = i32;

/// Byte quota shared by all regions of one process.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    quota: usize,
    used: usize,
}

impl MemoryPool {
    pub fn new(quota: usize) -> MemoryPool {
        MemoryPool { quota, used: 0 }
    }

    pub fn allocate(&mut self, size: usize) -> SyscallResult {
        match self.used.checked_add(size) {
            Some(total) if total <= self.quota => {
                self.used = total;
                Ok(())
            }
            _ => Err(syscall_error(Errno::Generic, "memory", "quota exhausted")),
        }
    }

    pub fn release(&mut self, size: usize) {
        self.used = self.used.saturating_sub(size);
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.quota - self.used
    }
}

// regions are handed out page aligned from here upwards
const REGION_BASE: usize = 0x1000_0000;
const REGION_ALIGN: usize = 0x1000;

/// Address-space regions attached to a process, keyed by base address.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: BTreeMap<usize, Vec<u8>>,
    next_base: usize,
}

impl Default for RegionMap {
    fn default() -> RegionMap {
        RegionMap {
            regions: BTreeMap::new(),
            next_base: REGION_BASE,
        }
    }
}

impl RegionMap {
    pub fn attach(&mut self, pool: &mut MemoryPool, size: usize) -> SyscallResult<usize> {
        pool.allocate(size)?;
        let base = self.next_base;
        let span = size.div_ceil(REGION_ALIGN).max(1) * REGION_ALIGN;
        self.next_base += span;
        self.regions.insert(base, vec![0u8; size]);
        Ok(base)
    }

    pub fn detach(&mut self, pool: &mut MemoryPool, base: usize) -> SyscallResult {
        let region = self
            .regions
            .remove(&base)
            .ok_or_else(|| syscall_error(Errno::NotFound, "memory", "no region at address"))?;
        pool.release(region.len());
        Ok(())
    }

    fn region(&self, base: usize, offset: usize, len: usize) -> SyscallResult<&Vec<u8>> {
        let region = self
            .regions
            .get(&base)
            .ok_or_else(|| syscall_error(Errno::NotFound, "memory", "no region at address"))?;
        match offset.checked_add(len) {
            Some(end) if end <= region.len() => Ok(region),
            _ => Err(syscall_error(Errno::Generic, "memory", "access beyond region")),
        }
    }

    pub fn read(&self, base: usize, offset: usize, len: usize) -> SyscallResult<Vec<u8>> {
        let region = self.region(base, offset, len)?;
        Ok(region[offset..offset + len].to_vec())
    }

    pub fn write(&mut self, base: usize, offset: usize, data: &[u8]) -> SyscallResult {
        self.region(base, offset, data.len())?;
        if let Some(region) = self.regions.get_mut(&base) {
            region[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Memory pool, regions and program of one process image.
#[derive(Debug, Clone)]
pub struct Resources {
    pub pool: MemoryPool,
    pub regions: RegionMap,
    pub entrypoint: Entrypoint,
}

impl Resources {
    pub fn new(entrypoint: Entrypoint) -> Resources {
        Resources {
            pool: MemoryPool::new(RAM_QUOTA),
            regions: RegionMap::default(),
            entrypoint,
        }
    }
}

pub struct Process {
    pub pid: Pid,
    pub system: Arc<System>,
    pub fdtable: Mutex<FdTable>,
    pub cwd: RwLock<String>,
    pub args: Vec<String>,
    pub env: String,
    pub resources: Mutex<Resources>,
    pub blocker: Arc<Blocker>,
    cancelstatus: AtomicBool,
    exit_notified: AtomicBool,
    exit_signaled: AtomicBool,
    replacement: Mutex<Option<Arc<Process>>>,
}

impl Process {
    pub fn new(
        system: Arc<System>,
        pid: Pid,
        fdtable: FdTable,
        cwd: String,
        args: Vec<String>,
        env: String,
        resources: Resources,
    ) -> Arc<Process> {
        Arc::new(Process {
            pid,
            system,
            fdtable: Mutex::new(fdtable),
            cwd: RwLock::new(cwd),
            args,
            env,
            resources: Mutex::new(resources),
            blocker: Arc::new(Blocker::new()),
            cancelstatus: AtomicBool::new(false),
            exit_notified: AtomicBool::new(false),
            exit_signaled: AtomicBool::new(false),
            replacement: Mutex::new(None),
        })
    }

    pub fn entrypoint(&self) -> Entrypoint {
        self.resources.lock().entrypoint.clone()
    }

    pub fn cancel(&self) {
        self.cancelstatus.store(true, Ordering::SeqCst);
        self.blocker.up();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelstatus.load(Ordering::SeqCst)
    }

    /// Fails a blocking syscall once the process has been cancelled.
    pub fn check_cancelled(&self, syscall: &str) -> SyscallResult {
        if self.is_cancelled() {
            return Err(syscall_error(Errno::Generic, syscall, "process cancelled"));
        }
        Ok(())
    }

    /// Wakes this process because one of its children exited.
    ///
    /// Called once per child; the child guards against repeats.
    pub fn notify_child_exit(&self) {
        self.blocker.up();
    }

    /// Marks this process as having delivered its exit notification.
    /// Returns false if it already had.
    pub(crate) fn take_exit_notification(&self) -> bool {
        !self.exit_notified.swap(true, Ordering::SeqCst)
    }

    /// Delivered to a former child once its parent has reaped it.
    pub fn submit_exit_signal(&self) {
        self.exit_signaled.store(true, Ordering::SeqCst);
        self.blocker.up();
    }

    pub fn exit_signaled(&self) -> bool {
        self.exit_signaled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_replacement(&self, process: Arc<Process>) {
        *self.replacement.lock() = Some(process);
    }

    /// The process that replaced this one through execve, if any.
    pub fn replacement(&self) -> Option<Arc<Process>> {
        self.replacement.lock().clone()
    }

    pub fn is_replaced(&self) -> bool {
        self.replacement.lock().is_some()
    }

    /// Terminates the process: closes every descriptor and records `status`
    /// in the family tree.
    pub fn exit(&self, status: i32) {
        // channels are dropped outside the table lock so pipe peers get woken
        let closed = std::mem::take(&mut *self.fdtable.lock());
        drop(closed);
        self.system.process_exited(self, status);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("cwd", &*self.cwd.read())
            .field("args", &self.args)
            .field("env", &self.env)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_respect_quota_and_copy_on_clone() {
        let mut pool = MemoryPool::new(8192);
        let mut regions = RegionMap::default();
        let a = regions.attach(&mut pool, 4096).unwrap();
        let b = regions.attach(&mut pool, 4096).unwrap();
        assert_ne!(a, b);
        assert_eq!(regions.attach(&mut pool, 1), Err(Errno::Generic));

        regions.write(a, 10, b"xyz").unwrap();
        let mut copy = regions.clone();
        copy.write(a, 10, b"abc").unwrap();
        assert_eq!(regions.read(a, 10, 3).unwrap(), b"xyz");
        assert_eq!(copy.read(a, 10, 3).unwrap(), b"abc");

        regions.detach(&mut pool, b).unwrap();
        assert_eq!(pool.available(), 4096);
        assert_eq!(regions.read(a, 4095, 2), Err(Errno::Generic));
    }
}
