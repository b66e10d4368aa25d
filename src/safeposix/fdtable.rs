// Per-process descriptor table

use crate::interface::{syscall_error, Errno, SyscallResult};

use super::channel::IoChannel;
use super::syscalls::fs_constants::*;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps descriptor numbers to shared channels.
///
/// Cloning the table (fork) shares every channel with the copy.
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    entries: BTreeMap<i32, Arc<IoChannel>>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable::default()
    }

    fn get_next_fd(&self) -> Option<i32> {
        // the standard says we need to return the lowest open fd number
        (STARTINGFD..MAXFD).find(|fd| !self.entries.contains_key(fd))
    }

    /// Installs `channel` at the lowest free descriptor.
    pub fn add(&mut self, channel: Arc<IoChannel>) -> SyscallResult<i32> {
        let fd = self
            .get_next_fd()
            .ok_or_else(|| syscall_error(Errno::Generic, "fdtable", "no free file descriptor"))?;
        self.entries.insert(fd, channel);
        Ok(fd)
    }

    /// Installs `channel` at `fd`, handing back whatever was there before so
    /// the caller decides where it is dropped.
    pub fn add_at(&mut self, channel: Arc<IoChannel>, fd: i32) -> SyscallResult<Option<Arc<IoChannel>>> {
        if !(STARTINGFD..MAXFD).contains(&fd) {
            return Err(syscall_error(
                Errno::InvalidDescriptor,
                "fdtable",
                "descriptor out of range",
            ));
        }
        Ok(self.entries.insert(fd, channel))
    }

    pub fn lookup(&self, fd: i32) -> SyscallResult<Arc<IoChannel>> {
        self.entries
            .get(&fd)
            .cloned()
            .ok_or_else(|| syscall_error(Errno::InvalidDescriptor, "fdtable", "bad file descriptor"))
    }

    pub fn remove(&mut self, fd: i32) -> SyscallResult<Arc<IoChannel>> {
        self.entries
            .remove(&fd)
            .ok_or_else(|| syscall_error(Errno::InvalidDescriptor, "fdtable", "bad file descriptor"))
    }

    pub fn fds(&self) -> Vec<i32> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_descriptor_is_reused() {
        let mut table = FdTable::new();
        for expected in 0..3 {
            assert_eq!(table.add(IoChannel::null_input()).unwrap(), expected);
        }
        table.remove(1).unwrap();
        assert_eq!(table.add(IoChannel::null_input()).unwrap(), 1);
        assert_eq!(table.remove(7).unwrap_err(), Errno::InvalidDescriptor);
    }

    #[test]
    fn table_fills_up() {
        let mut table = FdTable::new();
        for _ in STARTINGFD..MAXFD {
            table.add(IoChannel::null_input()).unwrap();
        }
        assert_eq!(table.add(IoChannel::null_input()), Err(Errno::Generic));
        assert_eq!(
            table.add_at(IoChannel::null_input(), MAXFD).unwrap_err(),
            Errno::InvalidDescriptor
        );
    }
}
