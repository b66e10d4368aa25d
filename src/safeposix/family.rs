// Process family tree and PID allocation

use crate::interface::{syscall_error, Errno, SyscallResult};

use super::process::{Pid, Process};
use super::syscalls::sys_constants::*;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Hands out PIDs from a monotonic counter, reusing reaped ones first.
#[derive(Debug)]
pub struct PidAllocator {
    next: Pid,
    free: BTreeSet<Pid>,
}

impl Default for PidAllocator {
    fn default() -> PidAllocator {
        PidAllocator {
            next: INIT_PID,
            free: BTreeSet::new(),
        }
    }
}

impl PidAllocator {
    pub fn allocate(&mut self) -> Pid {
        if let Some(pid) = self.free.pop_first() {
            return pid;
        }
        let pid = self.next;
        self.next += 1;
        pid
    }

    pub fn release(&mut self, pid: Pid) {
        if pid < self.next {
            self.free.insert(pid);
        }
    }
}

pub enum Slot {
    Running(Arc<Process>),
    /// Kept until reaped so the reaper can signal the former process.
    Exited { status: i32, process: Arc<Process> },
}

pub struct Member {
    pub parent: Option<Pid>,
    pub children: BTreeSet<Pid>,
    pub slot: Slot,
}

/// What the tree did when a process exited.
pub struct ExitOutcome {
    /// Parent to notify, if the exited process still had one.
    pub parent: Option<Arc<Process>>,
    /// True if nobody will wait for this process and it was reaped on the spot.
    pub reaped: bool,
}

/// A reaped child.
pub struct Reaped {
    pub pid: Pid,
    pub status: i32,
    pub process: Arc<Process>,
}

#[derive(Default)]
pub struct FamilyTree {
    members: HashMap<Pid, Member>,
    pids: PidAllocator,
}

impl FamilyTree {
    pub fn new() -> FamilyTree {
        FamilyTree::default()
    }

    pub fn allocate_pid(&mut self) -> Pid {
        self.pids.allocate()
    }

    /// Returns a PID that never got a member (fork failed half way).
    pub fn release_pid(&mut self, pid: Pid) {
        if !self.members.contains_key(&pid) {
            self.pids.release(pid);
        }
    }

    pub fn insert(&mut self, pid: Pid, parent: Option<Pid>, process: Arc<Process>) {
        if let Some(ppid) = parent {
            if let Some(pmember) = self.members.get_mut(&ppid) {
                pmember.children.insert(pid);
            }
        }
        self.members.insert(
            pid,
            Member {
                parent,
                children: BTreeSet::new(),
                slot: Slot::Running(process),
            },
        );
    }

    /// Removes a member that never ran.
    pub fn remove(&mut self, pid: Pid) {
        if let Some(member) = self.members.remove(&pid) {
            if let Some(ppid) = member.parent {
                if let Some(pmember) = self.members.get_mut(&ppid) {
                    pmember.children.remove(&pid);
                }
            }
            self.pids.release(pid);
        }
    }

    /// Swaps the running process at `pid` for its execve replacement.
    pub fn replace(&mut self, pid: Pid, process: Arc<Process>) -> SyscallResult {
        match self.members.get_mut(&pid) {
            Some(Member {
                slot: slot @ Slot::Running(_),
                ..
            }) => {
                *slot = Slot::Running(process);
                Ok(())
            }
            _ => Err(syscall_error(Errno::Generic, "execve", "process is not running")),
        }
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        match self.members.get(&pid) {
            Some(Member {
                slot: Slot::Running(process),
                ..
            }) => Some(process.clone()),
            _ => None,
        }
    }

    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        self.members.get(&pid).and_then(|m| m.parent)
    }

    pub fn children_of(&self, pid: Pid) -> Vec<Pid> {
        self.members
            .get(&pid)
            .map(|m| m.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.members.contains_key(&pid)
    }

    pub fn running(&self) -> Vec<Arc<Process>> {
        self.members
            .values()
            .filter_map(|m| match &m.slot {
                Slot::Running(process) => Some(process.clone()),
                Slot::Exited { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Records the exit of `pid`, orphans its children and reaps whatever
    /// nobody is left to wait for.
    pub fn mark_exited(&mut self, pid: Pid, status: i32) -> ExitOutcome {
        let (parent, children) = match self.members.get_mut(&pid) {
            Some(member) => {
                let process = match &member.slot {
                    Slot::Running(process) => process.clone(),
                    Slot::Exited { .. } => {
                        return ExitOutcome {
                            parent: None,
                            reaped: false,
                        }
                    }
                };
                member.slot = Slot::Exited { status, process };
                (member.parent, std::mem::take(&mut member.children))
            }
            None => {
                return ExitOutcome {
                    parent: None,
                    reaped: false,
                }
            }
        };

        for child in children {
            let exited = match self.members.get_mut(&child) {
                Some(cmember) => {
                    cmember.parent = None;
                    matches!(cmember.slot, Slot::Exited { .. })
                }
                None => false,
            };
            if exited {
                log::debug!("reaping orphan {}", child);
                self.members.remove(&child);
                self.pids.release(child);
            }
        }

        match parent.and_then(|ppid| self.get(ppid)) {
            Some(pprocess) => ExitOutcome {
                parent: Some(pprocess),
                reaped: false,
            },
            None => {
                self.members.remove(&pid);
                self.pids.release(pid);
                ExitOutcome {
                    parent: None,
                    reaped: true,
                }
            }
        }
    }

    /// Reaps an exited child of `parent`; `target` of `None` means any child.
    ///
    /// Returns `Ok(None)` when matching children exist but none has exited.
    pub fn reap(&mut self, parent: Pid, target: Option<Pid>) -> SyscallResult<Option<Reaped>> {
        let children = match self.members.get(&parent) {
            Some(member) => &member.children,
            None => return Err(syscall_error(Errno::Generic, "wait4", "caller is not in the tree")),
        };

        let candidates: Vec<Pid> = match target {
            Some(pid) if children.contains(&pid) => vec![pid],
            Some(_) => Vec::new(),
            None => children.iter().copied().collect(),
        };
        if candidates.is_empty() {
            return Err(syscall_error(Errno::InvalidDescriptor, "wait4", "no such child"));
        }

        let exited = candidates.into_iter().find(|pid| {
            matches!(
                self.members.get(pid),
                Some(Member {
                    slot: Slot::Exited { .. },
                    ..
                })
            )
        });
        let pid = match exited {
            Some(pid) => pid,
            None => return Ok(None),
        };

        if let Some(pmember) = self.members.get_mut(&parent) {
            pmember.children.remove(&pid);
        }
        self.pids.release(pid);
        match self.members.remove(&pid) {
            Some(Member {
                slot: Slot::Exited { status, process },
                ..
            }) => Ok(Some(Reaped {
                pid,
                status,
                process,
            })),
            _ => Err(syscall_error(Errno::Generic, "wait4", "child vanished")),
        }
    }

    /// Drops every member; used when the system shuts down.
    pub fn clear(&mut self) -> Vec<Arc<Process>> {
        let running = self.running();
        self.members.clear();
        self.pids = PidAllocator::default();
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_monotonic_and_reused_after_release() {
        let mut pids = PidAllocator::default();
        assert_eq!(pids.allocate(), 1);
        assert_eq!(pids.allocate(), 2);
        assert_eq!(pids.allocate(), 3);
        pids.release(2);
        assert_eq!(pids.allocate(), 2);
        assert_eq!(pids.allocate(), 4);
    }
}
