//! System call handlers
//!
//! ## System Calls
//!
//! Process objects have one method per system call, split into filesystem
//! related calls (descriptors, paths, pipes, select) and system related calls
//! (fork, execve, wait4, PIDs). They return a `SyscallResult` carrying either
//! the call's result or an error from the `Errno` enum.

pub mod fs_calls;
pub mod fs_constants;
pub mod sys_calls;
pub mod sys_constants;
pub use fs_constants::*;
pub use sys_constants::*;
