//! This module emulates Unix processes on top of the interface layer.
//!
//! ## top-level features:
//!
//! - ### Dispatcher:
//!     - `Process::syscall` validates a sysio request, calls the handler for
//!       the opcode and writes back the output or the error. `System` owns the
//!       shared state and the lifecycle: init, spawning init, waiting for it,
//!       and finalization.
//!
//! - ### Process Objects:
//!     - Each process has a PID, working directory, arguments, environment, a
//!       descriptor table and its resources. Processes run their program on
//!       their own thread.
//!
//! - ### Family Tree:
//!     - Parent/child relations, PID allocation and reaping. Exit
//!       notifications reach the parent exactly once.
//!
//! - ### Descriptor Table:
//!     - Maps descriptor numbers to shared I/O channels. Channels are a
//!       closed enum over VFS files, pipe ends, the terminal and null input.
//!
//! - ### Programs and Images:
//!     - Programs implement `Program`; image files in the VFS name them and
//!       the image loader validates them for execve.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod family;
pub mod fdtable;
pub mod filesystem;
pub mod loader;
pub mod process;
pub mod session;
pub mod syscalls;
