//! Module definitions for the capposix interface
//!
//! ## Interface Module
//!
//! Everything the emulation layer needs from the outside world is reached
//! through this module: the filesystem backends, the terminal, the pipe
//! buffer, the blocking primitive, and the syscall transport types. The
//! `safeposix` side depends only on what is re-exported here.

pub mod errnos;
mod file;
mod pipe;
mod terminal;
pub mod types;
mod wakeup;
pub use errnos::*;
pub use file::*;
pub use pipe::*;
pub use terminal::*;
pub use types::*;
pub use wakeup::*;
