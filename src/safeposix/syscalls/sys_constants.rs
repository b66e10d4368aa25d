// System related constants

// PIDs are handed out starting here; 0 means "no process" in wait4 results
pub const INIT_PID: i32 = 1;

// wait4 accepts this to mean "any child"
pub const WAIT_ANY: i32 = -1;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

// RESOURCE LIMITS

// bytes of address-space regions one process may have attached
pub const RAM_QUOTA: usize = 16 * 1024 * 1024;

pub const PROCESS_STACK_SIZE: usize = 2 * 1024 * 1024;
