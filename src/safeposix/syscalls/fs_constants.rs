// File system related constants
// Imported into fs_calls and the channel implementations

pub const STARTINGFD: i32 = 0;
pub const MAXFD: i32 = 64;

pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;
pub const STDERR_FILENO: i32 = 2;

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

//Standard flag combinations
pub const S_IRWXA: u32 = 0o777;
pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;

//File types reported by stat/fstat
pub const S_IFCHR: u32 = 0o20000;
pub const S_IFDIR: u32 = 0o40000;
pub const S_IFIFO: u32 = 0o10000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_FILETYPEFLAGS: u32 = 0o170000;

//Commands for FCNTL
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;

//ioctl requests understood by terminal channels
pub const TIOCGWINSZ: u32 = 0x5413;

//device numbers reported for non-file channels
pub const TERMINALDEVNO: u64 = (5 << 8) | 1;
pub const PIPEDEVNO: u64 = 0;

