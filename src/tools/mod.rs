pub mod builtins;

pub use builtins::register_builtins;
