#![allow(clippy::needless_return, clippy::redundant_field_names)]

// interface and safeposix are public because otherwise there isn't a great
// way to 'use' them for benchmarking.
pub mod interface;
pub mod safeposix;
pub mod tools;
#[cfg(test)]
mod tests;
