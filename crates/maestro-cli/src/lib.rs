//! Maestro CLI library — the command implementations behind the `maestro` binary.

pub mod commands;
