//! busker-cli - the `busker` binary's building blocks.

pub mod commands;
pub mod demo;
pub mod telemetry;
