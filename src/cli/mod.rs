//! CLI subcommand implementations for the courier binary.

pub mod client;
pub mod doctor;
pub mod pause;
pub mod resume;
pub mod start;
pub mod status;
pub mod stop;
pub mod use_cmd;
