#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod eval;
pub mod shell;

pub use config::ShellConfig;
pub use errors::{AppError, Result};
