pub mod config;
pub mod context;
pub mod diagnostics;
pub mod logging;
