//! CLI command implementations.

pub mod build;
pub mod provision;
pub mod serve;

pub use build::cmd_build;
pub use provision::cmd_provision;
pub use serve::cmd_serve;
