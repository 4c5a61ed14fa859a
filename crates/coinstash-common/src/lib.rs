//! Coinstash Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the coinstash workspace.
//!
//! - **Error Handling**: [`CoinstashError`] and the [`Result`] alias
//! - **Logging**: [`logging::init_logging`] configures the global `tracing` subscriber
//!
//! # Example
//!
//! ```no_run
//! use coinstash_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CoinstashError, Result};
