//! # django-squash-core
//!
//! Core types shared by the django-squash crates: settings and their loaders,
//! the installed-app registry, logging setup and the error type.
//!
//! ## Modules
//!
//! - [`error`] - Error type, exit codes and result alias
//! - [`settings`] - Project settings and global configuration
//! - [`settings_loader`] - TOML/JSON/environment loading for [`Settings`]
//! - [`apps`] - Installed application registry
//! - [`logging`] - Tracing-based logging integration

pub mod apps;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{SquashError, SquashResult};
pub use settings::{Settings, SETTINGS};
