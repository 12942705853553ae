//! # django-squash-cli
//!
//! Management command framework and the `squash_migrations` command.
//!
//! ## Quick Start
//!
//! ```rust
//! use django_squash_cli::command::CommandRegistry;
//! use django_squash_cli::commands::register_builtin_commands;
//!
//! let mut registry = CommandRegistry::new();
//! register_builtin_commands(&mut registry);
//!
//! assert_eq!(registry.list_commands(), vec!["squash_migrations"]);
//! ```

// These clippy lints are intentionally allowed:
// - result_large_err: SquashError is the workspace-wide error type
// - doc_markdown: backtick requirements for documentation items are too strict
// - missing_const_for_fn: some functions may gain runtime logic later
// - module_name_repetitions: re-exports make module-prefixed names redundant
// - unused_async: command handlers maintain consistent async signatures
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]

pub mod command;
pub mod commands;

// Re-export primary types at the crate root for convenience.
pub use command::{CommandRegistry, ManagementCommand, PROGRAM_NAME};
pub use commands::{register_builtin_commands, SquashMigrationsCommand, SquashOptions};
