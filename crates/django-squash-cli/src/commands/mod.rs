//! Built-in management commands.
//!
//! Each command implements the
//! [`ManagementCommand`](crate::command::ManagementCommand) trait.

pub mod squash_migrations;

pub use squash_migrations::{squash_migrations, SquashMigrationsCommand, SquashOptions};

use crate::command::CommandRegistry;

/// Registers all built-in management commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(SquashMigrationsCommand));
}
