//! Core error types for django-squash.
//!
//! This module provides the [`SquashError`] enum shared by every crate in the
//! workspace. It covers scope errors (unknown app labels), the "nothing to
//! squash" condition, migration graph and loader failures, configuration
//! errors, serialization errors and IO errors.

use thiserror::Error;

/// The primary error type for django-squash.
///
/// Hard errors abort a squash run before any migration is rendered or written.
/// Soft conditions (manual porting, structural anomalies) are never raised as
/// errors; they are reported alongside the rendered output instead.
///
/// Each variant maps to a process exit status via [`SquashError::exit_code`].
#[derive(Error, Debug)]
pub enum SquashError {
    // ── Scope ────────────────────────────────────────────────────────

    /// One or more requested app labels are not installed.
    #[error("{}", unknown_apps_message(.0))]
    UnknownApps(Vec<String>),

    /// The computed changes do not replace a single existing migration.
    #[error("There are no migrations to squash.")]
    NothingToSquash,

    // ── Migration graph ──────────────────────────────────────────────

    /// The dependency graph is inconsistent (missing node, cycle, ...).
    #[error("Migration graph error: {0}")]
    GraphError(String),

    /// A migration file could not be parsed.
    #[error("Invalid migration file: {0}")]
    InvalidMigration(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The project is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Commands ─────────────────────────────────────────────────────

    /// A management command failed with a user-facing message.
    #[error("{0}")]
    CommandError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn unknown_apps_message(labels: &[String]) -> String {
    labels
        .iter()
        .map(|label| format!("No installed app with label '{label}'."))
        .collect::<Vec<_>>()
        .join("\n")
}

impl SquashError {
    /// Returns the process exit status associated with this error.
    ///
    /// - `UnknownApps` -> 2
    /// - Everything else -> 1
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownApps(_) => 2,
            Self::NothingToSquash
            | Self::GraphError(_)
            | Self::InvalidMigration(_)
            | Self::ConfigurationError(_)
            | Self::ImproperlyConfigured(_)
            | Self::CommandError(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => 1,
        }
    }
}

impl From<serde_json::Error> for SquashError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// A convenience type alias for `Result<T, SquashError>`.
pub type SquashResult<T> = Result<T, SquashError>;
