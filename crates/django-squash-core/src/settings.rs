//! Settings for django-squash.
//!
//! This module provides the [`Settings`] struct, which holds the project
//! configuration a squash run needs, and [`LazySettings`], a globally-accessible,
//! lazily-initialized settings instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// The suffix given to squashed migrations when no name is requested.
pub const DEFAULT_SQUASH_NAME: &str = "squashed";

/// The complete set of project settings.
///
/// # Examples
///
/// ```
/// use django_squash_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.squash_name, "squashed");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled.
    pub debug: bool,
    /// Installed application labels (or dotted paths, the last component is the label).
    pub installed_apps: Vec<String>,

    // ── Migrations ───────────────────────────────────────────────────

    /// Directory holding one sub-directory of migration files per app.
    pub migrations_dir: PathBuf,
    /// Optional JSON snapshot of the current models. When absent the current
    /// state is rebuilt by replaying the migration history.
    pub state_file: Option<PathBuf>,
    /// Suffix used for squashed migration names (`0005_<squash_name>`).
    pub squash_name: String,
    /// Whether generated files start with a "Generated by" header comment.
    pub include_header: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "warn").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Core
            debug: true,
            installed_apps: Vec::new(),

            // Migrations
            migrations_dir: PathBuf::from("migrations"),
            state_file: None,
            squash_name: DEFAULT_SQUASH_NAME.to_string(),
            include_header: false,

            // Logging
            log_level: "info".to_string(),

            // Extra
            extra: HashMap::new(),
        }
    }
}

/// A lazily-initialized, globally-accessible settings container.
///
/// Call [`configure`](LazySettings::configure) once at startup to set the
/// settings, then use [`get`](LazySettings::get) to access them.
///
/// # Panics
///
/// [`get`](LazySettings::get) panics if settings have not been configured.
/// [`configure`](LazySettings::configure) panics if called more than once.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics if settings have already been configured.
    pub fn configure(&self, settings: Settings) {
        self.inner
            .set(settings)
            .expect("Settings have already been configured");
    }

    /// Returns a reference to the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if settings have not been configured.
    pub fn get(&self) -> &Settings {
        self.inner
            .get()
            .expect("Settings have not been configured. Call SETTINGS.configure() first.")
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();
