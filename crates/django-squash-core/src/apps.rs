//! Application registry for django-squash.
//!
//! This module provides the [`AppConfig`] trait and [`AppRegistry`], which
//! together describe the set of installed applications a squash run may
//! target. Labels are matched against the positional arguments of the
//! `squash_migrations` command.

use std::collections::HashMap;

use crate::error::{SquashError, SquashResult};

/// Configuration for an installed application.
///
/// # Examples
///
/// ```
/// use django_squash_core::apps::AppConfig;
///
/// struct Blog;
///
/// impl AppConfig for Blog {
///     fn name(&self) -> &str { "project.blog" }
/// }
///
/// assert_eq!(Blog.label(), "blog");
/// ```
pub trait AppConfig: Send + Sync {
    /// Returns the full dotted path of the application.
    fn name(&self) -> &str;

    /// Returns a short label derived from the name (the last component).
    ///
    /// For example, `"django.contrib.auth"` yields `"auth"`.
    fn label(&self) -> &str {
        self.name().rsplit('.').next().unwrap_or_else(|| self.name())
    }

    /// Returns a human-readable name for the application.
    fn verbose_name(&self) -> &str {
        self.name()
    }
}

/// An application declared by name in `Settings::installed_apps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    name: String,
}

impl InstalledApp {
    /// Creates an installed app from its dotted path.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AppConfig for InstalledApp {
    fn name(&self) -> &str {
        &self.name
    }
}

/// The registry of installed applications, keyed by label.
pub struct AppRegistry {
    apps: Vec<Box<dyn AppConfig>>,
    app_labels: HashMap<String, usize>,
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppRegistry {
    /// Creates a new, empty `AppRegistry`.
    pub fn new() -> Self {
        Self {
            apps: Vec::new(),
            app_labels: HashMap::new(),
        }
    }

    /// Builds a registry from a list of dotted app paths.
    ///
    /// # Errors
    ///
    /// Returns [`SquashError::ImproperlyConfigured`] if two entries share a label.
    pub fn from_installed_apps(installed_apps: &[String]) -> SquashResult<Self> {
        let mut registry = Self::new();
        for name in installed_apps {
            registry.register(Box::new(InstalledApp::new(name.clone())))?;
        }
        Ok(registry)
    }

    /// Registers an application.
    ///
    /// # Errors
    ///
    /// Returns [`SquashError::ImproperlyConfigured`] if an application with
    /// the same label is already registered.
    pub fn register(&mut self, app: Box<dyn AppConfig>) -> SquashResult<()> {
        let label = app.label().to_string();
        if self.app_labels.contains_key(&label) {
            return Err(SquashError::ImproperlyConfigured(format!(
                "Application labels aren't unique, duplicates: {label}"
            )));
        }

        let index = self.apps.len();
        self.app_labels.insert(label, index);
        self.apps.push(app);
        Ok(())
    }

    /// Returns the configuration for the app with the given label, if registered.
    pub fn get_app_config(&self, label: &str) -> Option<&dyn AppConfig> {
        self.app_labels
            .get(label)
            .map(|&idx| self.apps[idx].as_ref())
    }

    /// Returns `true` if an app with this label is installed.
    pub fn contains(&self, label: &str) -> bool {
        self.app_labels.contains_key(label)
    }

    /// Returns all labels in registration order.
    pub fn labels(&self) -> Vec<&str> {
        self.apps.iter().map(|app| app.label()).collect()
    }

    /// Returns the given labels that are not installed, preserving their order.
    pub fn unknown_labels<'a>(&self, labels: &'a [String]) -> Vec<&'a str> {
        labels
            .iter()
            .filter(|label| !self.contains(label))
            .map(String::as_str)
            .collect()
    }

    /// Returns a slice of all registered app configurations.
    pub fn get_app_configs(&self) -> &[Box<dyn AppConfig>] {
        &self.apps
    }
}
