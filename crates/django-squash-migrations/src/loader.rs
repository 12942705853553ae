//! Migration loader for discovering migrations from the filesystem.
//!
//! The [`MigrationLoader`] scans a directory structure to find migration files
//! and builds a [`MigrationGraph`] from them. This mirrors Django's
//! `MigrationLoader`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use django_squash_core::SquashResult;

use crate::migration::{Dependency, Migration, MigrationGraph, MigrationKey};
use crate::serializer::SerializableMigration;

/// A migration discovered on disk.
#[derive(Debug, Clone)]
pub struct LoadedMigration {
    /// The parsed migration.
    pub migration: Migration,
    /// The text of the sibling `.py` file, when present.
    pub source: Option<String>,
    /// The path to the JSON history document.
    pub path: PathBuf,
}

/// Discovers and loads migrations from the filesystem.
///
/// The loader expects a directory structure like:
/// ```text
/// migrations_dir/
///   app_label/
///     0001_initial.json
///     0001_initial.py
///     0002_add_field.json
///     0002_add_field.py
/// ```
///
/// Each JSON document describes one migration; the `.py` file next to it is
/// the migration's source module.
pub struct MigrationLoader {
    /// The base directory containing app migration directories.
    migrations_dir: PathBuf,
    /// Discovered migrations keyed by identity.
    migrations: HashMap<MigrationKey, LoadedMigration>,
    /// The graph built by the last [`load`](Self::load).
    graph: MigrationGraph,
}

impl MigrationLoader {
    /// Creates a new loader for the given migrations directory.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            migrations: HashMap::new(),
            graph: MigrationGraph::new(),
        }
    }

    /// Scans the filesystem for migration files and builds a graph.
    ///
    /// Returns the migration graph with all discovered migrations added as
    /// nodes and their dependencies as edges.
    pub fn load(&mut self) -> SquashResult<MigrationGraph> {
        self.discover()?;
        let records: Vec<&Migration> = self.migrations.values().map(|m| &m.migration).collect();
        let graph = Self::graph_from_migrations(&records)?;
        tracing::debug!(
            migrations = graph.len(),
            dir = %self.migrations_dir.display(),
            "loaded migration history"
        );
        self.graph = graph.clone();
        Ok(graph)
    }

    /// Discovers migration files from the directory structure.
    fn discover(&mut self) -> SquashResult<()> {
        self.migrations.clear();

        let dir = self.migrations_dir.clone();
        if !dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                let app_label = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("")
                    .to_string();
                if !app_label.is_empty() && !app_label.starts_with('.') {
                    self.discover_app(&app_label, &path)?;
                }
            }
        }

        Ok(())
    }

    /// Discovers migration files for a single app.
    fn discover_app(&mut self, app_label: &str, app_dir: &Path) -> SquashResult<()> {
        for entry in std::fs::read_dir(app_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();
            if name.is_empty() || name == "__init__" {
                continue;
            }
            let loaded = Self::parse_migration_file(app_label, &name, &path)?;
            self.migrations.insert(loaded.migration.key(), loaded);
        }

        Ok(())
    }

    /// Parses a migration JSON file and reads its source module.
    fn parse_migration_file(
        app_label: &str,
        name: &str,
        path: &Path,
    ) -> SquashResult<LoadedMigration> {
        let migration = SerializableMigration::read_from_file(path)?.into_migration(app_label, name);

        let source_path = path.with_extension("py");
        let source = if source_path.is_file() {
            Some(std::fs::read_to_string(&source_path)?)
        } else {
            tracing::debug!(migration = %migration.key(), "no source module next to migration");
            None
        };

        Ok(LoadedMigration {
            migration,
            source,
            path: path.to_path_buf(),
        })
    }

    /// Returns a loaded migration by key.
    pub fn get_migration(&self, key: &MigrationKey) -> Option<&LoadedMigration> {
        self.migrations.get(key)
    }

    /// Returns the discovered migrations.
    pub fn migrations(&self) -> &HashMap<MigrationKey, LoadedMigration> {
        &self.migrations
    }

    /// Returns the graph built by the last successful load.
    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    /// Returns the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Returns every key some loaded migration declares it replaces.
    pub fn replaced_keys(&self) -> HashSet<MigrationKey> {
        self.migrations
            .values()
            .flat_map(|m| m.migration.replaces.iter().cloned())
            .collect()
    }

    /// Creates a `MigrationGraph` from a list of in-memory migrations.
    ///
    /// Setting dependencies are not edges. A dependency on a migration that
    /// is not in the list is an error.
    pub fn graph_from_migrations(migrations: &[&Migration]) -> SquashResult<MigrationGraph> {
        let mut graph = MigrationGraph::new();

        for m in migrations {
            graph.add_node(&m.app_label, &m.name, m.initial);
        }

        for m in migrations {
            let key = m.key();
            for dep in &m.dependencies {
                match dep {
                    Dependency::Migration(parent) => graph.add_dependency(&key, parent)?,
                    Dependency::Setting(_) => {}
                }
            }
        }

        graph.validate()?;
        Ok(graph)
    }
}
