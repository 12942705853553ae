//! Migration records and the dependency graph.
//!
//! A [`Migration`] is a named unit of schema change containing a sequence of
//! [`Operation`]s. Migrations are identified by a [`MigrationKey`] and may
//! depend on other migrations or on a swappable setting. The
//! [`MigrationGraph`] manages the dependency DAG between migrations across all
//! apps, enabling topological ordering.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use django_squash_core::SquashError;

use crate::operations::Operation;

/// The app label used by swappable-setting dependencies.
pub const SETTING_SENTINEL: &str = "__setting__";

/// The name used for "the first migration of an app" dependencies.
pub const FIRST_SENTINEL: &str = "__first__";

/// The identity of a migration: `(app_label, name)`.
///
/// Equality, hashing and ordering consider exactly that pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationKey {
    /// The application label.
    pub app_label: String,
    /// The migration name (e.g. "0001_initial").
    pub name: String,
}

impl MigrationKey {
    /// Creates a new key.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
        }
    }

    /// Returns the dotted Python module path of this migration
    /// (`"<app>.migrations.<name>"`).
    pub fn module_path(&self) -> String {
        format!("{}.migrations.{}", self.app_label, self.name)
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

impl From<(&str, &str)> for MigrationKey {
    fn from((app_label, name): (&str, &str)) -> Self {
        Self::new(app_label, name)
    }
}

/// Something a migration must be applied after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    /// Another migration.
    Migration(MigrationKey),
    /// Whichever migration creates the model named by a swappable setting
    /// (e.g. `AUTH_USER_MODEL`).
    Setting(String),
}

impl Dependency {
    /// Returns the migration key for record dependencies.
    pub const fn as_key(&self) -> Option<&MigrationKey> {
        match self {
            Self::Migration(key) => Some(key),
            Self::Setting(_) => None,
        }
    }

    /// Returns the `(first, second)` pair this dependency is written as.
    pub fn as_pair(&self) -> (&str, &str) {
        match self {
            Self::Migration(key) => (&key.app_label, &key.name),
            Self::Setting(name) => (SETTING_SENTINEL, name),
        }
    }

    /// Builds a dependency from its `(first, second)` pair.
    pub fn from_pair(first: &str, second: &str) -> Self {
        if first == SETTING_SENTINEL {
            Self::Setting(second.to_string())
        } else {
            Self::Migration(MigrationKey::new(first, second))
        }
    }
}

impl From<MigrationKey> for Dependency {
    fn from(key: MigrationKey) -> Self {
        Self::Migration(key)
    }
}

/// A single migration containing a sequence of operations.
///
/// Migrations are identified by `(app_label, name)` and may declare
/// dependencies on other migrations. Operations within a migration
/// are applied in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// The migration name (e.g., "0001_initial").
    pub name: String,
    /// The application label this migration belongs to.
    pub app_label: String,
    /// What must be applied before this migration.
    pub dependencies: Vec<Dependency>,
    /// The operations to apply, in order.
    pub operations: Vec<Operation>,
    /// Whether this is the initial migration for the app.
    pub initial: bool,
    /// Migrations this one supersedes.
    pub replaces: Vec<MigrationKey>,
    /// Raw import statements carried over from superseded migrations.
    pub extra_imports: Vec<String>,
}

impl Migration {
    /// Creates a new migration.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_label: app_label.into(),
            dependencies: Vec::new(),
            operations: Vec::new(),
            initial: false,
            replaces: Vec::new(),
            extra_imports: Vec::new(),
        }
    }

    /// Marks this migration as the initial migration.
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Adds a dependency on another migration.
    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies
            .push(Dependency::Migration(MigrationKey::new(app_label, name)));
        self
    }

    /// Adds a dependency on a swappable setting.
    pub fn depends_on_setting(mut self, setting: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::Setting(setting.into()));
        self
    }

    /// Adds an operation to this migration.
    pub fn add_operation(mut self, op: impl Into<Operation>) -> Self {
        self.operations.push(op.into());
        self
    }

    /// Declares that this migration replaces another.
    pub fn replacing(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.replaces.push(MigrationKey::new(app_label, name));
        self
    }

    /// Returns the `(app_label, name)` key for this migration.
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(self.app_label.clone(), self.name.clone())
    }

    /// Returns the migration keys this migration depends on, skipping settings.
    pub fn migration_dependencies(&self) -> impl Iterator<Item = &MigrationKey> {
        self.dependencies.iter().filter_map(Dependency::as_key)
    }
}

/// Returns the four-digit ordinal prefix of a migration name, if present.
///
/// `"0007_add_field"` yields `Some(7)`; `"initial"` and `"12_x"` yield `None`.
pub fn ordinal_prefix(name: &str) -> Option<u32> {
    let prefix = name.get(..4)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// A directed acyclic graph (DAG) of migrations.
///
/// The graph tracks which migrations exist and their dependency relationships.
/// It provides topological ordering so migrations can be replayed in the
/// correct sequence.
#[derive(Debug, Clone)]
pub struct MigrationGraph {
    /// All migration nodes keyed by identity.
    nodes: HashMap<MigrationKey, MigrationNode>,
    /// Forward edges: from dependency to dependent.
    forward_edges: HashMap<MigrationKey, Vec<MigrationKey>>,
    /// Backward edges: from dependent to dependency.
    backward_edges: HashMap<MigrationKey, Vec<MigrationKey>>,
}

/// A node in the migration graph.
#[derive(Debug, Clone)]
struct MigrationNode {
    initial: bool,
}

impl MigrationGraph {
    /// Creates a new empty migration graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            forward_edges: HashMap::new(),
            backward_edges: HashMap::new(),
        }
    }

    /// Adds a migration to the graph.
    pub fn add_node(
        &mut self,
        app_label: impl Into<String>,
        name: impl Into<String>,
        initial: bool,
    ) {
        let key = MigrationKey::new(app_label, name);
        self.nodes.insert(key.clone(), MigrationNode { initial });
        self.forward_edges.entry(key.clone()).or_default();
        self.backward_edges.entry(key).or_default();
    }

    /// Adds a dependency edge: `child` depends on `parent`.
    ///
    /// Both nodes must have been added previously.
    pub fn add_dependency(
        &mut self,
        child: &MigrationKey,
        parent: &MigrationKey,
    ) -> Result<(), SquashError> {
        if !self.nodes.contains_key(child) {
            return Err(SquashError::GraphError(format!(
                "Migration {child} not found in graph"
            )));
        }
        if !self.nodes.contains_key(parent) {
            return Err(SquashError::GraphError(format!(
                "Migration {child} depends on nonexistent migration {parent}"
            )));
        }
        self.forward_edges
            .entry(parent.clone())
            .or_default()
            .push(child.clone());
        self.backward_edges
            .entry(child.clone())
            .or_default()
            .push(parent.clone());
        Ok(())
    }

    /// Returns all migrations in topological order (dependencies first).
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<MigrationKey>, SquashError> {
        let mut in_degree: HashMap<&MigrationKey, usize> =
            self.nodes.keys().map(|key| (key, 0)).collect();
        for children in self.forward_edges.values() {
            for child in children {
                *in_degree.entry(child).or_insert(0) += 1;
            }
        }

        // Sort the initial queue for deterministic ordering
        let mut initial: Vec<&MigrationKey> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(key, _)| *key)
            .collect();
        initial.sort();
        let mut queue: VecDeque<&MigrationKey> = initial.into_iter().collect();

        let mut result = Vec::new();
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());
            if let Some(children) = self.forward_edges.get(node) {
                let mut sorted_children: Vec<&MigrationKey> = children.iter().collect();
                sorted_children.sort();
                for child in sorted_children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            return Err(SquashError::GraphError(
                "Circular dependency detected in migration graph".to_string(),
            ));
        }

        Ok(result)
    }

    /// Returns the leaf nodes (migrations no other migration of the same app
    /// depends on) for a given app.
    pub fn leaf_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        let mut leaves: Vec<MigrationKey> = self
            .forward_edges
            .iter()
            .filter(|(key, children)| {
                key.app_label == app_label && !children.iter().any(|c| c.app_label == app_label)
            })
            .map(|(key, _)| key.clone())
            .collect();
        leaves.sort();
        leaves
    }

    /// Returns the root nodes (migrations with no dependencies inside their
    /// app) for a given app.
    pub fn root_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        let mut roots: Vec<MigrationKey> = self
            .backward_edges
            .iter()
            .filter(|(key, parents)| {
                key.app_label == app_label && !parents.iter().any(|p| p.app_label == app_label)
            })
            .map(|(key, _)| key.clone())
            .collect();
        roots.sort();
        roots
    }

    /// Returns all node keys in the graph, sorted.
    pub fn node_keys(&self) -> Vec<MigrationKey> {
        let mut keys: Vec<_> = self.nodes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the sorted node keys belonging to one app.
    pub fn app_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        let mut keys: Vec<_> = self
            .nodes
            .keys()
            .filter(|key| key.app_label == app_label)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Returns `true` if any node belongs to `app_label`.
    pub fn has_app(&self, app_label: &str) -> bool {
        self.nodes.keys().any(|key| key.app_label == app_label)
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns whether the graph contains a given node.
    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns whether the node is marked initial.
    pub fn is_initial(&self, key: &MigrationKey) -> bool {
        self.nodes.get(key).is_some_and(|node| node.initial)
    }

    /// Returns the dependencies of a node.
    pub fn dependencies(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.backward_edges.get(key).cloned().unwrap_or_default()
    }

    /// Returns the dependents of a node.
    pub fn dependents(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.forward_edges.get(key).cloned().unwrap_or_default()
    }

    /// Validates that the graph has no cycles.
    pub fn validate(&self) -> Result<(), SquashError> {
        self.topological_order()?;
        Ok(())
    }
}

impl Default for MigrationGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::RunSql;

    fn key(app: &str, name: &str) -> MigrationKey {
        MigrationKey::new(app, name)
    }

    // ── MigrationKey / Dependency ───────────────────────────────────

    #[test]
    fn test_key_ordering_and_display() {
        let mut keys = vec![key("blog", "0002_b"), key("auth", "0001_a"), key("blog", "0001_a")];
        keys.sort();
        assert_eq!(keys[0], key("auth", "0001_a"));
        assert_eq!(keys[2], key("blog", "0002_b"));
        assert_eq!(key("blog", "0001_a").to_string(), "blog.0001_a");
    }

    #[test]
    fn test_key_module_path() {
        assert_eq!(
            key("blog", "0002_add_field").module_path(),
            "blog.migrations.0002_add_field"
        );
    }

    #[test]
    fn test_dependency_pairs() {
        let dep = Dependency::from_pair("__setting__", "AUTH_USER_MODEL");
        assert_eq!(dep, Dependency::Setting("AUTH_USER_MODEL".into()));
        assert_eq!(dep.as_pair(), ("__setting__", "AUTH_USER_MODEL"));
        assert!(dep.as_key().is_none());

        let dep = Dependency::from_pair("blog", "0001_initial");
        assert_eq!(dep.as_key(), Some(&key("blog", "0001_initial")));
    }

    #[test]
    fn test_ordinal_prefix() {
        assert_eq!(ordinal_prefix("0001_initial"), Some(1));
        assert_eq!(ordinal_prefix("0042_auto"), Some(42));
        assert_eq!(ordinal_prefix("9999"), Some(9999));
        assert_eq!(ordinal_prefix("initial"), None);
        assert_eq!(ordinal_prefix("12_x"), None);
        assert_eq!(ordinal_prefix(""), None);
    }

    // ── Migration ───────────────────────────────────────────────────

    #[test]
    fn test_migration_new() {
        let m = Migration::new("blog", "0001_initial");
        assert_eq!(m.app_label, "blog");
        assert_eq!(m.name, "0001_initial");
        assert!(!m.initial);
        assert!(m.dependencies.is_empty());
        assert!(m.operations.is_empty());
        assert!(m.replaces.is_empty());
        assert!(m.extra_imports.is_empty());
    }

    #[test]
    fn test_migration_builder() {
        let m = Migration::new("blog", "0002_add_author")
            .depends_on("blog", "0001_initial")
            .depends_on_setting("AUTH_USER_MODEL")
            .replacing("blog", "0001_initial")
            .add_operation(RunSql::new("SELECT 1"));
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.migration_dependencies().count(), 1);
        assert_eq!(m.replaces, vec![key("blog", "0001_initial")]);
        assert_eq!(m.operations.len(), 1);
        assert_eq!(m.key(), key("blog", "0002_add_author"));
    }

    // ── MigrationGraph ──────────────────────────────────────────────

    #[test]
    fn test_graph_new() {
        let g = MigrationGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
    }

    #[test]
    fn test_graph_add_dependency_missing_parent() {
        let mut g = MigrationGraph::new();
        g.add_node("blog", "0002_x", false);
        let result = g.add_dependency(&key("blog", "0002_x"), &key("blog", "0001_initial"));
        assert!(matches!(result, Err(SquashError::GraphError(_))));
    }

    #[test]
    fn test_graph_topological_order() {
        let mut g = MigrationGraph::new();
        g.add_node("blog", "0002_add_title", false);
        g.add_node("blog", "0001_initial", true);
        g.add_node("auth", "0001_initial", true);
        g.add_dependency(&key("blog", "0002_add_title"), &key("blog", "0001_initial"))
            .unwrap();
        g.add_dependency(&key("blog", "0001_initial"), &key("auth", "0001_initial"))
            .unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(
            order,
            vec![
                key("auth", "0001_initial"),
                key("blog", "0001_initial"),
                key("blog", "0002_add_title"),
            ]
        );
    }

    #[test]
    fn test_graph_cycle_detected() {
        let mut g = MigrationGraph::new();
        g.add_node("a", "0001", true);
        g.add_node("b", "0001", true);
        g.add_dependency(&key("a", "0001"), &key("b", "0001")).unwrap();
        g.add_dependency(&key("b", "0001"), &key("a", "0001")).unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_graph_leaf_and_root_nodes_per_app() {
        let mut g = MigrationGraph::new();
        g.add_node("auth", "0001_initial", true);
        g.add_node("blog", "0001_initial", true);
        g.add_node("blog", "0002_more", false);
        g.add_dependency(&key("blog", "0002_more"), &key("blog", "0001_initial"))
            .unwrap();
        g.add_dependency(&key("blog", "0001_initial"), &key("auth", "0001_initial"))
            .unwrap();

        assert_eq!(g.leaf_nodes("blog"), vec![key("blog", "0002_more")]);
        assert_eq!(g.root_nodes("blog"), vec![key("blog", "0001_initial")]);
        // auth's only dependent lives in another app, so it is still a leaf.
        assert_eq!(g.leaf_nodes("auth"), vec![key("auth", "0001_initial")]);
        assert_eq!(g.app_nodes("blog").len(), 2);
        assert!(g.has_app("auth"));
        assert!(!g.has_app("shop"));
        assert!(g.is_initial(&key("blog", "0001_initial")));
        assert_eq!(g.dependents(&key("auth", "0001_initial")).len(), 1);
        assert_eq!(g.dependencies(&key("blog", "0002_more")).len(), 1);
    }

    #[test]
    fn test_graph_node_keys_sorted() {
        let mut g = MigrationGraph::new();
        g.add_node("b", "0001", true);
        g.add_node("a", "0002", false);
        g.add_node("a", "0001", true);
        assert_eq!(
            g.node_keys(),
            vec![key("a", "0001"), key("a", "0002"), key("b", "0001")]
        );
    }
}
