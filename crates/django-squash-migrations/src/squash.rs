//! Squashing an app's migration history into replacement migrations.
//!
//! The [`SquashAutodetector`] computes, from scratch, the migrations needed to
//! reach the current project state, then turns them into replacements for the
//! existing history:
//!
//! 1. Diff the empty state against the current state over an empty graph.
//! 2. Number the new migrations after the highest existing ordinal.
//! 3. Mark every existing migration of the app as replaced.
//! 4. Rescue raw Python and raw SQL operations from the replaced migrations
//!    into the last new migration of the app, with their functions and imports.
//! 5. Repoint dependencies on the temporary names to the final names.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use django_squash_core::{SquashError, SquashResult};

use crate::autodetect::{MigrationAutodetector, ProjectState};
use crate::classify::all_custom_operations;
use crate::loader::MigrationLoader;
use crate::migration::{
    ordinal_prefix, Dependency, Migration, MigrationGraph, MigrationKey, FIRST_SENTINEL,
};
use crate::operations::{CodeAttribution, FunctionRef, Operation, PythonCallable};
use crate::source::{extract_imports, function_source, rename_function};

/// Suffix used for squashed migration names when none is given.
pub const DEFAULT_SUFFIX: &str = "squashed";

/// The highest ordinal a four-digit migration name can carry.
const MAX_ORDINAL: u32 = 9999;

/// Builds replacement migrations for existing migration history.
pub struct SquashAutodetector {
    detector: MigrationAutodetector,
}

impl SquashAutodetector {
    /// Creates a squasher that reproduces `to_state` starting from `from_state`
    /// (normally empty).
    pub fn new(from_state: ProjectState, to_state: ProjectState) -> Self {
        Self {
            detector: MigrationAutodetector::new(from_state, to_state),
        }
    }

    /// Computes the replacement migrations for every app with changes.
    ///
    /// `trim_to_apps` and `convert_apps` restrict the apps that receive
    /// migrations, see [`MigrationAutodetector::changes`]. `name` is the
    /// suffix of the new migration names (`"squashed"` when `None` or empty).
    ///
    /// # Errors
    ///
    /// Returns [`SquashError::GraphError`] if an app already has a
    /// migration numbered so high that the new names would need five digits.
    pub fn squash(
        &self,
        loader: &MigrationLoader,
        trim_to_apps: Option<&[String]>,
        convert_apps: Option<&[String]>,
        name: Option<&str>,
    ) -> SquashResult<BTreeMap<String, Vec<Migration>>> {
        let graph = loader.graph();

        // The diff starts from a blank history so every model is created anew.
        let mut changes = self
            .detector
            .changes(&MigrationGraph::new(), trim_to_apps, convert_apps);
        tracing::debug!(apps = changes.len(), "computed changes from empty history");

        let renamed = rename_migrations(graph, &mut changes, name)?;
        tracing::debug!(renamed = renamed.len(), "numbered new migrations");

        replace_current_migrations(graph, &mut changes);
        add_non_elidables(loader, &mut changes);
        normalize_dependencies(graph, &mut changes, &renamed);

        for migration in changes.values().flatten() {
            tracing::info!(
                migration = %migration.key(),
                operations = migration.operations.len(),
                replaces = migration.replaces.len(),
                "squashed migration"
            );
        }

        Ok(changes)
    }
}

/// Names each new migration `<ordinal>_<suffix>`, numbering after the
/// highest existing ordinal of its app.
///
/// Returns the mapping from temporary to final keys.
///
/// # Errors
///
/// Returns [`SquashError::GraphError`] if a new ordinal would not fit in
/// four digits.
fn rename_migrations(
    graph: &MigrationGraph,
    changes: &mut BTreeMap<String, Vec<Migration>>,
    name: Option<&str>,
) -> SquashResult<HashMap<MigrationKey, MigrationKey>> {
    let suffix = name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_SUFFIX);
    let mut renamed = HashMap::new();

    for (app_label, migrations) in changes.iter_mut() {
        let current = graph
            .app_nodes(app_label)
            .iter()
            .filter_map(|key| ordinal_prefix(&key.name))
            .max()
            .unwrap_or(0);

        let count = u32::try_from(migrations.len()).unwrap_or(u32::MAX);
        let last = current.saturating_add(count);
        if last > MAX_ORDINAL {
            return Err(SquashError::GraphError(format!(
                "Cannot number squashed migrations for app '{app_label}': ordinal {last} exceeds {MAX_ORDINAL}"
            )));
        }

        for (i, migration) in (1u32..).zip(migrations.iter_mut()) {
            let old_key = migration.key();
            migration.name = format!("{:04}_{suffix}", current + i);
            renamed.insert(old_key, migration.key());
        }
    }

    Ok(renamed)
}

/// Marks every existing migration of each app as replaced.
fn replace_current_migrations(graph: &MigrationGraph, changes: &mut BTreeMap<String, Vec<Migration>>) {
    for (app_label, migrations) in changes.iter_mut() {
        let existing = graph.app_nodes(app_label);
        for migration in migrations.iter_mut() {
            migration.replaces.clone_from(&existing);
        }
    }
}

/// Functions already copied for one app, by name.
#[derive(Default)]
struct RescuedFunctions {
    sources: HashMap<String, String>,
}

impl RescuedFunctions {
    /// Copies `func` out of the replaced migration `key`, if its source can
    /// be found there. A different function already copied under the same
    /// name causes this copy to be renamed.
    fn rescue(&mut self, func: &FunctionRef, key: &MigrationKey, source: Option<&str>) -> FunctionRef {
        let CodeAttribution::Module(module) = &func.attribution else {
            return func.clone();
        };
        if *module != key.module_path() {
            return func.clone();
        }
        let Some(text) = source.and_then(|s| function_source(s, &func.name)) else {
            tracing::warn!(
                migration = %key,
                function = %func.name,
                "function source not found; it must be copied by hand"
            );
            return func.clone();
        };

        let collides = self
            .sources
            .get(&func.name)
            .is_some_and(|existing| *existing != text);
        if !collides {
            self.sources
                .entry(func.name.clone())
                .or_insert_with(|| text.clone());
            return func.detached_copy(text);
        }

        let suffix =
            ordinal_prefix(&key.name).map_or_else(|| key.name.clone(), |n| format!("{n:04}"));
        let new_name = format!("{}_{suffix}", func.name);
        let text = rename_function(&text, &func.name, &new_name);
        tracing::debug!(function = %func.name, renamed = %new_name, "renamed colliding function");
        self.sources.insert(new_name.clone(), text.clone());
        let mut copy = func.detached_copy(text);
        copy.name = new_name;
        copy
    }

    fn rescue_callable(
        &mut self,
        callable: &PythonCallable,
        key: &MigrationKey,
        source: Option<&str>,
    ) -> PythonCallable {
        match callable {
            PythonCallable::Noop => PythonCallable::Noop,
            PythonCallable::Function(func) => {
                PythonCallable::Function(self.rescue(func, key, source))
            }
        }
    }
}

/// Copies raw operations and imports from the replaced migrations into the
/// last new migration of each app.
///
/// Migrations already superseded by another loaded migration are skipped:
/// their raw operations live on in the migration that replaced them.
fn add_non_elidables(loader: &MigrationLoader, changes: &mut BTreeMap<String, Vec<Migration>>) {
    let superseded = loader.replaced_keys();

    for (app_label, migrations) in changes.iter_mut() {
        let replaced: BTreeSet<MigrationKey> = migrations
            .iter()
            .flat_map(|m| m.replaces.iter().cloned())
            .collect();

        let mut operations: Vec<Operation> = Vec::new();
        let mut imports: Vec<String> = Vec::new();
        let mut functions = RescuedFunctions::default();

        for key in &replaced {
            if superseded.contains(key) {
                tracing::debug!(migration = %key, "already squashed; nothing rescued");
                continue;
            }
            let Some(loaded) = loader.get_migration(key) else {
                tracing::warn!(migration = %key, "replaced migration is not loaded; nothing rescued");
                continue;
            };
            let source = loaded.source.as_deref();
            if let Some(source) = source {
                for import in extract_imports(source) {
                    if !imports.contains(&import) {
                        imports.push(import);
                    }
                }
            }

            for op in all_custom_operations(&loaded.migration.operations) {
                let rescued = match op {
                    Operation::RunPython(run) => {
                        let mut copy = run.clone();
                        copy.code = functions.rescue_callable(&run.code, key, source);
                        copy.reverse_code = run
                            .reverse_code
                            .as_ref()
                            .map(|c| functions.rescue_callable(c, key, source));
                        Operation::RunPython(copy)
                    }
                    other => other.clone(),
                };
                operations.push(rescued);
            }
        }

        tracing::debug!(
            app = %app_label,
            operations = operations.len(),
            imports = imports.len(),
            "rescued custom operations"
        );
        if let Some(last) = migrations.last_mut() {
            last.operations.extend(operations);
            last.extra_imports = imports;
        }
    }
}

/// Rewrites dependencies on temporary names and reports any that point
/// nowhere.
fn normalize_dependencies(
    graph: &MigrationGraph,
    changes: &mut BTreeMap<String, Vec<Migration>>,
    renamed: &HashMap<MigrationKey, MigrationKey>,
) {
    let new_keys: BTreeSet<MigrationKey> = renamed.values().cloned().collect();

    for migration in changes.values_mut().flatten() {
        let own_key = migration.key();
        for dep in &mut migration.dependencies {
            let Dependency::Migration(key) = dep else {
                continue;
            };
            if let Some(new_key) = renamed.get(&*key) {
                *key = new_key.clone();
            }
            let resolved =
                new_keys.contains(&*key) || graph.contains(key) || key.name == FIRST_SENTINEL;
            if !resolved {
                tracing::warn!(migration = %own_key, dependency = %key, "unresolved dependency");
            }
        }
    }
}

/// Lists `(dependent, replaced)` pairs where a migration outside the squash
/// still depends on a migration that is being replaced.
pub fn dangling_references(
    graph: &MigrationGraph,
    changes: &BTreeMap<String, Vec<Migration>>,
) -> Vec<(MigrationKey, MigrationKey)> {
    let replaced: BTreeSet<&MigrationKey> = changes
        .values()
        .flatten()
        .flat_map(|m| m.replaces.iter())
        .collect();

    let mut dangling = Vec::new();
    for key in graph.node_keys() {
        if replaced.contains(&key) {
            continue;
        }
        for parent in graph.dependencies(&key) {
            if replaced.contains(&parent) {
                dangling.push((key.clone(), parent));
            }
        }
    }
    dangling.sort();
    dangling
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodetect::{MigrationFieldDef, ModelState};
    use crate::fields::{FieldType, OnDelete};
    use crate::operations::{RunPython, RunSql, SchemaOperation};

    fn pk() -> MigrationFieldDef {
        MigrationFieldDef::new("id", FieldType::BigAutoField).primary_key()
    }

    fn state(models: Vec<ModelState>) -> ProjectState {
        let mut s = ProjectState::new();
        for m in models {
            s.add_model(m);
        }
        s
    }

    fn graph(nodes: &[(&str, &str)]) -> MigrationGraph {
        let mut g = MigrationGraph::new();
        for (app, name) in nodes {
            g.add_node(*app, *name, false);
        }
        g
    }

    fn temp_changes(apps: &[(&str, usize)]) -> BTreeMap<String, Vec<Migration>> {
        apps.iter()
            .map(|(app, n)| {
                let records = (1..=*n)
                    .map(|i| Migration::new(*app, format!("auto_{i}")))
                    .collect();
                ((*app).to_string(), records)
            })
            .collect()
    }

    // ── Renaming ────────────────────────────────────────────────────

    #[test]
    fn test_rename_continues_after_max_ordinal() {
        let g = graph(&[("blog", "0001_initial"), ("blog", "0007_x"), ("blog", "notes")]);
        let mut changes = temp_changes(&[("blog", 2), ("shop", 1)]);
        let renamed = rename_migrations(&g, &mut changes, None).unwrap();

        let names: Vec<&str> = changes["blog"].iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["0008_squashed", "0009_squashed"]);
        assert_eq!(changes["shop"][0].name, "0001_squashed");
        assert_eq!(
            renamed[&MigrationKey::new("blog", "auto_2")],
            MigrationKey::new("blog", "0009_squashed")
        );
    }

    #[test]
    fn test_rename_with_custom_suffix() {
        let mut changes = temp_changes(&[("blog", 1)]);
        rename_migrations(&MigrationGraph::new(), &mut changes, Some("compact")).unwrap();
        assert_eq!(changes["blog"][0].name, "0001_compact");

        let mut changes = temp_changes(&[("blog", 1)]);
        rename_migrations(&MigrationGraph::new(), &mut changes, Some("")).unwrap();
        assert_eq!(changes["blog"][0].name, "0001_squashed");
    }

    #[test]
    fn test_rename_rejects_ordinal_past_four_digits() {
        let g = graph(&[("blog", "9998_late")]);
        let mut changes = temp_changes(&[("blog", 1)]);
        rename_migrations(&g, &mut changes, None).unwrap();
        assert_eq!(changes["blog"][0].name, "9999_squashed");

        let g = graph(&[("blog", "9999_last")]);
        let mut changes = temp_changes(&[("blog", 1)]);
        let err = rename_migrations(&g, &mut changes, None).unwrap_err();
        assert!(matches!(err, SquashError::GraphError(_)));
        assert!(err.to_string().contains("10000"));
        assert_eq!(changes["blog"][0].name, "auto_1");
    }

    // ── Replaces ────────────────────────────────────────────────────

    #[test]
    fn test_replaces_lists_every_existing_migration() {
        let g = graph(&[
            ("blog", "0002_b"),
            ("blog", "0001_a"),
            ("shop", "0001_initial"),
        ]);
        let mut changes = temp_changes(&[("blog", 2)]);
        replace_current_migrations(&g, &mut changes);
        let expected = vec![
            MigrationKey::new("blog", "0001_a"),
            MigrationKey::new("blog", "0002_b"),
        ];
        assert_eq!(changes["blog"][0].replaces, expected);
        assert_eq!(changes["blog"][1].replaces, expected);
    }

    // ── Dependency normalization ────────────────────────────────────

    #[test]
    fn test_normalize_dependencies_uses_final_names() {
        let g = graph(&[("auth", "0003_user")]);
        let mut changes = temp_changes(&[("blog", 2)]);
        changes.get_mut("blog").unwrap()[1]
            .dependencies
            .push(Dependency::Migration(MigrationKey::new("blog", "auto_1")));
        changes.get_mut("blog").unwrap()[0]
            .dependencies
            .push(Dependency::Migration(MigrationKey::new("auth", "0003_user")));
        let renamed = rename_migrations(&MigrationGraph::new(), &mut changes, None).unwrap();
        normalize_dependencies(&g, &mut changes, &renamed);

        assert_eq!(
            changes["blog"][1].dependencies,
            vec![Dependency::Migration(MigrationKey::new("blog", "0001_squashed"))]
        );
        assert_eq!(
            changes["blog"][0].dependencies,
            vec![Dependency::Migration(MigrationKey::new("auth", "0003_user"))]
        );
    }

    // ── Dangling references ─────────────────────────────────────────

    #[test]
    fn test_dangling_references() {
        let mut g = graph(&[("blog", "0001_initial"), ("shop", "0001_initial")]);
        g.add_dependency(
            &MigrationKey::new("shop", "0001_initial"),
            &MigrationKey::new("blog", "0001_initial"),
        )
        .unwrap();
        let mut changes = temp_changes(&[("blog", 1)]);
        replace_current_migrations(&g, &mut changes);

        assert_eq!(
            dangling_references(&g, &changes),
            vec![(
                MigrationKey::new("shop", "0001_initial"),
                MigrationKey::new("blog", "0001_initial")
            )]
        );
    }

    // ── Function rescue ─────────────────────────────────────────────

    #[test]
    fn test_rescue_detaches_found_function() {
        let key = MigrationKey::new("blog", "0002_data");
        let func = FunctionRef::in_module(key.module_path(), "fill");
        let source = "def fill(apps, schema_editor):\n    pass\n";
        let copy = RescuedFunctions::default().rescue(&func, &key, Some(source));
        assert!(copy.is_pending_cleanup());
        assert_eq!(copy.source.as_deref(), Some(source));
        // The loaded original is untouched.
        assert!(!func.is_pending_cleanup());
    }

    #[test]
    fn test_rescue_keeps_external_and_missing_functions() {
        let key = MigrationKey::new("blog", "0002_data");
        let mut rescued = RescuedFunctions::default();

        let external = FunctionRef::in_module("blog.utils", "fill");
        assert_eq!(rescued.rescue(&external, &key, Some("def fill(): pass\n")), external);

        let missing = FunctionRef::in_module(key.module_path(), "absent");
        assert_eq!(rescued.rescue(&missing, &key, Some("def fill(): pass\n")), missing);
        assert_eq!(rescued.rescue(&missing, &key, None), missing);
    }

    #[test]
    fn test_rescue_renames_colliding_function() {
        let first = MigrationKey::new("blog", "0002_a");
        let second = MigrationKey::new("blog", "0004_b");
        let mut rescued = RescuedFunctions::default();

        let a = rescued.rescue(
            &FunctionRef::in_module(first.module_path(), "forwards"),
            &first,
            Some("def forwards(apps, schema_editor):\n    a()\n"),
        );
        let same = rescued.rescue(
            &FunctionRef::in_module(first.module_path(), "forwards"),
            &first,
            Some("def forwards(apps, schema_editor):\n    a()\n"),
        );
        let b = rescued.rescue(
            &FunctionRef::in_module(second.module_path(), "forwards"),
            &second,
            Some("def forwards(apps, schema_editor):\n    b()\n"),
        );

        assert_eq!(a.name, "forwards");
        assert_eq!(same, a);
        assert_eq!(b.name, "forwards_0004");
        assert_eq!(
            b.source.as_deref(),
            Some("def forwards_0004(apps, schema_editor):\n    b()\n")
        );
    }

    // ── squash (in memory) ──────────────────────────────────────────

    #[test]
    fn test_squash_without_history_replaces_nothing() {
        let to = state(vec![ModelState::new("blog", "Post", vec![pk()])]);
        let loader = MigrationLoader::new("/nonexistent/squash/history");
        let changes = SquashAutodetector::new(ProjectState::new(), to)
            .squash(&loader, None, None, None)
            .unwrap();
        let blog = &changes["blog"];
        assert_eq!(blog.len(), 1);
        assert_eq!(blog[0].name, "0001_squashed");
        assert!(blog[0].initial);
        assert!(blog[0].replaces.is_empty());
    }

    #[test]
    fn test_squash_cross_app_dependencies_use_final_names() {
        let to = state(vec![
            ModelState::new("auth", "User", vec![pk()]),
            ModelState::new(
                "blog",
                "Post",
                vec![
                    pk(),
                    MigrationFieldDef::new(
                        "author",
                        FieldType::ForeignKey {
                            to: "auth.User".into(),
                            on_delete: OnDelete::Cascade,
                            related_name: None,
                        },
                    ),
                ],
            ),
        ]);
        let loader = MigrationLoader::new("/nonexistent/squash/history");
        let changes = SquashAutodetector::new(ProjectState::new(), to)
            .squash(&loader, None, None, Some("reset"))
            .unwrap();
        assert_eq!(
            changes["blog"][0].dependencies,
            vec![Dependency::Migration(MigrationKey::new("auth", "0001_reset"))]
        );
        assert!(matches!(
            changes["blog"][0].operations[0],
            Operation::Schema(SchemaOperation::CreateModel(_))
        ));
    }

    #[test]
    fn test_rescue_callable_noop() {
        let key = MigrationKey::new("blog", "0002_data");
        let run = RunPython::new(PythonCallable::Noop);
        let copy = RescuedFunctions::default().rescue_callable(&run.code, &key, None);
        assert_eq!(copy, PythonCallable::Noop);
        // Raw SQL needs no rescue beyond cloning.
        let sql: Operation = RunSql::new("SELECT 1").into();
        assert_eq!(all_custom_operations(std::slice::from_ref(&sql)).count(), 1);
    }
}
