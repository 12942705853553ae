//! Project state and migration auto-detection.
//!
//! The [`MigrationAutodetector`] compares an "old" [`ProjectState`] against a
//! "new" [`ProjectState`] and generates the operations needed to transform one
//! into the other. [`MigrationAutodetector::changes`] then arranges those
//! operations into per-app [`Migration`] records with the dependencies needed
//! to apply them in a valid order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use django_squash_core::{SquashError, SquashResult};
use serde::{Deserialize, Serialize};

use crate::fields::{FieldType, Index, RelationTarget, Value};
use crate::loader::MigrationLoader;
use crate::migration::{Dependency, Migration, MigrationGraph, MigrationKey, FIRST_SENTINEL};
use crate::operations::{
    AddField, AddIndex, AlterField, AlterUniqueTogether, CreateModel, DeleteModel, Operation,
    RemoveField, RemoveIndex, RenameField, SchemaOperation,
};

/// A snapshot of the entire project's model state at a point in time.
///
/// Contains all models across all apps, keyed by `(app_label, model_name)`
/// with the model name lowercased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    /// All models in the project.
    pub models: HashMap<(String, String), ModelState>,
}

impl ProjectState {
    /// Creates a new empty project state.
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Adds a model to this project state, replacing any model with the same key.
    pub fn add_model(&mut self, model: ModelState) {
        let key = (model.app_label.clone(), model.name.to_lowercase());
        self.models.insert(key, model);
    }

    /// Removes a model from this project state.
    pub fn remove_model(&mut self, app_label: &str, name: &str) -> Option<ModelState> {
        self.models
            .remove(&(app_label.to_string(), name.to_lowercase()))
    }

    /// Returns a model by app label and (case-insensitive) name.
    pub fn get_model(&self, app_label: &str, name: &str) -> Option<&ModelState> {
        self.models
            .get(&(app_label.to_string(), name.to_lowercase()))
    }

    /// Returns a mutable model by app label and (case-insensitive) name.
    pub fn get_model_mut(&mut self, app_label: &str, name: &str) -> Option<&mut ModelState> {
        self.models
            .get_mut(&(app_label.to_string(), name.to_lowercase()))
    }

    /// Returns the sorted labels of every app that has at least one model.
    pub fn app_labels(&self) -> BTreeSet<String> {
        self.models.keys().map(|(app, _)| app.clone()).collect()
    }

    /// Builds a state from a JSON list of models.
    pub fn from_json_str(json: &str) -> SquashResult<Self> {
        let models: Vec<ModelState> = serde_json::from_str(json).map_err(|e| {
            SquashError::ConfigurationError(format!("Invalid project state JSON: {e}"))
        })?;
        let mut state = Self::new();
        for model in models {
            state.add_model(model);
        }
        Ok(state)
    }

    /// Builds a state from a JSON file holding a list of models.
    pub fn from_json_file(path: &Path) -> SquashResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SquashError::ConfigurationError(format!(
                "Cannot read project state file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Rebuilds the current state by replaying every loaded migration in
    /// dependency order.
    ///
    /// Migrations superseded by another loaded migration are skipped; the
    /// replacing migration already produces their combined effect.
    pub fn from_history(loader: &MigrationLoader) -> SquashResult<Self> {
        let replaced = loader.replaced_keys();
        let mut state = Self::new();
        for key in loader.graph().topological_order()? {
            if replaced.contains(&key) {
                tracing::debug!(migration = %key, "skipping superseded migration");
                continue;
            }
            if let Some(loaded) = loader.get_migration(&key) {
                for op in &loaded.migration.operations {
                    op.state_forwards(&key.app_label, &mut state);
                }
            }
        }
        Ok(state)
    }
}

/// Options for a model, equivalent to Django's `class Meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// The explicit database table name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
    /// Sets of fields that must be unique together.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<Vec<String>>,
    /// Database indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
}

/// The state of a single model at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// The application label this model belongs to.
    pub app_label: String,
    /// The model name.
    pub name: String,
    /// The fields of this model.
    pub fields: Vec<MigrationFieldDef>,
    /// Model-level options.
    #[serde(default)]
    pub options: ModelOptions,
}

impl ModelState {
    /// Creates a new model state.
    pub fn new(
        app_label: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<MigrationFieldDef>,
    ) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            fields,
            options: ModelOptions::default(),
        }
    }

    /// Sets model options.
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the database table name for this model.
    pub fn db_table(&self) -> String {
        self.options
            .db_table
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.app_label, self.name.to_lowercase()))
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// A migration-friendly field definition.
///
/// Captures everything the writer needs to render the field and everything
/// the autodetector compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFieldDef {
    /// The field name.
    pub name: String,
    /// The field type.
    pub field_type: FieldType,
    /// An explicit database column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_column: Option<String>,
    /// Whether this field is the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    /// Whether NULL is allowed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub null: bool,
    /// Whether blank values pass validation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub blank: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether a UNIQUE constraint is applied.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    /// Whether a database index should be created.
    #[serde(default, skip_serializing_if = "is_false")]
    pub db_index: bool,
    /// Maximum character length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl MigrationFieldDef {
    /// Creates a new migration field definition with sensible defaults.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            db_column: None,
            primary_key: false,
            null: false,
            blank: false,
            default: None,
            unique: false,
            db_index: false,
            max_length: None,
        }
    }

    /// Sets the database column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.db_column = Some(column.into());
        self
    }

    /// Marks this field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values.
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Allows blank values.
    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    /// Sets the maximum character length.
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks this field as having a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this field as having a database index.
    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    /// Sets the default value.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns the database column name.
    pub fn column_name(&self) -> &str {
        self.db_column.as_deref().unwrap_or(&self.name)
    }

    /// Returns `true` if this is a relational field (FK, O2O, M2M).
    pub fn is_relation(&self) -> bool {
        self.field_type.relation_target().is_some()
    }

    /// Resolves the relation target of this field relative to `app_label`.
    pub fn relation(&self, app_label: &str) -> Option<RelationTarget> {
        self.field_type
            .relation_target()
            .map(|to| RelationTarget::parse(to, app_label))
    }
}

/// Compares two [`ProjectState`]s and generates migration operations.
///
/// The autodetector detects:
/// - New models (creates `CreateModel`, then `AddIndex` / `AlterUniqueTogether`)
/// - Deleted models (creates `DeleteModel`)
/// - Added fields (creates `AddField`)
/// - Removed fields (creates `RemoveField`)
/// - Altered fields (creates `AlterField`)
/// - Renamed fields (heuristic: same type + one removed + one added)
/// - Changed `unique_together` (creates `AlterUniqueTogether`)
/// - Added/removed indexes (creates `AddIndex` / `RemoveIndex`)
pub struct MigrationAutodetector {
    /// The old project state (before changes).
    pub from_state: ProjectState,
    /// The new project state (after changes).
    pub to_state: ProjectState,
}

impl MigrationAutodetector {
    /// Creates a new autodetector with from and to states.
    pub fn new(from_state: ProjectState, to_state: ProjectState) -> Self {
        Self {
            from_state,
            to_state,
        }
    }

    /// Detects differences between the two states and returns operations
    /// grouped by app label. Output order is deterministic.
    pub fn detect_changes(&self) -> BTreeMap<String, Vec<Operation>> {
        let mut result: BTreeMap<String, Vec<Operation>> = BTreeMap::new();

        let mut new_models: BTreeMap<&str, Vec<&ModelState>> = BTreeMap::new();
        let mut existing: Vec<(&(String, String), &ModelState, &ModelState)> = Vec::new();
        for (key, model) in &self.to_state.models {
            match self.from_state.models.get(key) {
                Some(old_model) => existing.push((key, old_model, model)),
                None => new_models.entry(key.0.as_str()).or_default().push(model),
            }
        }
        existing.sort_by(|a, b| a.0.cmp(b.0));

        // 1. New models, per app, in dependency order
        for (app_label, models) in new_models {
            let ops = result.entry(app_label.to_string()).or_default();
            ops.extend(Self::create_models(app_label, models));
        }

        // 2. Deleted models
        let mut deleted: Vec<&(String, String)> = self
            .from_state
            .models
            .keys()
            .filter(|key| !self.to_state.models.contains_key(*key))
            .collect();
        deleted.sort();
        for key in deleted {
            if let Some(model) = self.from_state.models.get(key) {
                result
                    .entry(key.0.clone())
                    .or_default()
                    .push(DeleteModel { name: model.name.clone() }.into());
            }
        }

        // 3. Field and option changes for existing models
        for (key, old_model, new_model) in existing {
            let ops = Self::diff_model(old_model, new_model);
            if !ops.is_empty() {
                result.entry(key.0.clone()).or_default().extend(ops);
            }
        }

        result
    }

    /// Emits `CreateModel` operations for new models of one app.
    ///
    /// Models are created after the same-app models they reference. When
    /// references form a cycle, the offending fields are left out of
    /// `CreateModel` and added afterwards with `AddField`. Indexes and
    /// `unique_together` follow as separate operations.
    fn create_models(app_label: &str, mut models: Vec<&ModelState>) -> Vec<Operation> {
        models.sort_by_key(|m| m.name.to_lowercase());
        let names: HashSet<String> = models.iter().map(|m| m.name.to_lowercase()).collect();

        let same_app_targets = |model: &ModelState| -> BTreeSet<String> {
            model
                .fields
                .iter()
                .filter_map(|f| match f.relation(app_label) {
                    Some(RelationTarget::Model(app, name))
                        if app == app_label
                            && name != model.name.to_lowercase()
                            && names.contains(&name) =>
                    {
                        Some(name)
                    }
                    _ => None,
                })
                .collect()
        };

        let mut created: HashSet<String> = HashSet::new();
        let mut remaining: Vec<&ModelState> = models;
        let mut creates = Vec::new();
        let mut deferred = Vec::new();
        let mut ordered = Vec::new();

        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .position(|m| same_app_targets(m).iter().all(|t| created.contains(t)));
            // Nothing is ready: break the cycle at the first remaining model.
            let idx = ready.unwrap_or(0);
            let model = remaining.remove(idx);
            let pending: BTreeSet<String> = same_app_targets(model)
                .into_iter()
                .filter(|t| !created.contains(t))
                .collect();

            let mut fields = Vec::new();
            for field in &model.fields {
                let waits = matches!(
                    field.relation(app_label),
                    Some(RelationTarget::Model(ref app, ref name)) if *app == app_label && pending.contains(name)
                );
                if waits {
                    deferred.push(Operation::from(AddField {
                        model_name: model.name.to_lowercase(),
                        field: field.clone(),
                    }));
                } else {
                    fields.push(field.clone());
                }
            }

            creates.push(Operation::from(CreateModel {
                name: model.name.clone(),
                fields,
                options: ModelOptions {
                    db_table: model.options.db_table.clone(),
                    ..ModelOptions::default()
                },
            }));
            created.insert(model.name.to_lowercase());
            ordered.push(model);
        }

        let mut ops = creates;
        ops.extend(deferred);
        for model in ordered {
            for index in &model.options.indexes {
                ops.push(
                    AddIndex {
                        model_name: model.name.to_lowercase(),
                        index: index.clone(),
                    }
                    .into(),
                );
            }
            if !model.options.unique_together.is_empty() {
                ops.push(
                    AlterUniqueTogether {
                        model_name: model.name.to_lowercase(),
                        unique_together: model.options.unique_together.clone(),
                    }
                    .into(),
                );
            }
        }
        ops
    }

    /// Diffs one model present in both states.
    fn diff_model(old_model: &ModelState, new_model: &ModelState) -> Vec<Operation> {
        let mut ops: Vec<Operation> = Vec::new();
        let model_name = new_model.name.to_lowercase();

        let old_fields: BTreeMap<&str, &MigrationFieldDef> =
            old_model.fields.iter().map(|f| (f.name.as_str(), f)).collect();
        let new_fields: BTreeMap<&str, &MigrationFieldDef> =
            new_model.fields.iter().map(|f| (f.name.as_str(), f)).collect();

        let removed: Vec<&MigrationFieldDef> = old_fields
            .iter()
            .filter(|(name, _)| !new_fields.contains_key(*name))
            .map(|(_, f)| *f)
            .collect();
        let added: Vec<&MigrationFieldDef> = new_fields
            .iter()
            .filter(|(name, _)| !old_fields.contains_key(*name))
            .map(|(_, f)| *f)
            .collect();

        // Detect renames (heuristic: same type, one removed + one added)
        let mut renamed: Option<(&str, &str)> = None;
        if let ([a], [r]) = (added.as_slice(), removed.as_slice()) {
            if field_types_match(&a.field_type, &r.field_type) {
                ops.push(
                    RenameField {
                        model_name: model_name.clone(),
                        old_name: r.name.clone(),
                        new_name: a.name.clone(),
                    }
                    .into(),
                );
                renamed = Some((&r.name, &a.name));
            }
        }

        for field in &added {
            if renamed.map_or(true, |(_, new)| new != field.name) {
                ops.push(
                    AddField {
                        model_name: model_name.clone(),
                        field: (*field).clone(),
                    }
                    .into(),
                );
            }
        }

        for field in &removed {
            if renamed.map_or(true, |(old, _)| old != field.name) {
                ops.push(
                    RemoveField {
                        model_name: model_name.clone(),
                        field_name: field.name.clone(),
                    }
                    .into(),
                );
            }
        }

        // A renamed field may also have changed its other attributes.
        if let Some((old, new)) = renamed {
            if let (Some(old_field), Some(new_field)) = (old_fields.get(old), new_fields.get(new)) {
                let mut as_renamed = (*old_field).clone();
                as_renamed.name = new.to_string();
                if as_renamed != **new_field {
                    ops.push(
                        AlterField {
                            model_name: model_name.clone(),
                            field_name: new.to_string(),
                            field: (*new_field).clone(),
                        }
                        .into(),
                    );
                }
            }
        }

        for (name, new_field) in &new_fields {
            if let Some(old_field) = old_fields.get(name) {
                if fields_differ(old_field, new_field) {
                    ops.push(
                        AlterField {
                            model_name: model_name.clone(),
                            field_name: (*name).to_string(),
                            field: (*new_field).clone(),
                        }
                        .into(),
                    );
                }
            }
        }

        if old_model.options.unique_together != new_model.options.unique_together {
            ops.push(
                AlterUniqueTogether {
                    model_name: model_name.clone(),
                    unique_together: new_model.options.unique_together.clone(),
                }
                .into(),
            );
        }

        let old_idx: HashSet<&str> = old_model.options.indexes.iter().map(|i| i.name.as_str()).collect();
        let new_idx: HashSet<&str> = new_model.options.indexes.iter().map(|i| i.name.as_str()).collect();

        for idx in &old_model.options.indexes {
            if !new_idx.contains(idx.name.as_str()) {
                ops.push(
                    RemoveIndex {
                        model_name: model_name.clone(),
                        name: idx.name.clone(),
                    }
                    .into(),
                );
            }
        }
        for idx in &new_model.options.indexes {
            if !old_idx.contains(idx.name.as_str()) {
                ops.push(
                    AddIndex {
                        model_name: model_name.clone(),
                        index: idx.clone(),
                    }
                    .into(),
                );
            }
        }

        ops
    }

    /// Arranges detected operations into migration records.
    ///
    /// Each app gets a record named `auto_1`. A relation that would make two
    /// apps depend on each other is moved into a second record, `auto_2`,
    /// which depends on both first records. Apps that already have history in
    /// `graph` continue from their leaf nodes; other apps get initial records.
    ///
    /// `convert_apps` limits which apps without history in `graph` receive
    /// records (None = all). `trim_to_apps` keeps only the requested apps and
    /// the apps their records depend on. Dependencies on apps dropped by
    /// either filter point at the app's existing leaf, or `__first__`.
    pub fn changes(
        &self,
        graph: &MigrationGraph,
        trim_to_apps: Option<&[String]>,
        convert_apps: Option<&[String]>,
    ) -> BTreeMap<String, Vec<Migration>> {
        let ops_by_app = self.detect_changes();
        let mut records = Self::arrange(&ops_by_app, graph);

        if let Some(convert) = convert_apps {
            let dropped: BTreeSet<String> = records
                .keys()
                .filter(|app| !graph.has_app(app) && !convert.contains(app))
                .cloned()
                .collect();
            drop_apps(&mut records, &dropped, graph);
        }

        if let Some(requested) = trim_to_apps {
            let mut keep: BTreeSet<String> = requested
                .iter()
                .filter(|app| records.contains_key(*app))
                .cloned()
                .collect();
            let mut frontier: Vec<String> = keep.iter().cloned().collect();
            while let Some(app) = frontier.pop() {
                let deps: Vec<String> = records
                    .get(&app)
                    .into_iter()
                    .flatten()
                    .flat_map(Migration::migration_dependencies)
                    .filter(|key| key.app_label != app && records.contains_key(&key.app_label))
                    .map(|key| key.app_label.clone())
                    .collect();
                for dep in deps {
                    if keep.insert(dep.clone()) {
                        frontier.push(dep);
                    }
                }
            }
            let dropped: BTreeSet<String> = records
                .keys()
                .filter(|app| !keep.contains(*app))
                .cloned()
                .collect();
            drop_apps(&mut records, &dropped, graph);
        }

        records
    }

    /// Splits per-app operations into records and wires their dependencies.
    fn arrange(
        ops_by_app: &BTreeMap<String, Vec<Operation>>,
        graph: &MigrationGraph,
    ) -> BTreeMap<String, Vec<Migration>> {
        // app -> apps its first record depends on
        let mut app_edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut records = BTreeMap::new();

        for (app_label, ops) in ops_by_app {
            let mut first_ops: Vec<Operation> = Vec::new();
            let mut second_ops: Vec<Operation> = Vec::new();
            let mut first_deps: BTreeSet<Dependency> = BTreeSet::new();
            let mut second_deps: BTreeSet<Dependency> = BTreeSet::new();
            let mut deferred_fields: HashSet<(String, String)> = HashSet::new();

            for op in ops {
                // Decides where one relation field goes; true means "defer".
                let mut place = |field: &MigrationFieldDef,
                                 first_deps: &mut BTreeSet<Dependency>,
                                 second_deps: &mut BTreeSet<Dependency>|
                 -> bool {
                    match field.relation(app_label) {
                        Some(RelationTarget::Setting(name)) => {
                            first_deps.insert(Dependency::Setting(name));
                            false
                        }
                        Some(RelationTarget::Model(target, _)) if target != *app_label => {
                            let Some((target, _)) = ops_by_app.get_key_value(&target) else {
                                first_deps.insert(external_dependency(graph, &target));
                                return false;
                            };
                            let auto_1 = Dependency::Migration(MigrationKey::new(
                                target.clone(),
                                auto_name(1),
                            ));
                            if reaches(&app_edges, target, app_label) {
                                second_deps.insert(auto_1);
                                true
                            } else {
                                app_edges
                                    .entry(app_label.as_str())
                                    .or_default()
                                    .insert(target.as_str());
                                first_deps.insert(auto_1);
                                false
                            }
                        }
                        _ => false,
                    }
                };

                match op {
                    Operation::Schema(SchemaOperation::CreateModel(create)) => {
                        let mut kept = create.clone();
                        kept.fields.clear();
                        for field in &create.fields {
                            if place(field, &mut first_deps, &mut second_deps) {
                                deferred_fields
                                    .insert((create.name.to_lowercase(), field.name.clone()));
                                second_ops.push(
                                    AddField {
                                        model_name: create.name.to_lowercase(),
                                        field: field.clone(),
                                    }
                                    .into(),
                                );
                            } else {
                                kept.fields.push(field.clone());
                            }
                        }
                        first_ops.push(kept.into());
                    }
                    Operation::Schema(
                        SchemaOperation::AddField(AddField { field, model_name })
                        | SchemaOperation::AlterField(AlterField {
                            field, model_name, ..
                        }),
                    ) => {
                        if place(field, &mut first_deps, &mut second_deps) {
                            deferred_fields.insert((model_name.clone(), field.name.clone()));
                            second_ops.push(op.clone());
                        } else {
                            first_ops.push(op.clone());
                        }
                    }
                    Operation::Schema(SchemaOperation::AddIndex(add)) => {
                        let touches_deferred = add.index.fields.iter().any(|f| {
                            deferred_fields.contains(&(add.model_name.clone(), f.clone()))
                        });
                        if touches_deferred {
                            second_ops.push(op.clone());
                        } else {
                            first_ops.push(op.clone());
                        }
                    }
                    Operation::Schema(SchemaOperation::AlterUniqueTogether(alter)) => {
                        let touches_deferred = alter.unique_together.iter().flatten().any(|f| {
                            deferred_fields.contains(&(alter.model_name.clone(), f.clone()))
                        });
                        if touches_deferred {
                            second_ops.push(op.clone());
                        } else {
                            first_ops.push(op.clone());
                        }
                    }
                    _ => first_ops.push(op.clone()),
                }
            }

            let mut first = Migration::new(app_label.clone(), auto_name(1));
            let leaves = graph.leaf_nodes(app_label);
            if leaves.is_empty() {
                first.initial = true;
            } else {
                first
                    .dependencies
                    .extend(leaves.into_iter().map(Dependency::Migration));
            }
            first.dependencies.extend(first_deps);
            first.operations = first_ops;

            let mut app_records = vec![first];
            if !second_ops.is_empty() {
                let mut second = Migration::new(app_label.clone(), auto_name(2))
                    .depends_on(app_label.clone(), auto_name(1));
                second.dependencies.extend(second_deps);
                second.operations = second_ops;
                app_records.push(second);
            }
            records.insert(app_label.clone(), app_records);
        }

        records
    }
}

/// The temporary name of the n-th record produced for an app.
fn auto_name(n: usize) -> String {
    format!("auto_{n}")
}

/// Returns `true` if `to` is reachable from `from` along `edges`.
fn reaches(edges: &BTreeMap<&str, BTreeSet<&str>>, from: &str, to: &str) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![from];
    while let Some(app) = stack.pop() {
        if app == to {
            return true;
        }
        if seen.insert(app) {
            if let Some(next) = edges.get(app) {
                stack.extend(next.iter().copied());
            }
        }
    }
    false
}

/// The dependency on an app that gets no new record in this batch.
fn external_dependency(graph: &MigrationGraph, app_label: &str) -> Dependency {
    graph.leaf_nodes(app_label).pop().map_or_else(
        || Dependency::Migration(MigrationKey::new(app_label, FIRST_SENTINEL)),
        Dependency::Migration,
    )
}

/// Removes the records of `dropped` apps and repoints dependencies on them.
fn drop_apps(
    records: &mut BTreeMap<String, Vec<Migration>>,
    dropped: &BTreeSet<String>,
    graph: &MigrationGraph,
) {
    if dropped.is_empty() {
        return;
    }
    for app in dropped {
        tracing::debug!(app = %app, "dropping app from detected changes");
        records.remove(app);
    }
    for migration in records.values_mut().flatten() {
        let mut seen = BTreeSet::new();
        let deps = std::mem::take(&mut migration.dependencies);
        for dep in deps {
            let dep = match &dep {
                Dependency::Migration(key) if dropped.contains(&key.app_label) => {
                    external_dependency(graph, &key.app_label)
                }
                _ => dep,
            };
            if seen.insert(dep.clone()) {
                migration.dependencies.push(dep);
            }
        }
    }
}

/// Checks if two field types are structurally the same (for rename detection).
fn field_types_match(a: &FieldType, b: &FieldType) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Checks if two fields differ in schema-relevant properties.
fn fields_differ(a: &MigrationFieldDef, b: &MigrationFieldDef) -> bool {
    a != b
}
