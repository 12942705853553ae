//! Migration serialization.
//!
//! Two formats live here:
//!
//! - The JSON history format read by [`MigrationLoader`](crate::loader::MigrationLoader)
//!   and written next to every generated migration ([`SerializableMigration`]).
//! - Python literals for the generated migration source: strings with Python
//!   `repr` quoting, values, field constructors, indexes and model options.
//!   Each Python serializer records the imports its output needs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use django_squash_core::{SquashError, SquashResult};
use serde::{Deserialize, Serialize};

use crate::autodetect::{MigrationFieldDef, ModelOptions};
use crate::fields::{FieldType, Index, RelationTarget, Value};
use crate::migration::{Dependency, Migration, MigrationKey};
use crate::operations::{
    AddField, AddIndex, AlterField, AlterUniqueTogether, CodeAttribution, CreateModel,
    DeleteModel, FunctionRef, Operation, PythonCallable, RemoveField, RemoveIndex, RenameField,
    RunPython, RunSql, SchemaOperation, SeparateDatabaseAndState,
};

/// The callable string for `migrations.RunPython.noop`.
pub const NOOP_CALLABLE: &str = "migrations.RunPython.noop";

/// Import line for the `models` module.
pub const MODELS_IMPORT: &str = "from django.db import models";

/// A serializable representation of a migration file.
///
/// The app label and migration name are not stored; they come from the
/// file's location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerializableMigration {
    /// Dependencies as `[app_label, name]` pairs.
    #[serde(default)]
    pub dependencies: Vec<(String, String)>,
    /// Whether this is the initial migration for the app.
    #[serde(default)]
    pub initial: bool,
    /// The operations to apply.
    #[serde(default)]
    pub operations: Vec<SerializableOperation>,
    /// Migrations this one replaces, as `[app_label, name]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<(String, String)>,
}

/// A serializable representation of a single migration operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializableOperation {
    /// Create a new model/table.
    CreateModel {
        /// The model name.
        name: String,
        /// The fields for the model.
        fields: Vec<MigrationFieldDef>,
        /// Model options.
        #[serde(default)]
        options: ModelOptions,
    },
    /// Delete a model/table.
    DeleteModel {
        /// The model name.
        name: String,
    },
    /// Add a field/column to an existing model.
    AddField {
        /// The model name.
        model_name: String,
        /// The field definition.
        field: MigrationFieldDef,
    },
    /// Remove a field/column from a model.
    RemoveField {
        /// The model name.
        model_name: String,
        /// The field name.
        field_name: String,
    },
    /// Alter a field/column on a model.
    AlterField {
        /// The model name.
        model_name: String,
        /// The field name.
        field_name: String,
        /// The new field definition.
        field: MigrationFieldDef,
    },
    /// Rename a field/column.
    RenameField {
        /// The model name.
        model_name: String,
        /// The old field name.
        old_name: String,
        /// The new field name.
        new_name: String,
    },
    /// Add an index to a table.
    AddIndex {
        /// The model name.
        model_name: String,
        /// The index definition.
        index: Index,
    },
    /// Remove an index from a table.
    RemoveIndex {
        /// The model name.
        model_name: String,
        /// The index name.
        name: String,
    },
    /// Alter unique_together constraints.
    AlterUniqueTogether {
        /// The model name.
        model_name: String,
        /// The new unique_together groups.
        unique_together: Vec<Vec<String>>,
    },
    /// Run Python code.
    RunPython {
        /// The forward callable (`name`, `module.name` or `migrations.RunPython.noop`).
        code: String,
        /// The reverse callable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_code: Option<String>,
        /// Whether the operation may be dropped when squashing.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        elidable: bool,
    },
    /// Run raw SQL.
    #[serde(rename = "RunSQL")]
    RunSql {
        /// Forward SQL.
        sql: String,
        /// Backward SQL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_sql: Option<String>,
        /// Whether the operation may be dropped when squashing.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        elidable: bool,
    },
    /// Separate state and database operations.
    SeparateDatabaseAndState {
        /// State-only operations.
        #[serde(default)]
        state_operations: Vec<SerializableOperation>,
        /// Database-only operations.
        #[serde(default)]
        database_operations: Vec<SerializableOperation>,
    },
}

impl SerializableMigration {
    /// Serializes this migration to a JSON string.
    pub fn to_json(&self) -> SquashResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            SquashError::SerializationError(format!("Failed to serialize migration: {e}"))
        })
    }

    /// Deserializes a migration from a JSON string.
    pub fn from_json(json: &str) -> SquashResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SquashError::InvalidMigration(format!("Invalid migration JSON: {e}")))
    }

    /// Builds the serializable form of an in-memory migration.
    pub fn from_migration(migration: &Migration) -> Self {
        let own_module = migration.key().module_path();
        Self {
            dependencies: migration
                .dependencies
                .iter()
                .map(|dep| {
                    let (first, second) = dep.as_pair();
                    (first.to_string(), second.to_string())
                })
                .collect(),
            initial: migration.initial,
            operations: migration
                .operations
                .iter()
                .map(|op| SerializableOperation::from_operation(op, &own_module))
                .collect(),
            replaces: migration
                .replaces
                .iter()
                .map(|key| (key.app_label.clone(), key.name.clone()))
                .collect(),
        }
    }

    /// Converts this document into a migration named `(app_label, name)`.
    pub fn into_migration(self, app_label: &str, name: &str) -> Migration {
        let own_module = MigrationKey::new(app_label, name).module_path();
        let mut migration = Migration::new(app_label, name);
        migration.initial = self.initial;
        migration.dependencies = self
            .dependencies
            .iter()
            .map(|(first, second)| Dependency::from_pair(first, second))
            .collect();
        migration.operations = self
            .operations
            .iter()
            .map(|op| op.to_operation(&own_module))
            .collect();
        migration.replaces = self
            .replaces
            .into_iter()
            .map(|(app, name)| MigrationKey::new(app, name))
            .collect();
        migration
    }

    /// Writes this migration to a file at the given path.
    pub fn write_to_file(&self, path: &Path) -> SquashResult<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a migration from a file.
    pub fn read_from_file(path: &Path) -> SquashResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| match e {
            SquashError::InvalidMigration(msg) => {
                SquashError::InvalidMigration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }
}

impl SerializableOperation {
    /// Converts an operation of the migration whose module is `own_module`.
    pub fn from_operation(op: &Operation, own_module: &str) -> Self {
        match op {
            Operation::Schema(schema) => Self::from_schema(schema),
            Operation::RunPython(run) => Self::RunPython {
                code: callable_to_string(&run.code, own_module),
                reverse_code: run
                    .reverse_code
                    .as_ref()
                    .map(|c| callable_to_string(c, own_module)),
                elidable: run.elidable,
            },
            Operation::RunSql(run) => Self::RunSql {
                sql: run.sql.clone(),
                reverse_sql: run.reverse_sql.clone(),
                elidable: run.elidable,
            },
            Operation::SeparateDatabaseAndState(sep) => Self::SeparateDatabaseAndState {
                state_operations: sep
                    .state_operations
                    .iter()
                    .map(|o| Self::from_operation(o, own_module))
                    .collect(),
                database_operations: sep
                    .database_operations
                    .iter()
                    .map(|o| Self::from_operation(o, own_module))
                    .collect(),
            },
        }
    }

    fn from_schema(op: &SchemaOperation) -> Self {
        match op {
            SchemaOperation::CreateModel(op) => Self::CreateModel {
                name: op.name.clone(),
                fields: op.fields.clone(),
                options: op.options.clone(),
            },
            SchemaOperation::DeleteModel(op) => Self::DeleteModel {
                name: op.name.clone(),
            },
            SchemaOperation::AddField(op) => Self::AddField {
                model_name: op.model_name.clone(),
                field: op.field.clone(),
            },
            SchemaOperation::RemoveField(op) => Self::RemoveField {
                model_name: op.model_name.clone(),
                field_name: op.field_name.clone(),
            },
            SchemaOperation::AlterField(op) => Self::AlterField {
                model_name: op.model_name.clone(),
                field_name: op.field_name.clone(),
                field: op.field.clone(),
            },
            SchemaOperation::RenameField(op) => Self::RenameField {
                model_name: op.model_name.clone(),
                old_name: op.old_name.clone(),
                new_name: op.new_name.clone(),
            },
            SchemaOperation::AddIndex(op) => Self::AddIndex {
                model_name: op.model_name.clone(),
                index: op.index.clone(),
            },
            SchemaOperation::RemoveIndex(op) => Self::RemoveIndex {
                model_name: op.model_name.clone(),
                name: op.name.clone(),
            },
            SchemaOperation::AlterUniqueTogether(op) => Self::AlterUniqueTogether {
                model_name: op.model_name.clone(),
                unique_together: op.unique_together.clone(),
            },
        }
    }

    /// Converts this serializable operation to an [`Operation`] belonging to
    /// the migration whose module is `own_module`.
    pub fn to_operation(&self, own_module: &str) -> Operation {
        match self {
            Self::CreateModel {
                name,
                fields,
                options,
            } => CreateModel {
                name: name.clone(),
                fields: fields.clone(),
                options: options.clone(),
            }
            .into(),
            Self::DeleteModel { name } => DeleteModel { name: name.clone() }.into(),
            Self::AddField { model_name, field } => AddField {
                model_name: model_name.clone(),
                field: field.clone(),
            }
            .into(),
            Self::RemoveField {
                model_name,
                field_name,
            } => RemoveField {
                model_name: model_name.clone(),
                field_name: field_name.clone(),
            }
            .into(),
            Self::AlterField {
                model_name,
                field_name,
                field,
            } => AlterField {
                model_name: model_name.clone(),
                field_name: field_name.clone(),
                field: field.clone(),
            }
            .into(),
            Self::RenameField {
                model_name,
                old_name,
                new_name,
            } => RenameField {
                model_name: model_name.clone(),
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            }
            .into(),
            Self::AddIndex { model_name, index } => AddIndex {
                model_name: model_name.clone(),
                index: index.clone(),
            }
            .into(),
            Self::RemoveIndex { model_name, name } => RemoveIndex {
                model_name: model_name.clone(),
                name: name.clone(),
            }
            .into(),
            Self::AlterUniqueTogether {
                model_name,
                unique_together,
            } => AlterUniqueTogether {
                model_name: model_name.clone(),
                unique_together: unique_together.clone(),
            }
            .into(),
            Self::RunPython {
                code,
                reverse_code,
                elidable,
            } => RunPython {
                code: parse_callable(code, own_module),
                reverse_code: reverse_code.as_deref().map(|c| parse_callable(c, own_module)),
                elidable: *elidable,
            }
            .into(),
            Self::RunSql {
                sql,
                reverse_sql,
                elidable,
            } => RunSql {
                sql: sql.clone(),
                reverse_sql: reverse_sql.clone(),
                elidable: *elidable,
            }
            .into(),
            Self::SeparateDatabaseAndState {
                state_operations,
                database_operations,
            } => SeparateDatabaseAndState {
                state_operations: state_operations
                    .iter()
                    .map(|o| o.to_operation(own_module))
                    .collect(),
                database_operations: database_operations
                    .iter()
                    .map(|o| o.to_operation(own_module))
                    .collect(),
            }
            .into(),
        }
    }
}

/// Parses a callable string.
///
/// A bare name is a function defined in `own_module`; a dotted path names
/// its module explicitly.
pub fn parse_callable(text: &str, own_module: &str) -> PythonCallable {
    let text = text.trim();
    if text == NOOP_CALLABLE || text == "RunPython.noop" {
        return PythonCallable::Noop;
    }
    match text.rsplit_once('.') {
        Some((module, name)) => PythonCallable::Function(FunctionRef::in_module(module, name)),
        None => PythonCallable::Function(FunctionRef::in_module(own_module, text)),
    }
}

/// Formats a callable for the JSON history format.
fn callable_to_string(callable: &PythonCallable, own_module: &str) -> String {
    match callable {
        PythonCallable::Noop => NOOP_CALLABLE.to_string(),
        PythonCallable::Function(func) => match &func.attribution {
            CodeAttribution::PendingCleanup => func.name.clone(),
            CodeAttribution::Module(module) if module == own_module => func.name.clone(),
            CodeAttribution::Module(module) => format!("{module}.{}", func.name),
        },
    }
}

/// Returns the path of the Python source of a migration.
pub fn migration_file_path(migrations_dir: &Path, app_label: &str, name: &str) -> PathBuf {
    migrations_dir.join(app_label).join(format!("{name}.py"))
}

/// Returns the path of the JSON history document of a migration.
pub fn history_file_path(migrations_dir: &Path, app_label: &str, name: &str) -> PathBuf {
    migrations_dir.join(app_label).join(format!("{name}.json"))
}

// ============================================================
// Python literals
// ============================================================

/// Renders `s` the way Python's `repr()` renders a `str`.
pub fn python_string(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Renders a float the way Python's `repr()` renders a `float`.
fn python_float(f: f64) -> String {
    if f.is_nan() {
        "float('nan')".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "float('inf')".to_string()
        } else {
            "float('-inf')".to_string()
        }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Renders a literal value.
pub fn serialize_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => python_float(*f),
        Value::String(s) => python_string(s),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(serialize_value).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Renders a list of strings as a Python list.
pub fn serialize_str_list(items: &[String]) -> String {
    format!(
        "[{}]",
        items
            .iter()
            .map(|s| python_string(s))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Renders a list of strings as a Python tuple.
pub fn serialize_str_tuple(items: &[String]) -> String {
    let inner: Vec<String> = items.iter().map(|s| python_string(s)).collect();
    if inner.len() == 1 {
        format!("({},)", inner[0])
    } else {
        format!("({})", inner.join(", "))
    }
}

/// Renders a relation target as the `to=` argument.
fn serialize_relation(to: &str, app_label: &str, imports: &mut BTreeSet<String>) -> String {
    match RelationTarget::parse(to, app_label) {
        RelationTarget::Setting(name) => {
            imports.insert("from django.conf import settings".to_string());
            format!("settings.{name}")
        }
        RelationTarget::Model(app, model) => python_string(&format!("{app}.{model}")),
    }
}

/// Renders a field constructor, e.g. `models.CharField(max_length=200)`.
///
/// Keyword arguments are sorted by name. `app_label` resolves relation
/// targets given without an app.
pub fn serialize_field(
    field: &MigrationFieldDef,
    app_label: &str,
    imports: &mut BTreeSet<String>,
) -> String {
    imports.insert(MODELS_IMPORT.to_string());
    let mut kwargs: BTreeMap<&str, String> = BTreeMap::new();

    if field.primary_key {
        kwargs.insert("primary_key", "True".into());
        kwargs.insert("serialize", "False".into());
        if field.field_type.is_auto() && field.name == "id" {
            kwargs.insert("auto_created", "True".into());
            kwargs.insert("verbose_name", python_string("ID"));
        }
    }
    if field.blank {
        kwargs.insert("blank", "True".into());
    }
    if let Some(column) = &field.db_column {
        kwargs.insert("db_column", python_string(column));
    }
    if field.db_index {
        kwargs.insert("db_index", "True".into());
    }
    if let Some(default) = &field.default {
        kwargs.insert("default", serialize_value(default));
    }
    if let Some(max_length) = field.max_length {
        kwargs.insert("max_length", max_length.to_string());
    }
    if field.null {
        kwargs.insert("null", "True".into());
    }
    if field.unique {
        kwargs.insert("unique", "True".into());
    }

    match &field.field_type {
        FieldType::DecimalField {
            max_digits,
            decimal_places,
        } => {
            kwargs.insert("decimal_places", decimal_places.to_string());
            kwargs.insert("max_digits", max_digits.to_string());
        }
        FieldType::ForeignKey {
            to,
            on_delete,
            related_name,
        }
        | FieldType::OneToOneField {
            to,
            on_delete,
            related_name,
        } => {
            imports.insert("import django.db.models.deletion".to_string());
            kwargs.insert(
                "on_delete",
                format!("django.db.models.deletion.{}", on_delete.python_name()),
            );
            if let Some(related_name) = related_name {
                kwargs.insert("related_name", python_string(related_name));
            }
            kwargs.insert("to", serialize_relation(to, app_label, imports));
        }
        FieldType::ManyToManyField {
            to,
            through,
            related_name,
        } => {
            if let Some(related_name) = related_name {
                kwargs.insert("related_name", python_string(related_name));
            }
            if let Some(through) = through {
                kwargs.insert("through", serialize_relation(through, app_label, imports));
            }
            kwargs.insert("to", serialize_relation(to, app_label, imports));
        }
        _ => {}
    }

    let args = kwargs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("models.{}({args})", field.field_type.python_class())
}

/// Renders an index constructor.
pub fn serialize_index(index: &Index, imports: &mut BTreeSet<String>) -> String {
    imports.insert(MODELS_IMPORT.to_string());
    format!(
        "models.Index(fields={}, name={})",
        serialize_str_list(&index.fields),
        python_string(&index.name)
    )
}

/// Renders a `unique_together` value as a Python set of tuples.
pub fn serialize_unique_together(groups: &[Vec<String>]) -> String {
    if groups.is_empty() {
        return "set()".to_string();
    }
    format!(
        "{{{}}}",
        groups
            .iter()
            .map(|g| serialize_str_tuple(g))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Renders model options as a Python dict with sorted keys.
pub fn serialize_options(options: &ModelOptions, imports: &mut BTreeSet<String>) -> String {
    let mut entries: BTreeMap<&str, String> = BTreeMap::new();
    if let Some(db_table) = &options.db_table {
        entries.insert("db_table", python_string(db_table));
    }
    if !options.indexes.is_empty() {
        let indexes: Vec<String> = options
            .indexes
            .iter()
            .map(|i| serialize_index(i, imports))
            .collect();
        entries.insert("indexes", format!("[{}]", indexes.join(", ")));
    }
    if !options.unique_together.is_empty() {
        entries.insert(
            "unique_together",
            serialize_unique_together(&options.unique_together),
        );
    }
    let body = entries
        .iter()
        .map(|(k, v)| format!("{}: {v}", python_string(k)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}
