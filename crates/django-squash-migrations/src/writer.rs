//! Rendering migrations as Python source files.
//!
//! [`MigrationWriter`] turns a [`Migration`] into the text of a Django
//! migration module: header, imports, copied functions and the `Migration`
//! class. [`OperationWriter`] renders a single operation. Output is
//! deterministic: the same migration always renders to the same bytes, apart
//! from the optional timestamped header.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::migration::{Dependency, Migration};
use crate::operations::{
    CodeAttribution, FunctionRef, Operation, PythonCallable, SchemaOperation,
};
use crate::serializer::{
    python_string, serialize_field, serialize_index, serialize_options, serialize_unique_together,
    NOOP_CALLABLE,
};

const MIGRATIONS_IMPORT: &str = "from django.db import migrations";
const SETTINGS_IMPORT: &str = "from django.conf import settings";

/// Comment emitted above the imports that could not be resolved.
const MANUAL_PORTING_NOTE: &str = "\
# Functions from the following migrations need manual copying.
# Move them and any dependencies into this file, then update the
# RunPython operations to refer to the local versions:";

fn migration_module_import_regex() -> &'static Regex {
    static MIGRATION_MODULE: OnceLock<Regex> = OnceLock::new();
    MIGRATION_MODULE.get_or_init(|| Regex::new(r"^import (.*)\.\d+[^\s]*$").unwrap())
}

fn django_db_import_regex() -> &'static Regex {
    static DJANGO_DB: OnceLock<Regex> = OnceLock::new();
    DJANGO_DB.get_or_init(|| {
        Regex::new(r"^from django\.db import (migrations|models)(, (migrations|models))?$").unwrap()
    })
}

/// Renders one operation, collecting the imports and copied functions it
/// needs.
pub struct OperationWriter<'a> {
    app_label: &'a str,
    imports: BTreeSet<String>,
    functions: Vec<FunctionRef>,
    buff: Vec<String>,
    indentation: usize,
}

impl<'a> OperationWriter<'a> {
    /// Creates a writer for operations of `app_label`, starting at the
    /// indentation used inside `operations = [...]`.
    pub fn new(app_label: &'a str) -> Self {
        Self {
            app_label,
            imports: BTreeSet::new(),
            functions: Vec::new(),
            buff: Vec::new(),
            indentation: 2,
        }
    }

    /// Renders `op` and returns its text, one line per entry, each ending
    /// with a newline.
    pub fn serialize(&mut self, op: &Operation) -> String {
        self.buff.clear();
        self.write_operation(op);
        let mut out = self.buff.join("\n");
        out.push('\n');
        out
    }

    /// Imports needed by everything serialized so far.
    pub const fn imports(&self) -> &BTreeSet<String> {
        &self.imports
    }

    /// Functions whose bodies must be emitted into the migration file, in
    /// first-use order with duplicate names removed.
    pub fn functions(&self) -> &[FunctionRef] {
        &self.functions
    }

    fn feed(&mut self, line: impl AsRef<str>) {
        self.buff
            .push(format!("{}{}", "    ".repeat(self.indentation), line.as_ref()));
    }

    fn kwarg(&mut self, name: &str, value: impl AsRef<str>) {
        self.feed(format!("{name}={},", value.as_ref()));
    }

    fn open(&mut self, class: &str) {
        self.feed(format!("migrations.{class}("));
        self.indentation += 1;
    }

    fn close(&mut self) {
        self.indentation -= 1;
        self.feed("),");
    }

    fn write_operation(&mut self, op: &Operation) {
        match op {
            Operation::Schema(schema) => self.write_schema(schema),
            Operation::RunPython(run) => {
                self.open("RunPython");
                let code = self.callable(&run.code);
                self.kwarg("code", code);
                if let Some(reverse) = &run.reverse_code {
                    let reverse = self.callable(reverse);
                    self.kwarg("reverse_code", reverse);
                }
                if run.elidable {
                    self.kwarg("elidable", "True");
                }
                self.close();
            }
            Operation::RunSql(run) => {
                self.open("RunSQL");
                self.kwarg("sql", python_string(&run.sql));
                if let Some(reverse) = &run.reverse_sql {
                    self.kwarg("reverse_sql", python_string(reverse));
                }
                if run.elidable {
                    self.kwarg("elidable", "True");
                }
                self.close();
            }
            Operation::SeparateDatabaseAndState(sep) => {
                self.open("SeparateDatabaseAndState");
                self.operation_list("state_operations", &sep.state_operations);
                self.operation_list("database_operations", &sep.database_operations);
                self.close();
            }
        }
    }

    fn operation_list(&mut self, name: &str, ops: &[Operation]) {
        if ops.is_empty() {
            self.feed(format!("{name}=[],"));
            return;
        }
        self.feed(format!("{name}=["));
        self.indentation += 1;
        for op in ops {
            self.write_operation(op);
        }
        self.indentation -= 1;
        self.feed("],");
    }

    fn write_schema(&mut self, op: &SchemaOperation) {
        let mut imports = std::mem::take(&mut self.imports);
        let app_label = self.app_label;
        match op {
            SchemaOperation::CreateModel(create) => {
                self.open("CreateModel");
                self.kwarg("name", python_string(&create.name));
                if create.fields.is_empty() {
                    self.feed("fields=[],");
                } else {
                    self.feed("fields=[");
                    self.indentation += 1;
                    for field in &create.fields {
                        let rendered = serialize_field(field, app_label, &mut imports);
                        self.feed(format!("({}, {rendered}),", python_string(&field.name)));
                    }
                    self.indentation -= 1;
                    self.feed("],");
                }
                let options = &create.options;
                if options.db_table.is_some()
                    || !options.indexes.is_empty()
                    || !options.unique_together.is_empty()
                {
                    let rendered = serialize_options(options, &mut imports);
                    self.kwarg("options", rendered);
                }
                self.close();
            }
            SchemaOperation::DeleteModel(delete) => {
                self.open("DeleteModel");
                self.kwarg("name", python_string(&delete.name));
                self.close();
            }
            SchemaOperation::AddField(add) => {
                self.open("AddField");
                self.kwarg("model_name", python_string(&add.model_name));
                self.kwarg("name", python_string(&add.field.name));
                let rendered = serialize_field(&add.field, app_label, &mut imports);
                self.kwarg("field", rendered);
                self.close();
            }
            SchemaOperation::RemoveField(remove) => {
                self.open("RemoveField");
                self.kwarg("model_name", python_string(&remove.model_name));
                self.kwarg("name", python_string(&remove.field_name));
                self.close();
            }
            SchemaOperation::AlterField(alter) => {
                self.open("AlterField");
                self.kwarg("model_name", python_string(&alter.model_name));
                self.kwarg("name", python_string(&alter.field_name));
                let rendered = serialize_field(&alter.field, app_label, &mut imports);
                self.kwarg("field", rendered);
                self.close();
            }
            SchemaOperation::RenameField(rename) => {
                self.open("RenameField");
                self.kwarg("model_name", python_string(&rename.model_name));
                self.kwarg("old_name", python_string(&rename.old_name));
                self.kwarg("new_name", python_string(&rename.new_name));
                self.close();
            }
            SchemaOperation::AddIndex(add) => {
                self.open("AddIndex");
                self.kwarg("model_name", python_string(&add.model_name));
                let rendered = serialize_index(&add.index, &mut imports);
                self.kwarg("index", rendered);
                self.close();
            }
            SchemaOperation::RemoveIndex(remove) => {
                self.open("RemoveIndex");
                self.kwarg("model_name", python_string(&remove.model_name));
                self.kwarg("name", python_string(&remove.name));
                self.close();
            }
            SchemaOperation::AlterUniqueTogether(alter) => {
                self.open("AlterUniqueTogether");
                self.kwarg("name", python_string(&alter.model_name));
                self.kwarg(
                    "unique_together",
                    serialize_unique_together(&alter.unique_together),
                );
                self.close();
            }
        }
        self.imports.extend(imports);
    }

    /// Renders the `code`/`reverse_code` argument of a `RunPython`.
    fn callable(&mut self, callable: &PythonCallable) -> String {
        let PythonCallable::Function(func) = callable else {
            return NOOP_CALLABLE.to_string();
        };
        match &func.attribution {
            CodeAttribution::PendingCleanup => {
                if !self.functions.iter().any(|f| f.name == func.name) {
                    self.functions.push(func.clone());
                }
                func.name.clone()
            }
            CodeAttribution::Module(module) => {
                self.imports.insert(format!("import {module}"));
                format!("{module}.{}", func.name)
            }
        }
    }
}

/// The result of rendering a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMigration {
    /// The full text of the migration module.
    pub text: String,
    /// Modules whose functions could not be copied into the file.
    pub manual_porting: Vec<String>,
}

impl RenderedMigration {
    /// Returns `true` if the file references functions that must be copied
    /// in by hand.
    pub fn needs_manual_porting(&self) -> bool {
        !self.manual_porting.is_empty()
    }
}

/// Renders a [`Migration`] as a Python migration module.
pub struct MigrationWriter<'a> {
    migration: &'a Migration,
    include_header: bool,
}

impl<'a> MigrationWriter<'a> {
    /// Creates a writer. With `include_header`, the output starts with a
    /// "Generated by" comment carrying the version and current time.
    pub const fn new(migration: &'a Migration, include_header: bool) -> Self {
        Self {
            migration,
            include_header,
        }
    }

    /// Returns the rendered module text.
    pub fn as_string(&self) -> String {
        self.render().text
    }

    /// Renders the migration.
    pub fn render(&self) -> RenderedMigration {
        let migration = self.migration;
        let mut imports: BTreeSet<String> = BTreeSet::new();
        imports.insert(MIGRATIONS_IMPORT.to_string());

        // Dependencies, in record order
        let dependencies: Vec<String> = migration
            .dependencies
            .iter()
            .map(|dep| match dep {
                Dependency::Migration(key) => format!(
                    "        ({}, {}),",
                    python_string(&key.app_label),
                    python_string(&key.name)
                ),
                Dependency::Setting(name) => {
                    imports.insert(SETTINGS_IMPORT.to_string());
                    format!("        migrations.swappable_dependency(settings.{name}),")
                }
            })
            .collect();

        // Operations
        let mut op_writer = OperationWriter::new(&migration.app_label);
        let operations: Vec<String> = migration
            .operations
            .iter()
            .map(|op| op_writer.serialize(op))
            .collect();
        imports.extend(op_writer.imports().iter().cloned());
        imports.extend(migration.extra_imports.iter().cloned());

        let (imports, manual_porting) = process_imports(imports);

        let mut text = String::new();
        if self.include_header {
            text.push_str(&format!(
                "# Generated by django-squash {} on {}\n\n",
                env!("CARGO_PKG_VERSION"),
                chrono::Local::now().format("%Y-%m-%d %H:%M")
            ));
        }
        text.push_str(&imports.join("\n"));
        text.push('\n');

        if !manual_porting.is_empty() {
            text.push('\n');
            text.push_str(MANUAL_PORTING_NOTE);
            text.push('\n');
            for module in &manual_porting {
                text.push_str(&format!("# {module}\n"));
            }
        }

        let functions: Vec<&str> = op_writer
            .functions()
            .iter()
            .filter_map(|f| f.source.as_deref())
            .collect();
        if !functions.is_empty() {
            text.push_str("\n\n");
            text.push_str(&functions.join("\n\n"));
        }

        text.push_str("\n\nclass Migration(migrations.Migration):\n");
        if !migration.replaces.is_empty() {
            let replaces: Vec<String> = migration
                .replaces
                .iter()
                .map(|key| {
                    format!(
                        "({}, {})",
                        python_string(&key.app_label),
                        python_string(&key.name)
                    )
                })
                .collect();
            text.push_str(&format!("\n    replaces = [{}]\n", replaces.join(", ")));
        }
        if migration.initial {
            text.push_str("\n    initial = True\n");
        }

        if dependencies.is_empty() {
            text.push_str("\n    dependencies = []\n");
        } else {
            text.push_str("\n    dependencies = [\n");
            for line in &dependencies {
                text.push_str(line);
                text.push('\n');
            }
            text.push_str("    ]\n");
        }

        if operations.is_empty() {
            text.push_str("\n    operations = []\n");
        } else {
            text.push_str("\n    operations = [\n");
            for op in &operations {
                text.push_str(op);
            }
            text.push_str("    ]\n");
        }

        RenderedMigration {
            text,
            manual_porting,
        }
    }
}

/// Normalizes, filters and orders the import block.
///
/// Imports of migration modules (whose names start with digits) cannot be
/// written as `import` statements; they are returned separately for the
/// manual porting note. The `django.db` imports are merged into one line.
/// Imports are sorted by the module they name.
fn process_imports(imports: BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let mut manual_porting = Vec::new();
    let mut db_names: BTreeSet<String> = BTreeSet::new();
    let mut lines: Vec<String> = Vec::new();

    for line in imports {
        if migration_module_import_regex().is_match(&line) {
            let module = line.trim_start_matches("import ").to_string();
            tracing::debug!(module = %module, "import needs manual porting");
            manual_porting.push(module);
        } else if let Some(caps) = django_db_import_regex().captures(&line) {
            db_names.insert(caps[1].to_string());
            if let Some(second) = caps.get(3) {
                db_names.insert(second.as_str().to_string());
            }
        } else {
            lines.push(line);
        }
    }

    if db_names.contains("models") {
        lines.push(format!("{MIGRATIONS_IMPORT}, models"));
    } else {
        lines.push(MIGRATIONS_IMPORT.to_string());
    }
    lines.sort_by(|a, b| {
        let key_a = a.split_whitespace().nth(1).unwrap_or("");
        let key_b = b.split_whitespace().nth(1).unwrap_or("");
        key_a.cmp(key_b).then_with(|| a.cmp(b))
    });

    (lines, manual_porting)
}
