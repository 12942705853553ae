//! Migration operations that describe schema changes.
//!
//! [`Operation`] is a closed set of variants: structural schema operations,
//! raw Python code ([`RunPython`]), raw SQL ([`RunSql`]) and the
//! [`SeparateDatabaseAndState`] composite. Each operation knows how to apply
//! itself to an in-memory [`ProjectState`] and how to describe itself.

use crate::autodetect::{MigrationFieldDef, ModelOptions, ModelState, ProjectState};
use crate::fields::Index;

/// Behavior shared by every concrete operation.
pub trait StateOperation {
    /// Returns a human-readable description of this operation.
    fn describe(&self) -> String;

    /// Applies this operation to the in-memory project state.
    fn state_forwards(&self, app_label: &str, state: &mut ProjectState);

    /// Returns whether this operation can be reversed.
    fn reversible(&self) -> bool {
        true
    }
}

/// A single migration operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// A structural change; always collapsible.
    Schema(SchemaOperation),
    /// Arbitrary Python code.
    RunPython(RunPython),
    /// Raw SQL statements.
    RunSql(RunSql),
    /// Separate lists of state-only and database-only operations.
    SeparateDatabaseAndState(SeparateDatabaseAndState),
}

impl Operation {
    /// Returns a human-readable description of this operation.
    pub fn describe(&self) -> String {
        match self {
            Self::Schema(op) => op.describe(),
            Self::RunPython(op) => op.describe(),
            Self::RunSql(op) => op.describe(),
            Self::SeparateDatabaseAndState(op) => op.describe(),
        }
    }

    /// Applies this operation to the in-memory project state.
    pub fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        match self {
            Self::Schema(op) => op.state_forwards(app_label, state),
            Self::RunPython(op) => op.state_forwards(app_label, state),
            Self::RunSql(op) => op.state_forwards(app_label, state),
            Self::SeparateDatabaseAndState(op) => op.state_forwards(app_label, state),
        }
    }

    /// Returns whether this operation may be dropped when migrations are
    /// collapsed. Only raw Python and raw SQL can opt in.
    pub const fn elidable(&self) -> bool {
        match self {
            Self::RunPython(op) => op.elidable,
            Self::RunSql(op) => op.elidable,
            Self::Schema(_) | Self::SeparateDatabaseAndState(_) => false,
        }
    }

    /// Returns whether this operation can be reversed.
    pub fn reversible(&self) -> bool {
        match self {
            Self::Schema(op) => op.reversible(),
            Self::RunPython(op) => op.reversible(),
            Self::RunSql(op) => op.reversible(),
            Self::SeparateDatabaseAndState(op) => op.reversible(),
        }
    }
}

/// The structural operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateModel(CreateModel),
    DeleteModel(DeleteModel),
    AddField(AddField),
    RemoveField(RemoveField),
    AlterField(AlterField),
    RenameField(RenameField),
    AddIndex(AddIndex),
    RemoveIndex(RemoveIndex),
    AlterUniqueTogether(AlterUniqueTogether),
}

impl SchemaOperation {
    fn inner(&self) -> &dyn StateOperation {
        match self {
            Self::CreateModel(op) => op,
            Self::DeleteModel(op) => op,
            Self::AddField(op) => op,
            Self::RemoveField(op) => op,
            Self::AlterField(op) => op,
            Self::RenameField(op) => op,
            Self::AddIndex(op) => op,
            Self::RemoveIndex(op) => op,
            Self::AlterUniqueTogether(op) => op,
        }
    }

    /// Returns the lowercased name of the model this operation touches.
    pub fn model_name(&self) -> &str {
        match self {
            Self::CreateModel(op) => &op.name,
            Self::DeleteModel(op) => &op.name,
            Self::AddField(op) => &op.model_name,
            Self::RemoveField(op) => &op.model_name,
            Self::AlterField(op) => &op.model_name,
            Self::RenameField(op) => &op.model_name,
            Self::AddIndex(op) => &op.model_name,
            Self::RemoveIndex(op) => &op.model_name,
            Self::AlterUniqueTogether(op) => &op.model_name,
        }
    }
}

impl StateOperation for SchemaOperation {
    fn describe(&self) -> String {
        self.inner().describe()
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        self.inner().state_forwards(app_label, state);
    }

    fn reversible(&self) -> bool {
        self.inner().reversible()
    }
}

macro_rules! schema_operation_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Operation {
                fn from(op: $variant) -> Self {
                    Self::Schema(SchemaOperation::$variant(op))
                }
            }
        )*
    };
}

schema_operation_from!(
    CreateModel,
    DeleteModel,
    AddField,
    RemoveField,
    AlterField,
    RenameField,
    AddIndex,
    RemoveIndex,
    AlterUniqueTogether,
);

impl From<RunPython> for Operation {
    fn from(op: RunPython) -> Self {
        Self::RunPython(op)
    }
}

impl From<RunSql> for Operation {
    fn from(op: RunSql) -> Self {
        Self::RunSql(op)
    }
}

impl From<SeparateDatabaseAndState> for Operation {
    fn from(op: SeparateDatabaseAndState) -> Self {
        Self::SeparateDatabaseAndState(op)
    }
}

// ============================================================
// Schema operations
// ============================================================

/// Creates a new model.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateModel {
    /// The model name.
    pub name: String,
    /// The fields of the new model.
    pub fields: Vec<MigrationFieldDef>,
    /// Model-level options (db_table, indexes, unique_together).
    pub options: ModelOptions,
}

impl StateOperation for CreateModel {
    fn describe(&self) -> String {
        format!("Create model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        let model = ModelState {
            app_label: app_label.to_string(),
            name: self.name.clone(),
            fields: self.fields.clone(),
            options: self.options.clone(),
        };
        state.add_model(model);
    }
}

/// Deletes a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteModel {
    /// The model name to delete.
    pub name: String,
}

impl StateOperation for DeleteModel {
    fn describe(&self) -> String {
        format!("Delete model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        state.remove_model(app_label, &self.name);
    }
}

/// Adds a field to an existing model.
#[derive(Debug, Clone, PartialEq)]
pub struct AddField {
    /// The model name the field is being added to.
    pub model_name: String,
    /// The field to add.
    pub field: MigrationFieldDef,
}

impl StateOperation for AddField {
    fn describe(&self) -> String {
        format!("Add field {} to {}", self.field.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.fields.push(self.field.clone());
        }
    }
}

/// Removes a field from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveField {
    /// The model name the field is being removed from.
    pub model_name: String,
    /// The name of the field to remove.
    pub field_name: String,
}

impl StateOperation for RemoveField {
    fn describe(&self) -> String {
        format!("Remove field {} from {}", self.field_name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.fields.retain(|f| f.name != self.field_name);
        }
    }
}

/// Alters a field on a model.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterField {
    /// The model name containing the field.
    pub model_name: String,
    /// The name of the field being altered.
    pub field_name: String,
    /// The new field definition.
    pub field: MigrationFieldDef,
}

impl StateOperation for AlterField {
    fn describe(&self) -> String {
        format!("Alter field {} on {}", self.field_name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            if let Some(f) = model.fields.iter_mut().find(|f| f.name == self.field_name) {
                *f = self.field.clone();
            }
        }
    }
}

/// Renames a field on a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameField {
    /// The model name containing the field.
    pub model_name: String,
    /// The old field name.
    pub old_name: String,
    /// The new field name.
    pub new_name: String,
}

impl StateOperation for RenameField {
    fn describe(&self) -> String {
        format!(
            "Rename field {} on {} to {}",
            self.old_name, self.model_name, self.new_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            if let Some(f) = model.fields.iter_mut().find(|f| f.name == self.old_name) {
                f.name.clone_from(&self.new_name);
            }
            for group in &mut model.options.unique_together {
                for name in group.iter_mut().filter(|n| **n == self.old_name) {
                    name.clone_from(&self.new_name);
                }
            }
            for index in &mut model.options.indexes {
                for name in index.fields.iter_mut().filter(|n| **n == self.old_name) {
                    name.clone_from(&self.new_name);
                }
            }
        }
    }
}

/// Adds an index to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddIndex {
    /// The model name the index is for.
    pub model_name: String,
    /// The index definition.
    pub index: Index,
}

impl StateOperation for AddIndex {
    fn describe(&self) -> String {
        format!(
            "Create index {} on field(s) {} of model {}",
            self.index.name,
            self.index.fields.join(", "),
            self.model_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.options.indexes.push(self.index.clone());
        }
    }
}

/// Removes an index from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveIndex {
    /// The model name the index belongs to.
    pub model_name: String,
    /// The name of the index to remove.
    pub name: String,
}

impl StateOperation for RemoveIndex {
    fn describe(&self) -> String {
        format!("Remove index {} from {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.options.indexes.retain(|i| i.name != self.name);
        }
    }
}

/// Sets the `unique_together` groups of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterUniqueTogether {
    /// The model name.
    pub model_name: String,
    /// The new set of `unique_together` field groups.
    pub unique_together: Vec<Vec<String>>,
}

impl StateOperation for AlterUniqueTogether {
    fn describe(&self) -> String {
        format!(
            "Alter unique_together for {} ({} constraint(s))",
            self.model_name,
            self.unique_together.len()
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        if let Some(model) = state.get_model_mut(app_label, &self.model_name) {
            model.options.unique_together.clone_from(&self.unique_together);
        }
    }
}

// ============================================================
// Raw code operations
// ============================================================

/// Where a function referenced by [`RunPython`] lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttribution {
    /// Defined in an importable module, written as `module.name`.
    Module(String),
    /// Copied out of a superseded migration; the body is emitted into the
    /// new migration file and referenced by its bare name.
    PendingCleanup,
}

/// A reference to a Python function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    /// The function name.
    pub name: String,
    /// Where the function is defined.
    pub attribution: CodeAttribution,
    /// The full source text of the function, when it has been extracted.
    pub source: Option<String>,
}

impl FunctionRef {
    /// Creates a reference to `module.name`.
    pub fn in_module(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribution: CodeAttribution::Module(module.into()),
            source: None,
        }
    }

    /// Returns a detached copy carrying `source`, attributed to the file it
    /// is about to be written into.
    pub fn detached_copy(&self, source: String) -> Self {
        Self {
            name: self.name.clone(),
            attribution: CodeAttribution::PendingCleanup,
            source: Some(source),
        }
    }

    /// Returns `true` once the function has been copied for re-emission.
    pub const fn is_pending_cleanup(&self) -> bool {
        matches!(self.attribution, CodeAttribution::PendingCleanup)
    }
}

/// The code or reverse code of a [`RunPython`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonCallable {
    /// `migrations.RunPython.noop`.
    Noop,
    /// A named function.
    Function(FunctionRef),
}

impl PythonCallable {
    /// Returns the function reference, if this is not `noop`.
    pub const fn function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Noop => None,
            Self::Function(func) => Some(func),
        }
    }
}

/// Runs Python code in a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPython {
    /// The forward code.
    pub code: PythonCallable,
    /// The reverse code (None = irreversible).
    pub reverse_code: Option<PythonCallable>,
    /// Whether the operation may be dropped when migrations are collapsed.
    pub elidable: bool,
}

impl RunPython {
    /// Creates an irreversible, non-elidable operation.
    pub fn new(code: PythonCallable) -> Self {
        Self {
            code,
            reverse_code: None,
            elidable: false,
        }
    }

    /// Sets the reverse code.
    pub fn with_reverse(mut self, reverse_code: PythonCallable) -> Self {
        self.reverse_code = Some(reverse_code);
        self
    }

    /// Marks the operation as elidable.
    pub fn elidable(mut self) -> Self {
        self.elidable = true;
        self
    }

    /// Returns the functions referenced by this operation, code first.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionRef> {
        std::iter::once(&self.code)
            .chain(self.reverse_code.as_ref())
            .filter_map(PythonCallable::function)
    }
}

impl StateOperation for RunPython {
    fn describe(&self) -> String {
        "Raw Python operation".to_string()
    }

    fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) {}

    fn reversible(&self) -> bool {
        self.reverse_code.is_some()
    }
}

/// Runs raw SQL in a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSql {
    /// SQL to run in the forward direction.
    pub sql: String,
    /// SQL to run in the backward direction (None = irreversible).
    pub reverse_sql: Option<String>,
    /// Whether the operation may be dropped when migrations are collapsed.
    pub elidable: bool,
}

impl RunSql {
    /// Creates an irreversible, non-elidable operation.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            reverse_sql: None,
            elidable: false,
        }
    }

    /// Sets the reverse SQL.
    pub fn with_reverse(mut self, reverse_sql: impl Into<String>) -> Self {
        self.reverse_sql = Some(reverse_sql.into());
        self
    }

    /// Marks the operation as elidable.
    pub fn elidable(mut self) -> Self {
        self.elidable = true;
        self
    }
}

impl StateOperation for RunSql {
    fn describe(&self) -> String {
        "Raw SQL operation".to_string()
    }

    fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) {}

    fn reversible(&self) -> bool {
        self.reverse_sql.is_some()
    }
}

/// Applies one list of operations to the project state and another to the
/// database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeparateDatabaseAndState {
    /// Operations that only affect the project state.
    pub state_operations: Vec<Operation>,
    /// Operations that only affect the database.
    pub database_operations: Vec<Operation>,
}

impl StateOperation for SeparateDatabaseAndState {
    fn describe(&self) -> String {
        "Custom state/database change combination".to_string()
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) {
        for op in &self.state_operations {
            op.state_forwards(app_label, state);
        }
    }

    fn reversible(&self) -> bool {
        self.state_operations
            .iter()
            .chain(&self.database_operations)
            .all(Operation::reversible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    fn make_field(name: &str, ft: FieldType) -> MigrationFieldDef {
        MigrationFieldDef::new(name, ft)
    }

    fn state_with_post() -> ProjectState {
        let mut state = ProjectState::new();
        Operation::from(CreateModel {
            name: "post".into(),
            fields: vec![
                make_field("id", FieldType::BigAutoField).primary_key(),
                make_field("title", FieldType::CharField).max_length(200),
            ],
            options: ModelOptions::default(),
        })
        .state_forwards("blog", &mut state);
        state
    }

    // ── CreateModel / DeleteModel ───────────────────────────────────

    #[test]
    fn test_create_model_describe() {
        let op = CreateModel {
            name: "post".into(),
            fields: vec![],
            options: ModelOptions::default(),
        };
        assert_eq!(op.describe(), "Create model post");
    }

    #[test]
    fn test_create_model_state_forwards() {
        let state = state_with_post();
        assert!(state.get_model("blog", "post").is_some());
    }

    #[test]
    fn test_delete_model_state_forwards() {
        let mut state = state_with_post();
        Operation::from(DeleteModel { name: "post".into() }).state_forwards("blog", &mut state);
        assert!(state.models.is_empty());
    }

    // ── Field operations ────────────────────────────────────────────

    #[test]
    fn test_add_field_state_forwards() {
        let mut state = state_with_post();
        let op = AddField {
            model_name: "post".into(),
            field: make_field("body", FieldType::TextField),
        };
        assert_eq!(op.describe(), "Add field body to post");
        Operation::from(op).state_forwards("blog", &mut state);
        assert_eq!(state.get_model("blog", "post").unwrap().fields.len(), 3);
    }

    #[test]
    fn test_remove_field_state_forwards() {
        let mut state = state_with_post();
        Operation::from(RemoveField {
            model_name: "post".into(),
            field_name: "title".into(),
        })
        .state_forwards("blog", &mut state);
        let model = state.get_model("blog", "post").unwrap();
        assert_eq!(model.fields.len(), 1);
    }

    #[test]
    fn test_alter_field_state_forwards() {
        let mut state = state_with_post();
        Operation::from(AlterField {
            model_name: "post".into(),
            field_name: "title".into(),
            field: make_field("title", FieldType::CharField).max_length(300),
        })
        .state_forwards("blog", &mut state);
        let model = state.get_model("blog", "post").unwrap();
        assert_eq!(model.fields[1].max_length, Some(300));
    }

    #[test]
    fn test_rename_field_updates_options() {
        let mut state = state_with_post();
        Operation::from(AlterUniqueTogether {
            model_name: "post".into(),
            unique_together: vec![vec!["id".into(), "title".into()]],
        })
        .state_forwards("blog", &mut state);
        Operation::from(AddIndex {
            model_name: "post".into(),
            index: Index::new("post_title_idx", vec!["title".into()]),
        })
        .state_forwards("blog", &mut state);

        let op = RenameField {
            model_name: "post".into(),
            old_name: "title".into(),
            new_name: "headline".into(),
        };
        assert_eq!(op.describe(), "Rename field title on post to headline");
        Operation::from(op).state_forwards("blog", &mut state);

        let model = state.get_model("blog", "post").unwrap();
        assert_eq!(model.fields[1].name, "headline");
        assert_eq!(model.options.unique_together[0][1], "headline");
        assert_eq!(model.options.indexes[0].fields[0], "headline");
    }

    // ── Indexes ─────────────────────────────────────────────────────

    #[test]
    fn test_add_and_remove_index() {
        let mut state = state_with_post();
        let add = AddIndex {
            model_name: "post".into(),
            index: Index::new("post_title_idx", vec!["title".into()]),
        };
        assert_eq!(
            add.describe(),
            "Create index post_title_idx on field(s) title of model post"
        );
        Operation::from(add).state_forwards("blog", &mut state);
        assert_eq!(state.get_model("blog", "post").unwrap().options.indexes.len(), 1);

        Operation::from(RemoveIndex {
            model_name: "post".into(),
            name: "post_title_idx".into(),
        })
        .state_forwards("blog", &mut state);
        assert!(state.get_model("blog", "post").unwrap().options.indexes.is_empty());
    }

    // ── Raw code ────────────────────────────────────────────────────

    #[test]
    fn test_elidable_flags() {
        let sql = Operation::from(RunSql::new("SELECT 1"));
        assert!(!sql.elidable());
        assert!(Operation::from(RunSql::new("SELECT 1").elidable()).elidable());

        let py = Operation::from(RunPython::new(PythonCallable::Noop).elidable());
        assert!(py.elidable());

        let schema = Operation::from(DeleteModel { name: "x".into() });
        assert!(!schema.elidable());
        let composite = Operation::from(SeparateDatabaseAndState::default());
        assert!(!composite.elidable());
    }

    #[test]
    fn test_raw_operations_describe_and_reversible() {
        let sql = Operation::from(RunSql::new("SELECT 1"));
        assert_eq!(sql.describe(), "Raw SQL operation");
        assert!(!sql.reversible());
        assert!(Operation::from(RunSql::new("A").with_reverse("B")).reversible());

        let py = Operation::from(
            RunPython::new(PythonCallable::Function(FunctionRef::in_module(
                "blog.migrations.0002_x",
                "forwards",
            )))
            .with_reverse(PythonCallable::Noop),
        );
        assert_eq!(py.describe(), "Raw Python operation");
        assert!(py.reversible());
    }

    #[test]
    fn test_run_python_functions() {
        let op = RunPython::new(PythonCallable::Function(FunctionRef::in_module("m", "f")))
            .with_reverse(PythonCallable::Function(FunctionRef::in_module("m", "g")));
        let names: Vec<&str> = op.functions().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["f", "g"]);

        let noop = RunPython::new(PythonCallable::Noop).with_reverse(PythonCallable::Noop);
        assert_eq!(noop.functions().count(), 0);
    }

    #[test]
    fn test_detached_copy_does_not_touch_original() {
        let original = FunctionRef::in_module("blog.migrations.0002_x", "forwards");
        let copy = original.detached_copy("def forwards(apps, schema_editor):\n    pass\n".into());
        assert!(copy.is_pending_cleanup());
        assert!(!original.is_pending_cleanup());
        assert_eq!(
            original.attribution,
            CodeAttribution::Module("blog.migrations.0002_x".into())
        );
    }

    #[test]
    fn test_separate_database_and_state_forwards_only_state() {
        let mut state = ProjectState::new();
        let op = SeparateDatabaseAndState {
            state_operations: vec![CreateModel {
                name: "tag".into(),
                fields: vec![],
                options: ModelOptions::default(),
            }
            .into()],
            database_operations: vec![RunSql::new("CREATE TABLE tag ()").into()],
        };
        Operation::from(op).state_forwards("blog", &mut state);
        assert!(state.get_model("blog", "tag").is_some());
    }

    #[test]
    fn test_schema_operation_model_name() {
        let op = SchemaOperation::RenameField(RenameField {
            model_name: "post".into(),
            old_name: "a".into(),
            new_name: "b".into(),
        });
        assert_eq!(op.model_name(), "post");
    }
}
