//! End-to-end squashing over migration history on disk.

use std::fs;
use std::path::Path;

use django_squash_migrations::serializer::{history_file_path, migration_file_path};
use django_squash_migrations::{
    dangling_references, Migration, MigrationKey, MigrationLoader, MigrationWriter, Operation,
    ProjectState, SerializableMigration, SquashAutodetector,
};
use tempfile::TempDir;

const INITIAL: &str = r#"{
    "initial": true,
    "dependencies": [],
    "operations": [
        {"type": "CreateModel", "name": "Post", "fields": [
            {"name": "id", "field_type": {"type": "BigAutoField"}, "primary_key": true},
            {"name": "title", "field_type": {"type": "CharField"}, "max_length": 200}
        ]}
    ]
}"#;

const DATA: &str = r#"{
    "dependencies": [["blog", "0001_initial"]],
    "operations": [
        {"type": "AddField", "model_name": "post", "field":
            {"name": "slug", "field_type": {"type": "CharField"}, "max_length": 50, "null": true}},
        {"type": "RunPython", "code": "populate_default", "reverse_code": "migrations.RunPython.noop"},
        {"type": "RunSQL", "sql": "UPDATE blog_post SET slug = NULL", "elidable": true}
    ]
}"#;

const DATA_PY: &str = "import json
from django.db import migrations, models


def populate_default(apps, schema_editor):
    Post = apps.get_model('blog', 'Post')
    Post.objects.update(slug=json.dumps('x'))


class Migration(migrations.Migration):

    dependencies = [
        ('blog', '0001_initial'),
    ]
";

fn write(dir: &Path, app: &str, file: &str, content: &str) {
    let app_dir = dir.join(app);
    fs::create_dir_all(&app_dir).unwrap();
    fs::write(app_dir.join(file), content).unwrap();
}

fn blog_history() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "blog", "__init__.py", "");
    write(dir.path(), "blog", "0001_initial.json", INITIAL);
    write(
        dir.path(),
        "blog",
        "0001_initial.py",
        "from django.db import migrations, models\n",
    );
    write(dir.path(), "blog", "0002_data.json", DATA);
    write(dir.path(), "blog", "0002_data.py", DATA_PY);
    dir
}

fn load(dir: &Path) -> MigrationLoader {
    let mut loader = MigrationLoader::new(dir);
    loader.load().unwrap();
    loader
}

fn squash(loader: &MigrationLoader, apps: &[String]) -> Vec<Migration> {
    let state = ProjectState::from_history(loader).unwrap();
    let mut changes = SquashAutodetector::new(ProjectState::new(), state)
        .squash(loader, Some(apps), Some(apps), None)
        .unwrap();
    changes.remove("blog").unwrap_or_default()
}

fn persist(dir: &Path, migration: &Migration) {
    let text = MigrationWriter::new(migration, false).as_string();
    fs::write(
        migration_file_path(dir, &migration.app_label, &migration.name),
        text,
    )
    .unwrap();
    SerializableMigration::from_migration(migration)
        .write_to_file(&history_file_path(dir, &migration.app_label, &migration.name))
        .unwrap();
}

/// Lists the raw operations of `migration` in order.
fn custom_operations(migration: &Migration) -> Vec<String> {
    migration
        .operations
        .iter()
        .filter_map(|op| match op {
            Operation::RunPython(run) => {
                Some(format!("python:{}", run.code.function().unwrap().name))
            }
            Operation::RunSql(run) => Some(format!("sql:{}", run.sql)),
            _ => None,
        })
        .collect()
}

fn run_python_count(migration: &Migration) -> usize {
    migration
        .operations
        .iter()
        .filter(|op| matches!(op, Operation::RunPython(_)))
        .count()
}

// ── Squashing with data migrations ──────────────────────────────────

#[test]
fn test_squash_rescues_run_python() {
    let dir = blog_history();
    let loader = load(dir.path());
    let squashed = squash(&loader, &["blog".to_string()]);

    assert_eq!(squashed.len(), 1);
    let migration = &squashed[0];
    assert_eq!(migration.name, "0003_squashed");
    assert!(migration.initial);
    assert!(migration.dependencies.is_empty());
    assert_eq!(
        migration.replaces,
        vec![
            MigrationKey::new("blog", "0001_initial"),
            MigrationKey::new("blog", "0002_data"),
        ]
    );
    // CreateModel plus the rescued RunPython; the elidable RunSQL is gone.
    assert_eq!(migration.operations.len(), 2);
    assert_eq!(run_python_count(migration), 1);

    let rendered = MigrationWriter::new(migration, false).render();
    assert!(!rendered.needs_manual_porting());
    let text = &rendered.text;
    assert!(text.starts_with("from django.db import migrations, models\nimport json\n"));
    assert!(text.contains("def populate_default(apps, schema_editor):\n"));
    assert!(text.contains("            code=populate_default,\n"));
    assert!(text.contains("            reverse_code=migrations.RunPython.noop,\n"));
    assert!(text.contains("('slug', models.CharField(max_length=50, null=True)),"));
    assert!(text.contains("    replaces = [('blog', '0001_initial'), ('blog', '0002_data')]\n"));
    assert!(!text.contains("UPDATE blog_post"));

    // Rendering is stable.
    assert_eq!(MigrationWriter::new(migration, false).as_string(), *text);
}

#[test]
fn test_squash_leaves_history_untouched() {
    let dir = blog_history();
    let loader = load(dir.path());
    let _ = squash(&loader, &["blog".to_string()]);

    let reloaded = load(dir.path());
    let data = reloaded
        .get_migration(&MigrationKey::new("blog", "0002_data"))
        .unwrap();
    let run = data
        .migration
        .operations
        .iter()
        .find_map(|op| match op {
            Operation::RunPython(run) => Some(run),
            _ => None,
        })
        .unwrap();
    assert!(!run.code.function().unwrap().is_pending_cleanup());
}

#[test]
fn test_squash_without_history_replaces_nothing() {
    let dir = TempDir::new().unwrap();
    let loader = load(dir.path());
    let state = ProjectState::from_json_str(
        r#"[{"app_label": "blog", "name": "Post", "fields": [
            {"name": "id", "field_type": {"type": "BigAutoField"}, "primary_key": true}
        ]}]"#,
    )
    .unwrap();
    let changes = SquashAutodetector::new(ProjectState::new(), state)
        .squash(&loader, None, None, None)
        .unwrap();
    assert!(changes.values().flatten().all(|m| m.replaces.is_empty()));
}

#[test]
fn test_resquash_numbers_after_previous_squash() {
    let dir = blog_history();
    let loader = load(dir.path());
    let first = squash(&loader, &["blog".to_string()]);
    persist(dir.path(), &first[0]);

    let loader = load(dir.path());
    assert_eq!(loader.replaced_keys().len(), 2);
    let second = squash(&loader, &["blog".to_string()]);

    assert_eq!(second.len(), 1);
    let migration = &second[0];
    assert_eq!(migration.name, "0004_squashed");
    assert_eq!(migration.replaces.len(), 3);
    assert_eq!(
        migration.replaces[2],
        MigrationKey::new("blog", "0003_squashed")
    );

    // The earlier squash already carries the function; it is rescued once.
    assert_eq!(run_python_count(migration), 1);
    let text = MigrationWriter::new(migration, false).as_string();
    assert_eq!(text.matches("def populate_default(").count(), 1);
}

#[test]
fn test_missing_function_source_needs_manual_porting() {
    let dir = blog_history();
    write(
        dir.path(),
        "blog",
        "0002_data.py",
        "from django.db import migrations\n",
    );
    let loader = load(dir.path());
    let squashed = squash(&loader, &["blog".to_string()]);

    let rendered = MigrationWriter::new(&squashed[0], false).render();
    assert_eq!(rendered.manual_porting, vec!["blog.migrations.0002_data"]);
    assert!(rendered
        .text
        .contains("code=blog.migrations.0002_data.populate_default,"));
}

// ── Cross-app history ───────────────────────────────────────────────

#[test]
fn test_dangling_references_from_other_apps() {
    let dir = blog_history();
    write(
        dir.path(),
        "shop",
        "0001_initial.json",
        r#"{
            "initial": true,
            "dependencies": [["blog", "0002_data"]],
            "operations": [
                {"type": "CreateModel", "name": "Order", "fields": [
                    {"name": "id", "field_type": {"type": "BigAutoField"}, "primary_key": true},
                    {"name": "post", "field_type":
                        {"type": "ForeignKey", "to": "blog.Post", "on_delete": "Cascade"}}
                ]}
            ]
        }"#,
    );
    let loader = load(dir.path());
    let state = ProjectState::from_history(&loader).unwrap();
    let apps = vec!["blog".to_string()];
    let changes = SquashAutodetector::new(ProjectState::new(), state)
        .squash(&loader, Some(&apps), Some(&apps), None)
        .unwrap();

    assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["blog"]);
    assert_eq!(
        dangling_references(loader.graph(), &changes),
        vec![(
            MigrationKey::new("shop", "0001_initial"),
            MigrationKey::new("blog", "0002_data"),
        )]
    );
}

// ── Rescue order ────────────────────────────────────────────────────

#[test]
fn test_rescued_operations_keep_history_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "blog", "0001_initial.json", INITIAL);
    write(
        dir.path(),
        "blog",
        "0002_fill.json",
        r#"{
            "dependencies": [["blog", "0001_initial"]],
            "operations": [{"type": "RunPython", "code": "fill_title"}]
        }"#,
    );
    write(
        dir.path(),
        "blog",
        "0002_fill.py",
        "from django.db import migrations\n\n\ndef fill_title(apps, schema_editor):\n    pass\n",
    );
    write(
        dir.path(),
        "blog",
        "0003_index.json",
        r#"{
            "dependencies": [["blog", "0002_fill"]],
            "operations": [
                {"type": "RunSQL", "sql": "CREATE INDEX post_title ON blog_post (title)"},
                {"type": "RunSQL", "sql": "VACUUM", "elidable": true}
            ]
        }"#,
    );
    write(
        dir.path(),
        "blog",
        "0004_state.json",
        r#"{
            "dependencies": [["blog", "0003_index"]],
            "operations": [
                {"type": "SeparateDatabaseAndState",
                 "state_operations": [{"type": "RunPython", "code": "sync_state"}]}
            ]
        }"#,
    );
    write(
        dir.path(),
        "blog",
        "0004_state.py",
        "from django.db import migrations\n\n\ndef sync_state(apps, schema_editor):\n    pass\n",
    );

    let loader = load(dir.path());
    let squashed = squash(&loader, &["blog".to_string()]);

    assert_eq!(squashed.len(), 1);
    let migration = &squashed[0];
    assert_eq!(migration.name, "0005_squashed");
    assert!(matches!(migration.operations[0], Operation::Schema(_)));
    assert_eq!(
        custom_operations(migration),
        vec![
            "python:fill_title",
            "sql:CREATE INDEX post_title ON blog_post (title)",
            "python:sync_state",
        ]
    );

    let text = MigrationWriter::new(migration, false).as_string();
    assert!(text.contains("CREATE INDEX post_title ON blog_post (title)"));
    assert!(!text.contains("VACUUM"));
    let fill = text.find("def fill_title(").unwrap();
    let sync = text.find("def sync_state(").unwrap();
    assert!(fill < sync);
}

#[test]
fn test_rescued_operations_go_to_last_record() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "b",
        "0001_initial.json",
        r#"{"initial": true, "operations": [{"type": "RunPython", "code": "seed"}]}"#,
    );
    write(
        dir.path(),
        "b",
        "0001_initial.py",
        "from django.db import migrations\n\n\ndef seed(apps, schema_editor):\n    pass\n",
    );
    let loader = load(dir.path());

    // a.A and b.B reference each other, so b needs a second record.
    let state = ProjectState::from_json_str(
        r#"[
            {"app_label": "a", "name": "A", "fields": [
                {"name": "id", "field_type": {"type": "BigAutoField"}, "primary_key": true},
                {"name": "b", "field_type":
                    {"type": "ForeignKey", "to": "b.B", "on_delete": "Cascade"}}
            ]},
            {"app_label": "b", "name": "B", "fields": [
                {"name": "id", "field_type": {"type": "BigAutoField"}, "primary_key": true},
                {"name": "a", "field_type":
                    {"type": "ForeignKey", "to": "a.A", "on_delete": "Cascade"}}
            ]}
        ]"#,
    )
    .unwrap();
    let changes = SquashAutodetector::new(ProjectState::new(), state)
        .squash(&loader, None, None, None)
        .unwrap();

    let b = &changes["b"];
    assert_eq!(b.len(), 2);
    assert_eq!(b[0].name, "0002_squashed");
    assert_eq!(b[1].name, "0003_squashed");
    assert!(custom_operations(&b[0]).is_empty());
    assert_eq!(custom_operations(&b[1]), vec!["python:seed"]);
    assert!(b[1].extra_imports.iter().any(|i| i.contains("django.db")));
    assert!(changes["a"].iter().all(|m| custom_operations(m).is_empty()));
}
