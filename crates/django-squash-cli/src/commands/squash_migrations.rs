//! The `squash_migrations` management command.
//!
//! Replaces the migration history of the selected apps with freshly computed
//! migrations. Raw Python and raw SQL operations from the old history are
//! carried into the new files, together with their functions and imports.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use django_squash_core::apps::AppRegistry;
use django_squash_core::logging::app_span;
use django_squash_core::{Settings, SquashError, SquashResult};
use django_squash_migrations::serializer::{history_file_path, migration_file_path};
use django_squash_migrations::{
    dangling_references, Migration, MigrationLoader, MigrationWriter, ProjectState,
    SerializableMigration, SquashAutodetector,
};

use crate::command::ManagementCommand;

/// Squashes the migrations of one or more apps.
pub struct SquashMigrationsCommand;

/// Parsed arguments of `squash_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashOptions {
    /// Apps to squash; empty means every app with changes.
    pub app_labels: Vec<String>,
    /// Suffix of the new migration names, overriding the configured one.
    pub name: Option<String>,
    /// Report what would be written without touching the filesystem.
    pub dry_run: bool,
    /// Start each file with a "Generated by" comment.
    pub include_header: bool,
    /// 0 is silent, 1 lists files and operations, 3 also prints file contents.
    pub verbosity: u8,
}

impl Default for SquashOptions {
    fn default() -> Self {
        Self {
            app_labels: Vec::new(),
            name: None,
            dry_run: false,
            include_header: false,
            verbosity: 1,
        }
    }
}

impl SquashOptions {
    /// Reads the options from parsed command-line arguments.
    pub fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            app_labels: matches
                .get_many::<String>("app_label")
                .map_or_else(Vec::new, |labels| labels.cloned().collect()),
            name: matches.get_one::<String>("name").cloned(),
            dry_run: matches.get_flag("dry-run"),
            include_header: matches.get_flag("include-header"),
            verbosity: matches.get_one::<u8>("verbosity").copied().unwrap_or(1),
        }
    }
}

#[async_trait]
impl ManagementCommand for SquashMigrationsCommand {
    fn name(&self) -> &'static str {
        "squash_migrations"
    }

    fn help(&self) -> &'static str {
        "Squash the migrations of the given apps into new replacement migrations"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("app_label")
                .help("App label(s) to squash; all apps when omitted")
                .num_args(0..)
                .required(false),
        )
        .arg(
            clap::Arg::new("name")
                .long("name")
                .help("Use this suffix for the new migration names"),
        )
        .arg(
            clap::Arg::new("dry-run")
                .long("dry-run")
                .action(clap::ArgAction::SetTrue)
                .help("Just show what migrations would be made; don't actually write them"),
        )
        .arg(
            clap::Arg::new("include-header")
                .long("include-header")
                .action(clap::ArgAction::SetTrue)
                .help("Add a header comment to the new migration files"),
        )
        .arg(
            clap::Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .value_parser(clap::value_parser!(u8).range(0..=3))
                .default_value("1")
                .help("Verbosity level; 0=minimal, 1=normal, 3=show file contents"),
        )
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> SquashResult<()> {
        let options = SquashOptions::from_matches(matches);
        let stdout = std::io::stdout();
        squash_migrations(&options, settings, &mut stdout.lock())?;
        Ok(())
    }
}

/// Runs a squash, writing progress to `out`.
///
/// Returns the paths of the migration files written (none on a dry run).
///
/// # Errors
///
/// - [`SquashError::UnknownApps`] if a requested label is not installed.
/// - [`SquashError::NothingToSquash`] if no existing migration would be replaced.
/// - Loader, state and IO errors as they occur.
pub fn squash_migrations(
    options: &SquashOptions,
    settings: &Settings,
    out: &mut dyn Write,
) -> SquashResult<Vec<PathBuf>> {
    if !options.app_labels.is_empty() {
        let registry = AppRegistry::from_installed_apps(&settings.installed_apps)?;
        let unknown = registry.unknown_labels(&options.app_labels);
        if !unknown.is_empty() {
            return Err(SquashError::UnknownApps(
                unknown.into_iter().map(String::from).collect(),
            ));
        }
    }

    let mut loader = MigrationLoader::new(&settings.migrations_dir);
    loader.load()?;

    let state = match &settings.state_file {
        Some(path) => ProjectState::from_json_file(path)?,
        None => ProjectState::from_history(&loader)?,
    };

    let scope = if options.app_labels.is_empty() {
        None
    } else {
        Some(options.app_labels.as_slice())
    };
    let name = options.name.as_deref().unwrap_or(&settings.squash_name);
    let changes =
        SquashAutodetector::new(ProjectState::new(), state).squash(&loader, scope, scope, Some(name))?;

    let replaced: usize = changes.values().flatten().map(|m| m.replaces.len()).sum();
    if replaced == 0 {
        return Err(SquashError::NothingToSquash);
    }

    for (dependent, target) in dangling_references(loader.graph(), &changes) {
        tracing::warn!(
            migration = %dependent,
            replaced = %target,
            "migration outside the squash depends on a replaced migration"
        );
    }

    write_migration_files(
        &changes,
        &settings.migrations_dir,
        options,
        options.include_header || settings.include_header,
        out,
    )
}

/// A rendered migration waiting to be written.
struct PendingFile {
    path: PathBuf,
    text: String,
    history_path: PathBuf,
    history: String,
}

/// Renders and serializes every migration, then writes them.
///
/// Nothing is written until all of them have rendered, and app packages are
/// created before the first migration file.
fn write_migration_files(
    changes: &BTreeMap<String, Vec<Migration>>,
    migrations_dir: &Path,
    options: &SquashOptions,
    include_header: bool,
    out: &mut dyn Write,
) -> SquashResult<Vec<PathBuf>> {
    let mut pending = Vec::new();

    for (app_label, migrations) in changes {
        let span = app_span(app_label);
        let _guard = span.enter();

        if options.verbosity >= 1 {
            writeln!(out, "Migrations for '{app_label}':")?;
        }

        for migration in migrations {
            let rendered = MigrationWriter::new(migration, include_header).render();
            let path = migration_file_path(migrations_dir, app_label, &migration.name);

            if options.verbosity >= 1 {
                writeln!(out, "  {}", path.display())?;
                for op in &migration.operations {
                    writeln!(out, "    - {}", op.describe())?;
                }
            }
            if rendered.needs_manual_porting() {
                tracing::warn!(
                    migration = %migration.key(),
                    modules = ?rendered.manual_porting,
                    "functions need manual porting"
                );
            }

            if options.dry_run {
                if options.verbosity >= 3 {
                    writeln!(out, "Full migrations file '{}.py':", migration.name)?;
                    write!(out, "{}", rendered.text)?;
                }
                continue;
            }

            pending.push(PendingFile {
                path,
                text: rendered.text,
                history_path: history_file_path(migrations_dir, app_label, &migration.name),
                history: SerializableMigration::from_migration(migration).to_json()?,
            });
        }
    }

    if options.dry_run {
        return Ok(Vec::new());
    }

    for app_label in changes.keys() {
        ensure_package(&migrations_dir.join(app_label))?;
    }

    let mut written = Vec::with_capacity(pending.len());
    for file in pending {
        std::fs::write(&file.path, &file.text)?;
        std::fs::write(&file.history_path, &file.history)?;
        tracing::info!(path = %file.path.display(), "wrote migration");
        written.push(file.path);
    }

    Ok(written)
}

/// Creates `dir` and an empty `__init__.py` inside it if missing.
fn ensure_package(dir: &Path) -> SquashResult<()> {
    std::fs::create_dir_all(dir)?;
    let init = dir.join("__init__.py");
    if !init.exists() {
        std::fs::write(&init, "")?;
    }
    Ok(())
}
