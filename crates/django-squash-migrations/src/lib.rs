//! # django-squash-migrations
//!
//! Migration model and squashing engine for django-squash. Loads an app's
//! migration history, recomputes the schema from scratch, and writes
//! replacement migrations that keep the raw Python and raw SQL operations of
//! the history they replace.
//!
//! ## Architecture
//!
//! - [`Migration`] is a named set of [`Operation`]s belonging to an app.
//! - [`MigrationGraph`] resolves dependency ordering across apps.
//! - [`MigrationLoader`] discovers migration history on disk.
//! - [`MigrationAutodetector`] diffs two [`ProjectState`]s to produce operations.
//! - [`SquashAutodetector`] turns the diff into replacement migrations.
//! - [`MigrationWriter`] renders a migration as Python source.
//!
//! ## Module Overview
//!
//! - [`fields`] - field types, relation targets, indexes, literal values
//! - [`migration`] - `Migration`, `MigrationKey`, `MigrationGraph`
//! - [`operations`] - schema and raw code operations
//! - [`classify`] - finding raw operations inside operation lists
//! - [`autodetect`] - `MigrationAutodetector`, `ProjectState`, `ModelState`
//! - [`loader`] - `MigrationLoader` for filesystem discovery
//! - [`source`] - imports and functions in Python migration sources
//! - [`serializer`] - JSON history documents and Python literals
//! - [`writer`] - `MigrationWriter`, `OperationWriter`
//! - [`squash`] - `SquashAutodetector`

// Clippy overrides appropriate for a code generation crate.
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cognitive_complexity)]

pub mod autodetect;
pub mod classify;
pub mod fields;
pub mod loader;
pub mod migration;
pub mod operations;
pub mod serializer;
pub mod source;
pub mod squash;
pub mod writer;

// Re-export key types at the crate root.
pub use autodetect::{MigrationAutodetector, MigrationFieldDef, ModelOptions, ModelState, ProjectState};
pub use classify::all_custom_operations;
pub use loader::{LoadedMigration, MigrationLoader};
pub use migration::{Dependency, Migration, MigrationGraph, MigrationKey};
pub use operations::{Operation, PythonCallable, RunPython, RunSql, SeparateDatabaseAndState};
pub use serializer::SerializableMigration;
pub use squash::{dangling_references, SquashAutodetector};
pub use writer::{MigrationWriter, RenderedMigration};
