//! The `django-squash` binary.

use std::process::ExitCode;

use django_squash_cli::{register_builtin_commands, CommandRegistry};
use django_squash_core::logging::setup_logging;
use django_squash_core::settings_loader::{from_env, from_file_with_env};
use django_squash_core::{Settings, SquashError, SETTINGS};

#[tokio::main]
async fn main() -> ExitCode {
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry);
    let matches = registry.build_cli().get_matches();

    match run(&registry, &matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(registry: &CommandRegistry, matches: &clap::ArgMatches) -> Result<(), SquashError> {
    let settings = load_settings(matches.get_one::<String>("settings"))?;
    setup_logging(&settings);
    SETTINGS.configure(settings);
    let settings = SETTINGS.get();
    tracing::debug!(
        migrations_dir = %settings.migrations_dir.display(),
        apps = ?settings.installed_apps,
        "settings loaded"
    );
    registry.execute(matches, settings).await
}

fn load_settings(path: Option<&String>) -> Result<Settings, SquashError> {
    match path {
        Some(path) => from_file_with_env(path),
        None => Ok(from_env()),
    }
}
