use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

/// Name of the dotenv file for an environment: `.env`, or `.env.{ENV}`.
fn env_file_name(env: Option<&str>) -> String {
    match env {
        Some(env) => format!(".env.{}", env),
        None => ".env".to_string(),
    }
}

/// Load a dotenv file from the current directory or the closest ancestor
/// that has one.
///
/// A missing `.env` is fine, since settings can come from the real
/// environment. A missing `.env.{ENV}` is an error because it was asked for
/// explicitly.
pub fn load_dotenv(env: Option<&str>) -> Result<Option<PathBuf>> {
    let file_name = env_file_name(env);
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    for dir in cwd.ancestors() {
        let env_path = dir.join(&file_name);
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
            debug!(path = %env_path.display(), "Loaded environment file");
            return Ok(Some(env_path));
        }
    }

    if env.is_some() {
        anyhow::bail!(
            "No {} file found.\n\nSearched from {} to filesystem root.",
            file_name,
            cwd.display()
        );
    }
    Ok(None)
}
