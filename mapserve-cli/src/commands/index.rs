//! Index cache management CLI commands.
//!
//! - `status`: show cache location, entry count and age
//! - `rebuild`: discard the cache and re-parse every map file
//! - `clear`: delete the cache file

use std::path::PathBuf;

use clap::Subcommand;
use mapserve::map_file::IndexCache;

use super::common::{build_app, load_config, GlobalArgs};
use crate::error::CliError;

/// Index cache subcommands.
#[derive(Debug, Subcommand)]
pub enum IndexAction {
    /// Show index cache status
    Status,
    /// Re-parse every map file and rewrite the cache
    Rebuild,
    /// Delete the index cache file
    Clear,
}

/// Run an index subcommand.
pub fn run(global: &GlobalArgs, action: IndexAction) -> Result<(), CliError> {
    let config = load_config(global)?;
    let path = config
        .maps
        .index_cache
        .clone()
        .ok_or_else(|| CliError::Config("index cache is disabled (index_cache = none)".to_string()))?;

    match action {
        IndexAction::Status => run_status(path),
        IndexAction::Clear => run_clear(path),
        IndexAction::Rebuild => {
            run_clear(path.clone())?;
            let app = build_app(config)?;
            println!("Indexed {} map file(s) into {}", app.catalog().len(), path.display());
            Ok(())
        }
    }
}

fn run_status(path: PathBuf) -> Result<(), CliError> {
    println!("Index cache: {}", path.display());
    if !path.exists() {
        println!("  Status: not created yet");
        return Ok(());
    }
    let cache = IndexCache::load(&path).map_err(|e| CliError::IndexCache(e.to_string()))?;
    println!("  Entries: {}", cache.len());
    println!("  Age:     {}", cache.age_human());
    Ok(())
}

fn run_clear(path: PathBuf) -> Result<(), CliError> {
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CliError::IndexCache(format!("cannot delete {}: {}", path.display(), e))),
    }
}
