//! Files command - list the map catalog.

use mapserve::geo::QuadRect;

use super::common::{build_app, display_name, load_config, GlobalArgs};
use crate::error::CliError;

/// Run the files command.
pub fn run(global: &GlobalArgs, query: Option<QuadRect>) -> Result<(), CliError> {
    let config = load_config(global)?;
    let maps_dir = config.maps.dir.clone();
    let app = build_app(config)?;

    let mut files = match query {
        Some(quad) => app.catalog().resolve_files(&quad, None),
        None => app.catalog().files(),
    };
    files.sort_by(|a, b| a.path().cmp(b.path()));

    println!("Map directory: {}", maps_dir.display());
    println!();
    println!("{:<32} {:>10} {:>10}  Bounds", "File", "Version", "Regions");
    for handle in &files {
        let index = handle.file_index();
        let bounds = index
            .bounds()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:>10} {:>10}  {}",
            display_name(handle.path()),
            index.version,
            index.subregion_count(),
            bounds
        );
    }
    println!();
    println!("{} file(s)", files.len());
    Ok(())
}
