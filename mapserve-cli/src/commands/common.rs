//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mapserve::app::{AppConfig, Collaborators, MapServeApp};
use mapserve::geo::{LatLon, QuadRect};
use mapserve::routing::StraightLineEngine;

use crate::error::CliError;

/// Options every command accepts.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub maps_dir: Option<PathBuf>,
    pub routing_file: Option<PathBuf>,
}

/// Default config file location: `~/.config/mapserve/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mapserve").join("config.ini"))
}

/// Resolve configuration: explicit file > default file > built-in defaults,
/// with command-line overrides applied last.
pub fn read_config(args: &GlobalArgs) -> Result<AppConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => AppConfig::load(&path)?,
            None => AppConfig::default(),
        },
    };

    if let Some(dir) = &args.maps_dir {
        config.maps.dir = dir.clone();
    }
    if let Some(file) = &args.routing_file {
        config.maps.routing_file = Some(file.clone());
    }
    Ok(config)
}

/// Like [`read_config`], but the map directory must exist.
pub fn load_config(args: &GlobalArgs) -> Result<AppConfig, CliError> {
    let config = read_config(args)?;
    if !config.maps.dir.is_dir() {
        return Err(CliError::Config(format!(
            "Map directory {} does not exist. Set dir in [maps] or use --maps-dir.",
            config.maps.dir.display()
        )));
    }
    Ok(config)
}

/// Build the core with the built-in engine, without maintenance tasks.
pub fn build_app(config: AppConfig) -> Result<MapServeApp, CliError> {
    let collaborators = Collaborators::new(Arc::new(StraightLineEngine::new()));
    Ok(MapServeApp::build(config, collaborators)?)
}

/// Parse `lat,lon` into a point.
pub fn parse_point(s: &str) -> Result<LatLon, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {:?}", s))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("invalid latitude {:?}", lat))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("invalid longitude {:?}", lon))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("coordinates out of range: {}", s));
    }
    Ok(LatLon::new(lat, lon))
}

/// Parse `north,west,south,east` into a box.
pub fn parse_bbox(s: &str) -> Result<QuadRect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|_| format!("invalid coordinate {:?}", v)))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        &[north, west, south, east] if north >= south && east >= west => {
            Ok(QuadRect::from_degrees(north, west, south, east))
        }
        &[_, _, _, _] => Err(format!("box must have north >= south and east >= west: {}", s)),
        _ => Err(format!("expected NORTH,WEST,SOUTH,EAST, got {:?}", s)),
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten a path for tables.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let p = parse_point("47.5, 8.25").unwrap();
        assert_eq!(p, LatLon::new(47.5, 8.25));
        assert!(parse_point("47.5").is_err());
        assert!(parse_point("95,8").is_err());
        assert!(parse_point("a,b").is_err());
    }

    #[test]
    fn test_parse_bbox() {
        let quad = parse_bbox("48,8,47,9").unwrap();
        assert_eq!(quad, QuadRect::from_degrees(48.0, 8.0, 47.0, 9.0));
        assert!(parse_bbox("47,8,48,9").is_err());
        assert!(parse_bbox("48,8,47").is_err());
    }

    #[test]
    fn test_load_config_rejects_missing_maps_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let args = GlobalArgs {
            maps_dir: Some(temp.path().join("absent")),
            config: Some(write_empty_config(temp.path())),
            ..Default::default()
        };
        assert!(matches!(load_config(&args), Err(CliError::Config(_))));
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let temp = tempfile::TempDir::new().unwrap();
        let args = GlobalArgs {
            maps_dir: Some(temp.path().to_path_buf()),
            config: Some(write_empty_config(temp.path())),
            routing_file: Some(temp.path().join("world.obf")),
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.maps.dir, temp.path());
        assert_eq!(config.maps.routing_file, Some(temp.path().join("world.obf")));
    }

    fn write_empty_config(dir: &Path) -> PathBuf {
        let path = dir.join("config.ini");
        std::fs::write(&path, "[maps]\n").unwrap();
        path
    }
}
