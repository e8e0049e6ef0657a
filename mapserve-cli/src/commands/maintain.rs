//! Maintain command - keep the core loaded and run maintenance until Ctrl+C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mapserve::app::{Collaborators, MapServeApp};
use mapserve::routing::StraightLineEngine;
use tracing::info;

use super::common::{load_config, GlobalArgs};
use crate::error::CliError;

/// Run the maintain command.
pub fn run(global: &GlobalArgs, status_interval: Duration) -> Result<(), CliError> {
    let config = load_config(global)?;

    println!("MapServe v{}", env!("CARGO_PKG_VERSION"));
    println!("================================");
    println!();
    println!("Maps:         {}", config.maps.dir.display());
    match &config.maps.routing_file {
        Some(file) => println!("Routing file: {}", file.display()),
        None => println!("Routing file: none (context cache disabled)"),
    }
    match &config.maps.update_dir {
        Some(dir) => println!("Updates:      {}", dir.display()),
        None => println!("Updates:      disabled"),
    }
    println!("Providers:    {}", config.providers.len());
    println!();

    let app = MapServeApp::start_sync(config, Collaborators::new(Arc::new(StraightLineEngine::new())))?;
    println!("Loaded {} map file(s)", app.catalog().len());
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mut last_status = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));

        if last_status.elapsed() >= status_interval {
            let snapshot = app.metrics();
            println!(
                "Readers: {} open | Contexts: {} live (peak {}) | Routes: {} ok, {} incomplete",
                snapshot.readers_open(),
                snapshot.contexts_live,
                snapshot.contexts_peak,
                snapshot.routes_completed,
                snapshot.routes_incomplete
            );
            last_status = Instant::now();
        }
    }

    let snapshot = app.metrics();
    app.shutdown();
    info!("Maintain command finished");

    println!();
    println!("Session Summary");
    println!("───────────────");
    println!(
        "  Reader leases:   {} ({} timed out)",
        snapshot.leases_acquired, snapshot.lease_timeouts
    );
    println!(
        "  Contexts built:  {} ({} evicted, {} reused)",
        snapshot.contexts_built, snapshot.contexts_evicted, snapshot.contexts_reused
    );
    println!(
        "  Online requests: {} ({} failed)",
        snapshot.online_requests, snapshot.online_failures
    );
    Ok(())
}
