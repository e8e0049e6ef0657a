//! Modes command - list routing profiles and their parameters.

use super::common::{build_app, load_config, print_json, GlobalArgs};
use crate::error::CliError;

/// Run the modes command.
pub fn run(global: &GlobalArgs, json: bool) -> Result<(), CliError> {
    let app = build_app(load_config(global)?)?;
    let modes = app.orchestrator().routing_modes();
    if json {
        return print_json(&modes);
    }

    for mode in &modes {
        let kind = if mode.online { "online" } else { "local" };
        println!("{} ({}, profile {})", mode.key, kind, mode.profile);
        for param in &mode.params {
            let dev = if param.dev { " [dev]" } else { "" };
            if param.values.is_empty() {
                println!("  {:<22} default {}{}", param.key, param.default, dev);
            } else {
                println!(
                    "  {:<22} default {} of {}{}",
                    param.key,
                    param.default,
                    param.values.join("|"),
                    dev
                );
            }
        }
    }
    Ok(())
}
