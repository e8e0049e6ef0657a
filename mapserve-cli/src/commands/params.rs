//! Params command - show how a parameter string is resolved.

use mapserve::routing::RouteRequestParameters;

use super::common::{read_config, GlobalArgs};
use crate::error::CliError;

/// Run the params command.
pub fn run(global: &GlobalArgs, input: &str) -> Result<(), CliError> {
    let config = read_config(global)?;
    let params = RouteRequestParameters::parse(input, &config.providers)?;

    println!("Profile:        {}", params.profile);
    println!("Router profile: {}", params.router_profile);
    match &params.provider {
        Some(provider) => println!("Online:         {} ({})", provider.name, provider.url),
        None => println!("Online:         no"),
    }
    println!("Routing:        {}", params.routing);
    println!(
        "Approximation:  {:?} ({:?})",
        params.approximation.kind, params.approximation.engine
    );
    if let Some(mode) = params.calc_mode {
        println!("Calc mode:      {:?}", mode);
    }
    if let Some(heading) = params.heading {
        println!("Heading:        {:.0}", heading);
    }
    if let Some(at) = params.calc_time {
        println!("Calc time:      {}", at.to_rfc3339());
    }
    if !params.impassable.is_empty() {
        let ids: Vec<String> = params.impassable.iter().map(u64::to_string).collect();
        println!("Avoid:          {}", ids.join(";"));
    }
    println!("Router params:  {}", params.canonical_params());
    println!("Context cache:  {}", if params.cache_eligible() { "eligible" } else { "bypassed" });
    Ok(())
}
