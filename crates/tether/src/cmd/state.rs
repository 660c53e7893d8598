//! State command - Show the persisted registration state
//!
//! Reads the identity cache from the state file without contacting the
//! platform.
//!
//! # Usage
//!
//! ```bash
//! tether state
//! tether state --json
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tether_config::Config;
use tether_core::IdentityCache;

/// State command arguments
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StateArgs, config: &Config) -> Result<()> {
    println!("{}", render(&config.agent.state_file, args.json)?);
    Ok(())
}

fn render(state_file: &Path, as_json: bool) -> Result<String> {
    let cache = IdentityCache::open(state_file)
        .with_context(|| format!("failed to read state file {}", state_file.display()))?;
    let agent_id = cache.agent_id();
    let stats = cache.stats();

    if as_json {
        let value = json!({
            "state_file": state_file.display().to_string(),
            "agent_id": agent_id,
            "metrics": {
                "resolved": stats.resolved,
                "unresolved": stats.unresolved,
                "deleted": stats.deleted,
            },
            "services": stats.services,
            "containers": stats.containers,
            "thresholds": stats.thresholds,
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let lines = [
        format!("State file:  {}", state_file.display()),
        format!(
            "Agent:       {}",
            agent_id.as_deref().unwrap_or("(not registered)")
        ),
        format!(
            "Metrics:     {} registered, {} pending, {} deleted",
            stats.resolved, stats.unresolved, stats.deleted
        ),
        format!("Services:    {}", stats.services),
        format!("Containers:  {}", stats.containers),
        format!("Thresholds:  {}", stats.thresholds),
    ];
    Ok(lines.join("\n"))
}
