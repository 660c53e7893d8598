//! Host facts gathered by the agent itself

use std::collections::BTreeMap;

/// Facts known at startup: host names, agent version and platform
///
/// `fqdn_override` replaces the detected FQDN.
pub fn local_facts(fqdn_override: Option<&str>) -> BTreeMap<String, String> {
    let mut facts = BTreeMap::new();

    let hostname = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty());

    if let Some(hostname) = &hostname {
        let short = hostname.split('.').next().unwrap_or(hostname);
        facts.insert("hostname".to_string(), short.to_string());
    }

    let fqdn = fqdn_override
        .filter(|fqdn| !fqdn.is_empty())
        .map(str::to_string)
        .or(hostname);
    if let Some(fqdn) = fqdn {
        facts.insert("fqdn".to_string(), fqdn);
    }

    facts.insert(
        "agent_version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    facts.insert("os_name".to_string(), std::env::consts::OS.to_string());
    facts.insert("architecture".to_string(), std::env::consts::ARCH.to_string());
    facts
}
