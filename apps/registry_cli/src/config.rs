use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::TrackingGranularity;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "registry.toml";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xE3d89649EA5f7Ad20DEef8912e0faD55EE884088";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ledger service base URL. Without one the CLI runs against an in-process ledger.
    pub ledger_url: Option<String>,
    pub contract_address: String,
    pub account: String,
    pub tracking: TrackingGranularity,
    pub poll_interval_ms: u64,
    pub finality_timeout_secs: Option<u64>,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger_url: None,
            contract_address: DEFAULT_CONTRACT_ADDRESS.into(),
            account: "dev-account".into(),
            tracking: TrackingGranularity::default(),
            poll_interval_ms: 1000,
            finality_timeout_secs: None,
            event_capacity: 256,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn finality_timeout(&self) -> Option<Duration> {
        self.finality_timeout_secs.map(Duration::from_secs)
    }
}

/// Reads the settings file (an explicit `path` must exist, the default one
/// may be absent) and applies environment overrides on top.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => read_file(Path::new(DEFAULT_CONFIG_FILE))?,
        None => Settings::default(),
    };
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn read_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    parse_settings(&raw).with_context(|| format!("invalid settings file '{}'", path.display()))
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str(raw)?)
}

/// Plain names first, then `APP__*`, so the prefixed form wins when both are set.
pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("LEDGER_URL") {
        settings.ledger_url = Some(v);
    }
    if let Some(v) = lookup("APP__LEDGER_URL") {
        settings.ledger_url = Some(v);
    }

    if let Some(v) = lookup("REGISTRY_CONTRACT") {
        settings.contract_address = v;
    }
    if let Some(v) = lookup("APP__CONTRACT_ADDRESS") {
        settings.contract_address = v;
    }

    if let Some(v) = lookup("REGISTRY_ACCOUNT") {
        settings.account = v;
    }
    if let Some(v) = lookup("APP__ACCOUNT") {
        settings.account = v;
    }

    if let Some(v) = lookup("APP__TRACKING") {
        settings.tracking = v.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = lookup("APP__POLL_INTERVAL_MS") {
        settings.poll_interval_ms = v
            .trim()
            .parse()
            .with_context(|| format!("APP__POLL_INTERVAL_MS is not a number: '{v}'"))?;
    }
    if let Some(v) = lookup("APP__FINALITY_TIMEOUT_SECS") {
        settings.finality_timeout_secs = Some(
            v.trim()
                .parse()
                .with_context(|| format!("APP__FINALITY_TIMEOUT_SECS is not a number: '{v}'"))?,
        );
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
