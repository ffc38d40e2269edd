//! Runtime configuration: an optional TOML file overlaid by environment
//! variables. Invalid values are construction errors; the simulator fails
//! fast rather than running with a broken clock or port.

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time compression factor. At 60, one wall second is one sim minute.
    pub speed: f64,
    /// RNG seed for a reproducible trace. Unset means a random run.
    pub seed: Option<u64>,
    /// Spontaneous rain events via the Poisson scheduler.
    pub auto_events: bool,
    /// Modbus TCP port. 502 is the registered port but needs privileges;
    /// the default keeps the simulator unprivileged.
    pub modbus_port: u16,
    /// Dashboard HTTP/WebSocket port.
    pub web_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed: 1.0,
            seed: None,
            auto_events: true,
            modbus_port: 5020,
            web_port: 8080,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            bail!("speed must be a positive number, got {}", self.speed);
        }
        Ok(())
    }
}

/// Load the configuration: `RTU_CONFIG` (default `rtu.toml`) if the file
/// exists, then `RTU_SPEED`, `RTU_SEED`, `RTU_AUTO_EVENTS`, `MODBUS_PORT`
/// and `WEB_PORT` overrides, then validation.
pub fn load() -> Result<Config> {
    let path = env::var("RTU_CONFIG").unwrap_or_else(|_| "rtu.toml".to_string());
    let mut config = if Path::new(&path).exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        Config::default()
    };

    apply_env(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn apply_env(config: &mut Config) -> Result<()> {
    if let Ok(raw) = env::var("RTU_SPEED") {
        config.speed = raw
            .parse()
            .with_context(|| format!("invalid RTU_SPEED '{raw}'"))?;
    }
    if let Ok(raw) = env::var("RTU_SEED") {
        config.seed = Some(
            raw.parse()
                .with_context(|| format!("invalid RTU_SEED '{raw}'"))?,
        );
    }
    if let Ok(raw) = env::var("RTU_AUTO_EVENTS") {
        config.auto_events = parse_bool(&raw)
            .with_context(|| format!("invalid RTU_AUTO_EVENTS '{raw}' (use 0/1/true/false)"))?;
    }
    if let Ok(raw) = env::var("MODBUS_PORT") {
        config.modbus_port = raw
            .parse()
            .with_context(|| format!("invalid MODBUS_PORT '{raw}'"))?;
    }
    if let Ok(raw) = env::var("WEB_PORT") {
        config.web_port = raw
            .parse()
            .with_context(|| format!("invalid WEB_PORT '{raw}'"))?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
