//! Configuration loading from TOML with environment variable overrides.
//!
//! Precedence, lowest first: built-in defaults, `config.toml`, command-line
//! flags (`-a`, `-d`, `-r`, `-s`), then `RUN_ADDRESS`, `DATABASE_URI`,
//! `ACCRUAL_SYSTEM_ADDRESS` and `ACCRUAL_SCAN_INTERVAL` from the
//! environment. The result is immutable and handed to components at
//! construction.

use anyhow::{bail, Context, Result};
use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::accrual::RetryPolicy;
use crate::engine::reconciler::ReconcilerSettings;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_RUN_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_DATABASE_URI: &str = "sqlite://loyalty.db";
const DEFAULT_ACCRUAL_ADDRESS: &str = "http://127.0.0.1:8081";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub accrual: AccrualConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub run_address: String,
    /// Deadline for a single inbound request.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            run_address: DEFAULT_RUN_ADDRESS.to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// May embed credentials; kept out of Debug output.
    pub uri: SecretString,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: SecretString::new(DEFAULT_DATABASE_URI.to_string()),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AccrualConfig {
    /// Oracle base address, e.g. `http://localhost:8081`.
    pub base_url: String,
    pub scan_interval_ms: u64,
    /// Deadline for one reconciliation cycle, independent of the interval.
    pub cycle_timeout_ms: u64,
    /// Deadline for a single oracle HTTP call.
    pub request_timeout_ms: u64,
    /// Attempts per order per cycle when the oracle answers 429.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long shutdown waits for an in-flight cycle.
    pub shutdown_grace_ms: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ACCRUAL_ADDRESS.to_string(),
            scan_interval_ms: 150,
            cycle_timeout_ms: 4_000,
            request_timeout_ms: 2_000,
            max_attempts: 2,
            backoff_ms: 500,
            max_backoff_ms: 5_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl AccrualConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            cycle_timeout: Duration::from_millis(self.cycle_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Purchase-loyalty backend", long_about = None)]
pub struct CliArgs {
    /// Path to the TOML config file (optional)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// HTTP listen address
    #[arg(short = 'a', long)]
    pub run_address: Option<String>,

    /// Database URI
    #[arg(short = 'd', long)]
    pub database_uri: Option<String>,

    /// Accrual oracle address
    #[arg(short = 'r', long)]
    pub accrual_address: Option<String>,

    /// Accrual scan interval, e.g. `150ms` or `1m30s`
    #[arg(short = 's', long)]
    pub scan_interval: Option<String>,
}

impl CliArgs {
    /// Flag value under its environment variable name, so flags and the
    /// environment share `AppConfig::apply_overrides`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "RUN_ADDRESS" => self.run_address.clone(),
            "DATABASE_URI" => self.database_uri.clone(),
            "ACCRUAL_SYSTEM_ADDRESS" => self.accrual_address.clone(),
            "ACCRUAL_SCAN_INTERVAL" => self.scan_interval.clone(),
            _ => None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Build the effective configuration from flags and the process
    /// environment.
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        Self::resolve_with(args, |key| std::env::var(key).ok())
    }

    /// Load `args.config` if it exists (defaults otherwise), apply flag
    /// then `env` overrides and validate.
    pub fn resolve_with<F>(args: &CliArgs, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = if Path::new(&args.config).exists() {
            Self::load(&args.config)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| args.lookup(key))
            .context("Invalid command-line flag")?;
        cfg.apply_overrides(env)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (flags or the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("RUN_ADDRESS") {
            self.server.run_address = addr;
        }
        if let Some(uri) = lookup("DATABASE_URI") {
            self.database.uri = SecretString::new(uri);
        }
        if let Some(addr) = lookup("ACCRUAL_SYSTEM_ADDRESS") {
            self.accrual.base_url = addr;
        }
        if let Some(raw) = lookup("ACCRUAL_SCAN_INTERVAL") {
            let interval = parse_duration(&raw)
                .with_context(|| format!("Invalid ACCRUAL_SCAN_INTERVAL: {raw}"))?;
            self.accrual.scan_interval_ms = interval.as_millis() as u64;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.accrual.base_url.trim().is_empty() {
            bail!("accrual.base_url must not be empty");
        }
        if self.accrual.scan_interval_ms == 0 {
            bail!("accrual.scan_interval_ms must be positive");
        }
        if self.accrual.cycle_timeout_ms == 0 {
            bail!("accrual.cycle_timeout_ms must be positive");
        }
        if self.accrual.request_timeout_ms == 0 {
            bail!("accrual.request_timeout_ms must be positive");
        }
        if self.accrual.max_attempts == 0 {
            bail!("accrual.max_attempts must be at least 1");
        }
        if self.server.request_timeout_ms == 0 {
            bail!("server.request_timeout_ms must be positive");
        }
        if self.database.uri.expose_secret().is_empty() {
            bail!("database.uri must not be empty");
        }
        Ok(())
    }
}

/// Parse a Go-style duration (`150ms`, `1.5s`, `1m30s`, `500us`) or a bare
/// millisecond count. Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(split);

        let value: f64 = number
            .parse()
            .with_context(|| format!("not a duration: {raw:?}"))?;
        let unit_nanos = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            other => bail!("unknown duration unit {other:?} in {raw:?}"),
        };
        total = total.saturating_add(Duration::from_nanos((value * unit_nanos).round() as u64));
        rest = next;
    }
    Ok(total)
}
