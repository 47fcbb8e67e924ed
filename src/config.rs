// Gateway configuration
// Layering: built-in defaults < gateway.toml (or --config) < GATEWAY_* environment

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::identifiers::{AccountId, LocId};
use crate::ledger::{LocKind, LocRecord, LocState};

pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";
pub const ENV_PREFIX: &str = "GATEWAY_";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub submission_timeout_ms: u64,
    /// Bound on opening a websocket connection to a ledger node
    pub connect_timeout_ms: u64,
    pub log_level: String,
    pub cors: bool,
    pub dev_ledger: DevLedgerConfig,
}

/// In-process ledger double. When enabled, `serve` routes the listed
/// endpoints to it instead of connecting to real nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevLedgerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub locs: Vec<SeedLoc>,
}

fn default_endpoints() -> Vec<String> {
    vec!["ws://localhost:9944".to_string()]
}

impl Default for DevLedgerConfig {
    fn default() -> Self {
        DevLedgerConfig {
            enabled: false,
            endpoints: default_endpoints(),
            locs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedLoc {
    pub id: String,
    pub owner: String,
    pub requester: Option<String>,
    pub kind: LocKind,
    pub state: LocState,
}

impl SeedLoc {
    pub fn to_record(&self) -> Result<LocRecord, figment::Error> {
        let parse_account = |field: &str, value: &str| {
            value
                .parse::<AccountId>()
                .map_err(|e| figment::Error::from(format!("dev_ledger.locs.{field}: {e}")))
        };
        Ok(LocRecord {
            id: self
                .id
                .parse::<LocId>()
                .map_err(|e| figment::Error::from(format!("dev_ledger.locs.id: {e}")))?,
            owner: parse_account("owner", &self.owner)?,
            requester: self
                .requester
                .as_deref()
                .map(|r| parse_account("requester", r))
                .transpose()?,
            kind: self.kind,
            state: self.state,
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            submission_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            log_level: "info".to_string(),
            cors: true,
            dev_ledger: DevLedgerConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), figment::Error> {
        if self.submission_timeout_ms == 0 {
            return Err(figment::Error::from("submission_timeout_ms must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(figment::Error::from("connect_timeout_ms must be greater than 0"));
        }
        if self.host.trim().is_empty() {
            return Err(figment::Error::from("host cannot be empty"));
        }
        if self.dev_ledger.enabled && self.dev_ledger.endpoints.is_empty() {
            return Err(figment::Error::from("dev_ledger.endpoints cannot be empty"));
        }
        for loc in &self.dev_ledger.locs {
            loc.to_record()?;
        }
        Ok(())
    }
}

/// Build the provider chain; `path` overrides the default config file
pub fn figment(path: Option<&Path>) -> Figment {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(GatewayConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, figment::Error> {
    let config: GatewayConfig = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}
