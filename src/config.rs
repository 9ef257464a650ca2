use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::aggregation::{AggregationParams, BPS, WEIGHT_UNIT, WeightPolicy};
use crate::error::OracleError;
use crate::registry::{Identity, Role};

/// Process configuration for the oracle service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Privileged identity and committee seeding
    pub admin: AdminConfig,
    /// Per-role minimum stakes
    pub registry: RegistryConfig,
    /// Protocol defaults snapshotted into every new request
    pub protocol: ProtocolDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Enable request/response span logging
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Identity allowed to change defaults and settle explicitly
    pub admin_identity: Identity,
    /// Fixed selection seed (hex, 32 bytes). Entropy-backed when unset.
    pub selection_seed: Option<String>,
}

/// Minimum stake per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub min_stake_proposer: u128,
    pub min_stake_observer: u128,
    pub min_stake_auditor: u128,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_stake_proposer: WEIGHT_UNIT / 2,
            min_stake_observer: WEIGHT_UNIT,
            min_stake_auditor: WEIGHT_UNIT,
        }
    }
}

impl RegistryConfig {
    pub fn min_stake(&self, role: Role) -> u128 {
        match role {
            Role::Proposer => self.min_stake_proposer,
            Role::Observer => self.min_stake_observer,
            Role::Auditor => self.min_stake_auditor,
        }
    }

    pub fn set_min_stake(&mut self, role: Role, amount: u128) {
        match role {
            Role::Proposer => self.min_stake_proposer = amount,
            Role::Observer => self.min_stake_observer = amount,
            Role::Auditor => self.min_stake_auditor = amount,
        }
    }
}

/// Process-wide protocol defaults, changeable by the admin identity.
///
/// Ratios are in basis points (`_x10000`) and `lambda_x100` is the MAD
/// multiplier scaled by 100. Windows are optional; without one the
/// corresponding step is gated on the creator or on completion only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDefaults {
    pub k_observers: usize,
    pub max_observers: usize,
    pub lambda_x100: u64,
    pub audit_threshold_x10000: u64,
    pub use_weights: bool,
    pub weight_base: u128,
    pub weight_rep_coeff: u128,
    pub auditor_count: usize,
    pub supermajority_x10000: u64,
    pub audit_quorum_x10000: u64,
    pub commit_window_secs: Option<u64>,
    pub reveal_window_secs: Option<u64>,
    pub audit_window_secs: Option<u64>,
}

impl Default for ProtocolDefaults {
    fn default() -> Self {
        Self {
            k_observers: 3,
            max_observers: 10,
            lambda_x100: 250,
            audit_threshold_x10000: 3000,
            use_weights: false,
            weight_base: WEIGHT_UNIT,
            weight_rep_coeff: WEIGHT_UNIT,
            auditor_count: 3,
            supermajority_x10000: 6666,
            audit_quorum_x10000: 5000,
            commit_window_secs: None,
            reveal_window_secs: None,
            audit_window_secs: None,
        }
    }
}

/// Per-request overrides of a subset of the defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    pub k_observers: Option<usize>,
    pub lambda_x100: Option<u64>,
    pub audit_threshold_x10000: Option<u64>,
    pub use_weights: Option<bool>,
    pub weight_base: Option<u128>,
    pub weight_rep_coeff: Option<u128>,
}

/// Immutable parameter snapshot carried by one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub k_observers: usize,
    pub lambda_x100: u64,
    pub audit_threshold_x10000: u64,
    pub use_weights: bool,
    pub weight_base: u128,
    pub weight_rep_coeff: u128,
    pub auditor_count: usize,
    pub supermajority_x10000: u64,
    pub audit_quorum_x10000: u64,
    pub commit_window_secs: Option<u64>,
    pub reveal_window_secs: Option<u64>,
    pub audit_window_secs: Option<u64>,
}

impl ResolvedParams {
    pub fn aggregation(&self) -> AggregationParams {
        AggregationParams {
            lambda_x100: self.lambda_x100,
            weights: WeightPolicy {
                use_weights: self.use_weights,
                base: self.weight_base,
                rep_coeff: self.weight_rep_coeff,
            },
        }
    }
}

impl ProtocolDefaults {
    pub fn validate(&self) -> std::result::Result<(), OracleError> {
        if self.k_observers == 0 {
            return Err(OracleError::InvalidParams("k_observers must be at least 1".into()));
        }
        if self.max_observers == 0 {
            return Err(OracleError::InvalidParams("max_observers must be at least 1".into()));
        }
        if self.auditor_count == 0 {
            return Err(OracleError::InvalidParams("auditor_count must be at least 1".into()));
        }
        if self.audit_threshold_x10000 > BPS {
            return Err(OracleError::InvalidParams(format!(
                "audit_threshold_x10000 {} exceeds {}",
                self.audit_threshold_x10000, BPS
            )));
        }
        // At or below one half a split vote could satisfy both outcomes
        if self.supermajority_x10000 <= BPS / 2 || self.supermajority_x10000 > BPS {
            return Err(OracleError::InvalidParams(format!(
                "supermajority_x10000 {} must be in ({}, {}]",
                self.supermajority_x10000,
                BPS / 2,
                BPS
            )));
        }
        if self.audit_quorum_x10000 > BPS {
            return Err(OracleError::InvalidParams(format!(
                "audit_quorum_x10000 {} exceeds {}",
                self.audit_quorum_x10000, BPS
            )));
        }
        if self.use_weights && self.weight_base == 0 {
            return Err(OracleError::InvalidParams(
                "weight_base must be non-zero when weights are enabled".into(),
            ));
        }
        for (name, window) in [
            ("commit_window_secs", self.commit_window_secs),
            ("reveal_window_secs", self.reveal_window_secs),
            ("audit_window_secs", self.audit_window_secs),
        ] {
            if window == Some(0) {
                return Err(OracleError::InvalidParams(format!("{name} must be non-zero when set")));
            }
        }
        Ok(())
    }

    /// Apply `overrides` on top of these defaults. `k_observers` is capped
    /// by `max_observers`.
    pub fn resolve(
        &self,
        overrides: &RequestParams,
    ) -> std::result::Result<ResolvedParams, OracleError> {
        let k_observers = overrides.k_observers.unwrap_or(self.k_observers);
        if k_observers == 0 {
            return Err(OracleError::InvalidParams("k_observers must be at least 1".into()));
        }
        let audit_threshold_x10000 = overrides
            .audit_threshold_x10000
            .unwrap_or(self.audit_threshold_x10000);
        if audit_threshold_x10000 > BPS {
            return Err(OracleError::InvalidParams(format!(
                "audit_threshold_x10000 {audit_threshold_x10000} exceeds {BPS}"
            )));
        }
        let use_weights = overrides.use_weights.unwrap_or(self.use_weights);
        let weight_base = overrides.weight_base.unwrap_or(self.weight_base);
        if use_weights && weight_base == 0 {
            return Err(OracleError::InvalidParams(
                "weight_base must be non-zero when weights are enabled".into(),
            ));
        }

        Ok(ResolvedParams {
            k_observers: k_observers.min(self.max_observers),
            lambda_x100: overrides.lambda_x100.unwrap_or(self.lambda_x100),
            audit_threshold_x10000,
            use_weights,
            weight_base,
            weight_rep_coeff: overrides.weight_rep_coeff.unwrap_or(self.weight_rep_coeff),
            auditor_count: self.auditor_count,
            supermajority_x10000: self.supermajority_x10000,
            audit_quorum_x10000: self.audit_quorum_x10000,
            commit_window_secs: self.commit_window_secs,
            reveal_window_secs: self.reveal_window_secs,
            audit_window_secs: self.audit_window_secs,
        })
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
            admin: AdminConfig {
                admin_identity: Identity::ZERO, // MUST be configured
                selection_seed: None,
            },
            registry: RegistryConfig::default(),
            protocol: ProtocolDefaults::default(),
        }
    }
}

/// Parse `name` into `target` if the variable is set
fn override_from_env<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(name) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name} value"))?;
    }
    Ok(())
}

/// Like [`override_from_env`] for optional settings; an empty value clears it
fn optional_from_env<T>(name: &str, target: &mut Option<T>) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(name) {
        let raw = raw.trim();
        *target = if raw.is_empty() {
            None
        } else {
            Some(raw.parse().with_context(|| format!("Invalid {name} value"))?)
        };
    }
    Ok(())
}

impl OracleConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server configuration
        if let Ok(host) = env::var("ORACLE_HOST") {
            config.server.host = host;
        }
        override_from_env("ORACLE_PORT", &mut config.server.port)?;

        // Logging configuration
        if let Ok(level) = env::var("ORACLE_LOG_LEVEL") {
            config.logging.level = level;
        }
        override_from_env("ORACLE_LOG_REQUESTS", &mut config.logging.log_requests)?;

        // Admin configuration
        let admin = env::var("ORACLE_ADMIN_IDENTITY")
            .context("ORACLE_ADMIN_IDENTITY environment variable is required")?;
        config.admin.admin_identity = admin
            .trim()
            .parse()
            .context("Invalid ORACLE_ADMIN_IDENTITY value")?;

        if let Ok(seed) = env::var("ORACLE_SELECTION_SEED") {
            warn!("ORACLE_SELECTION_SEED is set, committee selection is replayable");
            config.admin.selection_seed = Some(seed);
        }

        // Registry configuration
        override_from_env("ORACLE_MIN_STAKE_PROPOSER", &mut config.registry.min_stake_proposer)?;
        override_from_env("ORACLE_MIN_STAKE_OBSERVER", &mut config.registry.min_stake_observer)?;
        override_from_env("ORACLE_MIN_STAKE_AUDITOR", &mut config.registry.min_stake_auditor)?;

        // Protocol defaults
        let protocol = &mut config.protocol;
        override_from_env("ORACLE_K_OBSERVERS", &mut protocol.k_observers)?;
        override_from_env("ORACLE_MAX_OBSERVERS", &mut protocol.max_observers)?;
        override_from_env("ORACLE_LAMBDA_X100", &mut protocol.lambda_x100)?;
        override_from_env("ORACLE_AUDIT_THRESHOLD_X10000", &mut protocol.audit_threshold_x10000)?;
        override_from_env("ORACLE_USE_WEIGHTS", &mut protocol.use_weights)?;
        override_from_env("ORACLE_WEIGHT_BASE", &mut protocol.weight_base)?;
        override_from_env("ORACLE_WEIGHT_REP_COEFF", &mut protocol.weight_rep_coeff)?;
        override_from_env("ORACLE_AUDITOR_COUNT", &mut protocol.auditor_count)?;
        override_from_env("ORACLE_SUPERMAJORITY_X10000", &mut protocol.supermajority_x10000)?;
        override_from_env("ORACLE_AUDIT_QUORUM_X10000", &mut protocol.audit_quorum_x10000)?;
        optional_from_env("ORACLE_COMMIT_WINDOW_SECS", &mut protocol.commit_window_secs)?;
        optional_from_env("ORACLE_REVEAL_WINDOW_SECS", &mut protocol.reveal_window_secs)?;
        optional_from_env("ORACLE_AUDIT_WINDOW_SECS", &mut protocol.audit_window_secs)?;

        config.validate()?;

        info!(
            admin = %config.admin.admin_identity,
            k_observers = config.protocol.k_observers,
            auditor_count = config.protocol.auditor_count,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.admin.admin_identity == Identity::ZERO {
            return Err(anyhow::anyhow!("Admin identity must not be the zero identity"));
        }

        if self.admin.selection_seed.is_some() {
            self.selection_seed()?;
        }

        self.protocol
            .validate()
            .context("Invalid protocol defaults")?;

        Ok(())
    }

    /// Decoded fixed selection seed, if one is configured
    pub fn selection_seed(&self) -> Result<Option<[u8; 32]>> {
        let Some(raw) = &self.admin.selection_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(raw.trim_start_matches("0x")).context("Selection seed is not hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Selection seed must be exactly 32 bytes"))?;
        Ok(Some(seed))
    }
}
