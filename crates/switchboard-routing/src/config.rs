//! Engine configuration: strategy selection, heuristics, resource limits and storage.

use crate::catalog::{ModelDescriptor, default_models};
use crate::error::{Result, RoutingError};
use crate::router::StrategyKind;
use core::fmt::Display;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_HEADER: &str = "\
# switchboard engine configuration
# Written with defaults on first run. Sections: routing, adaptive, resources,
# chain, ensemble, ledger, backend, complexity and catalog.
# Missing keys fall back to their defaults.

";

fn file_error(action: &str, path: &Path, error: impl Display) -> RoutingError {
    RoutingError::Config(format!("cannot {action} {}: {error}", path.display()))
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Strategy selection
    pub routing: RoutingSettings,
    /// Adaptive strategy thresholds
    pub adaptive: AdaptiveConfig,
    /// Resource limits for the constraint enforcer
    pub resources: ResourceConfig,
    /// Chain executor settings
    pub chain: ChainConfig,
    /// Ensemble executor settings
    pub ensemble: EnsembleConfig,
    /// Performance ledger settings
    pub ledger: LedgerConfig,
    /// Inference backend connection
    pub backend: BackendConfig,
    /// Complexity scoring weights
    pub complexity: ComplexityWeights,
    /// Models the router may choose from
    pub catalog: Vec<ModelDescriptor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingSettings::default(),
            adaptive: AdaptiveConfig::default(),
            resources: ResourceConfig::default(),
            chain: ChainConfig::default(),
            ensemble: EnsembleConfig::default(),
            ledger: LedgerConfig::default(),
            backend: BackendConfig::default(),
            complexity: ComplexityWeights::default(),
            catalog: default_models(),
        }
    }
}

/// Strategy selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Strategies that may be selected; the highest priority one wins
    pub enabled_strategies: Vec<StrategyKind>,
    /// Time budget for each ledger or learning-collaborator call
    pub collaborator_timeout_ms: u64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            enabled_strategies: vec![StrategyKind::Adaptive],
            collaborator_timeout_ms: 250,
        }
    }
}

/// Thresholds and slopes used by the adaptive and workflow strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Below this much free RAM the small model is forced
    pub ram_floor_mb: u64,
    /// Above this CPU utilization the small model is forced
    pub cpu_ceiling_percent: f64,
    /// Theme suggestions are used only above this confidence
    pub theme_confidence_threshold: f64,
    /// Tuned parameters are used only above this confidence
    pub tuner_confidence_threshold: f64,
    /// Score removed from the small model per unit of complexity (0-1)
    pub small_model_penalty: f64,
    /// Score added to the large model per unit of complexity (0-1)
    pub large_model_bonus: f64,
    /// Complexity (0-1) at which both model scores are unadjusted
    pub complexity_pivot: f64,
    /// Score added to the theme-suggested model
    pub theme_boost: f64,
    /// Rated decisions needed before ledger data drives ensemble weights
    pub min_ledger_samples: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            ram_floor_mb: 8_000,
            cpu_ceiling_percent: 80.0,
            theme_confidence_threshold: 0.7,
            tuner_confidence_threshold: 0.7,
            small_model_penalty: 0.4,
            large_model_bonus: 0.3,
            complexity_pivot: 0.5,
            theme_boost: 0.15,
            min_ledger_samples: 5,
        }
    }
}

/// Resource limits applied to every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Below this much free RAM the model is forced to a RAM tier
    pub ram_ceiling_mb: u64,
    /// Below this the smallest tier is used
    pub low_ram_mb: u64,
    /// Below this the mid Q4 tier is used, otherwise mid Q5
    pub mid_ram_mb: u64,
    /// Token cap applied with a RAM downgrade
    pub ram_token_cap: u32,
    /// Models wanting more GPU layers than this are replaced
    pub max_gpu_layers: u32,
    /// CPU utilization that triggers throttling
    pub cpu_ceiling_percent: f64,
    /// Token multiplier under CPU pressure
    pub cpu_token_factor: f64,
    /// Temperature cap under CPU pressure
    pub cpu_temperature_cap: f64,
    /// Temperature in Celsius that triggers thermal throttling
    pub thermal_threshold_celsius: f64,
    /// Battery level below which power saving applies
    pub battery_floor_percent: f64,
    /// Token cap applied on low battery
    pub battery_token_cap: u32,
    /// Optional response time budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_time_ms: Option<u64>,
    /// Whether a GPU is usable, reported by the system monitor
    pub gpu_available: bool,
    /// Usable GPU layers, reported by the system monitor
    pub gpu_layers: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ram_ceiling_mb: 16_000,
            low_ram_mb: 6_000,
            mid_ram_mb: 12_000,
            ram_token_cap: 4_000,
            max_gpu_layers: 48,
            cpu_ceiling_percent: 85.0,
            cpu_token_factor: 0.7,
            cpu_temperature_cap: 0.2,
            thermal_threshold_celsius: 80.0,
            battery_floor_percent: 20.0,
            battery_token_cap: 2_000,
            max_response_time_ms: None,
            gpu_available: false,
            gpu_layers: 0,
        }
    }
}

/// Chain executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Cumulative tokens after which the chain stops
    pub token_ceiling: u64,
    /// Steps reporting less confidence stop the chain
    pub min_step_confidence: f64,
    /// Confidence assumed when a step reports none
    pub default_confidence: f64,
    /// Tokens charged for a failed step
    pub failed_step_tokens: u64,
    /// Per-step time budget
    pub step_timeout_ms: u64,
    /// Earlier steps above this confidence are kept by the vote merge
    pub vote_confidence: f64,
    /// Characters kept from each earlier step in the vote merge
    pub vote_excerpt_chars: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 12_000,
            min_step_confidence: 0.3,
            default_confidence: 0.7,
            failed_step_tokens: 50,
            step_timeout_ms: 120_000,
            vote_confidence: 0.6,
            vote_excerpt_chars: 400,
        }
    }
}

/// Ensemble executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Models per ensemble
    pub max_models: usize,
    /// Default consensus threshold for new plans
    pub consensus_threshold: f64,
    /// Per-model time budget; late members are excluded from voting
    pub member_timeout_ms: u64,
    /// Token budget per member
    pub member_max_tokens: u32,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_models: 3,
            consensus_threshold: 0.6,
            member_timeout_ms: 120_000,
            member_max_tokens: 1_024,
        }
    }
}

/// Performance ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Record directory; defaults to `~/.switchboard/ledger`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Write decisions through the background queue
    pub background: bool,
    /// Attempts per queued write
    pub max_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            directory: None,
            background: false,
            max_retries: 3,
        }
    }
}

impl LedgerConfig {
    /// Directory used for record files.
    ///
    /// # Errors
    /// Returns an error if no directory is configured and the home directory cannot be determined
    pub fn resolve_directory(&self) -> Result<PathBuf> {
        match &self.directory {
            Some(directory) => Ok(directory.clone()),
            None => Ok(EngineConfig::config_dir()?.join("ledger")),
        }
    }
}

/// Inference backend connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Ollama base URL
    pub url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_owned(),
            request_timeout_secs: 300,
        }
    }
}

/// Weights of the heuristic complexity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub code_block: f64,
    pub code_line: f64,
    pub code_line_cap: f64,
    pub keyword: f64,
    pub keyword_cap: f64,
    pub async_depth: f64,
    pub cyclomatic: f64,
    pub cyclomatic_cap: f64,
    pub declaration: f64,
    pub declaration_cap: f64,
    /// Points per hundred characters of input
    pub length: f64,
    pub length_cap: f64,
    pub cross_domain: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            code_block: 5.0,
            code_line: 0.5,
            code_line_cap: 20.0,
            keyword: 3.0,
            keyword_cap: 24.0,
            async_depth: 5.0,
            cyclomatic: 1.0,
            cyclomatic_cap: 15.0,
            declaration: 2.0,
            declaration_cap: 15.0,
            length: 1.0,
            length_cap: 10.0,
            cross_domain: 15.0,
        }
    }
}

impl EngineConfig {
    /// Get the default config directory path (`~/.switchboard`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        use dirs::home_dir;
        let home = home_dir()
            .ok_or_else(|| RoutingError::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".switchboard"))
    }

    /// Get the default config file path (`~/.switchboard/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from `~/.switchboard/config.toml`, writing the defaults there on first run
    ///
    /// # Errors
    /// Returns an error if the home directory is unknown or the file cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path()?)
    }

    /// Load config from `path`, writing the defaults there if the file does not exist yet
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, validated or created
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents, path),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to_file(path)?;
                info!(path = %path.display(), "wrote default config");
                Ok(config)
            }
            Err(error) => Err(file_error("read", path, error)),
        }
    }

    /// Load and validate config from an existing file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|error| file_error("read", path, error))?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|error| file_error("parse", origin, error))?;
        config.validate()?;
        Ok(config)
    }

    /// Write config to `path` under an explanatory header, creating parent directories
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| file_error("create directory for", path, error))?;
        }
        let body = toml::to_string_pretty(self).map_err(|error| file_error("serialize", path, error))?;
        fs::write(path, format!("{CONFIG_HEADER}{body}")).map_err(|error| file_error("write", path, error))
    }

    /// Checks cross-field invariants that serde cannot express.
    ///
    /// # Errors
    /// Returns an error describing the first violated invariant
    pub fn validate(&self) -> Result<()> {
        if self.catalog.is_empty() {
            return Err(RoutingError::EmptyCatalog);
        }
        if self.routing.enabled_strategies.is_empty() {
            return Err(RoutingError::Config(
                "routing.enabled_strategies must name at least one strategy".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ensemble.consensus_threshold) {
            return Err(RoutingError::Config(format!(
                "ensemble.consensus_threshold must be within 0..=1, got {}",
                self.ensemble.consensus_threshold
            )));
        }
        if self.ensemble.max_models == 0 {
            return Err(RoutingError::Config("ensemble.max_models must be positive".to_owned()));
        }
        Ok(())
    }
}
