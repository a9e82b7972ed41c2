use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidEnvVar(String, String),

    #[error("Failed to read file: {0}")]
    FileReadError(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Environment variable naming a YAML configuration file
pub const CONFIG_FILE_ENV: &str = "MIRROR_CONFIG_FILE";

/// Per-house engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseConfig {
    /// Monthly points owed by each fully active resident
    #[serde(default = "default_points_per_resident")]
    pub points_per_resident: f64,
    /// Multiplier applied to the monthly point budget
    #[serde(default = "default_inflation_factor")]
    pub inflation_factor: f64,
    /// Extra divisor applied to the valuation interval scalar
    #[serde(default = "default_valuation_denominator")]
    pub valuation_denominator: f64,
    /// Hours credited by the first valuation update of a house
    #[serde(default = "default_bootstrap_hours")]
    pub bootstrap_hours: i64,
    /// Duration of a claim poll, in seconds
    #[serde(default = "default_poll_secs")]
    pub claim_poll_secs: i64,
    /// Yes votes needed to uphold a claim
    #[serde(default = "default_claim_min_votes")]
    pub claim_min_votes: u32,
    /// Duration of a proposal poll, in seconds
    #[serde(default = "default_poll_secs")]
    pub proposal_poll_secs: i64,
    /// Share of active residents whose yes votes a proposal needs
    #[serde(default = "default_proposal_min_pct")]
    pub proposal_min_pct: f64,
    /// Points of shortfall per penalty step
    #[serde(default = "default_penalty_increment")]
    pub penalty_increment: f64,
    /// Hearts deducted per full penalty step
    #[serde(default = "default_penalty_step_hearts")]
    pub penalty_step_hearts: f64,
    /// Delay after the start of a month before the previous month is assessed, in seconds
    #[serde(default = "default_penalty_delay_secs")]
    pub penalty_delay_secs: i64,
    /// Hearts granted when a resident is first initialised
    #[serde(default = "default_initial_hearts")]
    pub initial_hearts: f64,
    /// Weight each resident gives both directions of a pair they have no preference on
    #[serde(default = "default_ranking_implicit_pref")]
    pub ranking_implicit_pref: f64,
    #[serde(default = "default_ranking_damping")]
    pub ranking_damping: f64,
    /// L2 distance between iterations below which the ranking is final
    #[serde(default = "default_ranking_epsilon")]
    pub ranking_epsilon: f64,
    #[serde(default = "default_ranking_max_iterations")]
    pub ranking_max_iterations: usize,
    /// Secret mixed into anonymized voter ids
    #[serde(default)]
    pub vote_salt: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_points_per_resident() -> f64 {
    100.0
}

fn default_inflation_factor() -> f64 {
    1.0
}

fn default_valuation_denominator() -> f64 {
    1.0
}

fn default_bootstrap_hours() -> i64 {
    72
}

fn default_poll_secs() -> i64 {
    48 * 60 * 60
}

fn default_claim_min_votes() -> u32 {
    2
}

fn default_proposal_min_pct() -> f64 {
    0.4
}

fn default_penalty_increment() -> f64 {
    10.0
}

fn default_penalty_step_hearts() -> f64 {
    0.5
}

fn default_penalty_delay_secs() -> i64 {
    72 * 60 * 60
}

fn default_initial_hearts() -> f64 {
    5.0
}

fn default_ranking_implicit_pref() -> f64 {
    0.05
}

fn default_ranking_damping() -> f64 {
    0.99
}

fn default_ranking_epsilon() -> f64 {
    0.001
}

fn default_ranking_max_iterations() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            points_per_resident: default_points_per_resident(),
            inflation_factor: default_inflation_factor(),
            valuation_denominator: default_valuation_denominator(),
            bootstrap_hours: default_bootstrap_hours(),
            claim_poll_secs: default_poll_secs(),
            claim_min_votes: default_claim_min_votes(),
            proposal_poll_secs: default_poll_secs(),
            proposal_min_pct: default_proposal_min_pct(),
            penalty_increment: default_penalty_increment(),
            penalty_step_hearts: default_penalty_step_hearts(),
            penalty_delay_secs: default_penalty_delay_secs(),
            initial_hearts: default_initial_hearts(),
            ranking_implicit_pref: default_ranking_implicit_pref(),
            ranking_damping: default_ranking_damping(),
            ranking_epsilon: default_ranking_epsilon(),
            ranking_max_iterations: default_ranking_max_iterations(),
            vote_salt: String::new(),
            log_level: default_log_level(),
        }
    }
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(name.to_string(), e.to_string()))?;
    }
    Ok(())
}

impl HouseConfig {
    /// Load configuration from the environment
    ///
    /// Starts from the file named by `MIRROR_CONFIG_FILE` when set (defaults
    /// otherwise), then applies `MIRROR_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: HouseConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MIRROR_*` overrides read through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        parse_override(&lookup, "MIRROR_POINTS_PER_RESIDENT", &mut self.points_per_resident)?;
        parse_override(&lookup, "MIRROR_INFLATION_FACTOR", &mut self.inflation_factor)?;
        parse_override(&lookup, "MIRROR_VALUATION_DENOMINATOR", &mut self.valuation_denominator)?;
        parse_override(&lookup, "MIRROR_BOOTSTRAP_HOURS", &mut self.bootstrap_hours)?;
        parse_override(&lookup, "MIRROR_CLAIM_POLL_SECS", &mut self.claim_poll_secs)?;
        parse_override(&lookup, "MIRROR_CLAIM_MIN_VOTES", &mut self.claim_min_votes)?;
        parse_override(&lookup, "MIRROR_PROPOSAL_POLL_SECS", &mut self.proposal_poll_secs)?;
        parse_override(&lookup, "MIRROR_PROPOSAL_MIN_PCT", &mut self.proposal_min_pct)?;
        parse_override(&lookup, "MIRROR_PENALTY_INCREMENT", &mut self.penalty_increment)?;
        parse_override(&lookup, "MIRROR_PENALTY_STEP_HEARTS", &mut self.penalty_step_hearts)?;
        parse_override(&lookup, "MIRROR_PENALTY_DELAY_SECS", &mut self.penalty_delay_secs)?;
        parse_override(&lookup, "MIRROR_INITIAL_HEARTS", &mut self.initial_hearts)?;
        parse_override(&lookup, "MIRROR_RANKING_IMPLICIT_PREF", &mut self.ranking_implicit_pref)?;
        parse_override(&lookup, "MIRROR_RANKING_DAMPING", &mut self.ranking_damping)?;
        parse_override(&lookup, "MIRROR_RANKING_EPSILON", &mut self.ranking_epsilon)?;
        parse_override(&lookup, "MIRROR_RANKING_MAX_ITERATIONS", &mut self.ranking_max_iterations)?;
        if let Some(salt) = lookup("MIRROR_VOTE_SALT") {
            self.vote_salt = salt;
        }
        if let Some(level) = lookup("MIRROR_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Reject configurations the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(self.points_per_resident >= 0.0) {
            return invalid("points_per_resident must be non-negative");
        }
        if !(self.inflation_factor >= 0.0) {
            return invalid("inflation_factor must be non-negative");
        }
        if !(self.valuation_denominator > 0.0) {
            return invalid("valuation_denominator must be positive");
        }
        if self.bootstrap_hours < 0 {
            return invalid("bootstrap_hours must be non-negative");
        }
        if self.claim_poll_secs <= 0 || self.proposal_poll_secs <= 0 {
            return invalid("poll durations must be positive");
        }
        if !(self.proposal_min_pct > 0.0 && self.proposal_min_pct <= 1.0) {
            return invalid("proposal_min_pct must be in (0, 1]");
        }
        if !(self.penalty_increment > 0.0) {
            return invalid("penalty_increment must be positive");
        }
        if self.penalty_delay_secs < 0 {
            return invalid("penalty_delay_secs must be non-negative");
        }
        if !(self.ranking_implicit_pref >= 0.0) {
            return invalid("ranking_implicit_pref must be non-negative");
        }
        if !(self.ranking_damping > 0.0 && self.ranking_damping <= 1.0) {
            return invalid("ranking_damping must be in (0, 1]");
        }
        if !(self.ranking_epsilon > 0.0) || self.ranking_max_iterations == 0 {
            return invalid("ranking convergence bounds must be positive");
        }
        if self.vote_salt.is_empty() {
            warn!("vote_salt is empty; voter hashes are unsalted");
        }
        Ok(())
    }
}
