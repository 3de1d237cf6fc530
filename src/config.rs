//! Configuration loading for cortex.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.cortex/config.toml`)
//! 3. User config (`~/.cortex/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. The engine runs with sensible defaults
//! when no config exists. A loaded [`Config`] is passed by reference into
//! each component constructor; nothing reads configuration globally.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CortexError, Result};

/// Main configuration struct for cortex.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub dedup: DedupConfig,
    pub prune: PruneConfig,
    pub maintenance: MaintenanceConfig,
    pub reflection: ReflectionConfig,
    pub curator: CuratorConfig,
    pub meta: MetaConfig,
    pub exploration: ExplorationConfig,
    pub suggestions: SuggestionsConfig,
    pub diversity: DiversityConfig,
    pub conflicts: ConflictsConfig,
}

// =============================================================================
// Sections
// =============================================================================

/// Knowledge store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Helpful outcomes (with zero harmful) before a quarantined bullet activates.
    pub activation_threshold: u32,
    /// Helpful outcomes (with zero harmful) before an active bullet is copied to shared.
    pub promotion_threshold: u32,
    pub k_left: usize,
    pub k_right: usize,
    pub k_shared: usize,
    /// Confidence floor for shared-pool retrieval.
    pub shared_min_confidence: f64,
    /// Deadline for every embedder and LLM call.
    pub collaborator_timeout_ms: u64,
    /// Storage root override. Defaults to `$CORTEX_HOME/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl MemoryConfig {
    /// Thresholds must be at least 1 or every bullet would activate on creation.
    pub fn is_valid_threshold(value: u32) -> bool {
        value >= 1
    }

    /// Timeouts of zero would fail every collaborator call.
    pub fn is_valid_timeout_ms(value: u64) -> bool {
        value >= 1
    }

    /// Default retrieval size for a pool.
    pub fn k_for(&self, pool: crate::core::Pool) -> usize {
        match pool {
            crate::core::Pool::Left => self.k_left,
            crate::core::Pool::Right => self.k_right,
            crate::core::Pool::Shared => self.k_shared,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 2,
            promotion_threshold: 3,
            k_left: 8,
            k_right: 16,
            k_shared: 5,
            shared_min_confidence: 0.8,
            collaborator_timeout_ms: 10_000,
            data_dir: None,
        }
    }
}

/// Semantic deduplication configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Cosine similarity at or above which two bullets are linked.
    pub threshold: f64,
    pub min_cluster_size: usize,
}

impl DedupConfig {
    /// Check if a similarity threshold is valid (finite, in (0.0, 1.0]).
    pub fn is_valid_threshold(value: f64) -> bool {
        value.is_finite() && value > 0.0 && value <= 1.0
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.90,
            min_cluster_size: 2,
        }
    }
}

/// Valid prune policy names.
pub const VALID_PRUNE_POLICIES: &[&str] = &["aggressive", "balanced", "conservative"];

/// Valid maintenance schedule names.
pub const VALID_SCHEDULES: &[&str] = &["manual", "daily", "weekly", "monthly"];

/// Valid forced-exploration modes.
pub const VALID_EXPLORATION_MODES: &[&str] = &["quota", "stuck", "drift", "hybrid", "interval"];

/// Pruning configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PruneConfig {
    /// "aggressive", "balanced", or "conservative".
    pub policy: String,
    pub max_prune_per_run: usize,
    /// Candidate count above which a real prune must be forced.
    pub confirmation_threshold: usize,
}

impl PruneConfig {
    pub fn is_valid_policy(value: &str) -> bool {
        VALID_PRUNE_POLICIES.contains(&value)
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            policy: "balanced".to_string(),
            max_prune_per_run: 100,
            confirmation_threshold: 50,
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub dedup_schedule: String,
    pub prune_schedule: String,
    pub poll_interval_secs: u64,
}

impl MaintenanceConfig {
    pub fn is_valid_schedule(value: &str) -> bool {
        VALID_SCHEDULES.contains(&value)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_schedule: "daily".to_string(),
            prune_schedule: "weekly".to_string(),
            poll_interval_secs: 3600,
        }
    }
}

/// Reflection depth gating thresholds (tick rate).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionConfig {
    pub deep_threshold: f64,
    pub medium_threshold: f64,
    pub shallow_threshold: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            deep_threshold: 0.8,
            medium_threshold: 0.5,
            shallow_threshold: 0.2,
        }
    }
}

/// Curator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CuratorConfig {
    pub min_confidence: f64,
    pub min_text_len: usize,
    /// Word-Jaccard above which an insight counts as already known.
    pub duplicate_similarity: f64,
    /// Let the classifier pick the pool for new bullets.
    pub auto_assign: bool,
    pub auto_assign_threshold: f64,
    pub review_threshold: f64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_text_len: 10,
            duplicate_similarity: 0.9,
            auto_assign: false,
            auto_assign_threshold: 0.85,
            review_threshold: 0.7,
        }
    }
}

/// Meta-controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetaConfig {
    /// Initial tick interval in seconds.
    pub tick_interval: f64,
    pub adaptive_tick: bool,
    pub min_tick_interval: f64,
    pub max_tick_interval: f64,
    pub entropy_threshold: f64,
    pub conflict_threshold: f64,
    pub novelty_threshold: f64,
    /// EMA decay for the novelty-derived tick rate.
    pub novelty_decay: f64,
    pub history_window_secs: f64,
    pub energy: EnergyConfig,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            tick_interval: 0.5,
            adaptive_tick: true,
            min_tick_interval: 0.1,
            max_tick_interval: 2.0,
            entropy_threshold: 0.6,
            conflict_threshold: 0.5,
            novelty_threshold: 0.7,
            novelty_decay: 0.8,
            history_window_secs: 60.0,
            energy: EnergyConfig::default(),
        }
    }
}

/// Energy budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnergyConfig {
    pub enabled: bool,
    pub max: f64,
    /// Energy regenerated per second.
    pub regen_rate: f64,
    pub cost_explore: f64,
    pub cost_exploit: f64,
    pub cost_integrate: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max: 100.0,
            regen_rate: 10.0,
            cost_explore: 15.0,
            cost_exploit: 5.0,
            cost_integrate: 20.0,
        }
    }
}

/// Forced exploration policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplorationConfig {
    pub enabled: bool,
    /// "quota", "stuck", "drift", "hybrid", or "interval".
    pub mode: String,
    pub window_size: usize,
    pub min_right_fraction: f64,
    pub interval_ticks: u64,
    pub stuck_window: usize,
    pub allow_right_critic_on_high_risk: bool,
    /// Force a right lead even on high-risk tasks.
    pub safe_override: bool,
}

impl ExplorationConfig {
    pub fn is_valid_mode(value: &str) -> bool {
        VALID_EXPLORATION_MODES.contains(&value)
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "quota".to_string(),
            window_size: 50,
            min_right_fraction: 0.25,
            interval_ticks: 20,
            stuck_window: 6,
            allow_right_critic_on_high_risk: true,
            safe_override: false,
        }
    }
}

/// Cross-pool suggestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuggestionsConfig {
    pub enabled: bool,
    /// Helpful outcomes required before a bullet is suggested across.
    pub suggest_threshold: u32,
    pub harmful_tolerance: u32,
    pub min_confidence: f64,
    /// Maximum pending suggestions; 0 means unbounded.
    pub max_pending: usize,
    pub deliver_when_idle: bool,
    pub max_pressure: f64,
    pub deliver_budget: usize,
    /// Days before an undelivered suggestion expires; 0 disables expiry.
    pub expiry_days: u32,
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suggest_threshold: 2,
            harmful_tolerance: 0,
            min_confidence: 0.65,
            max_pending: 0,
            deliver_when_idle: true,
            max_pressure: 0.35,
            deliver_budget: 1,
            expiry_days: 0,
        }
    }
}

/// Pool diversity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiversityConfig {
    pub enabled: bool,
    pub throttle_on_convergence: bool,
    /// Tag divergence below which the pools count as converged.
    pub convergence_warning: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_on_convergence: true,
            convergence_warning: 0.15,
        }
    }
}

/// Contradiction detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConflictsConfig {
    pub enabled: bool,
    pub similarity_threshold: f64,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.88,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Take `other.$field` when it differs from the section default.
macro_rules! merge_fields {
    ($target:expr, $other:expr, $default:expr, [$($field:ident),* $(,)?]) => {
        $(
            if $other.$field != $default.$field {
                $target.$field = $other.$field.clone();
            }
        )*
    };
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Project config (`.cortex/config.toml` in cwd)
    /// 3. User config (`~/.cortex/config.toml`)
    /// 4. Defaults
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    fn load_user_config() -> Option<Config> {
        let home = cortex_home()?;
        Self::load_from_file(&home.join("config.toml")).ok()
    }

    fn load_project_config(cwd: &Path) -> Option<Config> {
        let path = project_config_path(cwd);
        match Self::load_from_file(&path) {
            Ok(config) => Some(config),
            Err(CortexError::Config { message }) => {
                tracing::warn!(path = %path.display(), "ignoring invalid config: {}", message);
                None
            }
            Err(_) => None,
        }
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| CortexError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| CortexError::config(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("CORTEX_PRUNE_POLICY") {
            if PruneConfig::is_valid_policy(&val) {
                self.prune.policy = val;
            } else {
                warn_invalid(
                    "CORTEX_PRUNE_POLICY",
                    &val,
                    &format!("Valid values: {:?}", VALID_PRUNE_POLICIES),
                    &self.prune.policy,
                );
            }
        }

        if let Some(val) = env_var("CORTEX_DEDUP_THRESHOLD") {
            match val.parse::<f64>() {
                Ok(n) if DedupConfig::is_valid_threshold(n) => self.dedup.threshold = n,
                _ => warn_invalid(
                    "CORTEX_DEDUP_THRESHOLD",
                    &val,
                    "Must be a number in (0.0, 1.0]",
                    &self.dedup.threshold.to_string(),
                ),
            }
        }

        if let Some(val) = env_var("CORTEX_ACTIVATION_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) if MemoryConfig::is_valid_threshold(n) => {
                    self.memory.activation_threshold = n
                }
                _ => warn_invalid(
                    "CORTEX_ACTIVATION_THRESHOLD",
                    &val,
                    "Expected an integer >= 1",
                    &self.memory.activation_threshold.to_string(),
                ),
            }
        }

        if let Some(val) = env_var("CORTEX_PROMOTION_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) if MemoryConfig::is_valid_threshold(n) => self.memory.promotion_threshold = n,
                _ => warn_invalid(
                    "CORTEX_PROMOTION_THRESHOLD",
                    &val,
                    "Expected an integer >= 1",
                    &self.memory.promotion_threshold.to_string(),
                ),
            }
        }

        if let Some(val) = env_var("CORTEX_MAINTENANCE_ENABLED") {
            self.maintenance.enabled = parse_bool(&val);
        }

        if let Some(val) = env_var("CORTEX_DEDUP_SCHEDULE") {
            if MaintenanceConfig::is_valid_schedule(&val) {
                self.maintenance.dedup_schedule = val;
            } else {
                warn_invalid(
                    "CORTEX_DEDUP_SCHEDULE",
                    &val,
                    &format!("Valid values: {:?}", VALID_SCHEDULES),
                    &self.maintenance.dedup_schedule,
                );
            }
        }

        if let Some(val) = env_var("CORTEX_PRUNE_SCHEDULE") {
            if MaintenanceConfig::is_valid_schedule(&val) {
                self.maintenance.prune_schedule = val;
            } else {
                warn_invalid(
                    "CORTEX_PRUNE_SCHEDULE",
                    &val,
                    &format!("Valid values: {:?}", VALID_SCHEDULES),
                    &self.maintenance.prune_schedule,
                );
            }
        }

        if let Some(val) = env_var("CORTEX_ENERGY_ENABLED") {
            self.meta.energy.enabled = parse_bool(&val);
        }

        if let Some(val) = env_var("CORTEX_COLLABORATOR_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(n) if MemoryConfig::is_valid_timeout_ms(n) => {
                    self.memory.collaborator_timeout_ms = n
                }
                _ => warn_invalid(
                    "CORTEX_COLLABORATOR_TIMEOUT_MS",
                    &val,
                    "Expected a positive integer",
                    &self.memory.collaborator_timeout_ms.to_string(),
                ),
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// The `other` config takes precedence field by field. A field in `other`
    /// equal to its default never overrides, so a layer cannot reset a value
    /// back to the default set by a lower layer.
    fn merge(mut self, other: Config) -> Self {
        merge_fields!(
            self.memory,
            other.memory,
            MemoryConfig::default(),
            [
                activation_threshold,
                promotion_threshold,
                k_left,
                k_right,
                k_shared,
                shared_min_confidence,
                collaborator_timeout_ms,
                data_dir,
            ]
        );
        merge_fields!(
            self.dedup,
            other.dedup,
            DedupConfig::default(),
            [threshold, min_cluster_size]
        );
        merge_fields!(
            self.prune,
            other.prune,
            PruneConfig::default(),
            [policy, max_prune_per_run, confirmation_threshold]
        );
        merge_fields!(
            self.maintenance,
            other.maintenance,
            MaintenanceConfig::default(),
            [enabled, dedup_schedule, prune_schedule, poll_interval_secs]
        );
        merge_fields!(
            self.reflection,
            other.reflection,
            ReflectionConfig::default(),
            [deep_threshold, medium_threshold, shallow_threshold]
        );
        merge_fields!(
            self.curator,
            other.curator,
            CuratorConfig::default(),
            [
                min_confidence,
                min_text_len,
                duplicate_similarity,
                auto_assign,
                auto_assign_threshold,
                review_threshold,
            ]
        );
        merge_fields!(
            self.meta,
            other.meta,
            MetaConfig::default(),
            [
                tick_interval,
                adaptive_tick,
                min_tick_interval,
                max_tick_interval,
                entropy_threshold,
                conflict_threshold,
                novelty_threshold,
                novelty_decay,
                history_window_secs,
            ]
        );
        merge_fields!(
            self.meta.energy,
            other.meta.energy,
            EnergyConfig::default(),
            [
                enabled,
                max,
                regen_rate,
                cost_explore,
                cost_exploit,
                cost_integrate,
            ]
        );
        merge_fields!(
            self.exploration,
            other.exploration,
            ExplorationConfig::default(),
            [
                enabled,
                mode,
                window_size,
                min_right_fraction,
                interval_ticks,
                stuck_window,
                allow_right_critic_on_high_risk,
                safe_override,
            ]
        );
        merge_fields!(
            self.suggestions,
            other.suggestions,
            SuggestionsConfig::default(),
            [
                enabled,
                suggest_threshold,
                harmful_tolerance,
                min_confidence,
                max_pending,
                deliver_when_idle,
                max_pressure,
                deliver_budget,
                expiry_days,
            ]
        );
        merge_fields!(
            self.diversity,
            other.diversity,
            DiversityConfig::default(),
            [enabled, throttle_on_convergence, convergence_warning]
        );
        merge_fields!(
            self.conflicts,
            other.conflicts,
            ConflictsConfig::default(),
            [enabled, similarity_threshold]
        );

        self
    }

    /// Storage root: `memory.data_dir` if set, else `$CORTEX_HOME/data`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.memory.data_dir {
            return dir.clone();
        }
        cortex_home()
            .unwrap_or_else(fallback_cortex_home)
            .join("data")
    }

    /// Collaborator deadline as a `Duration`.
    pub fn collaborator_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.memory.collaborator_timeout_ms)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CortexError::config(e.to_string()))
    }

    /// Save configuration to the project config file atomically.
    pub fn save_project(&self, cwd: &Path) -> Result<()> {
        let content = self.to_toml()?;
        crate::util::write_atomic(&project_config_path(cwd), content.as_bytes())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

fn warn_invalid(name: &str, value: &str, expected: &str, current: &str) {
    tracing::warn!(
        "Invalid {} value '{}'. {}. Using '{}'.",
        name,
        value,
        expected,
        current
    );
}

// =============================================================================
// Paths
// =============================================================================

/// Get the cortex home directory.
///
/// Checks `CORTEX_HOME` first, then falls back to `~/.cortex`. An empty
/// `CORTEX_HOME` is ignored.
pub fn cortex_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("CORTEX_HOME") {
        if home.is_empty() {
            tracing::warn!("CORTEX_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("CORTEX_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".cortex"));
    }

    let fallback_path = fallback_cortex_home();
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

fn fallback_cortex_home() -> PathBuf {
    env::temp_dir().join("cortex")
}

/// Path of the project config file for a working directory.
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".cortex").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "CORTEX_HOME",
        "CORTEX_PRUNE_POLICY",
        "CORTEX_DEDUP_THRESHOLD",
        "CORTEX_ACTIVATION_THRESHOLD",
        "CORTEX_PROMOTION_THRESHOLD",
        "CORTEX_MAINTENANCE_ENABLED",
        "CORTEX_DEDUP_SCHEDULE",
        "CORTEX_PRUNE_SCHEDULE",
        "CORTEX_ENERGY_ENABLED",
        "CORTEX_COLLABORATOR_TIMEOUT_MS",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.memory.activation_threshold, 2);
        assert_eq!(config.memory.promotion_threshold, 3);
        assert_eq!(config.memory.k_left, 8);
        assert_eq!(config.memory.k_right, 16);
        assert_eq!(config.memory.k_shared, 5);
        assert!((config.dedup.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.prune.policy, "balanced");
        assert_eq!(config.prune.max_prune_per_run, 100);
        assert_eq!(config.prune.confirmation_threshold, 50);
        assert_eq!(config.maintenance.dedup_schedule, "daily");
        assert_eq!(config.maintenance.prune_schedule, "weekly");
        assert!((config.meta.energy.max - 100.0).abs() < f64::EPSILON);
        assert!(!config.exploration.enabled);
        assert_eq!(config.suggestions.max_pending, 0);
        assert!((config.conflicts.similarity_threshold - 0.88).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[prune]
policy = "aggressive"
confirmation_threshold = 10

[meta.energy]
regen_rate = 2.5
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.prune.policy, "aggressive");
        assert_eq!(config.prune.confirmation_threshold, 10);
        assert!((config.meta.energy.regen_rate - 2.5).abs() < f64::EPSILON);
        // Untouched fields keep defaults
        assert_eq!(config.prune.max_prune_per_run, 100);
        assert!((config.meta.energy.cost_explore - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(CortexError::Config { .. })
        ));
    }

    #[test]
    fn test_merge_field_by_field() {
        let mut lower = Config::default();
        lower.memory.k_left = 12;
        lower.dedup.threshold = 0.95;

        let mut upper = Config::default();
        upper.memory.k_right = 4;

        let merged = lower.merge(upper);
        assert_eq!(merged.memory.k_left, 12);
        assert_eq!(merged.memory.k_right, 4);
        assert!((merged.dedup.threshold - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn test_project_config_precedence() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("CORTEX_HOME", home.path());
        fs::write(
            home.path().join("config.toml"),
            "[memory]\nk_left = 20\nk_shared = 9\n",
        )
        .unwrap();

        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join(".cortex")).unwrap();
        fs::write(
            project_config_path(project.path()),
            "[memory]\nk_left = 30\n",
        )
        .unwrap();

        let config = Config::load_from_cwd(project.path());
        assert_eq!(config.memory.k_left, 30);
        assert_eq!(config.memory.k_shared, 9);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("CORTEX_HOME", home.path());
        env::set_var("CORTEX_PRUNE_POLICY", "conservative");
        env::set_var("CORTEX_DEDUP_THRESHOLD", "0.85");
        env::set_var("CORTEX_ACTIVATION_THRESHOLD", "4");
        env::set_var("CORTEX_MAINTENANCE_ENABLED", "false");
        env::set_var("CORTEX_PRUNE_SCHEDULE", "monthly");
        env::set_var("CORTEX_ENERGY_ENABLED", "0");
        env::set_var("CORTEX_COLLABORATOR_TIMEOUT_MS", "250");

        let cwd = TempDir::new().unwrap();
        let config = Config::load_from_cwd(cwd.path());
        assert_eq!(config.prune.policy, "conservative");
        assert!((config.dedup.threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.memory.activation_threshold, 4);
        assert!(!config.maintenance.enabled);
        assert_eq!(config.maintenance.prune_schedule, "monthly");
        assert!(!config.meta.energy.enabled);
        assert_eq!(config.memory.collaborator_timeout_ms, 250);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_ignored() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("CORTEX_HOME", home.path());
        env::set_var("CORTEX_PRUNE_POLICY", "reckless");
        env::set_var("CORTEX_DEDUP_THRESHOLD", "1.5");
        env::set_var("CORTEX_ACTIVATION_THRESHOLD", "0");
        env::set_var("CORTEX_DEDUP_SCHEDULE", "hourly");
        env::set_var("CORTEX_COLLABORATOR_TIMEOUT_MS", "soon");

        let cwd = TempDir::new().unwrap();
        let config = Config::load_from_cwd(cwd.path());
        let defaults = Config::default();
        assert_eq!(config.prune.policy, defaults.prune.policy);
        assert_eq!(config.dedup.threshold, defaults.dedup.threshold);
        assert_eq!(
            config.memory.activation_threshold,
            defaults.memory.activation_threshold
        );
        assert_eq!(
            config.maintenance.dedup_schedule,
            defaults.maintenance.dedup_schedule
        );
        assert_eq!(
            config.memory.collaborator_timeout_ms,
            defaults.memory.collaborator_timeout_ms
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_data_dir_resolution() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("CORTEX_HOME", home.path());

        let config = Config::default();
        assert_eq!(config.data_dir(), home.path().join("data"));

        let mut custom = Config::default();
        custom.memory.data_dir = Some(PathBuf::from("/srv/cortex"));
        assert_eq!(custom.data_dir(), PathBuf::from("/srv/cortex"));

        clear_env();
    }

    #[test]
    fn test_save_project_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.curator.auto_assign = true;
        config.exploration.mode = "hybrid".to_string();
        config.save_project(dir.path()).unwrap();

        let loaded = Config::load_from_file(&project_config_path(dir.path())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validators() {
        assert!(PruneConfig::is_valid_policy("aggressive"));
        assert!(!PruneConfig::is_valid_policy("Aggressive"));
        assert!(MaintenanceConfig::is_valid_schedule("manual"));
        assert!(ExplorationConfig::is_valid_mode("drift"));
        assert!(!DedupConfig::is_valid_threshold(0.0));
        assert!(!DedupConfig::is_valid_threshold(f64::NAN));
        assert!(DedupConfig::is_valid_threshold(1.0));
    }
}
