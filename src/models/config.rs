use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AppError;

/// Exchange precision for one symbol. Set per context before a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InstrumentConfig {
    /// Minimum price movement (e.g. 0.01 for BTCUSDT)
    pub price_step: f64,
    /// Minimum quantity increment (e.g. 0.001 for BTCUSDT)
    pub qty_step: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            price_step: 0.01,
            qty_step: 0.001,
        }
    }
}

impl InstrumentConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.price_step > 0.0) || !(self.qty_step > 0.0) {
            return Err(AppError::InvalidConfig(format!(
                "price_step and qty_step must be positive (got {} / {})",
                self.price_step, self.qty_step
            )));
        }
        Ok(())
    }
}

/// Supported kline intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    /// Returns the duration in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::M1 => 1,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H2 => 120,
            Interval::H4 => 240,
            Interval::D1 => 1440,
        }
    }

    pub fn millis(&self) -> i64 {
        self.minutes() as i64 * 60_000
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" | "60" => Ok(Interval::H1),
            "2h" | "120" => Ok(Interval::H2),
            "4h" | "240" => Ok(Interval::H4),
            "1d" | "d" => Ok(Interval::D1),
            _ => Err(AppError::InvalidConfig(format!("Unknown interval: {}", s))),
        }
    }
}

/// Read `key` from the environment and parse it. Malformed values are logged and ignored.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Some(v) = env_parse(key) {
        *target = v;
    }
}

/// Walk-forward window lengths, in bars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkForwardConfig {
    pub train_len: usize,
    pub validation_len: usize,
    pub step: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_len: 1500,
            validation_len: 500,
            step: 500,
        }
    }
}

impl WalkForwardConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env_override("WFO_TRAIN_LEN", &mut cfg.train_len);
        env_override("WFO_VALIDATION_LEN", &mut cfg.validation_len);
        env_override("WFO_STEP", &mut cfg.step);
        cfg
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.train_len == 0 || self.validation_len == 0 || self.step == 0 {
            return Err(AppError::InvalidConfig(
                "walk-forward train_len, validation_len and step must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the genetic optimizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    /// Hard cap on generations.
    pub max_iterations: usize,
    /// Explicit population size. When `None` the size is derived from the
    /// number of optimized parameters and clamped to the bounds below.
    pub population_size: Option<usize>,
    pub min_population_size: usize,
    pub max_population_size: usize,
    pub tournament_size: usize,
    /// Probability that the fittest tournament member wins.
    pub tournament_win_probability: f64,
    pub crossover_rate: f64,
    pub base_mutation_rate: f64,
    pub max_mutation_rate: f64,
    pub elite_ratio: f64,
    /// Per-generation probability of a catastrophic culling event.
    pub catastrophe_probability: f64,
    pub train_weight: f64,
    pub validation_weight: f64,
    pub stability_weight: f64,
    /// Train/validation ratio above which a candidate is penalized.
    pub overfitting_threshold: f64,
    pub overfitting_penalty: f64,
    /// Max spread of best fitness over `convergence_window` generations.
    pub convergence_threshold: f64,
    pub convergence_window: usize,
    /// Consecutive converged generations required before stopping.
    pub patience: usize,
    pub min_generations: usize,
    /// Independent runs per context.
    pub runs: usize,
    /// Completed ledgers with fewer deals score `-inf`.
    pub min_deals: usize,
    /// Base RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            population_size: None,
            min_population_size: 20,
            max_population_size: 100,
            tournament_size: 3,
            tournament_win_probability: 0.8,
            crossover_rate: 0.9,
            base_mutation_rate: 0.1,
            max_mutation_rate: 0.5,
            elite_ratio: 0.1,
            catastrophe_probability: 0.005,
            train_weight: 0.3,
            validation_weight: 0.7,
            stability_weight: 0.5,
            overfitting_threshold: 1.2,
            overfitting_penalty: 0.5,
            convergence_threshold: 1e-3,
            convergence_window: 10,
            patience: 5,
            min_generations: 20,
            runs: 1,
            min_deals: 1,
            seed: None,
        }
    }
}

impl OptimizerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env_override("WFO_MAX_ITERATIONS", &mut cfg.max_iterations);
        if let Some(size) = env_parse("WFO_POPULATION_SIZE") {
            cfg.population_size = Some(size);
        }
        env_override("WFO_MIN_POPULATION_SIZE", &mut cfg.min_population_size);
        env_override("WFO_MAX_POPULATION_SIZE", &mut cfg.max_population_size);
        env_override("WFO_TOURNAMENT_SIZE", &mut cfg.tournament_size);
        env_override("WFO_TOURNAMENT_WIN_PROBABILITY", &mut cfg.tournament_win_probability);
        env_override("WFO_CROSSOVER_RATE", &mut cfg.crossover_rate);
        env_override("WFO_BASE_MUTATION_RATE", &mut cfg.base_mutation_rate);
        env_override("WFO_MAX_MUTATION_RATE", &mut cfg.max_mutation_rate);
        env_override("WFO_ELITE_RATIO", &mut cfg.elite_ratio);
        env_override("WFO_CATASTROPHE_PROBABILITY", &mut cfg.catastrophe_probability);
        env_override("WFO_TRAIN_WEIGHT", &mut cfg.train_weight);
        env_override("WFO_VALIDATION_WEIGHT", &mut cfg.validation_weight);
        env_override("WFO_STABILITY_WEIGHT", &mut cfg.stability_weight);
        env_override("WFO_OVERFITTING_THRESHOLD", &mut cfg.overfitting_threshold);
        env_override("WFO_OVERFITTING_PENALTY", &mut cfg.overfitting_penalty);
        env_override("WFO_CONVERGENCE_THRESHOLD", &mut cfg.convergence_threshold);
        env_override("WFO_CONVERGENCE_WINDOW", &mut cfg.convergence_window);
        env_override("WFO_PATIENCE", &mut cfg.patience);
        env_override("WFO_MIN_GENERATIONS", &mut cfg.min_generations);
        env_override("WFO_RUNS", &mut cfg.runs);
        env_override("WFO_MIN_DEALS", &mut cfg.min_deals);
        if let Some(seed) = env_parse("WFO_SEED") {
            cfg.seed = Some(seed);
        }
        cfg
    }

    /// Population size for a search over `num_params` optimized parameters.
    pub fn effective_population_size(&self, num_params: usize) -> usize {
        match self.population_size {
            Some(size) => size.max(1),
            None => (num_params * 10).clamp(self.min_population_size, self.max_population_size),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let unit = |name: &str, v: f64| -> Result<(), AppError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(AppError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };
        unit("tournament_win_probability", self.tournament_win_probability)?;
        unit("crossover_rate", self.crossover_rate)?;
        unit("base_mutation_rate", self.base_mutation_rate)?;
        unit("max_mutation_rate", self.max_mutation_rate)?;
        unit("elite_ratio", self.elite_ratio)?;
        unit("catastrophe_probability", self.catastrophe_probability)?;

        if self.max_iterations == 0 {
            return Err(AppError::InvalidConfig("max_iterations must be > 0".into()));
        }
        if self.tournament_size == 0 {
            return Err(AppError::InvalidConfig("tournament_size must be > 0".into()));
        }
        if self.min_population_size > self.max_population_size {
            return Err(AppError::InvalidConfig(format!(
                "min_population_size {} exceeds max_population_size {}",
                self.min_population_size, self.max_population_size
            )));
        }
        if self.base_mutation_rate > self.max_mutation_rate {
            return Err(AppError::InvalidConfig(
                "base_mutation_rate exceeds max_mutation_rate".into(),
            ));
        }
        if self.convergence_window < 2 {
            return Err(AppError::InvalidConfig(
                "convergence_window must be at least 2".into(),
            ));
        }
        if self.runs == 0 {
            return Err(AppError::InvalidConfig("runs must be > 0".into()));
        }
        Ok(())
    }
}

/// Configuration for the context fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Worker threads. `None` uses the number of available CPUs.
    pub workers: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { workers: None }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let workers = env_parse("WFO_WORKERS").filter(|&w: &usize| w > 0);
        Self { workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
