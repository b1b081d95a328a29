use std::time::Instant;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::config::{InstrumentConfig, OptimizerConfig, WalkForwardConfig};
use crate::models::kline::{validate_klines, Kline};
use crate::models::params::{ParameterSchema, ParameterSet};
use crate::models::result::OptimizationOutcome;

use super::evaluator::FitnessEvaluator;
use super::executor::full_schema;
use super::genetic::{adaptive_mutation_rate, GeneSpace, Genome, Population};
use super::strategy::Strategy;
use super::walk_forward::{self, Window};

/// Per-window scores of one genome and the fitness derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeScore {
    pub fitness: f64,
    pub train: Vec<f64>,
    pub validation: Vec<f64>,
}

impl GenomeScore {
    /// `1 / (1 + std(train) + std(validation))`, or 0 when undefined.
    pub fn stability(&self) -> f64 {
        let spread = self.train.iter().population_std_dev()
            + self.validation.iter().population_std_dev();
        let stability = 1.0 / (1.0 + spread);
        if stability.is_finite() {
            stability
        } else {
            0.0
        }
    }
}

/// Combine per-window train and validation scores into one fitness value.
///
/// Each window contributes `train_weight * train + validation_weight * validation`;
/// the fitness is the mean of those minus `stability_weight` times their
/// standard deviation. A non-positive train or validation average rejects the
/// candidate, and a train/validation ratio above the overfitting threshold is
/// penalized in proportion to the excess.
pub fn walk_forward_fitness(config: &OptimizerConfig, train: &[f64], validation: &[f64]) -> f64 {
    if train.is_empty() || train.len() != validation.len() {
        return f64::NEG_INFINITY;
    }
    let train_avg = train.iter().mean();
    let validation_avg = validation.iter().mean();
    if !(train_avg > 0.0) || !(validation_avg > 0.0) {
        return f64::NEG_INFINITY;
    }

    let combined: Vec<f64> = train
        .iter()
        .zip(validation)
        .map(|(t, v)| config.train_weight * t + config.validation_weight * v)
        .collect();
    let mut fitness =
        combined.iter().mean() - config.stability_weight * combined.iter().population_std_dev();

    if train_avg / validation_avg > config.overfitting_threshold {
        fitness -= config.overfitting_penalty
            * (train_avg - config.overfitting_threshold * validation_avg);
    }

    if fitness.is_finite() {
        fitness
    } else {
        f64::NEG_INFINITY
    }
}

/// Stops the search once the best fitness has stayed within `threshold` over
/// the last `window` generations for `patience` consecutive generations.
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    window: usize,
    threshold: f64,
    patience: usize,
    min_generations: usize,
    history: Vec<f64>,
    streak: usize,
}

impl ConvergenceTracker {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            window: config.convergence_window.max(2),
            threshold: config.convergence_threshold,
            patience: config.patience.max(1),
            min_generations: config.min_generations,
            history: Vec::new(),
            streak: 0,
        }
    }

    /// Record the best fitness of a finished generation. Returns true when the
    /// search should stop.
    pub fn observe(&mut self, best: f64) -> bool {
        self.history.push(best);
        let generations = self.history.len();
        if generations >= self.window {
            let recent = &self.history[generations - self.window..];
            let converged = recent.iter().all(|v| v.is_finite()) && {
                let max = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let min = recent.iter().copied().fold(f64::INFINITY, f64::min);
                max - min < self.threshold
            };
            self.streak = if converged { self.streak + 1 } else { 0 };
        }
        self.streak >= self.patience && generations >= self.min_generations
    }
}

/// Walk-forward validated genetic search over one strategy's parameter space.
pub struct WalkForwardOptimizer<'a> {
    evaluator: FitnessEvaluator<'a>,
    schema: ParameterSchema,
    space: GeneSpace,
    config: OptimizerConfig,
    walk_forward: WalkForwardConfig,
}

impl<'a> WalkForwardOptimizer<'a> {
    pub fn new(
        strategy: &'a dyn Strategy,
        instrument: InstrumentConfig,
        config: OptimizerConfig,
        walk_forward: WalkForwardConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        walk_forward.validate()?;
        instrument.validate()?;
        let schema = full_schema(strategy);
        Ok(Self {
            evaluator: FitnessEvaluator::new(strategy, instrument).with_min_deals(config.min_deals),
            space: GeneSpace::from_schema(&schema),
            schema,
            config,
            walk_forward,
        })
    }

    /// Hold the given parameters at fixed values during the search.
    pub fn with_fixed(mut self, fixed: &ParameterSet) -> Result<Self, AppError> {
        if !fixed.is_empty() {
            self.schema = self.schema.pin(fixed)?;
            self.space = GeneSpace::from_schema(&self.schema);
        }
        Ok(self)
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Score a genome on every window, consulting and filling `cache`.
    fn score(
        &self,
        genome: &[usize],
        klines: &[Kline],
        windows: &[Window],
        cache: &DashMap<Genome, GenomeScore>,
    ) -> GenomeScore {
        if let Some(hit) = cache.get(genome) {
            return hit.clone();
        }
        let params = self.schema.decode(genome);
        let mut train = Vec::with_capacity(windows.len());
        let mut validation = Vec::with_capacity(windows.len());
        for window in windows {
            train.push(self.evaluator.evaluate(&params, &klines[window.train()]));
            validation.push(self.evaluator.evaluate(&params, &klines[window.validation()]));
        }
        let score = GenomeScore {
            fitness: walk_forward_fitness(&self.config, &train, &validation),
            train,
            validation,
        };
        cache.insert(genome.to_vec(), score.clone());
        score
    }

    /// Run `config.runs` independent searches over `klines` and return the
    /// finite best of each, ranked by `fitness + stability` descending.
    pub fn optimize(&self, klines: &[Kline]) -> Result<Vec<OptimizationOutcome>, AppError> {
        validate_klines(klines)?;
        let windows = walk_forward::build_from_config(klines.len(), &self.walk_forward);
        if windows.is_empty() {
            return Err(AppError::InsufficientData {
                needed: self.walk_forward.train_len + self.walk_forward.validation_len,
                available: klines.len(),
            });
        }

        let start = Instant::now();
        let cache: DashMap<Genome, GenomeScore> = DashMap::new();
        let mut outcomes = Vec::with_capacity(self.config.runs);

        for run in 0..self.config.runs {
            let mut rng = match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(run as u64)),
                None => StdRng::from_entropy(),
            };
            let (genome, score) = self.run_once(klines, &windows, &cache, &mut rng);
            if score.fitness.is_finite() {
                outcomes.push(OptimizationOutcome {
                    params: self.schema.decode(&genome),
                    fitness: score.fitness,
                    stability_score: score.stability(),
                });
            } else {
                debug!("Run {} produced no finite candidate", run);
            }
        }

        outcomes.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
        if outcomes.is_empty() {
            warn!(
                "Optimization of {} found no profitable candidate over {} windows",
                self.evaluator.strategy().name(),
                windows.len()
            );
        }
        info!(
            "Optimization of {} complete: {} results, {} genomes evaluated in {:.1}s",
            self.evaluator.strategy().name(),
            outcomes.len(),
            cache.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(outcomes)
    }

    fn run_once(
        &self,
        klines: &[Kline],
        windows: &[Window],
        cache: &DashMap<Genome, GenomeScore>,
        rng: &mut StdRng,
    ) -> (Genome, GenomeScore) {
        if self.space.is_empty() {
            let genome = Genome::new();
            let score = self.score(&genome, klines, windows, cache);
            return (genome, score);
        }

        let cfg = &self.config;
        let pop_size = cfg.effective_population_size(self.space.len());
        let elite_count = ((cfg.elite_ratio * pop_size as f64).ceil() as usize).clamp(1, pop_size);
        info!(
            "GA: pop={}, max_gens={}, elites={}, params={}, windows={}",
            pop_size,
            cfg.max_iterations,
            elite_count,
            self.space.len(),
            windows.len()
        );

        let mut candidates = self.space.initial_population(pop_size, rng);
        let mut convergence = ConvergenceTracker::new(cfg);
        let mut best: Option<(Genome, GenomeScore)> = None;

        for gen in 0..cfg.max_iterations {
            let scores: Vec<GenomeScore> = candidates
                .par_iter()
                .map(|g| self.score(g, klines, windows, cache))
                .collect();

            let mut population = Population::new();
            for (genome, score) in candidates.drain(..).zip(&scores) {
                population.insert(genome, score.fitness);
            }
            population.sort();

            if let Some(leader) = population.best() {
                let improves = best
                    .as_ref()
                    .map_or(true, |(_, b)| leader.fitness > b.fitness);
                if improves {
                    let score = self.score(&leader.genome, klines, windows, cache);
                    best = Some((leader.genome.clone(), score));
                }
            }
            let best_fitness = best
                .as_ref()
                .map_or(f64::NEG_INFINITY, |(_, s)| s.fitness);
            debug!(
                "Generation {}: best={:.4}, diversity={:.2}",
                gen + 1,
                best_fitness,
                population.diversity()
            );

            if convergence.observe(best_fitness) {
                info!("GA converged after {} generations", gen + 1);
                break;
            }
            if gen + 1 >= cfg.max_iterations {
                break;
            }

            candidates = self.next_generation(&mut population, pop_size, elite_count, rng);
        }

        best.unwrap_or_else(|| {
            let genome = Genome::new();
            let score = GenomeScore {
                fitness: f64::NEG_INFINITY,
                train: Vec::new(),
                validation: Vec::new(),
            };
            (genome, score)
        })
    }

    /// Elites survive unchanged; the rest is bred by tournament selection,
    /// crossover and adaptive mutation. A rare catastrophe culls part of the
    /// breeding pool and refills it with random genomes.
    fn next_generation(
        &self,
        population: &mut Population,
        pop_size: usize,
        elite_count: usize,
        rng: &mut StdRng,
    ) -> Vec<Genome> {
        let cfg = &self.config;
        let mutation_rate =
            adaptive_mutation_rate(cfg.base_mutation_rate, cfg.max_mutation_rate, population.diversity());

        let mut next: Vec<Genome> = population
            .members()
            .iter()
            .take(elite_count)
            .map(|m| m.genome.clone())
            .collect();

        if rng.gen::<f64>() < cfg.catastrophe_probability {
            let culled = population.catastrophe(elite_count, rng);
            info!("Catastrophe: culled {} of {} individuals", culled, pop_size);
            let refill = culled.min(pop_size.saturating_sub(next.len()));
            next.extend((0..refill).map(|_| self.space.random(rng)));
        }

        while next.len() < pop_size {
            let (Some(a), Some(b)) = (
                population.tournament(cfg.tournament_size, cfg.tournament_win_probability, rng),
                population.tournament(cfg.tournament_size, cfg.tournament_win_probability, rng),
            ) else {
                next.push(self.space.random(rng));
                continue;
            };
            let mut child = if rng.gen::<f64>() < cfg.crossover_rate {
                self.space.crossover(&a.genome, &b.genome, rng)
            } else {
                a.genome.clone()
            };
            self.space.mutate(&mut child, mutation_rate, rng);
            next.push(child);
        }
        next
    }
}
