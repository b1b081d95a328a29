//! Population and variation operators over candidate-index genomes.
//!
//! A genome holds, per optimized parameter, an index into that parameter's
//! candidate list. Operators never produce an index outside the list.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::Normal;

use crate::models::params::{ParamDomain, ParameterSchema};

pub type Genome = Vec<usize>;

/// Candidate lists of the optimized parameters, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSpace {
    domains: Vec<ParamDomain>,
}

impl GeneSpace {
    pub fn from_schema(schema: &ParameterSchema) -> Self {
        Self {
            domains: schema
                .optimized_specs()
                .into_iter()
                .filter_map(|s| s.domain.clone())
                .collect(),
        }
    }

    pub fn new(domains: Vec<ParamDomain>) -> Self {
        Self {
            domains: domains.into_iter().filter(|d| !d.is_empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn cardinality(&self, gene: usize) -> usize {
        self.domains[gene].len()
    }

    /// Number of distinct genomes in the space, saturating.
    pub fn size(&self) -> usize {
        self.domains
            .iter()
            .fold(1usize, |acc, d| acc.saturating_mul(d.len()))
    }

    pub fn contains(&self, genome: &[usize]) -> bool {
        genome.len() == self.len() && genome.iter().zip(&self.domains).all(|(&g, d)| g < d.len())
    }

    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Genome {
        self.domains.iter().map(|d| rng.gen_range(0..d.len())).collect()
    }

    /// Each gene pinned to its first or last candidate.
    pub fn extreme<R: Rng + ?Sized>(&self, rng: &mut R) -> Genome {
        self.domains
            .iter()
            .map(|d| if rng.gen_bool(0.5) { 0 } else { d.len() - 1 })
            .collect()
    }

    /// Latin Hypercube sample of `n` genomes: every gene's index space is cut
    /// into `n` equal bins, one index is drawn per bin, and the draws are
    /// permuted independently per gene.
    pub fn latin_hypercube<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Genome> {
        if n == 0 {
            return Vec::new();
        }
        let mut columns: Vec<Vec<usize>> = Vec::with_capacity(self.len());
        for domain in &self.domains {
            let card = domain.len();
            let width = card as f64 / n as f64;
            let mut column: Vec<usize> = (0..n)
                .map(|bin| {
                    let lo = bin as f64 * width;
                    let pick = lo + rng.gen::<f64>() * width;
                    (pick.floor() as usize).min(card - 1)
                })
                .collect();
            column.shuffle(rng);
            columns.push(column);
        }
        (0..n)
            .map(|i| columns.iter().map(|c| c[i]).collect())
            .collect()
    }

    /// Mixed initial population: 30% random, 45% Latin Hypercube, 20% extreme,
    /// topped up with random draws to exactly `size`.
    pub fn initial_population<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Vec<Genome> {
        let n_random = (size as f64 * 0.30).round() as usize;
        let n_lhs = (size as f64 * 0.45).round() as usize;
        let n_extreme = (size as f64 * 0.20).round() as usize;

        let mut genomes = Vec::with_capacity(size);
        genomes.extend((0..n_random).map(|_| self.random(rng)));
        genomes.extend(self.latin_hypercube(n_lhs, rng));
        genomes.extend((0..n_extreme).map(|_| self.extreme(rng)));
        while genomes.len() < size {
            genomes.push(self.random(rng));
        }
        genomes.truncate(size);
        genomes
    }

    /// Uniform, single-point or blend crossover, chosen uniformly.
    pub fn crossover<R: Rng + ?Sized>(&self, a: &[usize], b: &[usize], rng: &mut R) -> Genome {
        match rng.gen_range(0..3) {
            0 => uniform_crossover(a, b, rng),
            1 if a.len() > 1 => {
                let point = rng.gen_range(1..a.len());
                a[..point].iter().chain(&b[point..]).copied().collect()
            }
            1 => uniform_crossover(a, b, rng),
            _ => {
                let alpha = rng.gen::<f64>();
                self.domains
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(domain, (&x, &y))| {
                        domain.blend(x, y, alpha).unwrap_or_else(|| {
                            if rng.gen_bool(0.5) {
                                x
                            } else {
                                y
                            }
                        })
                    })
                    .collect()
            }
        }
    }

    /// Mutate each gene with probability `rate` by a boundary jump, a
    /// Gaussian walk over the index space or a full redraw.
    pub fn mutate<R: Rng + ?Sized>(&self, genome: &mut [usize], rate: f64, rng: &mut R) {
        for (gene, domain) in genome.iter_mut().zip(&self.domains) {
            let card = domain.len();
            if card < 2 || rng.gen::<f64>() >= rate {
                continue;
            }
            *gene = match rng.gen_range(0..3) {
                0 => {
                    if rng.gen_bool(0.5) {
                        0
                    } else {
                        card - 1
                    }
                }
                1 => neighbour_index(*gene, card, rng),
                _ => rng.gen_range(0..card),
            };
        }
    }
}

fn uniform_crossover<R: Rng + ?Sized>(a: &[usize], b: &[usize], rng: &mut R) -> Genome {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| if rng.gen_bool(0.5) { x } else { y })
        .collect()
}

/// Step away from `index` by a rounded normal draw (sigma grows with the
/// candidate count), never zero, clamped to the list.
fn neighbour_index<R: Rng + ?Sized>(index: usize, card: usize, rng: &mut R) -> usize {
    let sigma = (card as f64 / 10.0).max(1.0);
    let mut delta = match Normal::new(0.0, sigma) {
        Ok(normal) => rng.sample(normal).round() as i64,
        Err(_) => 0,
    };
    if delta == 0 {
        delta = if rng.gen_bool(0.5) { 1 } else { -1 };
    }
    (index as i64 + delta).clamp(0, card as i64 - 1) as usize
}

/// Mutation probability from population diversity (distinct genomes / size).
pub fn adaptive_mutation_rate(base: f64, max: f64, diversity: f64) -> f64 {
    let diversity = if diversity.is_finite() {
        diversity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    base + (max - base).max(0.0) * (1.0 - diversity)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub genome: Genome,
    pub fitness: f64,
    /// Insertion order; breaks fitness ties so equal scores never collide.
    pub seq: u64,
}

/// Scored genomes kept in a plain vector. Inserting always adds one member,
/// whatever its fitness.
#[derive(Debug, Clone, Default)]
pub struct Population {
    members: Vec<Individual>,
    next_seq: u64,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, genome: Genome, fitness: f64) {
        let fitness = if fitness.is_nan() {
            f64::NEG_INFINITY
        } else {
            fitness
        };
        self.members.push(Individual {
            genome,
            fitness,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Individual] {
        &self.members
    }

    /// Best first; equal fitness keeps insertion order.
    pub fn sort(&mut self) {
        self.members
            .sort_by(|a, b| b.fitness.total_cmp(&a.fitness).then(a.seq.cmp(&b.seq)));
    }

    /// Highest fitness, earliest inserted on ties.
    pub fn best(&self) -> Option<&Individual> {
        self.members
            .iter()
            .min_by(|a, b| b.fitness.total_cmp(&a.fitness).then(a.seq.cmp(&b.seq)))
    }

    /// Distinct genomes over population size.
    pub fn diversity(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let distinct: HashSet<&Genome> = self.members.iter().map(|m| &m.genome).collect();
        distinct.len() as f64 / self.members.len() as f64
    }

    /// Tournament of `size` random members: the fittest wins with probability
    /// `win_probability`, otherwise a random tournament member is returned.
    pub fn tournament<R: Rng + ?Sized>(
        &self,
        size: usize,
        win_probability: f64,
        rng: &mut R,
    ) -> Option<&Individual> {
        if self.members.is_empty() {
            return None;
        }
        let contestants: Vec<&Individual> = (0..size.max(1))
            .map(|_| &self.members[rng.gen_range(0..self.members.len())])
            .collect();
        if rng.gen::<f64>() < win_probability {
            contestants
                .iter()
                .copied()
                .min_by(|a, b| b.fitness.total_cmp(&a.fitness).then(a.seq.cmp(&b.seq)))
        } else {
            contestants.choose(rng).copied()
        }
    }

    /// Remove a random 40–60% of the members outside the top `protected`.
    /// Returns how many were removed. Leaves the population sorted.
    pub fn catastrophe<R: Rng + ?Sized>(&mut self, protected: usize, rng: &mut R) -> usize {
        self.sort();
        let protected = protected.min(self.members.len());
        let mut rest = self.members.split_off(protected);
        let fraction = rng.gen_range(0.4..=0.6);
        let cull = ((rest.len() as f64) * fraction).round() as usize;
        rest.shuffle(rng);
        rest.truncate(rest.len() - cull);
        self.members.extend(rest);
        self.sort();
        cull
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn space() -> GeneSpace {
        GeneSpace::new(vec![
            ParamDomain::int_range(1, 10, 1),
            ParamDomain::float_range(0.5, 2.0, 0.5),
            ParamDomain::Bool,
        ])
    }

    #[test]
    fn test_lhs_ten_over_five_candidates() {
        let space = GeneSpace::new(vec![ParamDomain::ints(vec![1, 2, 3, 4, 5])]);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = space.latin_hypercube(10, &mut rng);
        assert_eq!(sample.len(), 10);
        let mut counts = [0usize; 5];
        for g in &sample {
            assert!(space.contains(g));
            counts[g[0]] += 1;
        }
        // Ten bins of width 0.5 over five candidates: each candidate twice.
        assert_eq!(counts, [2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_initial_population_size_and_domain() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(1);
        for size in [1, 7, 10, 33] {
            let pop = space.initial_population(size, &mut rng);
            assert_eq!(pop.len(), size);
            assert!(pop.iter().all(|g| space.contains(g)));
        }
    }

    #[test]
    fn test_extreme_genomes_at_bounds() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let g = space.extreme(&mut rng);
            for (i, &idx) in g.iter().enumerate() {
                assert!(idx == 0 || idx == space.cardinality(i) - 1);
            }
        }
    }

    #[test]
    fn test_crossover_and_mutation_stay_in_domain() {
        let space = space();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let a = space.random(&mut rng);
            let b = space.random(&mut rng);
            let mut child = space.crossover(&a, &b, &mut rng);
            assert!(space.contains(&child));
            space.mutate(&mut child, 1.0, &mut rng);
            assert!(space.contains(&child));
        }
    }

    #[test]
    fn test_neighbour_never_stands_still() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let idx = neighbour_index(5, 11, &mut rng);
            assert_ne!(idx, 5);
            assert!(idx < 11);
        }
    }

    #[test]
    fn test_adaptive_rate() {
        assert_eq!(adaptive_mutation_rate(0.1, 0.5, 1.0), 0.1);
        assert_eq!(adaptive_mutation_rate(0.1, 0.5, 0.0), 0.5);
        assert!((adaptive_mutation_rate(0.1, 0.5, 0.5) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_insert_with_equal_fitness_grows_by_one() {
        let mut pop = Population::new();
        for i in 0..5 {
            let before = pop.len();
            pop.insert(vec![i], 1.0);
            assert_eq!(pop.len(), before + 1);
        }
        pop.insert(vec![0], 1.0);
        assert_eq!(pop.len(), 6);
        pop.sort();
        let seqs: Vec<u64> = pop.members().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
        assert!((pop.diversity() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_prefers_finite() {
        let mut pop = Population::new();
        pop.insert(vec![0], f64::NEG_INFINITY);
        pop.insert(vec![1], -5.0);
        pop.insert(vec![2], f64::NAN);
        assert_eq!(pop.best().map(|b| b.genome.clone()), Some(vec![1]));
    }

    #[test]
    fn test_tournament_always_wins_with_certainty() {
        let mut pop = Population::new();
        for i in 0..4 {
            pop.insert(vec![i], i as f64);
        }
        let mut rng = StdRng::seed_from_u64(9);
        // A tournament larger than the population almost surely samples the best.
        let winner = pop.tournament(64, 1.0, &mut rng).unwrap();
        assert_eq!(winner.genome, vec![3]);
    }

    #[test]
    fn test_catastrophe_keeps_protected() {
        let mut pop = Population::new();
        for i in 0..20 {
            pop.insert(vec![i], i as f64);
        }
        let mut rng = StdRng::seed_from_u64(2);
        let removed = pop.catastrophe(2, &mut rng);
        assert!((7..=11).contains(&removed));
        assert_eq!(pop.len(), 20 - removed);
        assert_eq!(pop.members()[0].genome, vec![19]);
        assert_eq!(pop.members()[1].genome, vec![18]);
    }
}
