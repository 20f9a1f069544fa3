//! A reference ancestry backend: the coalescent with recombination.
//!
//! Lineages coalesce pairwise and split at crossovers drawn from the stage's
//! rate map, so the rate map shapes the marginal trees. Ancestry is recorded
//! into the genealogy's tables as it happens.
use log::{debug, warn};
use rand::Rng;
use rand_distr::{Distribution, Exp, Poisson};

use super::genealogy::{EpochRecord, Genealogy};
use super::{AncestrySimulator, Continuable, SimulationStage, TimeWindow};
use crate::error::SimulationError;
use crate::numeric::interp1d;
use crate::ratemap::RateMap;

/// Prior states may end this far from a stage's start time.
const TIME_TOLERANCE: f64 = 1e-9;

/// Physical position against cumulative map length in Morgans.
struct GeneticAxis {
    positions: Vec<f64>,
    cumulative: Vec<f64>,
}

impl GeneticAxis {
    fn new(rate_map: &RateMap) -> Self {
        Self {
            positions: rate_map.positions().to_vec(),
            cumulative: rate_map.cumulative_mass(),
        }
    }

    /// Morgans from the start of the map to `position`.
    fn at(&self, position: f64) -> f64 {
        interp1d(&self.positions, &self.cumulative, position).unwrap_or(0.0)
    }

    /// Morgans between `left` and `right`.
    fn mass(&self, left: f64, right: f64) -> f64 {
        self.at(right) - self.at(left)
    }

    /// The physical position `morgans` along the map.
    fn position(&self, morgans: f64) -> f64 {
        let i = self.cumulative.partition_point(|&c| c < morgans);
        if i == 0 {
            return self.positions.first().copied().unwrap_or(0.0);
        }
        if i >= self.cumulative.len() {
            return self.positions.last().copied().unwrap_or(0.0);
        }
        let (g0, g1) = (self.cumulative[i - 1], self.cumulative[i]);
        let (x0, x1) = (self.positions[i - 1], self.positions[i]);
        x0 + (x1 - x0) * (morgans - g0) / (g1 - g0)
    }
}

#[derive(Debug, Clone)]
pub struct CoalescentSimulator {
    pub ploidy: u32,
}

impl Default for CoalescentSimulator {
    fn default() -> Self {
        Self { ploidy: 2 }
    }
}

impl CoalescentSimulator {
    fn check_prior(
        &self,
        prior: Genealogy,
        window: &TimeWindow,
        sequence_length: f64,
    ) -> Result<Genealogy, SimulationError> {
        if (prior.time() - window.start).abs() > TIME_TOLERANCE * window.start.max(1.0) {
            return Err(SimulationError::StateMismatch(format!(
                "prior state ends at generation {} but the stage starts at {}",
                prior.time(),
                window.start
            )));
        }
        if prior.sequence_length() != sequence_length {
            return Err(SimulationError::StateMismatch(format!(
                "prior state has sequence length {} but the rate map has {}",
                prior.sequence_length(),
                sequence_length
            )));
        }
        if prior.ploidy() != self.ploidy {
            return Err(SimulationError::StateMismatch(format!(
                "prior state has ploidy {} but the simulator uses {}",
                prior.ploidy(),
                self.ploidy
            )));
        }
        Ok(prior)
    }
}

impl AncestrySimulator for CoalescentSimulator {
    type State = Genealogy;

    fn simulate_ancestry<R: Rng + ?Sized>(
        &self,
        stage: &SimulationStage,
        prior: Option<Genealogy>,
        rng: &mut R,
    ) -> Result<Genealogy, SimulationError> {
        let window = stage.window();
        window.validate()?;
        let sequence_length = stage.rate_map.sequence_length();
        if !(sequence_length > 0.0) {
            return Err(SimulationError::EmptyRateMap);
        }
        if stage.population_size == 0 {
            return Err(SimulationError::InvalidParameter(
                "population size must be positive".to_string(),
            ));
        }
        if self.ploidy == 0 {
            return Err(SimulationError::InvalidParameter(
                "ploidy must be positive".to_string(),
            ));
        }
        if stage.rate_map.rates().iter().all(|&r| r == 0.0) {
            warn!("rate map has zero total map length, all sites share one tree");
        }
        debug!(
            "rate map spans {} bp and {} cM",
            sequence_length,
            stage.rate_map.total_map_length()
        );

        let mut state = match prior {
            Some(prior) => self.check_prior(prior, &window, sequence_length)?,
            None => {
                if stage.sample_size == 0 {
                    return Err(SimulationError::InvalidParameter(
                        "sample size must be positive".to_string(),
                    ));
                }
                let haploids = stage.sample_size as usize * self.ploidy as usize;
                Genealogy::new(haploids, self.ploidy, sequence_length, window.start)?
            }
        };

        let axis = GeneticAxis::new(&stage.rate_map);
        // each pair of lineages coalesces at rate 1 / (ploidy * N) per generation
        let genomes = self.ploidy as f64 * stage.population_size as f64;
        let mut coalescences = 0;
        let mut recombinations = 0;
        loop {
            let k = state.lineages().len();
            if k < 2 {
                break;
            }
            let coalescence_rate = (k * (k - 1) / 2) as f64 / genomes;
            let links: Vec<f64> = state
                .lineages()
                .iter()
                .map(|l| axis.mass(l.left(), l.right()))
                .collect();
            let recombination_rate: f64 = links.iter().sum();
            let total = coalescence_rate + recombination_rate;
            let exp =
                Exp::new(total).map_err(|e| SimulationError::Distribution(e.to_string()))?;
            let wait: f64 = Distribution::<f64>::sample(&exp, rng);
            let next = state.time() + wait;
            if let Some(end) = window.end {
                if next >= end {
                    break;
                }
            }

            if rng.gen::<f64>() * total < recombination_rate {
                let mut target = rng.gen::<f64>() * recombination_rate;
                let mut index = k - 1;
                for (i, &link) in links.iter().enumerate() {
                    if target < link {
                        index = i;
                        break;
                    }
                    target -= link;
                }
                let lineage = &state.lineages()[index];
                let lo = axis.at(lineage.left());
                let hi = axis.at(lineage.right());
                state.set_time(next);
                if hi > lo {
                    let breakpoint = axis.position(rng.gen_range(lo..hi));
                    if state.recombine(index, breakpoint) {
                        recombinations += 1;
                    }
                }
            } else {
                let i = rng.gen_range(0..k);
                let mut j = rng.gen_range(0..k - 1);
                if j >= i {
                    j += 1;
                }
                if state.coalesce(i, j, next)? {
                    coalescences += 1;
                }
            }
        }
        if let Some(end) = window.end {
            state.set_time(end);
        }
        debug!(
            "{} coalescences and {} recombinations, {} lineages remain at generation {}",
            coalescences,
            recombinations,
            state.lineages().len(),
            state.time()
        );
        state.push_epoch(EpochRecord {
            start: window.start,
            end: state.time(),
            population_size: stage.population_size,
            mutation_rate: 0.0,
            coalescences,
            recombinations,
            mutations: 0,
        });
        Ok(state)
    }

    /// Mutations go on edges recorded since the last call. An edge spanning
    /// earlier epochs gets each of those time slices at that epoch's rate, so
    /// every branch segment is mutated exactly once, at the rate of the epoch
    /// it lies in. Uncoalesced lineages carry no edge above them yet.
    fn simulate_mutations<R: Rng + ?Sized>(
        &self,
        state: &mut Genealogy,
        window: TimeWindow,
        rate: f64,
        rng: &mut R,
    ) -> Result<usize, SimulationError> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(SimulationError::InvalidParameter(format!(
                "mutation rate must be finite and non-negative, got {}",
                rate
            )));
        }
        state.set_epoch_mutation_rate(rate);
        let horizon = window.end.unwrap_or_else(|| state.time());
        let slices: Vec<(f64, f64, f64)> = state
            .epochs()
            .iter()
            .map(|e| (e.start, e.end.min(horizon), e.mutation_rate))
            .collect();

        let mut added = 0;
        for edge in state.take_unmutated_edges()? {
            for &(start, end, mu) in &slices {
                let lo = edge.child_height.max(start);
                let hi = edge.parent_height.min(end);
                if hi <= lo {
                    continue;
                }
                let lambda = mu * (edge.right - edge.left) * (hi - lo);
                if lambda <= 0.0 {
                    continue;
                }
                let poisson = Poisson::new(lambda)
                    .map_err(|e| SimulationError::Distribution(e.to_string()))?;
                let count: f64 = Distribution::<f64>::sample(&poisson, rng);
                for _ in 0..count as usize {
                    let position = rng.gen_range(edge.left..edge.right);
                    let time = rng.gen_range(lo..hi);
                    state.add_mutation(position, edge.child_id, time)?;
                    added += 1;
                }
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratemap::RateMap;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn stage(start: Option<f64>, end: Option<f64>) -> SimulationStage {
        SimulationStage {
            population_size: 1000,
            sample_size: 5,
            rate_map: RateMap::new(vec![0.0, 1e5], vec![0.0]).unwrap(),
            mutation_rate: 1e-8,
            start_time: start,
            end_time: end,
            seed: None,
        }
    }

    #[test]
    fn test_runs_to_completion() {
        let sim = CoalescentSimulator::default();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let g = sim.simulate_ancestry(&stage(None, None), None, &mut rng).unwrap();
        assert!(g.is_complete());
        // without crossovers 10 samples coalesce in 9 events
        assert_eq!(g.num_nodes(), 19);
        assert_eq!(g.epochs()[0].coalescences, 9);
        assert_eq!(g.epochs()[0].recombinations, 0);
        assert_eq!(g.tmrca(), Some(g.time()));
        assert_eq!(g.num_trees().unwrap(), 1);
    }

    #[test]
    fn test_rate_map_drives_tree_count() {
        let sim = CoalescentSimulator::default();
        let mut recombining = stage(None, None);
        recombining.rate_map = RateMap::new(vec![0.0, 5e4, 1e5], vec![1e-6, 0.0]).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(21);
        let g = sim.simulate_ancestry(&recombining, None, &mut rng).unwrap();
        assert!(g.is_complete());
        assert!(g.epochs()[0].recombinations > 0);
        assert!(g.num_trees().unwrap() > 1);
        let edges = g.edges().unwrap();
        assert!(edges.iter().any(|e| e.left > 0.0 || e.right < 1e5));
        // no crossovers land where the map is flat
        assert!(edges
            .iter()
            .flat_map(|e| [e.left, e.right])
            .all(|x| x <= 5e4 || x == 1e5));
        assert!(g.tree_sequence().is_ok());
    }

    #[test]
    fn test_bounded_window_stops_at_end() {
        let sim = CoalescentSimulator::default();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let g = sim
            .simulate_ancestry(&stage(Some(0.0), Some(1.0)), None, &mut rng)
            .unwrap();
        assert_eq!(g.time(), 1.0);
        assert!(g.node_times().iter().all(|&t| t < 1.0));
    }

    #[test]
    fn test_empty_rate_map_rejected() {
        let sim = CoalescentSimulator::default();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let mut s = stage(None, None);
        s.rate_map = RateMap::new(vec![0.0], vec![]).unwrap();
        assert!(matches!(
            sim.simulate_ancestry(&s, None, &mut rng),
            Err(SimulationError::EmptyRateMap)
        ));
    }

    #[test]
    fn test_prior_must_match_window() {
        let sim = CoalescentSimulator::default();
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let g = sim
            .simulate_ancestry(&stage(Some(0.0), Some(100.0)), None, &mut rng)
            .unwrap();
        assert!(matches!(
            sim.simulate_ancestry(&stage(Some(200.0), None), Some(g), &mut rng),
            Err(SimulationError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_mutations_stay_on_edges_in_window() {
        let sim = CoalescentSimulator::default();
        let mut rng = Xoshiro256StarStar::seed_from_u64(9);
        let window = TimeWindow {
            start: 0.0,
            end: Some(500.0),
        };
        let mut g = sim
            .simulate_ancestry(&stage(Some(0.0), Some(500.0)), None, &mut rng)
            .unwrap();
        let added = sim.simulate_mutations(&mut g, window, 1e-6, &mut rng).unwrap();
        assert!(added > 0);
        let mutations = g.mutations().unwrap();
        assert_eq!(mutations.len(), added);
        assert_eq!(g.epochs()[0].mutations, added);
        let times = g.node_times();
        for m in &mutations {
            assert!(m.time >= 0.0 && m.time < 500.0);
            assert!(m.position >= 0.0 && m.position < 1e5);
            assert!(m.time >= times[m.node]);
        }
        assert!(mutations.windows(2).all(|w| w[0].position <= w[1].position));
        // edges already mutated are not mutated twice
        assert_eq!(sim.simulate_mutations(&mut g, window, 1e-6, &mut rng).unwrap(), 0);
        assert!(sim.simulate_mutations(&mut g, window, -1.0, &mut rng).is_err());
    }

    #[test]
    fn test_no_mutations_above_the_root() {
        let sim = CoalescentSimulator { ploidy: 1 };
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let mut s = stage(Some(0.0), Some(5000.0));
        s.population_size = 20;
        s.sample_size = 10;
        let mut g = sim.simulate_ancestry(&s, None, &mut rng).unwrap();
        sim.simulate_mutations(&mut g, s.window(), 1e-5, &mut rng).unwrap();
        assert!(g.is_complete());
        let tmrca = g.tmrca().unwrap();

        for (start, end) in [(5000.0, Some(10_000.0)), (10_000.0, None)] {
            let mut next = s.clone();
            next.start_time = Some(start);
            next.end_time = end;
            g = sim.simulate_ancestry(&next, Some(g), &mut rng).unwrap();
            let added = sim
                .simulate_mutations(&mut g, next.window(), 1e-5, &mut rng)
                .unwrap();
            assert_eq!(added, 0);
        }
        assert!(g.mutations().unwrap().iter().all(|m| m.time < tmrca));
    }
}
