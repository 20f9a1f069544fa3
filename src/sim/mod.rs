//! Staged ancestry simulation.
//!
//! A simulation is a chain of [`SimulationStage`]s. Each stage runs the
//! ancestry service over its `[start_time, end_time)` window, continuing the
//! genealogy handed over by the previous stage, and then places mutations on
//! the slices of recorded edges that fall inside the same window.
use log::info;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use crate::error::{Error, SimulationError};
use crate::ratemap::RateMap;

pub mod coalescent;
pub mod genealogy;

pub use coalescent::CoalescentSimulator;
pub use genealogy::Genealogy;

/// A generation window. `end: None` runs until the sample is fully coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(SimulationError::InvalidParameter(format!(
                "start time must be finite and non-negative, got {}",
                self.start
            )));
        }
        match self.end {
            Some(end) if !(end > self.start) => Err(SimulationError::InvalidWindow {
                start: self.start,
                end,
            }),
            _ => Ok(()),
        }
    }

    /// The window length, if bounded.
    pub fn span(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }
}

/// Parameters for one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStage {
    /// Diploid effective population size.
    pub population_size: u32,
    /// Diploid samples drawn when the stage starts a new genealogy. Ignored
    /// when continuing a prior state.
    pub sample_size: u32,
    pub rate_map: RateMap,
    /// Mutations per base pair per generation.
    pub mutation_rate: f64,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub seed: Option<u64>,
}

impl SimulationStage {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time.unwrap_or(0.0),
            end: self.end_time,
        }
    }
}

/// A simulated state that a later stage can keep evolving.
pub trait Continuable {
    /// The time, in generations, the state has been simulated up to.
    fn time(&self) -> f64;
    fn sequence_length(&self) -> f64;
    /// Number of haploid sample genomes.
    fn num_samples(&self) -> usize;
    /// Whether all samples share a single common ancestor.
    fn is_complete(&self) -> bool;
}

/// A simulated state that can be written out.
pub trait Exportable {
    /// Write all outputs under `prefix` for chromosome `chrom`.
    fn export(&self, prefix: &str, chrom: &str) -> Result<(), Error>;
}

/// The ancestry and mutation services a stage runs against.
pub trait AncestrySimulator {
    type State: Continuable;

    /// Simulate ancestry over the stage's window, continuing `prior` if given.
    fn simulate_ancestry<R: Rng + ?Sized>(
        &self,
        stage: &SimulationStage,
        prior: Option<Self::State>,
        rng: &mut R,
    ) -> Result<Self::State, SimulationError>;

    /// Place mutations on the genealogy inside `window`, returning how many were added.
    fn simulate_mutations<R: Rng + ?Sized>(
        &self,
        state: &mut Self::State,
        window: TimeWindow,
        rate: f64,
        rng: &mut R,
    ) -> Result<usize, SimulationError>;
}

/// Seed for the epoch at `index` in a run seeded with `base`. Wraps at `u64::MAX`.
pub fn stage_seed(base: u64, index: usize) -> u64 {
    base.wrapping_add(index as u64)
}

/// Run one stage: ancestry, then mutations over the same window.
pub fn run_stage<S: AncestrySimulator>(
    simulator: &S,
    stage: &SimulationStage,
    prior: Option<S::State>,
    seed: u64,
) -> Result<S::State, SimulationError> {
    let window = stage.window();
    window.validate()?;
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut state = simulator.simulate_ancestry(stage, prior, &mut rng)?;
    let mutations =
        simulator.simulate_mutations(&mut state, window, stage.mutation_rate, &mut rng)?;
    info!(
        "epoch [{}, {}) done at generation {} with {} new mutations",
        window.start,
        window
            .end
            .map_or_else(|| "∞".to_string(), |end| end.to_string()),
        state.time(),
        mutations
    );
    Ok(state)
}

/// An ordered chain of epochs, each continuing the genealogy of the last.
pub struct EpochChain<S: AncestrySimulator> {
    simulator: S,
    stages: Vec<SimulationStage>,
    rng: Xoshiro256StarStar,
}

impl<S: AncestrySimulator> EpochChain<S> {
    /// Stages without their own seed draw one from a generator seeded with `seed`.
    pub fn new(simulator: S, seed: u64) -> Self {
        Self {
            simulator,
            stages: Vec::new(),
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }

    pub fn push(&mut self, stage: SimulationStage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[SimulationStage] {
        &self.stages
    }

    /// Check every window and that each epoch starts where the previous one ends.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.stages.is_empty() {
            return Err(SimulationError::InvalidParameter(
                "an epoch chain needs at least one stage".to_string(),
            ));
        }
        let mut previous_end: Option<f64> = None;
        for (index, stage) in self.stages.iter().enumerate() {
            let window = stage.window();
            window.validate()?;
            if index > 0 {
                let contiguous = match (stage.start_time, previous_end) {
                    (Some(start), Some(end)) => start == end,
                    _ => false,
                };
                if !contiguous {
                    return Err(SimulationError::BrokenChain {
                        index,
                        start: window.start,
                        previous_end,
                    });
                }
            }
            previous_end = window.end;
        }
        Ok(())
    }

    /// Run every stage in order and return the final state.
    pub fn run(&mut self) -> Result<S::State, SimulationError> {
        self.validate()?;
        let mut state: Option<S::State> = None;
        for (index, stage) in self.stages.iter().enumerate() {
            let seed = stage.seed.unwrap_or_else(|| self.rng.gen());
            info!(
                "running epoch {} of {} (Ne = {}, seed = {})",
                index + 1,
                self.stages.len(),
                stage.population_size,
                seed
            );
            state = Some(run_stage(&self.simulator, stage, state.take(), seed)?);
        }
        state.ok_or_else(|| SimulationError::InvalidParameter("no stages were run".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(start: Option<f64>, end: Option<f64>) -> SimulationStage {
        SimulationStage {
            population_size: 1000,
            sample_size: 10,
            rate_map: RateMap::new(vec![0.0, 1e5], vec![1e-8]).unwrap(),
            mutation_rate: 1e-8,
            start_time: start,
            end_time: end,
            seed: Some(1),
        }
    }

    #[test]
    fn test_window_validation() {
        assert!(stage(Some(0.0), Some(10.0)).window().validate().is_ok());
        assert!(stage(None, None).window().validate().is_ok());
        assert!(matches!(
            stage(Some(10.0), Some(10.0)).window().validate(),
            Err(SimulationError::InvalidWindow { .. })
        ));
        assert!(matches!(
            stage(Some(10.0), Some(5.0)).window().validate(),
            Err(SimulationError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_stage_seed_wraps() {
        assert_eq!(stage_seed(42, 2), 44);
        assert_eq!(stage_seed(u64::MAX, 0), u64::MAX);
        assert_eq!(stage_seed(u64::MAX, 1), 0);
        assert_eq!(stage_seed(u64::MAX - 1, 3), 1);
    }

    #[test]
    fn test_chain_validation() {
        let mut chain = EpochChain::new(CoalescentSimulator::default(), 0);
        assert!(chain.validate().is_err());
        chain
            .push(stage(Some(0.0), Some(5000.0)))
            .push(stage(Some(5000.0), Some(10000.0)))
            .push(stage(Some(10000.0), None));
        assert!(chain.validate().is_ok());

        let mut gap = EpochChain::new(CoalescentSimulator::default(), 0);
        gap.push(stage(Some(0.0), Some(5000.0)))
            .push(stage(Some(6000.0), None));
        assert!(matches!(
            gap.validate(),
            Err(SimulationError::BrokenChain { index: 1, .. })
        ));

        let mut open = EpochChain::new(CoalescentSimulator::default(), 0);
        open.push(stage(Some(0.0), None))
            .push(stage(Some(5000.0), None));
        assert!(matches!(
            open.validate(),
            Err(SimulationError::BrokenChain {
                previous_end: None,
                ..
            })
        ));
    }
}
