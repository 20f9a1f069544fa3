//! Synthetic recombination maps and staged coalescent simulations.
//!
//! A [`RateMap`] can be built from a four-column genetic map file (the whole
//! map, or a random slice of it), or synthesized from a panel of regions and
//! zero-rate gaps. Rate maps then drive an [`EpochChain`], a sequence of
//! simulation epochs in which each epoch continues the genealogy produced by
//! the previous one.
//!
//! Here is an example which cuts a random 10 Mb slice out of a map and writes
//! it as a rate CSV and a map file.
//!
//! ```no_run
//! use epochmap::prelude::*;
//! use rand::SeedableRng;
//! use rand_xoshiro::Xoshiro256StarStar;
//!
//! let maps = GeneticMaps::from_path("plink.chr22.GRCh38.map")
//!                .expect("could not read map");
//! let chr22 = maps.select(None).expect("expected a single chromosome");
//! let mut rng = Xoshiro256StarStar::seed_from_u64(42);
//! let slice = RateMapBuilder::slice(chr22, &SliceParams::default(), &mut rng)
//!                .expect("map too short");
//! slice.write("chr22_10Mb").expect("could not write outputs");
//! ```
//!
//! And a three-epoch run, continuing one genealogy across epoch boundaries:
//!
//! ```no_run
//! use epochmap::prelude::*;
//!
//! let rate_map = RateMap::new(vec![0.0, 1e6], vec![1e-8]).unwrap();
//! let mut chain = EpochChain::new(CoalescentSimulator::default(), 123);
//! for (start, end) in [(0.0, Some(5000.0)), (5000.0, Some(10000.0)), (10000.0, None)] {
//!     chain.push(SimulationStage {
//!         population_size: 10_000,
//!         sample_size: 500,
//!         rate_map: rate_map.clone(),
//!         mutation_rate: 1e-8,
//!         start_time: Some(start),
//!         end_time: end,
//!         seed: None,
//!     });
//! }
//! let genealogy = chain.run().expect("simulation failed");
//! genealogy.export("constant_Ne10000", "22").expect("export failed");
//! ```

pub mod builder;
pub mod error;
pub mod export;
pub mod file;
pub mod genmap;
pub mod numeric;
pub mod ratemap;
pub mod sim;

pub use builder::{
    Gap, MapSlice, RateMapBuilder, Region, SliceAnchor, SliceParams, SyntheticMap,
    SyntheticParams,
};
pub use error::{Error, MapError, SimulationError};
pub use genmap::{GeneticMap, GeneticMapEntry, GeneticMaps, DEFAULT_CHROM};
pub use ratemap::{RateMap, RateSample, CM_MB_CONVERSION, CM_PER_MORGAN};
pub use sim::{
    run_stage, AncestrySimulator, CoalescentSimulator, Continuable, EpochChain, Exportable,
    Genealogy, SimulationStage, TimeWindow,
};

pub mod prelude {
    pub use crate::builder::{
        presets, Gap, RateMapBuilder, Region, SliceAnchor, SliceParams, SyntheticParams,
    };
    pub use crate::error::{Error, MapError, SimulationError};
    pub use crate::genmap::{GeneticMap, GeneticMaps, DEFAULT_CHROM};
    pub use crate::ratemap::RateMap;
    pub use crate::sim::{
        run_stage, AncestrySimulator, CoalescentSimulator, Continuable, EpochChain, Exportable,
        Genealogy, SimulationStage,
    };
}
