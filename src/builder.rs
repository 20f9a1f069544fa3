//! Construction of [`RateMap`]s from real maps or from synthetic region panels.
//!
//! Every random choice draws from a caller-supplied generator, so two builds
//! with equally seeded generators produce identical maps.
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::MapError;
use crate::genmap::GeneticMap;
use crate::numeric::{linspace, normal_pdf, search_sorted, SearchResult};
use crate::ratemap::{RateMap, RateSample};

/// A stretch of sequence with a nominal recombination rate (Morgans/bp).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start: f64,
    pub end: f64,
    pub rate: f64,
}

/// A stretch of sequence with no recombination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: f64,
    pub end: f64,
}

/// How the start of a random slice is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceAnchor {
    /// Uniform over `[min_position, max_position - length]`.
    Uniform,
    /// Uniform over the map's markers strictly inside `(min_position, max_position - length)`.
    Marker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceParams {
    /// Target slice length in base pairs.
    pub length: f64,
    pub anchor: SliceAnchor,
    /// Extend the normalized slice to this sequence length.
    pub pad_to: Option<f64>,
    /// Rate of the padding interval.
    pub fill_rate: f64,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            length: 10_000_000.0,
            anchor: SliceAnchor::Uniform,
            pad_to: None,
            fill_rate: 2e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticParams {
    /// Distance between samples in stepped mode.
    pub step: f64,
    /// Relative half-width of the uniform noise applied to region rates.
    pub noise: f64,
    /// Samples per region or gap in normal-peaks mode.
    pub points: usize,
    /// Divisor applied to the normal density in normal-peaks mode.
    pub scale_divisor: f64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            step: 2000.0,
            noise: 0.05,
            points: 1000,
            scale_divisor: 1e16,
        }
    }
}

/// A contiguous piece cut out of a larger genetic map.
#[derive(Debug, Clone)]
pub struct MapSlice {
    /// The normalized (and possibly padded) rate map.
    pub rate_map: RateMap,
    /// The source markers inside the slice, in original coordinates.
    pub source: GeneticMap,
    /// The drawn start offset.
    pub start: f64,
    /// The source position of the last marker in the slice.
    pub end: f64,
}

impl MapSlice {
    /// Write `<prefix>.csv`, `<prefix>_forthread.map` (normalized) and
    /// `<prefix>.map` (source coordinates).
    pub fn write(&self, prefix: &str) -> Result<(), MapError> {
        self.rate_map.write_csv(&format!("{}.csv", prefix))?;
        self.rate_map
            .write_map(&format!("{}_forthread.map", prefix), &self.source.chrom)?;
        self.source.write(&format!("{}.map", prefix))
    }
}

/// Rate samples emitted by a synthetic builder, plus the end of the panel.
#[derive(Debug, Clone)]
pub struct SyntheticMap {
    pub samples: Vec<RateSample>,
    pub end: f64,
}

impl SyntheticMap {
    /// Close the samples into a [`RateMap`] ending at the panel end.
    pub fn rate_map(&self) -> Result<RateMap, MapError> {
        let close = match self.samples.last() {
            Some(last) if last.position < self.end => Some(self.end),
            _ => None,
        };
        RateMap::from_samples(&self.samples, close)
    }

    /// Write `<prefix>.csv` and `<prefix>.map`.
    pub fn write(&self, prefix: &str, chrom: &str) -> Result<RateMap, MapError> {
        let rate_map = self.rate_map()?;
        rate_map.write_csv(&format!("{}.csv", prefix))?;
        rate_map.write_map(&format!("{}.map", prefix), chrom)?;
        Ok(rate_map)
    }
}

/// Check that no two intervals overlap. `closed` intervals may not even touch.
fn check_disjoint(intervals: &[(f64, f64)], closed: bool) -> Result<(), MapError> {
    if let Some(&(start, end)) = intervals.iter().find(|(s, e)| !(s < e)) {
        return Err(MapError::InvalidInterval(start, end));
    }
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let overlaps = if closed {
            next.0 <= prev.1
        } else {
            next.0 < prev.1
        };
        if overlaps {
            return Err(MapError::Overlap(prev.0, prev.1, next.0, next.1));
        }
    }
    Ok(())
}

fn panel_intervals(regions: &[Region], gaps: &[Gap]) -> Vec<(f64, f64)> {
    regions
        .iter()
        .map(|r| (r.start, r.end))
        .chain(gaps.iter().map(|g| (g.start, g.end)))
        .collect()
}

fn panel_end(intervals: &[(f64, f64)]) -> f64 {
    intervals.iter().map(|&(_, end)| end).fold(0.0, f64::max)
}

fn sort_samples(samples: &mut [RateSample]) {
    // stable, so coincident positions keep insertion order
    samples.sort_by(|a, b| {
        a.position
            .partial_cmp(&b.position)
            .unwrap_or(Ordering::Equal)
    });
}

/// `start + i * step` for every `i` with the position below `end`. A span
/// within rounding error of a whole number of steps counts as exact.
fn step_positions(start: f64, end: f64, step: f64) -> impl Iterator<Item = f64> {
    let steps = (end - start) / step;
    let nearest = steps.round();
    let count = if (steps - nearest).abs() <= 1e-9 * nearest.max(1.0) {
        nearest
    } else {
        steps.ceil()
    };
    (0..count.max(0.0) as usize).map(move |i| start + i as f64 * step)
}

pub struct RateMapBuilder;

impl RateMapBuilder {
    /// The whole map as a rate map.
    pub fn from_genetic_map(genetic_map: &GeneticMap) -> Result<RateMap, MapError> {
        let rate_map = genetic_map.to_rate_map()?;
        info!(
            "built rate map for chromosome {} with {} intervals ({} cM)",
            genetic_map.chrom,
            rate_map.len(),
            rate_map.total_map_length()
        );
        Ok(rate_map)
    }

    /// Cut a random segment of at most `params.length` base pairs out of
    /// `genetic_map` and shift it to start at zero.
    ///
    /// The slice runs from the first marker at or after the drawn start to the
    /// last marker not beyond `start + length`. Genetic distances are
    /// re-accumulated from zero over the slice.
    pub fn slice<R: Rng + ?Sized>(
        genetic_map: &GeneticMap,
        params: &SliceParams,
        rng: &mut R,
    ) -> Result<MapSlice, MapError> {
        let length = params.length;
        if !(length > 0.0) {
            return Err(MapError::InvalidParameter(format!(
                "slice length must be positive, got {}",
                length
            )));
        }
        let available = genetic_map.extent();
        let (min, max) = match (genetic_map.min_position(), genetic_map.max_position()) {
            (Some(min), Some(max)) if available >= length => (min, max),
            _ => {
                return Err(MapError::InsufficientRange {
                    requested: length,
                    available,
                })
            }
        };

        let latest_start = max - length;
        let start = match params.anchor {
            SliceAnchor::Uniform => {
                if latest_start > min {
                    rng.gen_range(min..=latest_start)
                } else {
                    min
                }
            }
            SliceAnchor::Marker => {
                let candidates: Vec<f64> = genetic_map
                    .positions
                    .iter()
                    .copied()
                    .filter(|&p| min < p && p < latest_start)
                    .collect();
                *candidates
                    .choose(rng)
                    .ok_or(MapError::InsufficientRange {
                        requested: length,
                        available,
                    })?
            }
        };

        let positions = &genetic_map.positions;
        let first = match search_sorted(positions, start) {
            SearchResult::Exact(idx) | SearchResult::LeftOf(idx) => idx,
            SearchResult::LowerBound(_) => 0,
            SearchResult::UpperBound(_) => positions.len() - 1,
        };
        let last = search_sorted(positions, start + length)
            .floor_index()
            .unwrap_or(0);
        if last <= first {
            return Err(MapError::SparseWindow {
                start,
                end: start + length,
            });
        }

        let source = genetic_map.select(first, last);
        let end = positions[last];
        let mut rate_map = RateMap::new(source.normalized().positions, source.rates())?;
        if let Some(target) = params.pad_to {
            rate_map = rate_map.pad_to(target, params.fill_rate)?;
        }
        debug!(
            "slice markers {}..={} of chromosome {}",
            first, last, genetic_map.chrom
        );
        info!(
            "sliced {}:{}-{} ({} bp, {} cM)",
            genetic_map.chrom,
            start,
            end,
            end - positions[first],
            rate_map.total_map_length()
        );
        Ok(MapSlice {
            rate_map,
            source,
            start,
            end,
        })
    }

    /// One sample every `params.step` bp across each region, at the region's
    /// rate times a uniform factor in `[1 - noise, 1 + noise]`, and one
    /// zero-rate sample per step across each gap.
    pub fn stepped<R: Rng + ?Sized>(
        regions: &[Region],
        gaps: &[Gap],
        params: &SyntheticParams,
        rng: &mut R,
    ) -> Result<SyntheticMap, MapError> {
        if !(params.step > 0.0) {
            return Err(MapError::InvalidParameter(format!(
                "step must be positive, got {}",
                params.step
            )));
        }
        if !(0.0..1.0).contains(&params.noise) {
            return Err(MapError::InvalidParameter(format!(
                "noise must lie in [0, 1), got {}",
                params.noise
            )));
        }
        if let Some(region) = regions.iter().find(|r| !r.rate.is_finite() || r.rate < 0.0) {
            return Err(MapError::ImproperRate(format!(
                "{} in region starting at {}",
                region.rate, region.start
            )));
        }
        let intervals = panel_intervals(regions, gaps);
        check_disjoint(&intervals, false)?;

        let mut samples = Vec::new();
        for region in regions {
            for position in step_positions(region.start, region.end, params.step) {
                let factor = rng.gen_range(1.0 - params.noise..=1.0 + params.noise);
                samples.push(RateSample {
                    position,
                    rate: region.rate * factor,
                });
            }
        }
        for gap in gaps {
            for position in step_positions(gap.start, gap.end, params.step) {
                samples.push(RateSample { position, rate: 0.0 });
            }
        }
        sort_samples(&mut samples);
        info!(
            "synthesized {} stepped samples over {} regions and {} gaps",
            samples.len(),
            regions.len(),
            gaps.len()
        );
        Ok(SyntheticMap {
            samples,
            end: panel_end(&intervals),
        })
    }

    /// A normal-density profile per region and flat zeros across gaps.
    ///
    /// Each region's nominal rate is used as the location of the density
    /// (with scale half the rate), evaluated on `points` values spanning
    /// `[0, 2 * rate]` and laid over `points` positions spanning the region,
    /// then divided by `params.scale_divisor`. This is a stress-test shape,
    /// not a model of real recombination.
    pub fn normal_peaks(
        regions: &[Region],
        gaps: &[Gap],
        params: &SyntheticParams,
    ) -> Result<SyntheticMap, MapError> {
        if params.points < 2 {
            return Err(MapError::InvalidParameter(format!(
                "at least two points per region are needed, got {}",
                params.points
            )));
        }
        if let Some(region) = regions.iter().find(|r| !r.rate.is_finite() || r.rate <= 0.0) {
            return Err(MapError::ImproperRate(format!(
                "{} in region starting at {}, peaks need a positive rate",
                region.rate, region.start
            )));
        }
        let intervals = panel_intervals(regions, gaps);
        check_disjoint(&intervals, true)?;

        let mut samples = Vec::with_capacity(intervals.len() * params.points);
        for region in regions {
            let mu = region.rate;
            let sigma = mu * 0.5;
            let ys = linspace(0.0, 2.0 * mu, params.points);
            let xs = linspace(region.start, region.end, params.points);
            samples.extend(xs.iter().zip(ys.iter()).map(|(&x, &y)| RateSample {
                position: x,
                rate: normal_pdf(y, mu, sigma) / params.scale_divisor,
            }));
        }
        for gap in gaps {
            let xs = linspace(gap.start, gap.end, params.points);
            samples.extend(xs.iter().map(|&x| RateSample {
                position: x,
                rate: 0.0,
            }));
        }
        sort_samples(&mut samples);
        info!(
            "synthesized {} normal-peak samples over {} regions and {} gaps",
            samples.len(),
            regions.len(),
            gaps.len()
        );
        Ok(SyntheticMap {
            samples,
            end: panel_end(&intervals),
        })
    }
}

/// The 20 Mb region panels used for synthetic stress maps.
pub mod presets {
    use super::{Gap, Region};

    fn gaps(offset: f64) -> Vec<Gap> {
        [
            (3_000_000, 3_500_000),
            (5_500_000, 6_000_000),
            (8_000_000, 8_500_000),
            (10_500_000, 11_000_000),
            (13_000_000, 13_500_000),
            (15_500_000, 16_000_000),
            (18_000_000, 18_500_000),
        ]
        .iter()
        .map(|&(start, end)| Gap {
            start: start as f64 + offset,
            end: end as f64,
        })
        .collect()
    }

    /// Eight regions falling from 1e-7 to 4e-10 separated by 500 kb gaps.
    pub fn stepped_panel() -> (Vec<Region>, Vec<Gap>) {
        let regions = [
            (0, 3_000_000, 1e-7),
            (3_500_000, 5_500_000, 0.5e-7),
            (6_000_000, 8_000_000, 1e-8),
            (8_500_000, 10_500_000, 0.7e-8),
            (11_000_000, 13_000_000, 0.4e-8),
            (13_500_000, 15_500_000, 1e-9),
            (16_000_000, 18_000_000, 0.7e-9),
            (18_500_000, 20_000_000, 0.4e-9),
        ]
        .iter()
        .map(|&(start, end, rate)| Region {
            start: start as f64,
            end: end as f64,
            rate,
        })
        .collect();
        (regions, gaps(0.0))
    }

    /// Like [`stepped_panel`] but with every interval starting one base past
    /// the previous end, so closed intervals stay disjoint.
    pub fn normal_panel() -> (Vec<Region>, Vec<Gap>) {
        let regions = [
            (0, 3_000_000, 0.8e-8),
            (3_500_001, 5_500_000, 0.6e-8),
            (6_000_001, 8_000_000, 0.4e-8),
            (8_500_001, 10_500_000, 0.2e-8),
            (11_000_001, 13_000_000, 1e-9),
            (13_500_001, 15_500_000, 0.8e-9),
            (16_000_001, 18_000_000, 0.6e-9),
            (18_500_001, 20_000_000, 0.4e-9),
        ]
        .iter()
        .map(|&(start, end, rate)| Region {
            start: start as f64,
            end: end as f64,
            rate,
        })
        .collect();
        (regions, gaps(1.0))
    }
}
