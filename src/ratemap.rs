use csv::ReaderBuilder;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::file::{InputFile, OutputFile};
use crate::genmap::GeneticMap;
use crate::numeric::interp1d;

/// Centimorgans per Morgan. Map files store centimorgans, rates are Morgans/bp.
pub const CM_PER_MORGAN: f64 = 100.0;

/// HapMap rate columns are in cM/Mb; multiplying by this gives Morgans/bp.
pub const CM_MB_CONVERSION: f64 = 1e-8;

/// One `Position,Rate` row of the rate CSV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    #[serde(rename = "Position")]
    pub position: f64,
    #[serde(rename = "Rate")]
    pub rate: f64,
}

/// A piecewise-constant recombination rate over physical positions.
///
/// `rates[i]` is the rate in Morgans per base pair on `[positions[i], positions[i+1])`,
/// so there is always exactly one fewer rate than positions. The map is validated
/// on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMap {
    positions: Vec<f64>,
    rates: Vec<f64>,
}

impl RateMap {
    /// Create a new rate map, checking that positions strictly increase and
    /// that every rate is finite and non-negative.
    pub fn new(positions: Vec<f64>, rates: Vec<f64>) -> Result<Self, MapError> {
        if positions.is_empty() {
            return Err(MapError::InvalidLength(
                "a rate map needs at least one position".to_string(),
            ));
        }
        if rates.len() + 1 != positions.len() {
            return Err(MapError::InvalidLength(format!(
                "{} positions require {} rates, got {}",
                positions.len(),
                positions.len() - 1,
                rates.len()
            )));
        }
        if let Some(bad) = positions.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(MapError::NotSorted(format!("invalid position {}", bad)));
        }
        if let Some(pair) = positions.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(MapError::NotSorted(format!("{} follows {}", pair[1], pair[0])));
        }
        if let Some((i, rate)) = rates
            .iter()
            .enumerate()
            .find(|(_, r)| !r.is_finite() || **r < 0.0)
        {
            return Err(MapError::ImproperRate(format!("{} at {}", rate, positions[i])));
        }
        Ok(Self { positions, rates })
    }

    /// Build a map from `Position,Rate` samples.
    ///
    /// If `end` is given it becomes the final breakpoint and every sample keeps
    /// its rate; otherwise the last sample's position closes the map and its
    /// rate is dropped.
    pub fn from_samples(samples: &[RateSample], end: Option<f64>) -> Result<Self, MapError> {
        let mut positions: Vec<f64> = samples.iter().map(|s| s.position).collect();
        let mut rates: Vec<f64> = samples.iter().map(|s| s.rate).collect();
        match end {
            Some(end) => positions.push(end),
            None => {
                rates.pop();
            }
        }
        RateMap::new(positions, rates)
    }

    /// The breakpoints.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// The per-interval rates, in Morgans per base pair.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// The number of intervals.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// The sequence length, i.e. the final breakpoint.
    pub fn sequence_length(&self) -> f64 {
        self.positions.last().copied().unwrap_or(0.0)
    }

    /// Returns the spans (i.e. widths) in basepairs between each breakpoint.
    pub fn span(&self) -> Vec<f64> {
        self.positions.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    /// Returns the map length in Morgans of each interval.
    pub fn mass(&self) -> Vec<f64> {
        self.rates
            .iter()
            .zip(self.span().iter())
            .map(|(&x, &y)| x * y)
            .collect()
    }

    /// Cumulative map length in Morgans at every breakpoint, starting at zero.
    pub fn cumulative_mass(&self) -> Vec<f64> {
        let mut cumulative = Vec::with_capacity(self.positions.len());
        cumulative.push(0.0);
        let mut state = 0.0;
        for mass in self.mass() {
            state += mass;
            cumulative.push(state);
        }
        cumulative
    }

    /// Cumulative genetic positions in centimorgans at every breakpoint, starting at zero.
    pub fn genetic_positions(&self) -> Vec<f64> {
        self.cumulative_mass()
            .into_iter()
            .map(|morgans| morgans * CM_PER_MORGAN)
            .collect()
    }

    /// Calculate the total map length in centimorgans.
    pub fn total_map_length(&self) -> f64 {
        self.mass().iter().sum::<f64>() * CM_PER_MORGAN
    }

    /// Linearly interpolate the cumulative genetic position (cM) at `position`.
    /// Positions outside the map are clamped to its ends.
    pub fn genetic_position(&self, position: f64) -> f64 {
        interp1d(&self.positions, &self.genetic_positions(), position).unwrap_or(0.0)
    }

    /// Extend the map to `length` with a final interval at `fill_rate`.
    ///
    /// A map which already ends at `length` is returned unchanged.
    pub fn pad_to(&self, length: f64, fill_rate: f64) -> Result<RateMap, MapError> {
        let end = self.sequence_length();
        if end > length {
            return Err(MapError::InvalidLength(format!(
                "map ends at {} which is beyond the padding target {}",
                end, length
            )));
        }
        if end == length {
            return Ok(self.clone());
        }
        let mut positions = self.positions.clone();
        let mut rates = self.rates.clone();
        positions.push(length);
        rates.push(fill_rate);
        RateMap::new(positions, rates)
    }

    /// The same breakpoints with every interval set to `rate`.
    pub fn with_constant_rate(&self, rate: f64) -> Result<RateMap, MapError> {
        RateMap::new(self.positions.clone(), vec![rate; self.rates.len()])
    }

    /// The `Position,Rate` rows, one per breakpoint except the last.
    pub fn samples(&self) -> Vec<RateSample> {
        self.positions
            .iter()
            .zip(self.rates.iter())
            .map(|(&position, &rate)| RateSample { position, rate })
            .collect()
    }

    /// Write the map as a `Position,Rate` CSV.
    pub fn write_csv(&self, filepath: &str) -> Result<(), MapError> {
        OutputFile::new(filepath, None).write_with(|writer| -> Result<(), MapError> {
            let mut wtr = csv::Writer::from_writer(writer);
            for sample in self.samples() {
                wtr.serialize(sample)?;
            }
            wtr.flush()?;
            Ok(())
        })
    }

    /// Read a `Position,Rate` CSV.
    ///
    /// The CSV carries no sequence end, so `end` closes the map if given.
    /// Without it the final row only provides the closing position.
    pub fn read_csv(filepath: &str, end: Option<f64>) -> Result<RateMap, MapError> {
        let reader = InputFile::new(filepath).reader()?;
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let samples = rdr
            .deserialize()
            .collect::<Result<Vec<RateSample>, csv::Error>>()?;
        RateMap::from_samples(&samples, end)
    }

    /// Convert to a four-column genetic map with `.` marker ids.
    pub fn to_genetic_map(&self, chrom: &str) -> GeneticMap {
        GeneticMap::from_rate_map(self, chrom)
    }

    /// Write the map in the four-column (chrom, id, cM, bp) format.
    pub fn write_map(&self, filepath: &str, chrom: &str) -> Result<(), MapError> {
        let genetic_map = self.to_genetic_map(chrom);
        if self.rates.iter().all(|&r| r == 0.0) {
            warn!("writing a map of zero total length to {}", filepath);
        }
        genetic_map.write(filepath)
    }
}
