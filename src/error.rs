use genomap::GenomeMapError;
use std::io;
use thiserror::Error;

use crate::file::FileError;

/// Errors raised while reading, building, or writing recombination maps.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("File reading error: {0}")]
    FileError(#[from] FileError),
    #[error("Missing field")]
    MissingField,
    #[error("Failed to parse line {line}: {msg}")]
    ParseError { line: usize, msg: String },
    #[error("Improper rate value, either NaN or negative ({0})")]
    ImproperRate(String),
    #[error("Map positions not strictly increasing ({0})")]
    NotSorted(String),
    #[error("Requested segment of {requested} bp but the map only spans {available} bp")]
    InsufficientRange { requested: f64, available: f64 },
    #[error("No pair of markers lies within [{start}, {end}]")]
    SparseWindow { start: f64, end: f64 },
    #[error("Intervals [{0}, {1}) and [{2}, {3}) overlap")]
    Overlap(f64, f64, f64, f64),
    #[error("Interval [{0}, {1}) is empty or reversed")]
    InvalidInterval(f64, f64),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid map length: {0}")]
    InvalidLength(String),
    #[error("Chromosome key '{0}' does not exist")]
    NoChrom(String),
    #[error("Map contains {0} chromosomes, one must be selected")]
    AmbiguousChrom(usize),
    #[error("GenomeMap Error: error updating GenomeMap")]
    GenomeMapError(#[from] GenomeMapError),
}

/// Errors raised by a simulation backend or by the epoch runner.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid time window: end time {end} must exceed start time {start}")]
    InvalidWindow { start: f64, end: f64 },
    #[error("Rate map has zero sequence length")]
    EmptyRateMap,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Epoch {index} starts at {start} but the previous epoch ends at {previous_end:?}")]
    BrokenChain {
        index: usize,
        start: f64,
        previous_end: Option<f64>,
    },
    #[error("Prior state does not match stage: {0}")]
    StateMismatch(String),
    #[error("Distribution error: {0}")]
    Distribution(String),
    #[error("Table collection error: {0}")]
    Tskit(#[from] tskit::TskitError),
}

/// Any error surfaced by this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Table collection error: {0}")]
    Tskit(#[from] tskit::TskitError),
}
