//! Four-column genetic map files and their HapMap counterparts.
//!
//! A genetic map file is whitespace-delimited with no header:
//!
//! ```text
//! 22      .       0.000000    16051347
//! 22      .       0.013990    16151347
//! 22      .       0.027335    16251347
//! ```
//!
//! The columns are chromosome, marker id (`.` when unknown), cumulative genetic
//! distance in centimorgans, and physical position in base pairs.
use csv::ReaderBuilder;
use genomap::GenomeMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::error::MapError;
use crate::file::{InputFile, OutputFile};
use crate::numeric::format_float;
use crate::ratemap::{RateMap, CM_MB_CONVERSION, CM_PER_MORGAN};

/// The chromosome label written when none is supplied.
pub const DEFAULT_CHROM: &str = "22";

/// One row of a four-column map file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticMapEntry {
    pub chrom: String,
    pub marker_id: String,
    /// Cumulative genetic distance in centimorgans.
    pub genetic_distance: f64,
    /// Physical position in base pairs.
    pub physical_position: f64,
}

/// A single chromosome's markers, stored as parallel columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneticMap {
    pub chrom: String,
    pub marker_ids: Vec<String>,
    /// Strictly increasing physical positions.
    pub positions: Vec<f64>,
    /// Non-decreasing cumulative map positions in centimorgans.
    pub map_pos: Vec<f64>,
}

impl GeneticMap {
    pub fn new(chrom: &str) -> Self {
        Self {
            chrom: chrom.to_string(),
            ..Default::default()
        }
    }

    /// Append a marker, checking sort order and that the map never shrinks.
    pub fn push(&mut self, marker_id: &str, map_pos: f64, position: f64) -> Result<(), MapError> {
        if let Some(&last) = self.positions.last() {
            if position <= last {
                return Err(MapError::NotSorted(format!("{}:{}", self.chrom, position)));
            }
        }
        if let Some(&last) = self.map_pos.last() {
            if map_pos < last {
                return Err(MapError::ImproperRate(format!(
                    "{}:{} map position decreases from {} to {}",
                    self.chrom, position, last, map_pos
                )));
            }
        }
        self.marker_ids.push(marker_id.to_string());
        self.positions.push(position);
        self.map_pos.push(map_pos);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn min_position(&self) -> Option<f64> {
        self.positions.first().copied()
    }

    pub fn max_position(&self) -> Option<f64> {
        self.positions.last().copied()
    }

    /// Physical distance between the first and last marker.
    pub fn extent(&self) -> f64 {
        match (self.min_position(), self.max_position()) {
            (Some(min), Some(max)) => max - min,
            _ => 0.0,
        }
    }

    /// Iterate over the rows of the map.
    pub fn entries(&self) -> impl Iterator<Item = GeneticMapEntry> + '_ {
        self.marker_ids
            .iter()
            .zip(self.map_pos.iter())
            .zip(self.positions.iter())
            .map(|((id, &cm), &pos)| GeneticMapEntry {
                chrom: self.chrom.clone(),
                marker_id: id.clone(),
                genetic_distance: cm,
                physical_position: pos,
            })
    }

    /// Build the cumulative map of a [`RateMap`], starting from zero.
    pub fn from_rate_map(rate_map: &RateMap, chrom: &str) -> Self {
        let positions = rate_map.positions().to_vec();
        Self {
            chrom: chrom.to_string(),
            marker_ids: vec![".".to_string(); positions.len()],
            map_pos: rate_map.genetic_positions(),
            positions,
        }
    }

    /// Per-interval rates in Morgans per base pair.
    pub fn rates(&self) -> Vec<f64> {
        self.positions
            .windows(2)
            .zip(self.map_pos.windows(2))
            .map(|(pos, cm)| (cm[1] - cm[0]) / CM_PER_MORGAN / (pos[1] - pos[0]))
            .collect()
    }

    /// Convert the whole map to a [`RateMap`].
    ///
    /// If the first marker is not at zero, a zero-rate interval is prepended so
    /// the map starts at position zero.
    pub fn to_rate_map(&self) -> Result<RateMap, MapError> {
        if self.len() < 2 {
            return Err(MapError::InvalidLength(format!(
                "chromosome {} has {} markers, at least two are needed",
                self.chrom,
                self.len()
            )));
        }
        let mut positions = self.positions.clone();
        let mut rates = self.rates();
        if positions[0] > 0.0 {
            positions.insert(0, 0.0);
            rates.insert(0, 0.0);
        }
        RateMap::new(positions, rates)
    }

    /// The markers with index in `first..=last`.
    pub fn select(&self, first: usize, last: usize) -> GeneticMap {
        GeneticMap {
            chrom: self.chrom.clone(),
            marker_ids: self.marker_ids[first..=last].to_vec(),
            positions: self.positions[first..=last].to_vec(),
            map_pos: self.map_pos[first..=last].to_vec(),
        }
    }

    /// Shift positions so the first marker is at zero, and map positions so
    /// the first marker has zero genetic distance.
    pub fn normalized(&self) -> GeneticMap {
        let pos0 = self.min_position().unwrap_or(0.0);
        let cm0 = self.map_pos.first().copied().unwrap_or(0.0);
        GeneticMap {
            chrom: self.chrom.clone(),
            marker_ids: self.marker_ids.clone(),
            positions: self.positions.iter().map(|p| p - pos0).collect(),
            map_pos: self.map_pos.iter().map(|cm| cm - cm0).collect(),
        }
    }

    /// Write the map in the four-column format.
    pub fn write(&self, filepath: &str) -> Result<(), MapError> {
        OutputFile::new(filepath, None).write_with(|writer| -> Result<(), MapError> {
            for entry in self.entries() {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}",
                    entry.chrom,
                    entry.marker_id,
                    format_float(entry.genetic_distance),
                    entry.physical_position
                )?;
            }
            Ok(())
        })
    }

    /// Write the map in HapMap format, with the rate column in cM/Mb.
    ///
    /// The final marker has no interval to its right and gets a rate of zero.
    pub fn write_hapmap(&self, filepath: &str) -> Result<(), MapError> {
        let precision = 8;
        let rates = self.rates();
        OutputFile::new(filepath, None).write_with(|writer| -> Result<(), MapError> {
            writeln!(writer, "Chromosome\tPosition(bp)\tRate(cM/Mb)\tMap(cM)")?;
            for (i, entry) in self.entries().enumerate() {
                let rate = rates.get(i).copied().unwrap_or(0.0) / CM_MB_CONVERSION;
                writeln!(
                    writer,
                    "{}\t{}\t{:.prec$}\t{}",
                    entry.chrom,
                    entry.physical_position,
                    rate,
                    format_float(entry.genetic_distance),
                    prec = precision
                )?;
            }
            Ok(())
        })
    }
}

fn parse_field(field: &str, line: usize, what: &str) -> Result<f64, MapError> {
    let value: f64 = field.parse().map_err(|_| MapError::ParseError {
        line,
        msg: format!("failed to parse {} from '{}'", what, field),
    })?;
    if !value.is_finite() {
        return Err(MapError::ParseError {
            line,
            msg: format!("{} '{}' is not finite", what, field),
        });
    }
    Ok(value)
}

/// Genetic maps for one or more chromosomes, in file order.
pub struct GeneticMaps {
    pub map: GenomeMap<GeneticMap>,
}

impl GeneticMaps {
    /// Read a four-column map file (plaintext or gzip).
    ///
    /// Blank lines and `#` comments are skipped. Any other line with fewer than
    /// four columns, or with a non-numeric distance or position, is an error.
    pub fn from_path(filepath: &str) -> Result<GeneticMaps, MapError> {
        let reader = InputFile::new(filepath).reader()?;
        let mut maps: GenomeMap<GeneticMap> = GenomeMap::new();

        for (i, result) in reader.lines().enumerate() {
            let line = result?;
            let lineno = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(MapError::ParseError {
                    line: lineno,
                    msg: format!("expected 4 columns, found {}", fields.len()),
                });
            }
            let chrom = fields[0];
            let map_pos = parse_field(fields[2], lineno, "genetic distance")?;
            let position = parse_field(fields[3], lineno, "physical position")?;

            if let Some(genetic_map) = maps.get_mut(chrom) {
                genetic_map.push(fields[1], map_pos, position)?;
            } else {
                let mut genetic_map = GeneticMap::new(chrom);
                genetic_map.push(fields[1], map_pos, position)?;
                maps.insert(chrom, genetic_map)?;
            }
        }

        let maps = GeneticMaps { map: maps };
        for (chrom, genetic_map) in maps.iter() {
            debug!("read {} markers for chromosome {}", genetic_map.len(), chrom);
        }
        info!("read {} chromosome(s) from {}", maps.len(), filepath);
        Ok(maps)
    }

    /// Read a HapMap-formatted file, using its `Map(cM)` column.
    ///
    /// The header is optional and `#` comment lines are skipped, as with
    /// `recmap`'s HapMap reader.
    pub fn from_hapmap(filepath: &str) -> Result<GeneticMaps, MapError> {
        let input_file = InputFile::new(filepath);
        let has_header = input_file.has_header("Chromosome")?;
        let buf_reader = input_file.reader()?;

        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(has_header)
            .flexible(true)
            .from_reader(buf_reader);

        let mut maps: GenomeMap<GeneticMap> = GenomeMap::new();
        for (i, result) in rdr.records().enumerate() {
            let record = result?;
            let lineno = i + 1 + usize::from(has_header);
            if record.get(0).map_or(true, |s| s.starts_with('#')) {
                continue;
            }
            let chrom = record.get(0).ok_or(MapError::MissingField)?;
            let position = parse_field(
                record.get(1).ok_or(MapError::MissingField)?,
                lineno,
                "physical position",
            )?;
            let map_pos = parse_field(
                record.get(3).ok_or(MapError::MissingField)?,
                lineno,
                "genetic distance",
            )?;
            if let Some(genetic_map) = maps.get_mut(chrom) {
                genetic_map.push(".", map_pos, position)?;
            } else {
                let mut genetic_map = GeneticMap::new(chrom);
                genetic_map.push(".", map_pos, position)?;
                maps.insert(chrom, genetic_map)?;
            }
        }
        Ok(GeneticMaps { map: maps })
    }

    /// Return the number of chromosomes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over chromosome name and [`GeneticMap`] tuples.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &GeneticMap)> {
        self.map.iter()
    }

    /// Pick one chromosome. Without a name, the file must hold exactly one.
    pub fn select(&self, chrom: Option<&str>) -> Result<&GeneticMap, MapError> {
        match chrom {
            Some(name) => self
                .map
                .get(name)
                .ok_or_else(|| MapError::NoChrom(name.to_string())),
            None => {
                if self.len() != 1 {
                    return Err(MapError::AmbiguousChrom(self.len()));
                }
                self.iter()
                    .next()
                    .map(|(_, genetic_map)| genetic_map)
                    .ok_or(MapError::AmbiguousChrom(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::{assert_float_eq, assert_floats_eq};
    use std::fs;
    use tempfile::tempdir;

    const MAP: &str = "\
22\t.\t0.0\t1000
22\trs1\t0.5\t11000

22\t.\t0.5\t21000
22\t.\t2.5\t31000
";

    fn write_tmp(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_read_map() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "chr22.map", MAP);
        let maps = GeneticMaps::from_path(&path).unwrap();
        assert_eq!(maps.len(), 1);
        let gm = maps.select(None).unwrap();
        assert_eq!(gm.len(), 4);
        assert_eq!(gm.marker_ids[1], "rs1");
        assert_eq!(gm.extent(), 30000.0);
        // 0.5 cM over 10kb = 5e-3 M / 1e4 bp
        assert_floats_eq(&gm.rates(), &[5e-7, 0.0, 2e-6], 1e-15);
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "bad.map", "22\t.\t0.0\t1000\n22\t.\t0.3\n");
        match GeneticMaps::from_path(&path) {
            Err(MapError::ParseError { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected ParseError, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn test_non_numeric_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "bad.map", "22\t.\tzero\t1000\n");
        assert!(matches!(
            GeneticMaps::from_path(&path),
            Err(MapError::ParseError { line: 1, .. })
        ));
    }

    #[test]
    fn test_unsorted_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "bad.map", "22\t.\t0.0\t1000\n22\t.\t0.1\t900\n");
        assert!(matches!(
            GeneticMaps::from_path(&path),
            Err(MapError::NotSorted(_))
        ));
    }

    #[test]
    fn test_select_chromosomes() {
        let dir = tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "two.map",
            "1\t.\t0.0\t10\n1\t.\t0.1\t20\n2\t.\t0.0\t10\n2\t.\t0.3\t40\n",
        );
        let maps = GeneticMaps::from_path(&path).unwrap();
        assert!(matches!(maps.select(None), Err(MapError::AmbiguousChrom(2))));
        assert_eq!(maps.select(Some("2")).unwrap().len(), 2);
        assert!(matches!(maps.select(Some("3")), Err(MapError::NoChrom(_))));
    }

    #[test]
    fn test_to_rate_map_pads_origin() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "chr22.map", MAP);
        let maps = GeneticMaps::from_path(&path).unwrap();
        let rm = maps.select(None).unwrap().to_rate_map().unwrap();
        assert_eq!(rm.positions()[0], 0.0);
        assert_eq!(rm.rates()[0], 0.0);
        assert_eq!(rm.len(), 4);
        assert_float_eq(rm.total_map_length(), 2.5, 1e-9);
    }

    #[test]
    fn test_hapmap_roundtrip() {
        let dir = tempdir().unwrap();
        let path = write_tmp(&dir, "chr22.map", MAP);
        let gm = GeneticMaps::from_path(&path).unwrap().select(None).unwrap().clone();

        let hapmap = dir.path().join("chr22.hapmap");
        let hapmap = hapmap.to_str().unwrap();
        gm.write_hapmap(hapmap).unwrap();
        let text = fs::read_to_string(hapmap).unwrap();
        assert!(text.starts_with("Chromosome\tPosition(bp)\tRate(cM/Mb)\tMap(cM)\n"));
        // 0.5 cM over 0.01 Mb
        assert!(text.lines().nth(1).unwrap().contains("\t50.00000000\t"));

        let back = GeneticMaps::from_hapmap(hapmap).unwrap();
        let back = back.select(Some("22")).unwrap();
        assert_eq!(back.positions, gm.positions);
        assert_floats_eq(&back.map_pos, &gm.map_pos, 1e-9);
    }

    #[test]
    fn test_write_map_format() {
        let dir = tempdir().unwrap();
        let rm = RateMap::new(vec![0.0, 1_000_000.0, 2_000_000.0], vec![1e-8, 2e-8]).unwrap();
        let path = dir.path().join("out.map");
        let path = path.to_str().unwrap();
        rm.write_map(path, DEFAULT_CHROM).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text, "22\t.\t0\t0\n22\t.\t1\t1000000\n22\t.\t3\t2000000\n");

        let gm = GeneticMaps::from_path(path).unwrap();
        let back = gm.select(None).unwrap().to_rate_map().unwrap();
        assert_floats_eq(back.rates(), rm.rates(), 1e-15);
    }
}
