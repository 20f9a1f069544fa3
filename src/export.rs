//! Writers for simulated genealogies: the tables as a `.trees` file, VCF
//! genotypes, a CSV table of parent edges, and a JSON checkpoint that lets a
//! later run continue the genealogy.
use log::info;
use std::io::Write;

use crate::error::Error;
use crate::file::OutputFile;
use crate::sim::genealogy::EdgeRecord;
use crate::sim::{Continuable, Exportable, Genealogy};

/// Child edges of every node, as `(left, right, child)`.
fn child_index(edges: &[EdgeRecord], num_nodes: usize) -> Vec<Vec<(f64, f64, usize)>> {
    let mut children = vec![Vec::new(); num_nodes];
    for edge in edges {
        children[edge.parent_id].push((edge.left, edge.right, edge.child_id));
    }
    children
}

/// Samples below `node` in the marginal tree at `position`.
fn samples_below(
    children: &[Vec<(f64, f64, usize)>],
    num_samples: usize,
    node: usize,
    position: f64,
    out: &mut Vec<usize>,
) {
    let mut stack = vec![node];
    while let Some(id) = stack.pop() {
        if id < num_samples {
            out.push(id);
        }
        stack.extend(
            children[id]
                .iter()
                .filter(|&&(left, right, _)| left <= position && position < right)
                .map(|&(_, _, child)| child),
        );
    }
}

impl Genealogy {
    /// Write a VCF with one phased diploid (or `ploidy`-ploid) column per individual.
    ///
    /// Positions are 1-based integers; mutations landing on the same base keep
    /// separate records.
    pub fn write_vcf(&self, writer: &mut dyn Write, chrom: &str) -> Result<(), Error> {
        let ploidy = self.ploidy().max(1) as usize;
        let num_samples = self.num_samples();
        let individuals = num_samples / ploidy;
        let children = child_index(&self.edges()?, self.num_nodes());

        writeln!(writer, "##fileformat=VCFv4.2")?;
        writeln!(writer, "##source=epochmap {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(writer, "##FILTER=<ID=PASS,Description=\"All filters passed\">")?;
        writeln!(
            writer,
            "##contig=<ID={},length={}>",
            chrom,
            self.sequence_length().ceil() as u64
        )?;
        writeln!(
            writer,
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
        )?;
        write!(writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
        for i in 0..individuals {
            write!(writer, "\ttsk_{}", i)?;
        }
        writeln!(writer)?;

        let mut carriers = vec![false; num_samples];
        let mut below = Vec::new();
        for mutation in self.mutations()? {
            carriers.iter_mut().for_each(|c| *c = false);
            below.clear();
            samples_below(&children, num_samples, mutation.node, mutation.position, &mut below);
            for &sample in &below {
                carriers[sample] = true;
            }
            let position = mutation.position.floor() as u64 + 1;
            write!(writer, "{}\t{}\t.\tA\tT\t.\tPASS\t.\tGT", chrom, position)?;
            for individual in carriers.chunks(ploidy).take(individuals) {
                let genotype: Vec<&str> = individual
                    .iter()
                    .map(|&derived| if derived { "1" } else { "0" })
                    .collect();
                write!(writer, "\t{}", genotype.join("|"))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Write the parent edges as CSV.
    pub fn write_edges(&self, writer: &mut dyn Write) -> Result<(), Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        for edge in self.edges()? {
            wtr.serialize(edge)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the state the tables do not hold, reloadable with [`Genealogy::load`].
    pub fn write_checkpoint(&self, writer: &mut dyn Write) -> Result<(), serde_json::Error> {
        serde_json::to_writer(writer, self.checkpoint())
    }

    /// Dump the sorted tables in the `.trees` format.
    pub fn write_trees(&self, filepath: &str) -> Result<(), Error> {
        let tables = self.sorted_tables()?;
        OutputFile::new(filepath, None).write_to_path(|staged| -> Result<(), Error> {
            tables.dump(staged, tskit::TableOutputOptions::default())?;
            Ok(())
        })
    }
}

impl Exportable for Genealogy {
    /// Write `<prefix>.trees`, `<prefix>.vcf`, `<prefix>_edges.csv` and
    /// `<prefix>.checkpoint.json`.
    fn export(&self, prefix: &str, chrom: &str) -> Result<(), Error> {
        let trees = format!("{}.trees", prefix);
        self.write_trees(&trees)?;
        let vcf = format!("{}.vcf", prefix);
        OutputFile::new(&vcf, None).write_with(|w| self.write_vcf(w, chrom))?;
        let edges = format!("{}_edges.csv", prefix);
        OutputFile::new(&edges, None).write_with(|w| self.write_edges(w))?;
        let checkpoint = format!("{}.checkpoint.json", prefix);
        OutputFile::new(&checkpoint, None).write_with(|w| -> Result<(), Error> {
            self.write_checkpoint(w)?;
            Ok(())
        })?;
        info!(
            "exported {} nodes over {} samples to {}, {}, {} and {}",
            self.num_nodes(),
            self.num_samples(),
            trees,
            vcf,
            edges,
            checkpoint
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratemap::RateMap;
    use crate::sim::{run_stage, CoalescentSimulator, SimulationStage};
    use std::fs;
    use tempfile::tempdir;

    fn simulated() -> Genealogy {
        let stage = SimulationStage {
            population_size: 500,
            sample_size: 4,
            rate_map: RateMap::new(vec![0.0, 50_000.0], vec![1e-7]).unwrap(),
            mutation_rate: 1e-7,
            start_time: None,
            end_time: None,
            seed: None,
        };
        run_stage(&CoalescentSimulator::default(), &stage, None, 17).unwrap()
    }

    #[test]
    fn test_vcf_layout() {
        let g = simulated();
        let mut buf = Vec::new();
        g.write_vcf(&mut buf, "22").unwrap();
        let text = String::from_utf8(buf).unwrap();
        let header = text.lines().find(|l| l.starts_with("#CHROM")).unwrap();
        assert_eq!(header.split('\t').count(), 9 + 4);
        let records: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert!(!records.is_empty());
        assert_eq!(records.len(), g.mutations().unwrap().len());
        for record in records {
            let fields: Vec<&str> = record.split('\t').collect();
            assert_eq!(fields[0], "22");
            let pos: u64 = fields[1].parse().unwrap();
            assert!(pos >= 1 && pos <= 50_000);
            assert!(fields[9..].iter().all(|gt| gt.len() == 3));
            // segregating: some but not all genomes carry the derived allele
            assert!(fields[9..].iter().any(|gt| gt.contains('1')));
            assert!(fields[9..].iter().any(|gt| gt.contains('0')));
        }
    }

    #[test]
    fn test_edges_are_dated() {
        let g = simulated();
        let edges = g.edges().unwrap();
        assert!(!edges.is_empty());
        assert!(edges.iter().all(|e| e.parent_height > e.child_height));
        assert!(edges.iter().all(|e| e.left < e.right));
    }

    #[test]
    fn test_export_and_reload() {
        let g = simulated();
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("run");
        let prefix = prefix.to_str().unwrap();
        g.export(prefix, "22").unwrap();

        let edges = fs::read_to_string(format!("{}_edges.csv", prefix)).unwrap();
        assert!(edges.starts_with("child_id,parent_id,parent_height,child_height,left,right"));
        assert!(tskit::TreeSequence::load(format!("{}.trees", prefix)).is_ok());

        let back = Genealogy::load(prefix).unwrap();
        assert_eq!(back.checkpoint(), g.checkpoint());
        assert_eq!(back.num_nodes(), g.num_nodes());
        assert_eq!(back.mutations().unwrap(), g.mutations().unwrap());
        let key = |e: &EdgeRecord| (e.child_id, e.left.to_bits());
        let mut ours = g.edges().unwrap();
        let mut theirs = back.edges().unwrap();
        ours.sort_by_key(key);
        theirs.sort_by_key(key);
        assert_eq!(ours, theirs);
    }
}
