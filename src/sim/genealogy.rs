use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::Continuable;
use crate::error::{Error, SimulationError};
use crate::file::InputFile;

/// A stretch `[left, right)` of ancestral material carried by `node`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub left: f64,
    pub right: f64,
    pub node: usize,
}

/// An uncoalesced lineage: sorted, disjoint segments of ancestral material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    segments: Vec<Segment>,
}

impl Lineage {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Leftmost ancestral position.
    pub fn left(&self) -> f64 {
        self.segments.first().map_or(0.0, |s| s.left)
    }

    /// Rightmost ancestral position.
    pub fn right(&self) -> f64 {
        self.segments.last().map_or(0.0, |s| s.right)
    }
}

/// Append `segment`, extending the last one when they abut on the same node.
fn push_segment(segments: &mut Vec<Segment>, segment: Segment) {
    match segments.last_mut() {
        Some(last) if last.node == segment.node && last.right == segment.left => {
            last.right = segment.right;
        }
        _ => segments.push(segment),
    }
}

/// How many lineages carry ancestral material over each interval
/// `[breaks[i], breaks[i + 1])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Coverage {
    breaks: Vec<f64>,
    counts: Vec<u32>,
}

impl Coverage {
    fn new(sequence_length: f64, lineages: u32) -> Self {
        Self {
            breaks: vec![0.0, sequence_length],
            counts: vec![lineages],
        }
    }

    /// Index of the break at `x`, inserting one if needed.
    fn split(&mut self, x: f64) -> usize {
        let at = self.breaks.partition_point(|&b| b < x);
        if at < self.breaks.len() && self.breaks[at] == x {
            return at;
        }
        if at == 0 || at == self.breaks.len() {
            return at.min(self.breaks.len() - 1);
        }
        self.breaks.insert(at, x);
        self.counts.insert(at, self.counts[at - 1]);
        at
    }

    /// Remove one lineage over `[left, right)`, returning the pieces with
    /// their new counts.
    fn decrement(&mut self, left: f64, right: f64) -> Vec<(f64, f64, u32)> {
        let first = self.split(left);
        let last = self.split(right);
        (first..last)
            .map(|i| {
                self.counts[i] = self.counts[i].saturating_sub(1);
                (self.breaks[i], self.breaks[i + 1], self.counts[i])
            })
            .collect()
    }
}

/// What happened during one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub start: f64,
    pub end: f64,
    pub population_size: u32,
    /// Mutations per base pair per generation applied to this epoch's branches.
    pub mutation_rate: f64,
    pub coalescences: usize,
    pub recombinations: usize,
    pub mutations: usize,
}

/// One parent edge of the genealogy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub child_id: usize,
    pub parent_id: usize,
    pub parent_height: f64,
    pub child_height: f64,
    pub left: f64,
    pub right: f64,
}

/// A mutation read back from the tables.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub position: f64,
    pub node: usize,
    pub time: f64,
}

/// Everything about an unfinished simulation that the tables do not hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    sequence_length: f64,
    ploidy: u32,
    num_samples: usize,
    time: f64,
    lineages: Vec<Lineage>,
    coverage: Coverage,
    epochs: Vec<EpochRecord>,
}

fn node_id(id: usize) -> Result<tskit::NodeId, SimulationError> {
    i32::try_from(id)
        .map(tskit::NodeId::from)
        .map_err(|_| SimulationError::InvalidParameter(format!("node id {} out of range", id)))
}

/// The simulated ancestral recombination graph handed from one epoch to the
/// next.
///
/// Nodes, edges, sites and mutations live in a [`tskit::TableCollection`].
/// Sample nodes are `0..num_samples`. Nodes are never reordered, so ids held by
/// the uncoalesced lineages stay valid across sorting and reloading.
pub struct Genealogy {
    tables: tskit::TableCollection,
    checkpoint: Checkpoint,
    /// Edge rows that have not had mutations placed on them yet.
    unmutated_from: usize,
    sites: HashMap<u64, tskit::SiteId>,
}

impl fmt::Debug for Genealogy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Genealogy")
            .field("checkpoint", &self.checkpoint)
            .field("edges", &self.tables.edges().iter().count())
            .field("mutations", &self.tables.mutations().iter().count())
            .finish()
    }
}

impl Genealogy {
    /// `num_samples` haploid sample nodes at time zero, each carrying the
    /// whole sequence, with the clock at `start_time`.
    pub fn new(
        num_samples: usize,
        ploidy: u32,
        sequence_length: f64,
        start_time: f64,
    ) -> Result<Self, SimulationError> {
        let count = u32::try_from(num_samples).map_err(|_| {
            SimulationError::InvalidParameter(format!("{} samples is too many", num_samples))
        })?;
        let mut tables = tskit::TableCollection::new(sequence_length)?;
        let mut lineages = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let id = tables.add_node(
                tskit::NodeFlags::new_sample(),
                0.0,
                tskit::PopulationId::NULL,
                tskit::IndividualId::NULL,
            )?;
            lineages.push(Lineage {
                segments: vec![Segment {
                    left: 0.0,
                    right: sequence_length,
                    node: usize::try_from(id)?,
                }],
            });
        }
        Ok(Self {
            tables,
            checkpoint: Checkpoint {
                sequence_length,
                ploidy,
                num_samples,
                time: start_time,
                lineages,
                coverage: Coverage::new(sequence_length, count),
                epochs: Vec::new(),
            },
            unmutated_from: 0,
            sites: HashMap::new(),
        })
    }

    pub fn tables(&self) -> &tskit::TableCollection {
        &self.tables
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.checkpoint.lineages
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.checkpoint.epochs
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn ploidy(&self) -> u32 {
        self.checkpoint.ploidy
    }

    /// Node times, indexed by node id.
    pub fn node_times(&self) -> Vec<f64> {
        self.tables
            .nodes()
            .iter()
            .map(|row| f64::from(row.time))
            .collect()
    }

    pub fn num_nodes(&self) -> usize {
        self.tables.nodes().iter().count()
    }

    /// Split lineage `index` at `position`. Returns false, changing nothing,
    /// if `position` is not strictly inside the lineage's ancestral span.
    pub(crate) fn recombine(&mut self, index: usize, position: f64) -> bool {
        let lineage = &mut self.checkpoint.lineages[index];
        if !(lineage.left() < position && position < lineage.right()) {
            return false;
        }
        let mut left = Vec::new();
        let mut right = Vec::new();
        for &segment in &lineage.segments {
            if segment.right <= position {
                left.push(segment);
            } else if segment.left >= position {
                right.push(segment);
            } else {
                left.push(Segment {
                    right: position,
                    ..segment
                });
                right.push(Segment {
                    left: position,
                    ..segment
                });
            }
        }
        lineage.segments = left;
        self.checkpoint.lineages.push(Lineage { segments: right });
        true
    }

    /// Merge lineages `i` and `j` at `time`, creating a parent node wherever
    /// their ancestral material overlaps. Material whose sample set is then
    /// fully coalesced leaves the simulation. Returns whether a node was made.
    pub(crate) fn coalesce(
        &mut self,
        i: usize,
        j: usize,
        time: f64,
    ) -> Result<bool, SimulationError> {
        let (hi, lo) = if i > j { (i, j) } else { (j, i) };
        let b = self.checkpoint.lineages.swap_remove(hi);
        let a = self.checkpoint.lineages.swap_remove(lo);

        let mut breaks: Vec<f64> = a
            .segments
            .iter()
            .chain(b.segments.iter())
            .flat_map(|s| [s.left, s.right])
            .collect();
        breaks.sort_by(|x, y| x.total_cmp(y));
        breaks.dedup();

        let mut parent: Option<usize> = None;
        let mut merged: Vec<Segment> = Vec::new();
        // (child, left, right)
        let mut edges: Vec<(usize, f64, f64)> = Vec::new();
        let (mut ia, mut ib) = (0, 0);
        for pair in breaks.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            while ia < a.segments.len() && a.segments[ia].right <= left {
                ia += 1;
            }
            while ib < b.segments.len() && b.segments[ib].right <= left {
                ib += 1;
            }
            let sa = a.segments.get(ia).filter(|s| s.left <= left);
            let sb = b.segments.get(ib).filter(|s| s.left <= left);
            match (sa, sb) {
                (Some(seg), None) | (None, Some(seg)) => push_segment(
                    &mut merged,
                    Segment {
                        left,
                        right,
                        node: seg.node,
                    },
                ),
                (Some(sa), Some(sb)) => {
                    let u = match parent {
                        Some(u) => u,
                        None => {
                            let id = self.tables.add_node(
                                tskit::NodeFlags::default(),
                                time,
                                tskit::PopulationId::NULL,
                                tskit::IndividualId::NULL,
                            )?;
                            let u = usize::try_from(id)?;
                            parent = Some(u);
                            u
                        }
                    };
                    for child in [sa.node, sb.node] {
                        match edges.iter_mut().rev().find(|e| e.0 == child) {
                            Some(edge) if edge.2 == left => edge.2 = right,
                            _ => edges.push((child, left, right)),
                        }
                    }
                    for (l, r, count) in self.checkpoint.coverage.decrement(left, right) {
                        if count > 1 {
                            push_segment(
                                &mut merged,
                                Segment {
                                    left: l,
                                    right: r,
                                    node: u,
                                },
                            );
                        }
                    }
                }
                (None, None) => {}
            }
        }

        if let Some(u) = parent {
            let u = node_id(u)?;
            for (child, left, right) in edges {
                self.tables.add_edge(left, right, u, node_id(child)?)?;
            }
        }
        if !merged.is_empty() {
            self.checkpoint.lineages.push(Lineage { segments: merged });
        }
        self.checkpoint.time = time;
        Ok(parent.is_some())
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.checkpoint.time = time;
    }

    pub(crate) fn push_epoch(&mut self, record: EpochRecord) {
        self.checkpoint.epochs.push(record);
    }

    pub(crate) fn set_epoch_mutation_rate(&mut self, rate: f64) {
        if let Some(epoch) = self.checkpoint.epochs.last_mut() {
            epoch.mutation_rate = rate;
        }
    }

    /// Edges that have not had mutations placed on them, and mark them as done.
    pub(crate) fn take_unmutated_edges(&mut self) -> Result<Vec<EdgeRecord>, SimulationError> {
        let edges = self.edges()?;
        let from = self.unmutated_from.min(edges.len());
        self.unmutated_from = edges.len();
        Ok(edges[from..].to_vec())
    }

    /// Record a mutation to the derived state `T` over ancestral `A`.
    pub(crate) fn add_mutation(
        &mut self,
        position: f64,
        node: usize,
        time: f64,
    ) -> Result<(), SimulationError> {
        let site = match self.sites.get(&position.to_bits()) {
            Some(&site) => site,
            None => {
                let site = self.tables.add_site(position, Some(b"A"))?;
                self.sites.insert(position.to_bits(), site);
                site
            }
        };
        self.tables
            .add_mutation(site, node_id(node)?, tskit::MutationId::NULL, time, Some(b"T"))?;
        if let Some(epoch) = self.checkpoint.epochs.last_mut() {
            epoch.mutations += 1;
        }
        Ok(())
    }

    /// Every edge in table order.
    pub fn edges(&self) -> Result<Vec<EdgeRecord>, SimulationError> {
        let times = self.node_times();
        self.tables
            .edges()
            .iter()
            .map(|row| -> Result<EdgeRecord, SimulationError> {
                let parent = usize::try_from(row.parent)?;
                let child = usize::try_from(row.child)?;
                Ok(EdgeRecord {
                    child_id: child,
                    parent_id: parent,
                    parent_height: times[parent],
                    child_height: times[child],
                    left: f64::from(row.left),
                    right: f64::from(row.right),
                })
            })
            .collect()
    }

    /// Every mutation, sorted by position.
    pub fn mutations(&self) -> Result<Vec<MutationRecord>, SimulationError> {
        let positions: Vec<f64> = self
            .tables
            .sites()
            .iter()
            .map(|row| f64::from(row.position))
            .collect();
        let mut mutations = self
            .tables
            .mutations()
            .iter()
            .map(|row| -> Result<MutationRecord, SimulationError> {
                Ok(MutationRecord {
                    position: positions[usize::try_from(row.site)?],
                    node: usize::try_from(row.node)?,
                    time: f64::from(row.time),
                })
            })
            .collect::<Result<Vec<_>, SimulationError>>()?;
        mutations.sort_by(|a, b| a.position.total_cmp(&b.position));
        Ok(mutations)
    }

    /// Number of marginal trees along the sequence.
    pub fn num_trees(&self) -> Result<usize, SimulationError> {
        let length = self.checkpoint.sequence_length;
        let mut breakpoints: Vec<f64> = self
            .edges()?
            .iter()
            .flat_map(|e| [e.left, e.right])
            .filter(|&x| x > 0.0 && x < length)
            .collect();
        breakpoints.sort_by(|a, b| a.total_cmp(b));
        breakpoints.dedup();
        Ok(breakpoints.len() + 1)
    }

    /// A sorted, indexed copy of the tables.
    pub fn sorted_tables(&self) -> Result<tskit::TableCollection, tskit::TskitError> {
        let mut tables = self.tables.deepcopy()?;
        tables.full_sort(tskit::TableSortOptions::default())?;
        tables.build_index()?;
        tables.compute_mutation_parents(tskit::MutationParentsFlags::default())?;
        Ok(tables)
    }

    /// The tables as a tree sequence, which also checks their integrity.
    pub fn tree_sequence(&self) -> Result<tskit::TreeSequence, tskit::TskitError> {
        self.sorted_tables()?
            .tree_sequence(tskit::TreeSequenceFlags::default())
    }

    /// Time of the oldest node, once every position has coalesced.
    pub fn tmrca(&self) -> Option<f64> {
        if self.is_complete() {
            self.node_times().into_iter().reduce(f64::max)
        } else {
            None
        }
    }

    /// Generations covered by all epochs so far.
    pub fn total_elapsed(&self) -> f64 {
        self.checkpoint.epochs.iter().map(|e| e.end - e.start).sum()
    }

    /// Reload a genealogy written by [`crate::sim::Exportable::export`] from
    /// `<prefix>.trees` and `<prefix>.checkpoint.json`.
    pub fn load(prefix: &str) -> Result<Genealogy, Error> {
        let tables = tskit::TableCollection::new_from_file(format!("{}.trees", prefix))?;
        let reader = InputFile::new(&format!("{}.checkpoint.json", prefix)).reader()?;
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        let mut sites = HashMap::new();
        for row in tables.sites().iter() {
            sites.insert(f64::from(row.position).to_bits(), row.id);
        }
        let unmutated_from = tables.edges().iter().count();
        Ok(Genealogy {
            tables,
            checkpoint,
            unmutated_from,
            sites,
        })
    }
}

impl Continuable for Genealogy {
    fn time(&self) -> f64 {
        self.checkpoint.time
    }

    fn sequence_length(&self) -> f64 {
        self.checkpoint.sequence_length
    }

    fn num_samples(&self) -> usize {
        self.checkpoint.num_samples
    }

    fn is_complete(&self) -> bool {
        self.checkpoint.lineages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_without_recombination() {
        let mut g = Genealogy::new(4, 2, 100.0, 0.0).unwrap();
        assert!(g.coalesce(0, 3, 5.0).unwrap());
        assert_eq!(g.lineages().len(), 3);
        assert_eq!(g.num_nodes(), 5);
        assert_eq!(g.time(), 5.0);
        assert!(!g.is_complete());
        assert_eq!(g.tmrca(), None);

        g.coalesce(0, 1, 7.0).unwrap();
        g.coalesce(0, 1, 9.0).unwrap();
        assert!(g.is_complete());
        assert_eq!(g.tmrca(), Some(9.0));
        assert_eq!(g.num_nodes(), 7);
        let edges = g.edges().unwrap();
        assert_eq!(edges.len(), 6);
        assert!(edges.iter().all(|e| e.left == 0.0 && e.right == 100.0));
        assert_eq!(g.num_trees().unwrap(), 1);
        assert!(g.tree_sequence().is_ok());
    }

    #[test]
    fn test_recombination_splits_ancestry() {
        let mut g = Genealogy::new(2, 1, 100.0, 0.0).unwrap();
        assert!(!g.recombine(0, 0.0));
        assert!(!g.recombine(0, 100.0));
        assert!(g.recombine(0, 40.0));
        assert_eq!(g.lineages().len(), 3);
        assert_eq!(g.lineages()[0].right(), 40.0);
        assert_eq!(g.lineages()[2].left(), 40.0);

        // sample 1 meets only the right half of sample 0
        g.coalesce(1, 2, 3.0).unwrap();
        assert_eq!(g.lineages().len(), 2);
        assert!(!g.is_complete());
        g.coalesce(0, 1, 8.0).unwrap();
        assert!(g.is_complete());

        assert_eq!(g.num_trees().unwrap(), 2);
        let edges = g.edges().unwrap();
        assert!(edges.iter().any(|e| e.right == 40.0));
        assert!(edges.iter().any(|e| e.left == 40.0));
        assert!(g.tree_sequence().is_ok());
    }

    #[test]
    fn test_coverage_split_and_decrement() {
        let mut coverage = Coverage::new(10.0, 3);
        let pieces = coverage.decrement(2.0, 5.0);
        assert_eq!(pieces, vec![(2.0, 5.0, 2)]);
        assert_eq!(coverage.breaks, vec![0.0, 2.0, 5.0, 10.0]);
        assert_eq!(coverage.counts, vec![3, 2, 3]);
        let pieces = coverage.decrement(0.0, 10.0);
        assert_eq!(pieces, vec![(0.0, 2.0, 2), (2.0, 5.0, 1), (5.0, 10.0, 2)]);
    }
}
