//! Reconstructed hits and their per-event storage.

use strum_macros::Display;

use crate::geometry::Geometry;
use crate::transform::LocalPoint;

/// How the cluster position was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClusterKind {
    /// Plain centre of gravity of the 5×5 window.
    Simple,
    /// Went through charge unfolding. `overlap` is the largest fraction of
    /// projected charge given away to neighbours, in percent; 0 means no
    /// neighbour was found and the result equals the plain centre of gravity.
    Unfolded { overlap: u8 },
    /// Narrower than any real particle hit in both directions.
    NoiseRejected,
}

/// Shape-quality record kept for diagnostics and downstream cuts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeInfo {
    /// Measured / expected variance along the pad direction.
    pub pad_ratio: f64,
    /// Measured / expected variance along the time direction.
    pub time_ratio: f64,
    pub expected_pad_variance: f64,
    pub expected_time_variance: f64,
    /// Charge substituted for sub-threshold window cells.
    pub virtual_charge: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub sector: u16,
    pub row: u16,
    /// Charge-weighted pad coordinate.
    pub pad: f64,
    /// Charge-weighted time-bin coordinate.
    pub time: f64,
    /// Total charge of the (corrected) window.
    pub charge: f64,
    pub max_amplitude: f64,
    pub sigma_pad2: f64,
    pub sigma_time2: f64,
    pub kind: ClusterKind,
    /// Centroid within one bin of the row's pad or time boundary.
    pub edge: bool,
    pub shape: ShapeInfo,
    /// Position in the sector frame.
    pub position: LocalPoint,
    usage: u32,
}

impl Cluster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sector: usize,
        row: usize,
        pad: f64,
        time: f64,
        charge: f64,
        max_amplitude: f64,
        sigma_pad2: f64,
        sigma_time2: f64,
        kind: ClusterKind,
    ) -> Self {
        Self {
            sector: sector as u16,
            row: row as u16,
            pad,
            time,
            charge,
            max_amplitude,
            sigma_pad2,
            sigma_time2,
            kind,
            edge: false,
            shape: ShapeInfo::default(),
            position: LocalPoint::default(),
            usage: 0,
        }
    }

    /// Cluster at a known local position, for callers that already have one.
    pub fn at_position(sector: usize, row: usize, position: LocalPoint, charge: f64) -> Self {
        let mut cluster = Self::new(
            sector,
            row,
            0.0,
            0.0,
            charge,
            charge,
            0.5,
            0.5,
            ClusterKind::Simple,
        );
        cluster.position = position;
        cluster
    }

    /// Compact integer tag.
    ///
    /// `0` simple, `1 + overlap` unfolded, `-1` noise. Edge clusters map to
    /// `-10 - tag`, except edge noise which is `-2`.
    pub fn type_tag(&self) -> i32 {
        match (self.kind, self.edge) {
            (ClusterKind::NoiseRejected, false) => -1,
            (ClusterKind::NoiseRejected, true) => -2,
            (ClusterKind::Simple, edge) => edge_offset(0, edge),
            (ClusterKind::Unfolded { overlap }, edge) => edge_offset(1 + overlap as i32, edge),
        }
    }

    /// Number of tracks that currently claim this cluster.
    #[inline]
    pub fn usage(&self) -> u32 {
        self.usage
    }
}

#[inline]
fn edge_offset(base: i32, edge: bool) -> i32 {
    if edge {
        -10 - base
    } else {
        base
    }
}

/// Weak reference to a cluster in a [`ClusterStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterRef {
    pub sector: u16,
    pub row: u16,
    pub index: u32,
}

impl ClusterRef {
    pub fn new(sector: usize, row: usize, index: usize) -> Self {
        Self {
            sector: sector as u16,
            row: row as u16,
            index: index as u32,
        }
    }
}

/// All clusters of one event, one ordered vector per (sector, row) slot.
#[derive(Debug, Clone, Default)]
pub struct ClusterStore {
    n_rows: usize,
    rows: Vec<Vec<Cluster>>,
}

impl ClusterStore {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            n_rows: geometry.n_rows(),
            rows: vec![Vec::new(); geometry.n_row_slots()],
        }
    }

    #[inline]
    fn slot(&self, sector: usize, row: usize) -> usize {
        sector * self.n_rows + row
    }

    pub fn set_row(&mut self, sector: usize, row: usize, clusters: Vec<Cluster>) {
        let slot = self.slot(sector, row);
        self.rows[slot] = clusters;
    }

    pub fn push(&mut self, cluster: Cluster) -> ClusterRef {
        let (sector, row) = (cluster.sector as usize, cluster.row as usize);
        let slot = self.slot(sector, row);
        self.rows[slot].push(cluster);
        ClusterRef::new(sector, row, self.rows[slot].len() - 1)
    }

    #[inline]
    pub fn row(&self, sector: usize, row: usize) -> &[Cluster] {
        &self.rows[self.slot(sector, row)]
    }

    #[inline]
    pub fn get(&self, r: ClusterRef) -> &Cluster {
        &self.row(r.sector as usize, r.row as usize)[r.index as usize]
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    /// Every cluster with its reference, ordered by sector, row, index.
    pub fn iter(&self) -> impl Iterator<Item = (ClusterRef, &Cluster)> + '_ {
        let n_rows = self.n_rows;
        self.rows.iter().enumerate().flat_map(move |(slot, clusters)| {
            clusters
                .iter()
                .enumerate()
                .map(move |(i, c)| (ClusterRef::new(slot / n_rows, slot % n_rows, i), c))
        })
    }

    pub fn increment_usage(&mut self, r: ClusterRef) {
        let slot = self.slot(r.sector as usize, r.row as usize);
        self.rows[slot][r.index as usize].usage += 1;
    }

    pub fn reset_usage(&mut self) {
        for cluster in self.rows.iter_mut().flatten() {
            cluster.usage = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(kind: ClusterKind, edge: bool) -> Cluster {
        let mut c = Cluster::new(0, 0, 5.0, 10.0, 100.0, 40.0, 0.5, 0.5, kind);
        c.edge = edge;
        c
    }

    #[test]
    fn type_tags() {
        assert_eq!(cluster(ClusterKind::Simple, false).type_tag(), 0);
        assert_eq!(cluster(ClusterKind::Unfolded { overlap: 0 }, false).type_tag(), 1);
        assert_eq!(cluster(ClusterKind::Unfolded { overlap: 35 }, false).type_tag(), 36);
        assert_eq!(cluster(ClusterKind::NoiseRejected, false).type_tag(), -1);
        assert_eq!(cluster(ClusterKind::Simple, true).type_tag(), -10);
        assert_eq!(cluster(ClusterKind::Unfolded { overlap: 35 }, true).type_tag(), -46);
        assert_eq!(cluster(ClusterKind::NoiseRejected, true).type_tag(), -2);
    }

    #[test]
    fn edge_tags_never_collide_with_inner_tags() {
        let mut tags = Vec::new();
        for edge in [false, true] {
            tags.push(cluster(ClusterKind::Simple, edge).type_tag());
            tags.push(cluster(ClusterKind::NoiseRejected, edge).type_tag());
            for overlap in 0..=100 {
                tags.push(cluster(ClusterKind::Unfolded { overlap }, edge).type_tag());
            }
        }
        let n = tags.len();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), n, "every kind/edge pair has its own tag");
    }

    #[test]
    fn store_references_and_usage() {
        let geo = Geometry::uniform(2, 4, 100.0, 20, 50);
        let mut store = ClusterStore::new(&geo);
        assert!(store.is_empty());

        let mut a = cluster(ClusterKind::Simple, false);
        a.sector = 3;
        a.row = 2;
        let ra = store.push(a.clone());
        let rb = store.push(a);
        assert_eq!(rb, ClusterRef::new(3, 2, 1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.row(3, 2).len(), 2);

        store.increment_usage(ra);
        store.increment_usage(ra);
        assert_eq!(store.get(ra).usage(), 2);
        assert_eq!(store.get(rb).usage(), 0);

        let refs: Vec<ClusterRef> = store.iter().map(|(r, _)| r).collect();
        assert_eq!(refs, vec![ra, rb]);

        store.reset_usage();
        assert_eq!(store.get(ra).usage(), 0);
    }
}
