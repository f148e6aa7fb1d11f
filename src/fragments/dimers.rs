use crate::fragments::{displacement, AtomSelection, Fragment, UnitCell};
use anyhow::Result;
use itertools::Itertools;
use ndarray::prelude::*;
use std::collections::BTreeMap;

/// Two fragments that are close enough to be treated as one system by the
/// tight-binding solver. The geometry of `second` is translated into the
/// periodic image that is closest to `first`.
#[derive(Clone, Debug)]
pub struct Dimer {
    pub pair: (usize, usize),
    pub first: AtomSelection,
    pub second: AtomSelection,
}

impl Dimer {
    /// All atoms of the dimer, the atoms of the first fragment come first.
    pub fn combined(&self) -> AtomSelection {
        self.first.concatenate(&self.second)
    }
}

/// Finds all pairs of fragments with a distance of closest approach below a cutoff.
/// The keys of the returned map are ordered fragment index pairs `(i, j)` with `i < j`.
pub trait DimerLocator: Sync {
    fn find_dimers(
        &self,
        fragments: &[Fragment],
        cell: Option<&UnitCell>,
        cutoff: f64,
    ) -> Result<BTreeMap<(usize, usize), Dimer>>;
}

/// Brute force search over all fragment pairs using the minimum image convention.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeighborSearch;

impl NeighborSearch {
    /// Largest distance of an atom from the centroid.
    fn radius(selection: &AtomSelection, centroid: ArrayView1<f64>) -> f64 {
        selection
            .positions
            .outer_iter()
            .map(|pos| {
                let d: Array1<f64> = &pos - &centroid;
                d.dot(&d).sqrt()
            })
            .fold(0.0, f64::max)
    }

    /// Minimum atom-atom distance between two fragments together with the
    /// lattice translation that brings the closest atom of `b` next to `a`.
    fn closest_approach(
        a: &AtomSelection,
        b: &AtomSelection,
        cell: Option<&UnitCell>,
    ) -> (f64, Array1<f64>) {
        let mut min_dist: f64 = f64::INFINITY;
        let mut shift: Array1<f64> = Array1::zeros(3);
        for pos_a in a.positions.outer_iter() {
            for pos_b in b.positions.outer_iter() {
                let d: Array1<f64> = displacement(pos_a, pos_b, cell);
                let r: f64 = d.dot(&d).sqrt();
                if r < min_dist {
                    min_dist = r;
                    // wrapped minus unwrapped displacement is a lattice vector
                    shift = &d - &(&pos_b - &pos_a);
                }
            }
        }
        (min_dist, shift)
    }
}

impl DimerLocator for NeighborSearch {
    fn find_dimers(
        &self,
        fragments: &[Fragment],
        cell: Option<&UnitCell>,
        cutoff: f64,
    ) -> Result<BTreeMap<(usize, usize), Dimer>> {
        let centroids: Vec<Array1<f64>> = fragments.iter().map(|f| f.atoms.centroid()).collect();
        let radii: Vec<f64> = fragments
            .iter()
            .zip(centroids.iter())
            .map(|(f, c)| Self::radius(&f.atoms, c.view()))
            .collect();

        let mut dimers: BTreeMap<(usize, usize), Dimer> = BTreeMap::new();
        for (i, j) in (0..fragments.len()).tuple_combinations() {
            // skip pairs whose bounding spheres are further apart than the cutoff
            let d: Array1<f64> = displacement(centroids[i].view(), centroids[j].view(), cell);
            if d.dot(&d).sqrt() - radii[i] - radii[j] >= cutoff {
                continue;
            }
            let (min_dist, shift): (f64, Array1<f64>) =
                Self::closest_approach(&fragments[i].atoms, &fragments[j].atoms, cell);
            if min_dist < cutoff {
                dimers.insert(
                    (i, j),
                    Dimer {
                        pair: (i, j),
                        first: fragments[i].atoms.clone(),
                        second: fragments[j].atoms.translated(shift.view()),
                    },
                );
            }
        }
        Ok(dimers)
    }
}

#[cfg(test)]
fn point_fragment(index: usize, position: [f64; 3]) -> Fragment {
    Fragment {
        index,
        label: String::from("ATM"),
        atoms: AtomSelection {
            indices: vec![index],
            elements: vec![String::from("H")],
            positions: arr2(&[position]),
        },
        bonds: Vec::new(),
    }
}

#[test]
fn neighbor_search_finds_close_pairs_only() {
    let fragments: Vec<Fragment> = vec![
        point_fragment(0, [0.0, 0.0, 0.0]),
        point_fragment(1, [20.0, 0.0, 0.0]),
        point_fragment(2, [3.0, 0.0, 0.0]),
    ];
    let dimers = NeighborSearch.find_dimers(&fragments, None, 5.0).unwrap();
    let keys: Vec<(usize, usize)> = dimers.keys().cloned().collect();
    assert_eq!(keys, vec![(0, 2)]);
    assert_eq!(dimers[&(0, 2)].combined().indices, vec![0, 2]);
}

#[test]
fn neighbor_search_uses_minimum_image() {
    let fragments: Vec<Fragment> = vec![
        point_fragment(0, [0.5, 5.0, 5.0]),
        point_fragment(1, [9.5, 5.0, 5.0]),
    ];
    let cell: UnitCell = UnitCell::orthorhombic(10.0, 10.0, 10.0);
    assert!(NeighborSearch.find_dimers(&fragments, None, 2.0).unwrap().is_empty());

    let dimers = NeighborSearch.find_dimers(&fragments, Some(&cell), 2.0).unwrap();
    let dimer: &Dimer = &dimers[&(0, 1)];
    // the second fragment is moved next to the first one
    assert!(dimer
        .second
        .positions
        .abs_diff_eq(&array![[-0.5, 5.0, 5.0]], 1e-12));
}
