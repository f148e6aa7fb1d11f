use crate::fragments::{displacement, UnitCell};
use ndarray::prelude::*;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::VecDeque;

/// A set of atoms together with their element symbols and cartesian
/// coordinates (in angstrom). This is the unit of work that is handed
/// to the tight-binding solver.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomSelection {
    /// Indices of the atoms in the whole system
    pub indices: Vec<usize>,
    pub elements: Vec<String>,
    pub positions: Array2<f64>,
}

impl AtomSelection {
    pub fn n_atoms(&self) -> usize {
        self.indices.len()
    }

    pub fn centroid(&self) -> Array1<f64> {
        self.positions
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(3))
    }

    /// Returns a copy of the selection that is rigidly shifted by `shift`.
    pub fn translated(&self, shift: ArrayView1<f64>) -> AtomSelection {
        AtomSelection {
            indices: self.indices.clone(),
            elements: self.elements.clone(),
            positions: &self.positions + &shift,
        }
    }

    /// Joins two selections, the atoms of `self` come first.
    pub fn concatenate(&self, other: &AtomSelection) -> AtomSelection {
        let mut indices: Vec<usize> = self.indices.clone();
        indices.extend_from_slice(&other.indices);
        let mut elements: Vec<String> = self.elements.clone();
        elements.extend(other.elements.iter().cloned());
        let mut positions: Array2<f64> = Array2::zeros((indices.len(), 3));
        positions
            .slice_mut(s![..self.n_atoms(), ..])
            .assign(&self.positions);
        positions
            .slice_mut(s![self.n_atoms().., ..])
            .assign(&other.positions);
        AtomSelection {
            indices,
            elements,
            positions,
        }
    }
}

/// Rigid molecule of one frame, i.e. one connected component of the bonding graph.
#[derive(Clone, Debug)]
pub struct Fragment {
    /// Position of the fragment in the decomposition of the system
    pub index: usize,
    /// Residue name of the first atom
    pub label: String,
    pub atoms: AtomSelection,
    /// Bonds in terms of the local atom indices `0..n_atoms`
    pub bonds: Vec<[usize; 2]>,
}

impl Fragment {
    pub fn n_atoms(&self) -> usize {
        self.atoms.n_atoms()
    }

    fn graph(&self) -> UnGraph<usize, ()> {
        let mut graph: UnGraph<usize, ()> = UnGraph::with_capacity(self.n_atoms(), self.bonds.len());
        for atom in 0..self.n_atoms() {
            graph.add_node(atom);
        }
        for [a, b] in self.bonds.iter() {
            graph.add_edge(NodeIndex::new(*a), NodeIndex::new(*b), ());
        }
        graph
    }

    /// True if at least one bond is stretched over more than half of the
    /// shortest cell vector, which means that the fragment is split between
    /// two periodic images.
    pub fn is_broken(&self, cell: Option<&UnitCell>) -> bool {
        let cell: &UnitCell = match cell {
            Some(cell) => cell,
            None => return false,
        };
        let half_box: f64 = 0.5 * cell.shortest_vector();
        self.bonds.iter().any(|[a, b]| {
            let d: Array1<f64> = &self.atoms.positions.row(*b) - &self.atoms.positions.row(*a);
            d.dot(&d).sqrt() > half_box
        })
    }

    /// Undo the splitting of the fragment across the periodic boundaries.
    /// The bonding graph is traversed breadth first starting from the first
    /// atom and every neighbour is moved to the image closest to the atom it
    /// was reached from.
    pub fn make_whole(&mut self, cell: Option<&UnitCell>) {
        if cell.is_none() || self.n_atoms() < 2 {
            return;
        }
        let graph: UnGraph<usize, ()> = self.graph();
        let mut visited: Vec<bool> = vec![false; self.n_atoms()];
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        visited[0] = true;
        queue.push_back(NodeIndex::new(0));

        while let Some(node) = queue.pop_front() {
            let u: usize = node.index();
            for neighbor in graph.neighbors(node) {
                let v: usize = neighbor.index();
                if visited[v] {
                    continue;
                }
                let d: Array1<f64> = displacement(
                    self.atoms.positions.row(u),
                    self.atoms.positions.row(v),
                    cell,
                );
                let new_position: Array1<f64> = &self.atoms.positions.row(u) + &d;
                self.atoms.positions.row_mut(v).assign(&new_position);
                visited[v] = true;
                queue.push_back(neighbor);
            }
        }
    }
}

#[test]
fn make_whole_joins_fragment_split_by_boundary() {
    // a chain of three atoms that crosses the boundary at x = 10
    let mut fragment: Fragment = Fragment {
        index: 0,
        label: String::from("MOL"),
        atoms: AtomSelection {
            indices: vec![0, 1, 2],
            elements: vec![String::from("C"); 3],
            positions: array![[9.0, 1.0, 1.0], [0.2, 1.0, 1.0], [1.4, 1.0, 1.0]],
        },
        bonds: vec![[0, 1], [1, 2]],
    };
    let cell: UnitCell = UnitCell::orthorhombic(10.0, 10.0, 10.0);
    assert!(fragment.is_broken(Some(&cell)));

    fragment.make_whole(Some(&cell));

    let expected: Array2<f64> = array![[9.0, 1.0, 1.0], [10.2, 1.0, 1.0], [11.4, 1.0, 1.0]];
    assert!(fragment.atoms.positions.abs_diff_eq(&expected, 1e-12));
    assert!(!fragment.is_broken(Some(&cell)));
}

#[test]
fn make_whole_without_cell_keeps_positions() {
    let positions: Array2<f64> = array![[9.0, 1.0, 1.0], [0.2, 1.0, 1.0]];
    let mut fragment: Fragment = Fragment {
        index: 3,
        label: String::from("MOL"),
        atoms: AtomSelection {
            indices: vec![4, 5],
            elements: vec![String::from("H"); 2],
            positions: positions.clone(),
        },
        bonds: vec![[0, 1]],
    };
    fragment.make_whole(None);
    assert_eq!(fragment.atoms.positions, positions);
    assert!(!fragment.is_broken(None));
}

#[test]
fn concatenated_selection_keeps_order() {
    let a: AtomSelection = AtomSelection {
        indices: vec![0],
        elements: vec![String::from("H")],
        positions: array![[0.0, 0.0, 0.0]],
    };
    let b: AtomSelection = AtomSelection {
        indices: vec![7, 8],
        elements: vec![String::from("O"), String::from("H")],
        positions: array![[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
    };
    let ab: AtomSelection = a.concatenate(&b.translated(array![0.0, 1.0, 0.0].view()));
    assert_eq!(ab.indices, vec![0, 7, 8]);
    assert_eq!(ab.elements, vec!["H", "O", "H"]);
    assert_eq!(ab.positions, array![[0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [2.0, 1.0, 0.0]]);
}
