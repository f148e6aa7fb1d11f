use crate::error::CouplingError;
use crate::fragments::{AtomSelection, Fragment};
use crate::initialization::FrameCoordinates;
use anyhow::{bail, Result};
use hashbrown::HashMap;
use ndarray::prelude::*;
use petgraph::unionfind::UnionFind;

/// Static part of a [Fragment]: which atoms and bonds belong to it.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentTopology {
    /// Atom indices of the whole system in increasing order
    pub atoms: Vec<usize>,
    /// Bonds in terms of positions in `atoms`
    pub bonds: Vec<[usize; 2]>,
    /// Residue name of the first atom
    pub label: String,
}

/// Everything about the system that does not change along the trajectory.
/// The topology is read once and shared by all frame tasks.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemTopology {
    pub elements: Vec<String>,
    pub residue_names: Vec<String>,
    pub bonds: Vec<[usize; 2]>,
    /// Connected components of the bonding graph, ordered by their first atom
    pub fragments: Vec<FragmentTopology>,
}

/// Splits the atoms into the connected components of the bonding graph.
/// The components are ordered by their lowest atom index.
pub fn fragmentation(n_atoms: usize, bonds: &[[usize; 2]]) -> Vec<Vec<usize>> {
    let mut union_find: UnionFind<usize> = UnionFind::new(n_atoms);
    for [a, b] in bonds.iter() {
        union_find.union(*a, *b);
    }
    let mut components: Vec<Vec<usize>> = Vec::new();
    // representative of the union find set -> index of the component
    let mut root_to_component: HashMap<usize, usize> = HashMap::new();
    for atom in 0..n_atoms {
        let root: usize = union_find.find(atom);
        let n_components: usize = components.len();
        let idx: usize = *root_to_component.entry(root).or_insert(n_components);
        if idx == components.len() {
            components.push(Vec::new());
        }
        components[idx].push(atom);
    }
    components
}

impl SystemTopology {
    pub fn new(
        elements: Vec<String>,
        residue_names: Vec<String>,
        bonds: Vec<[usize; 2]>,
    ) -> Result<Self> {
        let n_atoms: usize = elements.len();
        if residue_names.len() != n_atoms {
            bail!(
                "{} residue names were given for {} atoms",
                residue_names.len(),
                n_atoms
            );
        }
        if let Some([a, b]) = bonds.iter().find(|[a, b]| *a >= n_atoms || *b >= n_atoms) {
            bail!("bond {}-{} refers to an atom outside of the system", a, b);
        }

        let mut fragments: Vec<FragmentTopology> = fragmentation(n_atoms, &bonds)
            .into_iter()
            .map(|atoms| FragmentTopology {
                label: residue_names[atoms[0]].clone(),
                atoms,
                bonds: Vec::new(),
            })
            .collect();
        // global atom index -> (fragment, local index)
        let mut owner: Vec<(usize, usize)> = vec![(0, 0); n_atoms];
        for (f, fragment) in fragments.iter().enumerate() {
            for (local, atom) in fragment.atoms.iter().enumerate() {
                owner[*atom] = (f, local);
            }
        }
        for [a, b] in bonds.iter() {
            let (f, local_a): (usize, usize) = owner[*a];
            let local_b: usize = owner[*b].1;
            fragments[f].bonds.push([local_a, local_b]);
        }

        Ok(SystemTopology {
            elements,
            residue_names,
            bonds,
            fragments,
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.elements.len()
    }

    pub fn n_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Residue name of the first residue of every fragment.
    pub fn fragment_labels(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.label.clone()).collect()
    }

    /// Builds the [Fragment]s of one frame from its coordinates.
    pub fn fragments_for_frame(&self, frame: &FrameCoordinates) -> Result<Vec<Fragment>> {
        if frame.positions.nrows() != self.n_atoms() {
            return Err(CouplingError::AtomCountMismatch {
                expected: self.n_atoms(),
                found: frame.positions.nrows(),
            }
            .into());
        }
        let fragments: Vec<Fragment> = self
            .fragments
            .iter()
            .enumerate()
            .map(|(index, topology)| Fragment {
                index,
                label: topology.label.clone(),
                atoms: AtomSelection {
                    indices: topology.atoms.clone(),
                    elements: topology
                        .atoms
                        .iter()
                        .map(|atom| self.elements[*atom].clone())
                        .collect(),
                    positions: frame.positions.select(Axis(0), &topology.atoms),
                },
                bonds: topology.bonds.clone(),
            })
            .collect();
        Ok(fragments)
    }
}

#[test]
fn fragmentation_orders_components_by_first_atom() {
    // atoms 0-3-4 form one molecule, 1-2 another, 5 is alone
    let components: Vec<Vec<usize>> = fragmentation(6, &[[3, 4], [1, 2], [0, 3]]);
    assert_eq!(components, vec![vec![0, 3, 4], vec![1, 2], vec![5]]);
}

#[test]
fn topology_builds_fragments_of_a_frame() {
    let topology: SystemTopology = SystemTopology::new(
        vec!["O", "H", "H", "C", "O"].into_iter().map(String::from).collect(),
        vec!["WAT", "WAT", "WAT", "CO", "CO"].into_iter().map(String::from).collect(),
        vec![[0, 1], [0, 2], [3, 4]],
    )
    .unwrap();
    assert_eq!(topology.n_fragments(), 2);
    assert_eq!(topology.fragment_labels(), vec!["WAT", "CO"]);
    assert_eq!(topology.fragments[1].bonds, vec![[0, 1]]);

    let frame: FrameCoordinates = FrameCoordinates {
        positions: Array2::from_shape_fn((5, 3), |(i, j)| (3 * i + j) as f64),
        cell: None,
    };
    let fragments: Vec<Fragment> = topology.fragments_for_frame(&frame).unwrap();
    assert_eq!(fragments[1].atoms.indices, vec![3, 4]);
    assert_eq!(fragments[1].atoms.elements, vec!["C", "O"]);
    assert_eq!(fragments[1].atoms.positions, array![[9.0, 10.0, 11.0], [12.0, 13.0, 14.0]]);

    let short: FrameCoordinates = FrameCoordinates {
        positions: Array2::zeros((4, 3)),
        cell: None,
    };
    let error = topology.fragments_for_frame(&short).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::AtomCountMismatch { expected: 5, found: 4 })
    ));
}
