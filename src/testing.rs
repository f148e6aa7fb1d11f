//! Model implementations of the solver and reducer interfaces for unit tests.
use crate::fragments::{AtomSelection, Dimer};
use crate::initialization::{FrameCoordinates, SystemTopology};
use crate::interface::{
    split_dimer, DimerElectronicStructure, ElectronicStructure, OrbitalState, ReducedState,
    StateReducer, TightBindingSolver,
};
use anyhow::{bail, Result};
use ndarray::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Topology and coordinates of fragments placed on the x axis. Every inner
/// slice holds the x coordinates of the atoms of one fragment, consecutive
/// atoms of a fragment are bonded.
pub fn line_topology(fragments: &[Vec<f64>]) -> (SystemTopology, FrameCoordinates) {
    let mut elements: Vec<String> = Vec::new();
    let mut bonds: Vec<[usize; 2]> = Vec::new();
    let mut x: Vec<f64> = Vec::new();
    for fragment in fragments.iter() {
        for (k, position) in fragment.iter().enumerate() {
            if k > 0 {
                bonds.push([x.len() - 1, x.len()]);
            }
            elements.push(String::from("C"));
            x.push(*position);
        }
    }
    let residue_names: Vec<String> = vec![String::from("MOL"); elements.len()];
    let topology: SystemTopology = SystemTopology::new(elements, residue_names, bonds).unwrap();
    let frame: FrameCoordinates = FrameCoordinates {
        positions: Array2::from_shape_fn((x.len(), 3), |(i, j)| if j == 0 { x[i] } else { 0.0 }),
        cell: None,
    };
    (topology, frame)
}

/// One orbital per atom. The on-site energy depends on the atom index, the
/// hopping only on the interatomic distance.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModelSolver;

impl ModelSolver {
    pub fn onsite(atom: usize) -> f64 {
        -10.0 - 0.5 * atom as f64
    }

    pub fn hopping(r: f64) -> f64 {
        -(-r / 2.0).exp()
    }

    fn structure(selection: &AtomSelection) -> ElectronicStructure {
        let n: usize = selection.n_atoms();
        let hamiltonian: Array2<f64> = Array2::from_shape_fn((n, n), |(a, b)| {
            if a == b {
                Self::onsite(selection.indices[a])
            } else {
                let d: Array1<f64> = &selection.positions.row(a) - &selection.positions.row(b);
                Self::hopping(d.dot(&d).sqrt())
            }
        });
        ElectronicStructure {
            hamiltonian,
            overlap: Array2::eye(n),
            elements: selection.elements.clone(),
        }
    }
}

impl TightBindingSolver for ModelSolver {
    fn run_dimer(&self, dimer: &Dimer) -> Result<DimerElectronicStructure> {
        let n_first: usize = dimer.first.n_atoms();
        Ok(split_dimer(&Self::structure(&dimer.combined()), n_first, n_first))
    }

    fn run_fragment(&self, fragment: &AtomSelection) -> Result<ElectronicStructure> {
        Ok(Self::structure(fragment))
    }
}

/// [ModelSolver] that fails for every system containing a given atom.
#[derive(Clone, Copy, Debug)]
pub struct FailingSolver {
    pub fail_on_atom: usize,
}

impl TightBindingSolver for FailingSolver {
    fn run_dimer(&self, dimer: &Dimer) -> Result<DimerElectronicStructure> {
        if dimer.combined().indices.contains(&self.fail_on_atom) {
            bail!("model failure for atom {}", self.fail_on_atom);
        }
        ModelSolver.run_dimer(dimer)
    }

    fn run_fragment(&self, fragment: &AtomSelection) -> Result<ElectronicStructure> {
        if fragment.indices.contains(&self.fail_on_atom) {
            bail!("model failure for atom {}", self.fail_on_atom);
        }
        ModelSolver.run_fragment(fragment)
    }
}

/// Takes the first `degeneracy` basis functions as states and the diagonal of
/// the hamiltonian as their energies. Counts how often it was called.
#[derive(Debug, Default)]
pub struct CountingReducer {
    calls: AtomicUsize,
}

impl CountingReducer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StateReducer for CountingReducer {
    fn reduce(
        &self,
        structure: &ElectronicStructure,
        _state: OrbitalState,
        degeneracy: usize,
    ) -> Result<ReducedState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n_orbs: usize = structure.hamiltonian.nrows();
        if degeneracy == 0 || degeneracy > n_orbs {
            bail!("{} states requested from {} orbitals", degeneracy, n_orbs);
        }
        Ok(ReducedState {
            energies: structure.hamiltonian.diag().slice(s![..degeneracy]).to_owned(),
            wavefunction: Array2::<f64>::eye(n_orbs).slice(s![.., ..degeneracy]).to_owned(),
        })
    }
}
