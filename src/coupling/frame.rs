use crate::coupling::BlockIndex;
use crate::error::CouplingError;
use crate::fragments::{Dimer, DimerLocator, Fragment, UnitCell};
use crate::initialization::{FrameCoordinates, SystemTopology};
use crate::interface::{
    DimerElectronicStructure, ElectronicStructure, OrbitalState, ReducedState, StateReducer,
    TightBindingSolver,
};
use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::debug;
use ndarray::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;

#[cfg(test)]
use crate::fragments::NeighborSearch;
#[cfg(test)]
use crate::testing::{line_topology, CountingReducer, FailingSolver, ModelSolver};

/// Builds the coupling matrix `H_frag` of a single frame from the three
/// collaborators: the dimer search, the tight-binding solver and the reduction
/// of the raw matrices to the frontier orbitals of each fragment.
#[derive(Clone, Copy)]
pub struct FrameAssembler<'a> {
    pub solver: &'a dyn TightBindingSolver,
    pub reducer: &'a dyn StateReducer,
    pub locator: &'a dyn DimerLocator,
    /// Distance of closest approach (in angstrom) below which two fragments form a dimer
    pub nn_cutoff: f64,
    pub state: OrbitalState,
}

/// Fills the diagonal of the block `range x range` with the state energies.
fn write_diagonal(h_frag: &mut Array2<f64>, range: Range<usize>, energies: ArrayView1<f64>) {
    h_frag
        .slice_mut(s![range.clone(), range])
        .diag_mut()
        .assign(&energies);
}

impl<'a> FrameAssembler<'a> {
    pub fn new(
        solver: &'a dyn TightBindingSolver,
        reducer: &'a dyn StateReducer,
        locator: &'a dyn DimerLocator,
        nn_cutoff: f64,
        state: OrbitalState,
    ) -> Self {
        FrameAssembler {
            solver,
            reducer,
            locator,
            nn_cutoff,
            state,
        }
    }

    /// Calls the state reducer and checks that it returned one energy and
    /// one MO vector for each requested state.
    fn reduce(
        &self,
        fragment: usize,
        structure: &ElectronicStructure,
        degeneracy: usize,
    ) -> Result<ReducedState> {
        let reduced: ReducedState = self
            .reducer
            .reduce(structure, self.state, degeneracy)
            .with_context(|| format!("reduction of the {} of fragment {} failed", self.state, fragment))?;
        if reduced.energies.len() != degeneracy || reduced.wavefunction.ncols() != degeneracy {
            return Err(CouplingError::ReducedStateShape {
                fragment,
                expected: degeneracy,
                found: reduced.energies.len().min(reduced.wavefunction.ncols()),
            }
            .into());
        }
        Ok(reduced)
    }

    /// Makes sure that the wavefunction of a fragment of a dimer is cached.
    /// The state is only computed the first time the fragment is seen in this
    /// frame, then its energies are written to the diagonal block.
    fn ensure_state(
        &self,
        fragment: usize,
        structure: &ElectronicStructure,
        degeneracy: &[usize],
        blocks: &BlockIndex,
        h_frag: &mut Array2<f64>,
        wavefunctions: &mut HashMap<usize, Array2<f64>>,
    ) -> Result<()> {
        if wavefunctions.contains_key(&fragment) {
            return Ok(());
        }
        if degeneracy[fragment] == 0 {
            // empty block, there is nothing to reduce
            wavefunctions.insert(fragment, Array2::zeros((structure.hamiltonian.nrows(), 0)));
            return Ok(());
        }
        let reduced: ReducedState = self.reduce(fragment, structure, degeneracy[fragment])?;
        write_diagonal(h_frag, blocks.range(fragment), reduced.energies.view());
        wavefunctions.insert(fragment, reduced.wavefunction);
        Ok(())
    }

    /// Computes `H_frag` for fragments of one frame. `degeneracy` holds the
    /// number of states of every fragment.
    pub fn assemble(
        &self,
        fragments: &mut [Fragment],
        cell: Option<&UnitCell>,
        degeneracy: ArrayView1<usize>,
    ) -> Result<Array2<f64>> {
        let n_fragments: usize = fragments.len();
        if degeneracy.len() != n_fragments {
            return Err(CouplingError::FragmentCountMismatch {
                expected: degeneracy.len(),
                found: n_fragments,
            }
            .into());
        }
        let degeneracy: Vec<usize> = degeneracy.to_vec();

        // make sure that all fragments are whole
        // ie a fragment isn't split between periodic images
        for fragment in fragments.iter_mut() {
            fragment.make_whole(cell);
        }
        let dimers: BTreeMap<(usize, usize), Dimer> =
            self.locator.find_dimers(fragments, cell, self.nn_cutoff)?;

        let blocks: BlockIndex = BlockIndex::from_degeneracy(&degeneracy);
        let size: usize = blocks.size();
        let mut h_frag: Array2<f64> = Array2::zeros((size, size));
        // wavefunctions of the fragments that were already part of a dimer
        let mut wavefunctions: HashMap<usize, Array2<f64>> = HashMap::new();

        // the map is sorted by the fragment indices, this fixes the order of the calculations
        for (&(i, j), dimer) in dimers.iter() {
            if i == j || i >= n_fragments || j >= n_fragments {
                return Err(CouplingError::InvalidDimer { i, j, n_fragments }.into());
            }
            debug!("Calculating dimer {}-{}", i, j);
            let result: DimerElectronicStructure = self
                .solver
                .run_dimer(dimer)
                .with_context(|| format!("tight-binding calculation of dimer {}-{} failed", i, j))?;

            self.ensure_state(i, &result.first, &degeneracy, &blocks, &mut h_frag, &mut wavefunctions)?;
            self.ensure_state(j, &result.second, &degeneracy, &blocks, &mut h_frag, &mut wavefunctions)?;

            let (range_i, range_j): (Range<usize>, Range<usize>) = (blocks.range(i), blocks.range(j));
            if range_i.is_empty() || range_j.is_empty() {
                continue;
            }
            let psi_i: &Array2<f64> = &wavefunctions[&i];
            let psi_j: &Array2<f64> = &wavefunctions[&j];
            if psi_i.nrows() != result.coupling.nrows() || psi_j.nrows() != result.coupling.ncols() {
                return Err(CouplingError::CouplingShape { i, j }.into());
            }
            // H = |<psi_i|H_ij|psi_j>|
            let coupling: Array2<f64> = psi_i.t().dot(&result.coupling).dot(psi_j).mapv(f64::abs);
            h_frag
                .slice_mut(s![range_i.clone(), range_j.clone()])
                .assign(&coupling);
            h_frag.slice_mut(s![range_j, range_i]).assign(&coupling.t());
        }

        // single fragment calculations for all fragments that are not part of a dimer
        for (i, fragment) in fragments.iter().enumerate() {
            if wavefunctions.contains_key(&i) || degeneracy[i] == 0 {
                continue;
            }
            debug!("Calculating lone fragment {}", i);
            let structure: ElectronicStructure = self
                .solver
                .run_fragment(&fragment.atoms)
                .with_context(|| format!("tight-binding calculation of fragment {} failed", i))?;
            let reduced: ReducedState = self.reduce(i, &structure, degeneracy[i])?;
            write_diagonal(&mut h_frag, blocks.range(i), reduced.energies.view());
        }
        Ok(h_frag)
    }

    /// Builds the fragments of a frame from the topology and assembles `H_frag`.
    pub fn compute(
        &self,
        topology: &SystemTopology,
        frame: &FrameCoordinates,
        degeneracy: ArrayView1<usize>,
    ) -> Result<Array2<f64>> {
        let mut fragments: Vec<Fragment> = topology.fragments_for_frame(frame)?;
        self.assemble(&mut fragments, frame.cell.as_ref(), degeneracy)
    }
}

#[cfg(test)]
fn assembler<'a>(
    solver: &'a dyn TightBindingSolver,
    reducer: &'a dyn StateReducer,
) -> FrameAssembler<'a> {
    FrameAssembler::new(solver, reducer, &NeighborSearch, 5.0, OrbitalState::Homo)
}

#[test]
fn three_fragments_with_one_dimer() {
    // fragment 0: one atom at x = 0, fragment 1: one atom far away,
    // fragment 2: two atoms at x = 3 and x = 4
    let (topology, frame) = line_topology(&[vec![0.0], vec![50.0], vec![3.0, 4.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let h: Array2<f64> = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, array![1, 1, 2].view())
        .unwrap();

    assert_eq!(h.dim(), (4, 4));
    assert!(h[[0, 0]] != 0.0);
    assert!(h[[1, 1]] != 0.0);
    assert!(h[[2, 2]] != 0.0 && h[[3, 3]] != 0.0);
    // energies only on the diagonal of a block
    assert_eq!(h[[2, 3]], 0.0);
    assert_eq!(h[[3, 2]], 0.0);
    // coupling between fragment 0 and 2
    assert!(h[[0, 2]] > 0.0 && h[[0, 3]] > 0.0);
    assert_eq!(h[[2, 0]], h[[0, 2]]);
    assert_eq!(h[[3, 0]], h[[0, 3]]);
    // no coupling to the isolated fragment
    assert_eq!(h[[0, 1]], 0.0);
    assert_eq!(h[[1, 2]], 0.0);
    assert_eq!(h[[1, 3]], 0.0);
    assert_eq!(h, h.t());
    assert_eq!(reducer.calls(), 3);
}

#[test]
fn coupling_block_keeps_dimer_order() {
    let (topology, frame) = line_topology(&[vec![0.0], vec![2.0, 3.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let h: Array2<f64> = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, array![1, 2].view())
        .unwrap();
    // the model reducer returns unit vectors, so the coupling block is the
    // absolute value of the off-diagonal block of the dimer hamiltonian
    let expected: Array1<f64> = array![
        ModelSolver::hopping(2.0).abs(),
        ModelSolver::hopping(3.0).abs()
    ];
    assert!(h.slice(s![0, 1..3]).abs_diff_eq(&expected, 1e-12));
    assert!(h.slice(s![1..3, 0]).abs_diff_eq(&expected, 1e-12));
}

#[test]
fn fragment_states_are_computed_once_per_frame() {
    // chain of four fragments, every neighbouring pair is a dimer
    let (topology, frame) = line_topology(&[vec![0.0], vec![3.0], vec![6.0], vec![9.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let degeneracy: Array1<usize> = array![1, 1, 1, 1];
    let h: Array2<f64> = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, degeneracy.view())
        .unwrap();
    assert_eq!(reducer.calls(), 4);

    // every diagonal block equals the one of an isolated calculation
    let fragments: Vec<Fragment> = topology.fragments_for_frame(&frame).unwrap();
    for (i, fragment) in fragments.iter().enumerate() {
        let structure: ElectronicStructure = ModelSolver.run_fragment(&fragment.atoms).unwrap();
        let alone: ReducedState = reducer.reduce(&structure, OrbitalState::Homo, 1).unwrap();
        assert_eq!(h[[i, i]], alone.energies[0]);
    }
    assert_eq!(h[[0, 2]], 0.0);
    assert!(h[[0, 1]] > 0.0 && h[[1, 2]] > 0.0 && h[[2, 3]] > 0.0);
}

#[test]
fn frame_without_dimers_is_block_diagonal() {
    let (topology, frame) = line_topology(&[vec![0.0, 1.0], vec![20.0, 21.0], vec![40.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let h: Array2<f64> = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, array![2, 2, 1].view())
        .unwrap();
    let blocks: BlockIndex = BlockIndex::from_degeneracy(&[2, 2, 1]);
    for i in 0..3 {
        for j in 0..3 {
            if i != j {
                assert!(h
                    .slice(s![blocks.range(i), blocks.range(j)])
                    .iter()
                    .all(|value| *value == 0.0));
            }
        }
    }
    assert!(h.diag().iter().all(|value| *value != 0.0));
    assert_eq!(reducer.calls(), 3);
}

#[test]
fn zero_degeneracy_is_never_reduced() {
    let (topology, frame) = line_topology(&[vec![0.0], vec![3.0], vec![30.0]]);
    // the counting reducer fails on a request for zero states
    let reducer: CountingReducer = CountingReducer::default();
    let h: Array2<f64> = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, array![1, 0, 0].view())
        .unwrap();
    assert_eq!(h.dim(), (1, 1));
    assert!(h[[0, 0]] != 0.0);
    assert_eq!(reducer.calls(), 1);
}

#[test]
fn degeneracy_must_match_fragment_count() {
    let (topology, frame) = line_topology(&[vec![0.0], vec![3.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let error = assembler(&ModelSolver, &reducer)
        .compute(&topology, &frame, array![1, 1, 1].view())
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::FragmentCountMismatch { expected: 3, found: 2 })
    ));
    assert_eq!(reducer.calls(), 0);
}

#[test]
fn solver_errors_are_propagated() {
    let (topology, frame) = line_topology(&[vec![0.0], vec![3.0], vec![30.0]]);
    let reducer: CountingReducer = CountingReducer::default();
    let solver: FailingSolver = FailingSolver { fail_on_atom: 2 };
    let error = assembler(&solver, &reducer)
        .compute(&topology, &frame, array![1, 1, 1].view())
        .unwrap_err();
    assert!(format!("{:#}", error).contains("fragment 2"));
}
