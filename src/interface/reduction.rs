use crate::constants::valence_electrons;
use crate::interface::{ElectronicStructure, OrbitalState, ReducedState, StateReducer};
use anyhow::{bail, Context, Result};
use ndarray::prelude::*;
use ndarray_linalg::{Eigh, UPLO};
use std::ops::Range;

#[cfg(test)]
use approx::assert_abs_diff_eq;

/// Solves the generalized eigenvalue problem `H C = S C e` of a fragment by
/// Löwdin orthogonalization and keeps the frontier orbitals.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowdinReducer;

impl LowdinReducer {
    /// Index of the highest occupied molecular orbital for a closed shell system.
    pub fn homo_index(elements: &[String]) -> Result<usize> {
        let mut n_elec: usize = 0;
        for element in elements.iter() {
            n_elec += valence_electrons(element)
                .with_context(|| format!("no valence electrons known for element '{}'", element))?
                as usize;
        }
        if n_elec == 0 {
            bail!("the system does not contain any electrons");
        }
        Ok((n_elec + 1) / 2 - 1)
    }

    /// Orbital energies in ascending order and the MO coefficients in the
    /// non-orthogonal atomic orbital basis.
    pub fn orbitals(structure: &ElectronicStructure) -> Result<(Array1<f64>, Array2<f64>)> {
        let (s_values, s_vectors): (Array1<f64>, Array2<f64>) =
            structure.overlap.eigh(UPLO::Lower)?;
        if s_values.iter().any(|value| *value <= 0.0) {
            bail!("the overlap matrix is not positive definite");
        }
        // X = S^{-1/2}
        let x: Array2<f64> = s_vectors
            .dot(&Array2::from_diag(&s_values.mapv(|value| 1.0 / value.sqrt())))
            .dot(&s_vectors.t());
        let h_orth: Array2<f64> = x.dot(&structure.hamiltonian).dot(&x);
        let (energies, vectors): (Array1<f64>, Array2<f64>) = h_orth.eigh(UPLO::Lower)?;
        Ok((energies, x.dot(&vectors)))
    }

    /// Orbitals that are kept for the requested state and degeneracy.
    fn selected_orbitals(
        homo: usize,
        n_orbs: usize,
        state: OrbitalState,
        degeneracy: usize,
    ) -> Result<Range<usize>> {
        let range: Range<usize> = match state {
            OrbitalState::Homo => {
                if degeneracy > homo + 1 {
                    bail!(
                        "{} degenerate HOMO states requested, but only {} orbitals are occupied",
                        degeneracy,
                        homo + 1
                    );
                }
                (homo + 1 - degeneracy)..(homo + 1)
            }
            OrbitalState::Lumo => (homo + 1)..(homo + 1 + degeneracy),
        };
        if range.end > n_orbs {
            bail!(
                "orbitals {}..{} requested, but the basis contains {} orbitals",
                range.start,
                range.end,
                n_orbs
            );
        }
        Ok(range)
    }
}

impl StateReducer for LowdinReducer {
    fn reduce(
        &self,
        structure: &ElectronicStructure,
        state: OrbitalState,
        degeneracy: usize,
    ) -> Result<ReducedState> {
        let homo: usize = Self::homo_index(&structure.elements)?;
        let (energies, coefficients): (Array1<f64>, Array2<f64>) = Self::orbitals(structure)?;
        let range: Range<usize> =
            Self::selected_orbitals(homo, energies.len(), state, degeneracy)?;
        Ok(ReducedState {
            energies: energies.slice(s![range.clone()]).to_owned(),
            wavefunction: coefficients.slice(s![.., range]).to_owned(),
        })
    }
}

#[test]
fn lowdin_reducer_two_level_system() {
    // two hydrogen atoms with alpha = -10, beta = -3 and an overlap of 0.2
    let structure: ElectronicStructure = ElectronicStructure {
        hamiltonian: array![[-10.0, -3.0], [-3.0, -10.0]],
        overlap: array![[1.0, 0.2], [0.2, 1.0]],
        elements: vec![String::from("H"), String::from("H")],
    };
    let homo: ReducedState = LowdinReducer
        .reduce(&structure, OrbitalState::Homo, 1)
        .unwrap();
    let lumo: ReducedState = LowdinReducer
        .reduce(&structure, OrbitalState::Lumo, 1)
        .unwrap();

    assert_abs_diff_eq!(homo.energies[0], -13.0 / 1.2, epsilon = 1e-10);
    assert_abs_diff_eq!(lumo.energies[0], -7.0 / 0.8, epsilon = 1e-10);
    assert_eq!(homo.wavefunction.dim(), (2, 1));
    // the orbitals are normalized with respect to the overlap matrix
    let norm: Array2<f64> = homo
        .wavefunction
        .t()
        .dot(&structure.overlap)
        .dot(&homo.wavefunction);
    assert_abs_diff_eq!(norm, array![[1.0]], epsilon = 1e-10);
    // bonding orbital, both coefficients have the same magnitude
    assert_abs_diff_eq!(
        homo.wavefunction[[0, 0]].abs(),
        homo.wavefunction[[1, 0]].abs(),
        epsilon = 1e-10
    );
}

#[test]
fn lowdin_reducer_rejects_states_outside_basis() {
    let structure: ElectronicStructure = ElectronicStructure {
        hamiltonian: array![[-10.0, -3.0], [-3.0, -10.0]],
        overlap: array![[1.0, 0.0], [0.0, 1.0]],
        elements: vec![String::from("H"), String::from("H")],
    };
    assert!(LowdinReducer.reduce(&structure, OrbitalState::Homo, 2).is_err());
    assert!(LowdinReducer.reduce(&structure, OrbitalState::Lumo, 2).is_err());
    assert_eq!(LowdinReducer::homo_index(&[String::from("C"), String::from("H")]).unwrap(), 2);
    assert!(LowdinReducer::homo_index(&[String::from("Qq")]).is_err());
}
