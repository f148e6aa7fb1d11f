pub use external::*;
pub use reduction::*;

use crate::error::CouplingError;
use crate::fragments::{AtomSelection, Dimer};
use anyhow::Result;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod external;
pub mod reduction;

/// Frontier orbital of a fragment that is used to describe charge transport:
/// the HOMO for hole transport and the LUMO for electron transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OrbitalState {
    Homo,
    Lumo,
}

impl FromStr for OrbitalState {
    type Err = CouplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "homo" => Ok(OrbitalState::Homo),
            "lumo" => Ok(OrbitalState::Lumo),
            _ => Err(CouplingError::UnknownState(String::from(s))),
        }
    }
}

impl std::convert::TryFrom<String> for OrbitalState {
    type Error = CouplingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrbitalState> for String {
    fn from(state: OrbitalState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for OrbitalState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrbitalState::Homo => write!(f, "homo"),
            OrbitalState::Lumo => write!(f, "lumo"),
        }
    }
}

/// Raw output of a tight-binding calculation in the atomic orbital basis.
#[derive(Clone, Debug)]
pub struct ElectronicStructure {
    pub hamiltonian: Array2<f64>,
    pub overlap: Array2<f64>,
    /// Element symbol of every atom of the calculated system
    pub elements: Vec<String>,
}

/// Result of the calculation of a dimer. `first` and `second` belong to the
/// fragments in the order of [Dimer::pair](crate::fragments::Dimer).
#[derive(Clone, Debug)]
pub struct DimerElectronicStructure {
    /// Hamiltonian block between the orbitals of the first and the second fragment
    pub coupling: Array2<f64>,
    pub first: ElectronicStructure,
    pub second: ElectronicStructure,
}

/// Orbital energies and MO coefficients of the retained states of one fragment.
#[derive(Clone, Debug)]
pub struct ReducedState {
    pub energies: Array1<f64>,
    /// MO coefficients with one column per state (n_orbitals x degeneracy)
    pub wavefunction: Array2<f64>,
}

/// External program that computes hamiltonian and overlap matrices.
pub trait TightBindingSolver: Sync {
    fn run_dimer(&self, dimer: &Dimer) -> Result<DimerElectronicStructure>;

    fn run_fragment(&self, fragment: &AtomSelection) -> Result<ElectronicStructure>;
}

/// Reduces the raw matrices of a fragment to the `degeneracy` frontier
/// orbitals of the requested kind.
pub trait StateReducer: Sync {
    fn reduce(
        &self,
        structure: &ElectronicStructure,
        state: OrbitalState,
        degeneracy: usize,
    ) -> Result<ReducedState>;
}

#[test]
fn orbital_state_parses_case_insensitive() {
    assert_eq!("HOMO".parse::<OrbitalState>().unwrap(), OrbitalState::Homo);
    assert_eq!(" lumo".parse::<OrbitalState>().unwrap(), OrbitalState::Lumo);
    assert!(matches!(
        "somo".parse::<OrbitalState>(),
        Err(CouplingError::UnknownState(_))
    ));
    assert_eq!(OrbitalState::Lumo.to_string(), "lumo");
}
