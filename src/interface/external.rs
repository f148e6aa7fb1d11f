use crate::error::CouplingError;
use crate::fragments::{AtomSelection, Dimer};
use crate::interface::{DimerElectronicStructure, ElectronicStructure, TightBindingSolver};
use anyhow::{Context, Result};
use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};

#[derive(Serialize)]
struct SolverAtom<'a> {
    element: &'a str,
    xyz: [f64; 3],
}

#[derive(Serialize)]
struct SolverInput<'a> {
    atoms: Vec<SolverAtom<'a>>,
}

impl<'a> From<&'a AtomSelection> for SolverInput<'a> {
    fn from(selection: &'a AtomSelection) -> Self {
        let atoms: Vec<SolverAtom> = selection
            .elements
            .iter()
            .zip(selection.positions.outer_iter())
            .map(|(element, pos)| SolverAtom {
                element: element.as_str(),
                xyz: [pos[0], pos[1], pos[2]],
            })
            .collect();
        SolverInput { atoms }
    }
}

/// Matrices as they are printed by the solver program.
#[derive(Deserialize, Debug)]
struct SolverOutput {
    hamiltonian: Vec<Vec<f64>>,
    overlap: Vec<Vec<f64>>,
    orbitals_per_atom: Vec<usize>,
}

fn square_matrix(rows: Vec<Vec<f64>>, n_orbs: usize) -> Result<Array2<f64>> {
    if rows.len() != n_orbs || rows.iter().any(|row| row.len() != n_orbs) {
        return Err(CouplingError::BasisMismatch {
            expected: n_orbs,
            found: rows.len(),
        }
        .into());
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_orbs, n_orbs), flat)?)
}

/// Handler for a tight-binding program (e.g. a wrapper around an extended
/// Hückel code) that is started once for every fragment and dimer.
/// The geometry is written as JSON to the standard input of the program:
///
/// `{"atoms": [{"element": "C", "xyz": [0.0, 0.0, 0.0]}, ...]}`
///
/// and the program has to print the matrices in the atomic orbital basis:
///
/// `{"hamiltonian": [[...]], "overlap": [[...]], "orbitals_per_atom": [4, 1, ...]}`
#[derive(Clone, Debug)]
pub struct ExternalSolver {
    pub command: String,
    pub args: Vec<String>,
}

impl ExternalSolver {
    pub fn new(command: &str, args: &[String]) -> Self {
        ExternalSolver {
            command: String::from(command),
            args: args.to_vec(),
        }
    }

    /// Runs the program for a selection and returns the raw matrices together
    /// with the number of atomic orbitals of every atom.
    fn execute(&self, selection: &AtomSelection) -> Result<(ElectronicStructure, Vec<usize>)> {
        let input: String = serde_json::to_string(&SolverInput::from(selection))?;
        debug!("Running {} for {} atoms", self.command, selection.n_atoms());

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Unable to run {}", self.command))?;
        // stdin is closed when it goes out of scope. A non-zero exit status
        // takes precedence over a broken pipe.
        let written: std::io::Result<()> = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(input.as_bytes()),
            None => Ok(()),
        };
        let out = child
            .wait_with_output()
            .with_context(|| format!("Unable to wait for {}", self.command))?;
        if !out.status.success() {
            return Err(CouplingError::SolverFailed {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            }
            .into());
        }
        written.with_context(|| format!("Unable to write the geometry to {}", self.command))?;

        let output: SolverOutput = serde_json::from_slice(&out.stdout)
            .with_context(|| format!("Unable to parse the output of {}", self.command))?;
        if output.orbitals_per_atom.len() != selection.n_atoms() {
            return Err(CouplingError::BasisMismatch {
                expected: selection.n_atoms(),
                found: output.orbitals_per_atom.len(),
            }
            .into());
        }
        let n_orbs: usize = output.orbitals_per_atom.iter().sum();
        let structure: ElectronicStructure = ElectronicStructure {
            hamiltonian: square_matrix(output.hamiltonian, n_orbs)?,
            overlap: square_matrix(output.overlap, n_orbs)?,
            elements: selection.elements.clone(),
        };
        Ok((structure, output.orbitals_per_atom))
    }
}

/// Splits the matrices of a dimer calculation at the orbital `n_orbs_first`.
/// The diagonal blocks are the structures of the two fragments and the upper
/// off-diagonal block is the coupling between them:
///
///      ( H_AA  H_AB )
///      ( H_BA  H_BB )
pub fn split_dimer(
    structure: &ElectronicStructure,
    n_orbs_first: usize,
    n_atoms_first: usize,
) -> DimerElectronicStructure {
    let h: ArrayView2<f64> = structure.hamiltonian.view();
    let s: ArrayView2<f64> = structure.overlap.view();
    DimerElectronicStructure {
        coupling: h.slice(s![..n_orbs_first, n_orbs_first..]).to_owned(),
        first: ElectronicStructure {
            hamiltonian: h.slice(s![..n_orbs_first, ..n_orbs_first]).to_owned(),
            overlap: s.slice(s![..n_orbs_first, ..n_orbs_first]).to_owned(),
            elements: structure.elements[..n_atoms_first].to_vec(),
        },
        second: ElectronicStructure {
            hamiltonian: h.slice(s![n_orbs_first.., n_orbs_first..]).to_owned(),
            overlap: s.slice(s![n_orbs_first.., n_orbs_first..]).to_owned(),
            elements: structure.elements[n_atoms_first..].to_vec(),
        },
    }
}

impl TightBindingSolver for ExternalSolver {
    fn run_dimer(&self, dimer: &Dimer) -> Result<DimerElectronicStructure> {
        let (structure, orbitals_per_atom): (ElectronicStructure, Vec<usize>) =
            self.execute(&dimer.combined())?;
        let n_atoms_first: usize = dimer.first.n_atoms();
        let n_orbs_first: usize = orbitals_per_atom[..n_atoms_first].iter().sum();
        Ok(split_dimer(&structure, n_orbs_first, n_atoms_first))
    }

    fn run_fragment(&self, fragment: &AtomSelection) -> Result<ElectronicStructure> {
        Ok(self.execute(fragment)?.0)
    }
}

#[test]
fn split_dimer_preserves_fragment_order() {
    let structure: ElectronicStructure = ElectronicStructure {
        hamiltonian: array![
            [-11.0, -0.5, -0.1],
            [-0.5, -12.0, -0.2],
            [-0.1, -0.2, -13.0]
        ],
        overlap: array![[1.0, 0.3, 0.01], [0.3, 1.0, 0.02], [0.01, 0.02, 1.0]],
        elements: vec![String::from("C"), String::from("N")],
    };
    // the first atom carries two orbitals, the second one
    let dimer: DimerElectronicStructure = split_dimer(&structure, 2, 1);
    assert_eq!(dimer.coupling, array![[-0.1], [-0.2]]);
    assert_eq!(dimer.first.hamiltonian, array![[-11.0, -0.5], [-0.5, -12.0]]);
    assert_eq!(dimer.first.overlap, array![[1.0, 0.3], [0.3, 1.0]]);
    assert_eq!(dimer.first.elements, vec!["C"]);
    assert_eq!(dimer.second.hamiltonian, array![[-13.0]]);
    assert_eq!(dimer.second.elements, vec!["N"]);
}

#[test]
fn external_solver_reads_json_from_stdout() {
    let script: String = String::from(
        "cat > /dev/null; echo '{\"hamiltonian\": [[-1.0, -0.2], [-0.2, -2.0]], \
         \"overlap\": [[1.0, 0.1], [0.1, 1.0]], \"orbitals_per_atom\": [1, 1]}'",
    );
    let solver: ExternalSolver = ExternalSolver::new("sh", &[String::from("-c"), script]);
    let dimer: Dimer = Dimer {
        pair: (0, 1),
        first: AtomSelection {
            indices: vec![0],
            elements: vec![String::from("H")],
            positions: array![[0.0, 0.0, 0.0]],
        },
        second: AtomSelection {
            indices: vec![1],
            elements: vec![String::from("H")],
            positions: array![[0.0, 0.0, 0.74]],
        },
    };
    let result: DimerElectronicStructure = solver.run_dimer(&dimer).unwrap();
    assert_eq!(result.coupling, array![[-0.2]]);
    assert_eq!(result.first.hamiltonian, array![[-1.0]]);
    assert_eq!(result.second.overlap, array![[1.0]]);
}

#[test]
fn external_solver_reports_failures() {
    let solver: ExternalSolver = ExternalSolver::new(
        "sh",
        &[String::from("-c"), String::from("cat > /dev/null; echo broken >&2; exit 3")],
    );
    let fragment: AtomSelection = AtomSelection {
        indices: vec![0],
        elements: vec![String::from("H")],
        positions: array![[0.0, 0.0, 0.0]],
    };
    let error = solver.run_fragment(&fragment).unwrap_err();
    match error.downcast_ref::<CouplingError>() {
        Some(CouplingError::SolverFailed { stderr, .. }) => assert_eq!(stderr, "broken"),
        _ => panic!("unexpected error: {}", error),
    }
}

#[test]
fn external_solver_reports_failure_without_reading_input() {
    // the input is much larger than a pipe buffer and never read
    let solver: ExternalSolver = ExternalSolver::new(
        "sh",
        &[String::from("-c"), String::from("echo 'unknown element' >&2; exit 3")],
    );
    let n_atoms: usize = 20_000;
    let fragment: AtomSelection = AtomSelection {
        indices: (0..n_atoms).collect(),
        elements: vec![String::from("Xx"); n_atoms],
        positions: Array2::from_shape_fn((n_atoms, 3), |(i, j)| (i * 3 + j) as f64 * 0.1),
    };
    let error = solver.run_fragment(&fragment).unwrap_err();
    match error.downcast_ref::<CouplingError>() {
        Some(CouplingError::SolverFailed { status, stderr }) => {
            assert_eq!(stderr, "unknown element");
            assert!(status.contains('3'));
        }
        _ => panic!("unexpected error: {:#}", error),
    }
}
