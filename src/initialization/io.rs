use crate::coupling::{DegeneracySpec, FrameSelection};
use crate::defaults::*;
use crate::initialization::SystemTopology;
use crate::interface::OrbitalState;
use anyhow::{Context, Result};
use chemfiles::{Frame, Trajectory};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_verbose() -> i8 {
    VERBOSE
}
fn default_nn_cutoff() -> f64 {
    NN_CUTOFF
}
fn default_state() -> OrbitalState {
    STATE.parse().unwrap_or(OrbitalState::Homo)
}
fn default_n_threads() -> usize {
    N_THREADS
}
fn default_output() -> String {
    String::from(OUTPUT_FILE_NAME)
}
fn default_solver_command() -> String {
    String::from(SOLVER_COMMAND)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SolverConfig {
    #[serde(default = "default_solver_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            command: default_solver_command(),
            args: Vec::new(),
        }
    }
}

/// Settings of a coupling calculation. Tables have to come after the plain
/// values, otherwise the struct can not be written as TOML.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Configuration {
    #[serde(default = "default_verbose")]
    pub verbose: i8,
    #[serde(default = "default_nn_cutoff")]
    pub nn_cutoff: f64,
    #[serde(default = "default_state")]
    pub state: OrbitalState,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub stop: Option<usize>,
    #[serde(default)]
    pub step: Option<usize>,
    #[serde(default = "default_n_threads")]
    pub n_threads: usize,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default)]
    pub degeneracy: Option<DegeneracySpec>,
    #[serde(default)]
    pub solver: SolverConfig,
}

impl Configuration {
    /// Reads the configuration file. If it does not exist in the directory
    /// the default settings are used and written to the file, so that the
    /// user can see all options.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_file_path: &Path = path.as_ref();
        let config_string: String = if config_file_path.exists() {
            fs::read_to_string(config_file_path).with_context(|| {
                format!("Unable to read config file {}", config_file_path.display())
            })?
        } else {
            String::from("")
        };
        let config: Self = toml::from_str(&config_string).with_context(|| {
            format!("Unable to parse config file {}", config_file_path.display())
        })?;
        if !config_file_path.exists() {
            fs::write(config_file_path, toml::to_string(&config)?).with_context(|| {
                format!("Unable to write config file {}", config_file_path.display())
            })?;
        }
        Ok(config)
    }

    /// Configuration from the default file in the working directory.
    pub fn new() -> Result<Self> {
        Self::from_file(CONFIG_FILE_NAME)
    }

    pub fn selection(&self) -> FrameSelection {
        FrameSelection {
            start: self.start,
            stop: self.stop,
            step: self.step,
        }
    }
}

/// Read the first frame of a structure file like .pdb or .gro. If the file
/// does not contain any bonds they are guessed from the interatomic distances.
pub fn read_file_to_frame(filename: &str) -> Result<Frame> {
    let mut trajectory: Trajectory = Trajectory::open(filename, 'r')
        .with_context(|| format!("Unable to open structure file {}", filename))?;
    let mut frame: Frame = Frame::new();
    // if multiple geometries are contained in the file, we will only use the first one
    trajectory
        .read(&mut frame)
        .with_context(|| format!("Unable to read structure file {}", filename))?;
    if frame.topology().bonds_count() == 0 {
        debug!("No bonds found in {}, guessing them from distances", filename);
        frame.guess_bonds()?;
    }
    Ok(frame)
}

/// Extract the elements, residue names and bonds from a [Frame](chemfiles::Frame)
pub fn frame_to_topology(frame: &Frame) -> Result<SystemTopology> {
    let topology = frame.topology();
    let mut elements: Vec<String> = Vec::with_capacity(frame.size());
    let mut residue_names: Vec<String> = Vec::with_capacity(frame.size());
    for i in 0..frame.size() {
        let atom = frame.atom(i);
        // the atom type is the element for most formats, the name is the fallback
        let element: String = match atom.atomic_type() {
            t if t.trim().is_empty() => atom.name(),
            t => t,
        };
        elements.push(element);
        residue_names.push(
            topology
                .residue_for_atom(i)
                .map(|residue| residue.name())
                .unwrap_or_default(),
        );
    }
    SystemTopology::new(elements, residue_names, topology.bonds())
}

/// Reads the static topology of the system from a structure file.
pub fn read_topology(filename: &str) -> Result<SystemTopology> {
    let frame: Frame = read_file_to_frame(filename)?;
    let topology: SystemTopology = frame_to_topology(&frame)?;
    info!(
        "Read {} atoms in {} fragments from {}",
        topology.n_atoms(),
        topology.n_fragments(),
        filename
    );
    Ok(topology)
}

#[test]
fn configuration_defaults_from_empty_file() {
    let config: Configuration = toml::from_str("").unwrap();
    assert_eq!(config.nn_cutoff, NN_CUTOFF);
    assert_eq!(config.state, OrbitalState::Homo);
    assert_eq!(config.n_threads, 0);
    assert_eq!(config.output, OUTPUT_FILE_NAME);
    assert_eq!(config.degeneracy, None);
    assert_eq!(config.solver.command, SOLVER_COMMAND);
    // the defaults can be written back
    let written: String = toml::to_string(&config).unwrap();
    let reread: Configuration = toml::from_str(&written).unwrap();
    assert_eq!(reread, config);
}

#[test]
fn configuration_reads_all_degeneracy_shapes() {
    let uniform: Configuration = toml::from_str("degeneracy = 2\nstate = \"LUMO\"").unwrap();
    assert_eq!(uniform.degeneracy, Some(DegeneracySpec::Uniform(2)));
    assert_eq!(uniform.state, OrbitalState::Lumo);

    let per_fragment: Configuration = toml::from_str("degeneracy = [1, 2, 1]").unwrap();
    assert_eq!(per_fragment.degeneracy, Some(DegeneracySpec::PerFragment(vec![1, 2, 1])));

    let per_residue: Configuration =
        toml::from_str("step = 2\n[degeneracy]\nWAT = 1\nOIL = 3\n[solver]\ncommand = \"tb\"").unwrap();
    match per_residue.degeneracy {
        Some(DegeneracySpec::PerResidue(ref map)) => {
            assert_eq!(map["WAT"], 1);
            assert_eq!(map["OIL"], 3);
        }
        _ => panic!("expected a degeneracy per residue"),
    }
    assert_eq!(per_residue.selection().step, Some(2));
    assert_eq!(per_residue.solver.command, "tb");

    assert!(toml::from_str::<Configuration>("state = \"somo\"").is_err());
}
