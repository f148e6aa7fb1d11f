//! Error types of the coupling calculation.
//!
//! The variants fall into three groups: configuration errors that are raised
//! before any frame is processed, consistency errors that are detected before
//! the block index arithmetic would silently go wrong, and failures of the
//! external programs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CouplingError {
    /// No degeneracy was given and it can not be determined automatically.
    #[error("no degeneracy was specified for the fragments")]
    MissingDegeneracy,

    /// A per-fragment degeneracy array does not have one entry per fragment.
    #[error("degeneracy has {found} entries but the system contains {expected} fragments")]
    DegeneracyLength { expected: usize, found: usize },

    /// The residue name of a fragment is missing in the degeneracy mapping.
    #[error("no degeneracy given for residue '{label}' (first residue of fragment {fragment})")]
    UnknownResidue { fragment: usize, label: String },

    /// The step of a frame selection must be at least one.
    #[error("the step of the frame selection must be larger than zero")]
    InvalidStep,

    /// The requested electronic state is neither the HOMO nor the LUMO.
    #[error("unknown electronic state '{0}', expected 'homo' or 'lumo'")]
    UnknownState(String),

    /// The number of fragments of a frame differs from the degeneracy vector.
    #[error("frame contains {found} fragments but the degeneracy was resolved for {expected}")]
    FragmentCountMismatch { expected: usize, found: usize },

    /// A frame does not contain the same number of atoms as the topology.
    #[error("frame contains {found} atoms but the topology has {expected}")]
    AtomCountMismatch { expected: usize, found: usize },

    /// The dimer locator returned a pair that does not index two distinct fragments.
    #[error("invalid dimer {i}-{j} for a system with {n_fragments} fragments")]
    InvalidDimer {
        i: usize,
        j: usize,
        n_fragments: usize,
    },

    /// The state reducer returned arrays that do not match the requested degeneracy.
    #[error("reduced state of fragment {fragment} has {found} states, expected {expected}")]
    ReducedStateShape {
        fragment: usize,
        expected: usize,
        found: usize,
    },

    /// The dimer coupling matrix does not fit the two fragment wavefunctions.
    #[error("coupling matrix of dimer {i}-{j} does not match the fragment basis sizes")]
    CouplingShape { i: usize, j: usize },

    /// A frame index beyond the end of the trajectory was requested.
    #[error("frame {frame} is out of range for a trajectory with {n_frames} frames")]
    FrameOutOfRange { frame: usize, n_frames: usize },

    /// The external tight-binding program exited unsuccessfully.
    #[error("tight-binding solver exited with {status}: {stderr}")]
    SolverFailed { status: String, stderr: String },

    /// The matrices returned by the tight-binding program do not fit the atom selection.
    #[error("solver returned a basis of {found} orbitals, expected {expected}")]
    BasisMismatch { expected: usize, found: usize },
}
