// config file
pub const CONFIG_FILE_NAME: &str = "coupling.toml";
// file the stacked coupling matrices are written to
pub const OUTPUT_FILE_NAME: &str = "h_frag.npz";
// print level
pub const VERBOSE: i8 = 0;
// maximal distance of closest approach (in angstrom) between two fragments
// that are treated as a dimer. 5.0 A is usually adequate.
pub const NN_CUTOFF: f64 = 5.0;
// electronic state of the fragments: "homo" or "lumo"
pub const STATE: &str = "homo";
// number of worker threads for the frame tasks, 0 runs all frames serially
pub const N_THREADS: usize = 0;
// program that computes the tight-binding hamiltonian and overlap matrices
pub const SOLVER_COMMAND: &str = "eht_bind";
