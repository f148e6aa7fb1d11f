use anyhow::Result;
use clap::{crate_name, crate_version, Arg, Command};
use env_logger::Builder;
use log::{info, LevelFilter};
use rayon::{ThreadPool, ThreadPoolBuilder};
use rusty_coupling::coupling::{coupling_matrix, FrameAssembler, TrajectoryResult};
use rusty_coupling::fragments::NeighborSearch;
use rusty_coupling::initialization::{read_topology, Configuration, SystemTopology, TrajectoryFile};
use rusty_coupling::interface::{ExternalSolver, LowdinReducer};
use rusty_coupling::output::save_results;
use std::io::Write;
use std::sync::Arc;

fn main() -> Result<()> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("charge transport couplings between the fragments of a molecular dynamics trajectory")
        .arg(
            Arg::new("topology")
                .help("Structure file (.pdb, .gro, ...) that defines atoms, residues and bonds")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("trajectory")
                .help("Trajectory file with the coordinates of all frames")
                .required(true)
                .index(2),
        )
        .get_matches();

    // read the configuration file, if it does not exist in the directory
    // the default settings are written to it
    let config: Configuration = Configuration::new()?;

    let log_level: LevelFilter = match config.verbose {
        2 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        0 => LevelFilter::Info,
        -1 => LevelFilter::Warn,
        -2 => LevelFilter::Error,
        _ => LevelFilter::Info,
    };

    Builder::new()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(None, log_level)
        .init();

    // both arguments are required, clap stops before we get here without them
    let topology_file: &str = matches.value_of("topology").unwrap_or_default();
    let trajectory_file: &str = matches.value_of("trajectory").unwrap_or_default();

    let topology: Arc<SystemTopology> = Arc::new(read_topology(topology_file)?);
    let trajectory: TrajectoryFile = TrajectoryFile::new(trajectory_file);

    let solver: ExternalSolver = ExternalSolver::new(&config.solver.command, &config.solver.args);
    let reducer: LowdinReducer = LowdinReducer;
    let locator: NeighborSearch = NeighborSearch;
    let assembler: FrameAssembler =
        FrameAssembler::new(&solver, &reducer, &locator, config.nn_cutoff, config.state);

    let pool: Option<ThreadPool> = if config.n_threads > 0 {
        Some(ThreadPoolBuilder::new().num_threads(config.n_threads).build()?)
    } else {
        None
    };

    let result: TrajectoryResult = coupling_matrix(
        &trajectory,
        topology,
        &assembler,
        config.degeneracy.as_ref(),
        &config.selection(),
        pool.as_ref(),
    )?;
    save_results(&result, &config.output)?;
    info!("Finished: {} frames", result.n_frames());
    Ok(())
}
