use crate::coupling::{resolve_degeneracy, DegeneracySpec, FrameAssembler};
use crate::error::CouplingError;
use crate::initialization::{FrameCoordinates, FrameSource, SystemTopology, TrajectoryOpener};
use crate::utils::Timer;
use anyhow::{Context, Result};
use log::{error, info};
use ndarray::prelude::*;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

#[cfg(test)]
use crate::fragments::NeighborSearch;
#[cfg(test)]
use crate::initialization::MemoryTrajectory;
#[cfg(test)]
use crate::interface::OrbitalState;
#[cfg(test)]
use crate::testing::{line_topology, CountingReducer, ModelSolver};
#[cfg(test)]
use rayon::ThreadPoolBuilder;

/// Frames of the trajectory that are processed, with the semantics of a
/// python slice `start:stop:step` that only allows positive steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSelection {
    pub start: Option<usize>,
    pub stop: Option<usize>,
    pub step: Option<usize>,
}

impl FrameSelection {
    /// Selects every frame of the trajectory.
    pub fn all() -> Self {
        FrameSelection::default()
    }

    /// Indices of the selected frames in increasing order. A stop beyond the
    /// end of the trajectory is clamped to the number of frames.
    pub fn indices(&self, n_frames: usize) -> Result<Vec<usize>, CouplingError> {
        let step: usize = self.step.unwrap_or(1);
        if step == 0 {
            return Err(CouplingError::InvalidStep);
        }
        let stop: usize = self.stop.unwrap_or(n_frames).min(n_frames);
        let start: usize = self.start.unwrap_or(0);
        Ok((start..stop).step_by(step).collect())
    }
}

/// Coupling matrices of all selected frames.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryResult {
    /// Index of every processed frame in the trajectory
    pub frames: Array1<usize>,
    /// `H_frag` of every processed frame, shape (n_frames, size, size)
    pub h_frag: Array3<f64>,
    /// Number of states of every fragment
    pub degeneracy: Array1<usize>,
}

impl TrajectoryResult {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Dimension of the basis of the whole system.
    pub fn size(&self) -> usize {
        self.degeneracy.sum()
    }
}

/// Reads one frame from the source and computes its coupling matrix.
fn compute_frame<S: FrameSource>(
    source: &mut S,
    frame: usize,
    topology: &SystemTopology,
    assembler: &FrameAssembler,
    degeneracy: ArrayView1<usize>,
) -> Result<Array2<f64>> {
    let coordinates: FrameCoordinates = source.read_frame(frame)?;
    assembler
        .compute(topology, &coordinates, degeneracy)
        .with_context(|| format!("calculation of frame {} failed", frame))
}

/// Computes `H_frag` for every selected frame of a trajectory.
///
/// The degeneracy is resolved before any frame is touched. Without a thread
/// pool the frames are processed one after another from a single reader.
/// With a pool every frame is an independent task that opens its own reader
/// and only shares the topology. All tasks run to completion, failed frames
/// are logged and the error of the earliest failed frame is returned.
pub fn coupling_matrix<T: TrajectoryOpener>(
    opener: &T,
    topology: Arc<SystemTopology>,
    assembler: &FrameAssembler,
    degeneracy: Option<&DegeneracySpec>,
    selection: &FrameSelection,
    pool: Option<&ThreadPool>,
) -> Result<TrajectoryResult> {
    let timer: Timer = Timer::start();
    let degeneracy: Array1<usize> = resolve_degeneracy(degeneracy, &topology.fragment_labels())?
        .ok_or(CouplingError::MissingDegeneracy)?;
    let size: usize = degeneracy.sum();

    let mut source: T::Source = opener.open()?;
    let frames: Vec<usize> = selection.indices(source.n_frames())?;
    let n_selected: usize = frames.len();
    info!(
        "Computing H_frag ({} x {}) for {} frames with {} threads",
        size,
        size,
        n_selected,
        pool.map_or(1, |pool| pool.current_num_threads())
    );

    let matrices: Vec<Array2<f64>> = match pool {
        None => {
            let mut matrices: Vec<Array2<f64>> = Vec::with_capacity(n_selected);
            for (k, frame) in frames.iter().enumerate() {
                info!("Processing frame {} of {}", k + 1, n_selected);
                matrices.push(compute_frame(
                    &mut source,
                    *frame,
                    &topology,
                    assembler,
                    degeneracy.view(),
                )?);
            }
            matrices
        }
        Some(pool) => {
            drop(source);
            let results: Vec<Result<Array2<f64>>> = pool.install(|| {
                frames
                    .par_iter()
                    .enumerate()
                    .map(|(k, frame)| -> Result<Array2<f64>> {
                        info!("Processing frame {} of {}", k + 1, n_selected);
                        let topology: Arc<SystemTopology> = Arc::clone(&topology);
                        let mut source: T::Source = opener.open()?;
                        compute_frame(&mut source, *frame, &topology, assembler, degeneracy.view())
                    })
                    .collect()
            });
            let mut matrices: Vec<Array2<f64>> = Vec::with_capacity(n_selected);
            let mut first_error: Option<anyhow::Error> = None;
            for (frame, result) in frames.iter().zip(results.into_iter()) {
                match result {
                    Ok(h_frag) => matrices.push(h_frag),
                    Err(err) => {
                        error!("Frame {} failed: {:#}", frame, err);
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
            matrices
        }
    };

    let h_frag: Array3<f64> = if matrices.is_empty() {
        Array3::zeros((0, size, size))
    } else {
        let views: Vec<ArrayView2<f64>> = matrices.iter().map(|h| h.view()).collect();
        ndarray::stack(Axis(0), &views)?
    };
    info!("{}", timer);
    info!("Done!");

    Ok(TrajectoryResult {
        frames: Array1::from(frames),
        h_frag,
        degeneracy,
    })
}

/// Fragment 1 moves away from fragment 0 by one angstrom per frame.
#[cfg(test)]
fn moving_system(n_frames: usize) -> (Arc<SystemTopology>, MemoryTrajectory) {
    let (topology, first) = line_topology(&[vec![0.0], vec![3.0], vec![20.0, 21.0]]);
    let frames: Vec<FrameCoordinates> = (0..n_frames)
        .map(|f| {
            let mut frame: FrameCoordinates = first.clone();
            frame.positions[[1, 0]] += f as f64;
            frame
        })
        .collect();
    (Arc::new(topology), MemoryTrajectory::new(frames))
}

#[test]
fn frame_selection_behaves_like_a_slice() {
    let selection = |start, stop, step| FrameSelection { start, stop, step };
    assert_eq!(FrameSelection::all().indices(4).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(selection(Some(2), Some(8), Some(3)).indices(10).unwrap(), vec![2, 5]);
    assert_eq!(selection(None, Some(100), Some(4)).indices(10).unwrap(), vec![0, 4, 8]);
    assert!(selection(Some(7), Some(3), None).indices(10).unwrap().is_empty());
    assert!(matches!(
        selection(None, None, Some(0)).indices(10),
        Err(CouplingError::InvalidStep)
    ));
}

#[test]
fn serial_and_parallel_runs_agree() {
    let (topology, trajectory) = moving_system(6);
    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let degeneracy: DegeneracySpec = DegeneracySpec::PerFragment(vec![1, 1, 2]);

    let serial: TrajectoryResult = coupling_matrix(
        &trajectory,
        Arc::clone(&topology),
        &assembler,
        Some(&degeneracy),
        &FrameSelection::all(),
        None,
    )
    .unwrap();
    let pool: ThreadPool = ThreadPoolBuilder::new().num_threads(3).build().unwrap();
    let parallel: TrajectoryResult = coupling_matrix(
        &trajectory,
        Arc::clone(&topology),
        &assembler,
        Some(&degeneracy),
        &FrameSelection::all(),
        Some(&pool),
    )
    .unwrap();

    assert_eq!(serial, parallel);
    assert_eq!(serial.frames, array![0, 1, 2, 3, 4, 5]);
    assert_eq!(serial.h_frag.dim(), (6, 4, 4));
    assert_eq!(serial.size(), 4);
    // the dimer 0-1 breaks up once the distance reaches the cutoff
    assert!(serial.h_frag[[0, 0, 1]] > serial.h_frag[[1, 0, 1]]);
    assert!(serial.h_frag[[1, 0, 1]] > 0.0);
    assert_eq!(serial.h_frag[[2, 0, 1]], 0.0);
}

#[test]
fn frames_keep_trajectory_order() {
    let (topology, trajectory) = moving_system(8);
    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let pool: ThreadPool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    let selection: FrameSelection = FrameSelection {
        start: Some(1),
        stop: None,
        step: Some(2),
    };
    let result: TrajectoryResult = coupling_matrix(
        &trajectory,
        Arc::clone(&topology),
        &assembler,
        Some(&DegeneracySpec::Uniform(1)),
        &selection,
        Some(&pool),
    )
    .unwrap();
    assert_eq!(result.frames, array![1, 3, 5, 7]);

    let mut source: MemoryTrajectory = trajectory.open().unwrap();
    for (k, frame) in result.frames.iter().enumerate() {
        let coordinates: FrameCoordinates = source.read_frame(*frame).unwrap();
        let expected: Array2<f64> = assembler
            .compute(&topology, &coordinates, array![1, 1, 1].view())
            .unwrap();
        assert_eq!(result.h_frag.index_axis(Axis(0), k), expected);
    }
}

#[test]
fn missing_degeneracy_fails_before_any_frame() {
    let (topology, trajectory) = moving_system(3);
    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let error = coupling_matrix(
        &trajectory,
        topology,
        &assembler,
        None,
        &FrameSelection::all(),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::MissingDegeneracy)
    ));
    assert_eq!(reducer.calls(), 0);
}

#[test]
fn unresolvable_degeneracy_fails_before_any_frame() {
    let (topology, trajectory) = moving_system(4);
    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let pool: ThreadPool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();

    // two values for three fragments
    let error = coupling_matrix(
        &trajectory,
        Arc::clone(&topology),
        &assembler,
        Some(&DegeneracySpec::PerFragment(vec![1, 1])),
        &FrameSelection::all(),
        Some(&pool),
    )
    .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::DegeneracyLength { expected: 3, found: 2 })
    ));

    // the fragments are labelled MOL
    let mut mapping: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    mapping.insert(String::from("SOL"), 1);
    for pool in [None, Some(&pool)].iter() {
        let error = coupling_matrix(
            &trajectory,
            Arc::clone(&topology),
            &assembler,
            Some(&DegeneracySpec::PerResidue(mapping.clone())),
            &FrameSelection::all(),
            *pool,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CouplingError>(),
            Some(CouplingError::UnknownResidue { fragment: 0, .. })
        ));
    }
    assert_eq!(reducer.calls(), 0);
}

#[test]
fn earliest_failed_frame_is_reported() {
    let (topology, trajectory) = moving_system(5);
    let mut frames: Vec<FrameCoordinates> = (0..5)
        .map(|f| trajectory.open().unwrap().read_frame(f).unwrap())
        .collect();
    // frames with a wrong number of atoms
    frames[1].positions = Array2::zeros((2, 3));
    frames[3].positions = Array2::zeros((2, 3));
    let broken: MemoryTrajectory = MemoryTrajectory::new(frames);

    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let pool: ThreadPool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
    let error = coupling_matrix(
        &broken,
        topology,
        &assembler,
        Some(&DegeneracySpec::Uniform(1)),
        &FrameSelection::all(),
        Some(&pool),
    )
    .unwrap_err();
    assert!(format!("{:#}", error).contains("frame 1"));
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::AtomCountMismatch { expected: 4, found: 2 })
    ));
}

#[test]
fn empty_selection_gives_empty_stack() {
    let (topology, trajectory) = moving_system(2);
    let reducer: CountingReducer = CountingReducer::default();
    let assembler: FrameAssembler =
        FrameAssembler::new(&ModelSolver, &reducer, &NeighborSearch, 5.0, OrbitalState::Homo);
    let selection: FrameSelection = FrameSelection {
        start: Some(5),
        stop: None,
        step: None,
    };
    let result: TrajectoryResult = coupling_matrix(
        &trajectory,
        topology,
        &assembler,
        Some(&DegeneracySpec::Uniform(2)),
        &selection,
        None,
    )
    .unwrap();
    assert_eq!(result.n_frames(), 0);
    assert_eq!(result.h_frag.dim(), (0, 6, 6));
}
