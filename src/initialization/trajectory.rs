use crate::error::CouplingError;
use crate::fragments::UnitCell;
use anyhow::{Context, Result};
use chemfiles::{CellShape, Frame, Trajectory};
use ndarray::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Positions (in angstrom) and the periodic box of one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameCoordinates {
    pub positions: Array2<f64>,
    pub cell: Option<UnitCell>,
}

/// Random access to the frames of a trajectory. A source keeps the state of the
/// underlying reader and is therefore never shared between frame tasks.
pub trait FrameSource {
    fn n_frames(&self) -> usize;

    fn read_frame(&mut self, index: usize) -> Result<FrameCoordinates>;
}

/// Creates independent [FrameSource]s. The opener itself is read-only and is
/// shared by all workers.
pub trait TrajectoryOpener: Sync {
    type Source: FrameSource;

    fn open(&self) -> Result<Self::Source>;
}

/// Extract the positions and the unit cell from a [Frame](chemfiles::Frame)
pub fn frame_to_coordinates(frame: &Frame) -> Result<FrameCoordinates> {
    let positions: Array2<f64> = Array2::from_shape_vec(
        (frame.size() as usize, 3),
        frame
            .positions()
            .iter()
            .flat_map(|array| array.iter())
            .cloned()
            .collect(),
    )?;
    let cell = frame.cell();
    let cell: Option<UnitCell> = match cell.shape() {
        CellShape::Infinite => None,
        _ => {
            let matrix: [[f64; 3]; 3] = cell.matrix();
            Some(UnitCell::new(Array2::from_shape_fn((3, 3), |(i, j)| {
                matrix[i][j]
            }))?)
        }
    };
    Ok(FrameCoordinates { positions, cell })
}

/// Trajectory file that is read with chemfiles.
#[derive(Clone, Debug)]
pub struct TrajectoryFile {
    pub path: PathBuf,
}

impl TrajectoryFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        TrajectoryFile {
            path: path.as_ref().to_path_buf(),
        }
    }
}

pub struct ChemfilesTrajectory {
    trajectory: Trajectory,
    frame: Frame,
    n_frames: usize,
}

impl FrameSource for ChemfilesTrajectory {
    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn read_frame(&mut self, index: usize) -> Result<FrameCoordinates> {
        if index >= self.n_frames {
            return Err(CouplingError::FrameOutOfRange {
                frame: index,
                n_frames: self.n_frames,
            }
            .into());
        }
        self.trajectory
            .read_step(index, &mut self.frame)
            .with_context(|| format!("Unable to read frame {}", index))?;
        frame_to_coordinates(&self.frame)
    }
}

impl TrajectoryOpener for TrajectoryFile {
    type Source = ChemfilesTrajectory;

    fn open(&self) -> Result<ChemfilesTrajectory> {
        let mut trajectory: Trajectory = Trajectory::open(&self.path, 'r')
            .with_context(|| format!("Unable to open trajectory {}", self.path.display()))?;
        let n_frames: usize = trajectory.nsteps();
        Ok(ChemfilesTrajectory {
            trajectory,
            frame: Frame::new(),
            n_frames,
        })
    }
}

/// Frames that are already loaded into memory. Cloning only copies the
/// reference to the frames.
#[derive(Clone, Debug)]
pub struct MemoryTrajectory {
    frames: Arc<Vec<FrameCoordinates>>,
}

impl MemoryTrajectory {
    pub fn new(frames: Vec<FrameCoordinates>) -> Self {
        MemoryTrajectory {
            frames: Arc::new(frames),
        }
    }
}

impl FrameSource for MemoryTrajectory {
    fn n_frames(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> Result<FrameCoordinates> {
        self.frames.get(index).cloned().ok_or_else(|| {
            CouplingError::FrameOutOfRange {
                frame: index,
                n_frames: self.frames.len(),
            }
            .into()
        })
    }
}

impl TrajectoryOpener for MemoryTrajectory {
    type Source = MemoryTrajectory;

    fn open(&self) -> Result<MemoryTrajectory> {
        Ok(self.clone())
    }
}

#[test]
fn memory_trajectory_rejects_missing_frames() {
    let trajectory: MemoryTrajectory = MemoryTrajectory::new(vec![FrameCoordinates {
        positions: Array2::zeros((2, 3)),
        cell: None,
    }]);
    let mut source: MemoryTrajectory = trajectory.open().unwrap();
    assert_eq!(source.n_frames(), 1);
    assert!(source.read_frame(0).is_ok());
    let error = source.read_frame(3).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<CouplingError>(),
        Some(CouplingError::FrameOutOfRange { frame: 3, n_frames: 1 })
    ));
}
