use crate::coupling::TrajectoryResult;
use anyhow::{bail, Context, Result};
use chrono::Local;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text stored as an array of bytes, npy has no string type that we can write.
fn text_to_array(text: &str) -> Array1<u8> {
    Array1::from(text.as_bytes().to_vec())
}

fn array_to_text(array: &Array1<u8>) -> String {
    String::from_utf8_lossy(&array.to_vec()).into_owned()
}

/// Output path with the `.npz` extension.
pub fn npz_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path: &Path = path.as_ref();
    match path.extension() {
        Some(extension) if extension == "npz" => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_owned();
            name.push(".npz");
            PathBuf::from(name)
        }
    }
}

/// Writes the frame indices, the coupling matrices and the degeneracy of a run
/// to a numpy archive with the arrays `frames`, `h_frag` and `degeneracy`.
/// The crate version and the creation date are stored as UTF-8 bytes in
/// `version` and `creation_date`.
/// An existing file is never overwritten. Returns the path that was written.
pub fn save_results<P: AsRef<Path>>(result: &TrajectoryResult, path: P) -> Result<PathBuf> {
    let path: PathBuf = npz_path(path);
    // create_new fails if the file is already there
    let file: File = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            bail!("output file {} already exists", path.display())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Unable to create {}", path.display()))
        }
    };
    // npy has no usize, the indices are stored as int64
    let frames: Array1<i64> = result.frames.mapv(|frame| frame as i64);
    let degeneracy: Array1<i64> = result.degeneracy.mapv(|d| d as i64);

    let mut npz = NpzWriter::new(file);
    npz.add_array("frames", &frames)?;
    npz.add_array("h_frag", &result.h_frag)?;
    npz.add_array("degeneracy", &degeneracy)?;
    npz.add_array("version", &text_to_array(env!("CARGO_PKG_VERSION")))?;
    npz.add_array(
        "creation_date",
        &text_to_array(&Local::now().format(DATE_FORMAT).to_string()),
    )?;
    npz.finish()?;
    info!("H_frag of {} frames written to {}", result.n_frames(), path.display());
    Ok(path)
}

/// Reads a numpy archive that was written by [save_results].
pub fn load_results<P: AsRef<Path>>(path: P) -> Result<TrajectoryResult> {
    let path: &Path = path.as_ref();
    let file: File =
        File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let mut npz = NpzReader::new(file)?;
    debug!("Loading results from {}", path.display());
    // archives of other programs may not carry the metadata
    if let Ok(date) = npz.by_name::<ndarray::OwnedRepr<u8>, Ix1>("creation_date.npy") {
        debug!("Results from {}", array_to_text(&date));
    }
    if let Ok(version) = npz.by_name::<ndarray::OwnedRepr<u8>, Ix1>("version.npy") {
        debug!("Saved with version: {}", array_to_text(&version));
    }
    let frames: Array1<i64> = npz.by_name("frames.npy")?;
    let h_frag: Array3<f64> = npz.by_name("h_frag.npy")?;
    let degeneracy: Array1<i64> = npz.by_name("degeneracy.npy")?;
    if frames.iter().chain(degeneracy.iter()).any(|value| *value < 0) {
        bail!("{} contains negative indices", path.display());
    }
    Ok(TrajectoryResult {
        frames: frames.mapv(|frame| frame as usize),
        h_frag,
        degeneracy: degeneracy.mapv(|d| d as usize),
    })
}

#[test]
fn results_are_written_once() {
    let result: TrajectoryResult = TrajectoryResult {
        frames: array![0, 2, 4],
        h_frag: Array3::from_shape_fn((3, 2, 2), |(f, i, j)| {
            if i == j {
                -10.0 - f as f64
            } else {
                0.01 * (f + 1) as f64
            }
        }),
        degeneracy: array![1, 1],
    };
    let stem: PathBuf =
        std::env::temp_dir().join(format!("h_frag_test_{}", std::process::id()));
    let written: PathBuf = save_results(&result, &stem).unwrap();
    assert_eq!(written, npz_path(&stem));
    assert_eq!(written.extension().unwrap(), "npz");

    let loaded: TrajectoryResult = load_results(&written).unwrap();
    assert_eq!(loaded, result);
    assert!(save_results(&result, &written).is_err());

    let mut npz = NpzReader::new(File::open(&written).unwrap()).unwrap();
    let version: Array1<u8> = npz.by_name("version.npy").unwrap();
    assert_eq!(array_to_text(&version), env!("CARGO_PKG_VERSION"));
    let date: Array1<u8> = npz.by_name("creation_date.npy").unwrap();
    assert!(chrono::NaiveDateTime::parse_from_str(&array_to_text(&date), DATE_FORMAT).is_ok());
    std::fs::remove_file(&written).unwrap();
}
