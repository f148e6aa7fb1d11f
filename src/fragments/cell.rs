use anyhow::{Context, Result};
use ndarray::prelude::*;
use ndarray_linalg::Inverse;

/// Periodic simulation box. The columns of `matrix` are the three cell vectors
/// (in angstrom), which is the convention of [UnitCell](chemfiles::UnitCell).
#[derive(Clone, Debug, PartialEq)]
pub struct UnitCell {
    pub matrix: Array2<f64>,
    inverse: Array2<f64>,
}

impl UnitCell {
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        let inverse: Array2<f64> = matrix
            .inv()
            .context("the unit cell matrix is not invertible")?;
        Ok(UnitCell { matrix, inverse })
    }

    /// Rectangular box with the edge lengths `a`, `b` and `c`.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        UnitCell {
            matrix: Array2::from_diag(&array![a, b, c]),
            inverse: Array2::from_diag(&array![1.0 / a, 1.0 / b, 1.0 / c]),
        }
    }

    /// Wraps the displacement vector `d` into the nearest periodic image.
    pub fn minimum_image(&self, d: ArrayView1<f64>) -> Array1<f64> {
        let fractional: Array1<f64> = self.inverse.dot(&d).mapv(|x| x - x.round());
        self.matrix.dot(&fractional)
    }

    /// Length of the shortest cell vector.
    pub fn shortest_vector(&self) -> f64 {
        self.matrix
            .axis_iter(Axis(1))
            .map(|v| v.dot(&v).sqrt())
            .fold(f64::INFINITY, f64::min)
    }
}

/// Displacement `b - a`, wrapped into the nearest image if the system is periodic.
pub fn displacement(a: ArrayView1<f64>, b: ArrayView1<f64>, cell: Option<&UnitCell>) -> Array1<f64> {
    let d: Array1<f64> = &b - &a;
    match cell {
        Some(cell) => cell.minimum_image(d.view()),
        None => d,
    }
}

#[test]
fn minimum_image_wraps_into_nearest_copy() {
    let cell: UnitCell = UnitCell::orthorhombic(10.0, 10.0, 20.0);
    let wrapped: Array1<f64> = cell.minimum_image(array![9.0, -6.0, 3.0].view());
    assert!(wrapped.abs_diff_eq(&array![-1.0, 4.0, 3.0], 1e-12));
    assert_eq!(cell.shortest_vector(), 10.0);
}

#[test]
fn displacement_without_cell_is_plain_difference() {
    let d: Array1<f64> = displacement(array![1.0, 2.0, 3.0].view(), array![10.0, 2.0, 0.0].view(), None);
    assert!(d.abs_diff_eq(&array![9.0, 0.0, -3.0], 1e-12));
}
