//! Process and measurement model functions.
//!
//! The filter never owns a model; it receives one per call and evaluates it once per sigma point. A model maps an
//! input vector (a state) to an output vector (the next state for a process model, the expected measurement for a
//! measurement model) and may use the time lapse and an auxiliary vector (the control input during prediction,
//! empty during an update).
//!
//! Models write into a buffer owned by the filter and report how many values they produced, so the filter can
//! reject a model that disagrees with the dimension the caller declared without allocating.

use crate::error::{EstimatorError, Result};
use crate::{MAX_LENGTH, Matrix};

/// Generic model function trait for process and measurement models
pub trait ModelFunction {
    /// Evaluate the model at `input`, writing the result to the front of `output`.
    ///
    /// # Arguments
    /// * `input` - state vector of the active length
    /// * `dt` - time lapse in seconds
    /// * `aux` - auxiliary input vector (control input, or empty)
    /// * `output` - destination buffer of capacity [MAX_LENGTH]
    ///
    /// # Returns
    /// The number of values written. The filter treats any count other than the expected output dimension as a
    /// contract violation.
    fn evaluate(&self, input: &[f64], dt: f64, aux: &[f64], output: &mut [f64]) -> usize;
    /// Length of the auxiliary vector this model requires, if it declares one.
    fn aux_dimension(&self) -> Option<usize> {
        None
    }
}

impl<F> ModelFunction for F
where
    F: Fn(&[f64], f64, &[f64], &mut [f64]) -> usize,
{
    fn evaluate(&self, input: &[f64], dt: f64, aux: &[f64], output: &mut [f64]) -> usize {
        self(input, dt, aux, output)
    }
}

/// Constant velocity kinematics driven by an acceleration input
///
/// The state is laid out as `[p_1, .., p_k, v_1, .., v_k]` for `k` axes and the control input holds one
/// acceleration per axis:
///
/// $$
/// p \leftarrow p + v\,dt + \tfrac{1}{2} a\,dt^2, \qquad v \leftarrow v + a\,dt
/// $$
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantVelocity {
    pub axes: usize,
}
impl ConstantVelocity {
    pub fn new(axes: usize) -> Result<Self> {
        if axes == 0 || 2 * axes > MAX_LENGTH {
            return Err(EstimatorError::Dimension {
                what: "constant velocity axes",
                expected: MAX_LENGTH / 2,
                actual: axes,
            });
        }
        Ok(ConstantVelocity { axes })
    }
    /// Length of the state vector this model propagates.
    pub fn state_length(&self) -> usize {
        2 * self.axes
    }
}
impl ModelFunction for ConstantVelocity {
    fn evaluate(&self, input: &[f64], dt: f64, aux: &[f64], output: &mut [f64]) -> usize {
        let k = self.axes;
        if input.len() != 2 * k || aux.len() != k {
            return 0;
        }
        for axis in 0..k {
            let p = input[axis];
            let v = input[k + axis];
            let a = aux[axis];
            output[axis] = p + v * dt + 0.5 * a * dt * dt;
            output[k + axis] = v + a * dt;
        }
        2 * k
    }
    fn aux_dimension(&self) -> Option<usize> {
        Some(self.axes)
    }
}

/// Linear model `y = H x`
///
/// Useful both as a measurement model (sensors that observe a linear combination of states) and, with a square
/// `H`, as a linear process model. Takes no auxiliary input.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    rows: usize,
    cols: usize,
    matrix: Matrix,
}
impl LinearModel {
    /// Build from a row-major `rows×cols` matrix.
    pub fn new(rows: usize, cols: usize, values: &[f64]) -> Result<Self> {
        check_shape(rows, cols)?;
        if values.len() != rows * cols {
            return Err(EstimatorError::Dimension {
                what: "linear model values",
                expected: rows * cols,
                actual: values.len(),
            });
        }
        let mut matrix = Matrix::zeros();
        for i in 0..rows {
            for j in 0..cols {
                matrix[(i, j)] = values[i * cols + j];
            }
        }
        Ok(LinearModel { rows, cols, matrix })
    }
    /// Model that observes the state components at `indices` directly.
    pub fn selection(cols: usize, indices: &[usize]) -> Result<Self> {
        let rows = indices.len();
        check_shape(rows, cols)?;
        let mut matrix = Matrix::zeros();
        for (row, &index) in indices.iter().enumerate() {
            if index >= cols {
                return Err(EstimatorError::Dimension {
                    what: "selection index",
                    expected: cols,
                    actual: index,
                });
            }
            matrix[(row, index)] = 1.0;
        }
        Ok(LinearModel { rows, cols, matrix })
    }
    /// Output dimension
    pub fn rows(&self) -> usize {
        self.rows
    }
    /// Input dimension
    pub fn cols(&self) -> usize {
        self.cols
    }
}
fn check_shape(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || rows > MAX_LENGTH {
        return Err(EstimatorError::Dimension {
            what: "linear model rows",
            expected: MAX_LENGTH,
            actual: rows,
        });
    }
    if cols == 0 || cols > MAX_LENGTH {
        return Err(EstimatorError::Dimension {
            what: "linear model columns",
            expected: MAX_LENGTH,
            actual: cols,
        });
    }
    Ok(())
}
impl ModelFunction for LinearModel {
    fn evaluate(&self, input: &[f64], _dt: f64, _aux: &[f64], output: &mut [f64]) -> usize {
        if input.len() != self.cols {
            return 0;
        }
        for i in 0..self.rows {
            output[i] = (0..self.cols).map(|j| self.matrix[(i, j)] * input[j]).sum();
        }
        self.rows
    }
    fn aux_dimension(&self) -> Option<usize> {
        Some(0)
    }
}
