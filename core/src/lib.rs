//! Generic Unscented Kalman Filter for embedded and real-time state estimation
//!
//! This crate provides a recursive Bayesian estimator for nonlinear dynamic systems. The filter tracks a hidden
//! state vector and its covariance and refines both whenever the application supplies a model based prediction
//! or a sensor measurement. It is designed for fixed-rate control loops on resource-constrained targets: every
//! working buffer is a fixed-capacity matrix owned by the filter instance, sized from the compile-time maxima
//! [MAX_STATE_LENGTH] and [MAX_MEASUREMENT_LENGTH], and neither `predict` nor `update` touches the heap.
//!
//! This crate is primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra) statically sized matrices.
//! The remaining dependencies serve the harness around the estimator (configuration files, the fixed-rate task
//! runner, the tracking simulation and its CSV output).
//!
//! ## Crate overview
//!
//! - [kalman]: The [UnscentedKalmanFilter] itself: sigma-point generation, the unscented transform and the
//!   predict/update cycle.
//! - [linalg]: Fallible matrix square root and inverse helpers over the fixed-capacity matrices.
//! - [models]: The [ModelFunction] callback contract and a few ready-made process and measurement models.
//! - [config]: Serializable filter configuration (JSON, YAML, TOML).
//! - [rt]: Fixed-period task runner with real and simulated clocks.
//! - [sim]: A one-axis tracking simulation used by the `ukf-track` binary.
//!
//! ## The unscented transform
//!
//! Given a state estimate $x$ with covariance $P$ of dimension $n$, the filter draws $2n+1$ sigma points
//!
//! $$
//! \mathcal{X}_0 = x, \quad \mathcal{X}_i = x + \left(\sqrt{cP}\right)_i, \quad \mathcal{X}_{n+i} = x - \left(\sqrt{cP}\right)_i
//! $$
//!
//! with $\lambda = \alpha^2 (n + \kappa) - n$ and $c = n + \lambda$. Each point is pushed through the (possibly
//! nonlinear) model and the results are recombined with the weights
//!
//! $$
//! w^m_0 = \frac{\lambda}{c}, \quad w^c_0 = \frac{\lambda}{c} + (1 - \alpha^2 + \beta), \quad w^m_i = w^c_i = \frac{1}{2c}
//! $$
//!
//! into a transformed mean and covariance. Prediction adopts the transformed moments directly; an update uses
//! them, together with the state/measurement cross-covariance, to compute the Kalman gain.
//!
//! ## Dimensions
//!
//! State vectors have a runtime length $1 \le n \le$ [MAX_STATE_LENGTH] fixed at construction. Measurement vectors
//! may change length from call to call but never exceed [MAX_MEASUREMENT_LENGTH]. All vectors are passed as slices
//! and all matrices (noise covariances) as row-major slices of the matching square size; a length mismatch is
//! reported as [EstimatorError::Dimension] before the filter does any work.
pub mod config;
pub mod error;
pub mod kalman;
pub mod linalg;
pub mod models;
pub mod rt;
pub mod sim;

use nalgebra::{Const, DMatrixView, SMatrix, SVector, U1};

pub use crate::error::{EstimatorError, Result};
pub use crate::kalman::UnscentedKalmanFilter;
pub use crate::models::ModelFunction;

/// Maximum supported state vector length.
pub const MAX_STATE_LENGTH: usize = 16;
/// Maximum supported measurement vector length.
pub const MAX_MEASUREMENT_LENGTH: usize = 8;
/// Side length of every working buffer; large enough for states and measurements alike.
pub const MAX_LENGTH: usize = if MAX_STATE_LENGTH > MAX_MEASUREMENT_LENGTH {
    MAX_STATE_LENGTH
} else {
    MAX_MEASUREMENT_LENGTH
};
/// Number of sigma points for a state of maximum length.
pub const MAX_SIGMA_POINTS: usize = 2 * MAX_STATE_LENGTH + 1;

/// Fixed-capacity vector; entries past the active length are zero.
pub type Vector = SVector<f64, MAX_LENGTH>;
/// Fixed-capacity square matrix; entries outside the active block are zero.
pub type Matrix = SMatrix<f64, MAX_LENGTH, MAX_LENGTH>;
/// Sigma points, one point per column.
pub type SigmaMatrix = SMatrix<f64, MAX_LENGTH, MAX_SIGMA_POINTS>;
/// Mean or covariance recombination weights.
pub type Weights = SVector<f64, MAX_SIGMA_POINTS>;
/// Borrowed view of the active block of a [Matrix] or [SigmaMatrix].
pub type MatrixBlock<'a> = DMatrixView<'a, f64, U1, Const<MAX_LENGTH>>;

/// Default spread of the sigma points.
pub const DEFAULT_ALPHA: f64 = 1.0;
/// Default prior-knowledge correction (optimal for Gaussian distributions).
pub const DEFAULT_BETA: f64 = 2.0;
/// Default secondary scaling parameter.
pub const DEFAULT_KI: f64 = 0.0;

/// Generic estimator capability shared by Kalman-family filters.
///
/// An estimator owns a state estimate and its covariance and refines them through two operations: a model based
/// prediction and a measurement update. Both take the nonlinear model as a [ModelFunction], the time lapse since the
/// previous call, an auxiliary vector with its declared length and a row-major noise covariance matrix.
///
/// Implementations must leave the estimate untouched whenever they return an error.
pub trait Estimator {
    /// Propagates the estimate with the process model `function` and additive process noise.
    ///
    /// # Arguments
    /// * `function` - process model mapping a state to the next state
    /// * `dt` - time lapse in seconds
    /// * `control_len` - declared length of the control input
    /// * `control` - control input vector handed to the model
    /// * `process_noise` - `n×n` process noise covariance, row-major
    fn predict<F: ModelFunction + ?Sized>(
        &mut self,
        function: &F,
        dt: f64,
        control_len: usize,
        control: &[f64],
        process_noise: &[f64],
    ) -> Result<()>;
    /// Corrects the estimate with a sensor measurement.
    ///
    /// # Arguments
    /// * `function` - measurement model mapping a state to the expected measurement
    /// * `dt` - time lapse in seconds
    /// * `measurement_len` - declared length of the measurement vector
    /// * `measurement` - measurement vector
    /// * `measurement_noise` - `m×m` measurement noise covariance, row-major
    fn update<H: ModelFunction + ?Sized>(
        &mut self,
        function: &H,
        dt: f64,
        measurement_len: usize,
        measurement: &[f64],
        measurement_noise: &[f64],
    ) -> Result<()>;
    /// Emits the internal state of the estimator as diagnostic output.
    fn print(&self);
    /// Length of the state vector
    fn state_length(&self) -> usize;
    /// Current best estimate of the state
    fn estimate(&self) -> &[f64];
    /// Current covariance of the estimate
    fn certainty(&self) -> MatrixBlock<'_>;
}
