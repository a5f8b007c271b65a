//! A dense BFGS quasi-Newton minimizer for unconstrained problems.
//!
//! This crate provides a solver that maintains the inverse Hessian approximation
//! directly and advances it with the classic rank-two BFGS correction.
//!
//! It features:
//! - A bounded backtracking line search accepting the first step scale that
//!   satisfies a sufficient-decrease plus weak-Wolfe-curvature pair.
//! - A degeneracy guard on the inverse-Hessian update: a zero curvature term
//!   skips the update for that iteration instead of failing the run.
//! - A fixed iteration budget with one `IterationRecord` per completed
//!   iteration, carrying diagnostic flags for exhausted searches and skipped
//!   updates so degraded steps are observable without changing control flow.
//! - A clear, configurable, and ergonomic API using a builder pattern.
//!
//! # Example
//! Minimize a Rosenbrock-style function, a classic test case for optimization
//! algorithms.
//!
//! ```
//! use quasi_newton::QuasiNewton;
//! use ndarray::{array, Array1};
//!
//! // Define the objective and its gradient.
//! let objective = |x: &Array1<f64>| -> f64 {
//!     100.0 * (x[0].powi(2) - x[1]).powi(2) + (x[0] - 1.0).powi(2)
//! };
//! let gradient = |x: &Array1<f64>| -> Array1<f64> {
//!     array![
//!         400.0 * x[0] * (x[0].powi(2) - x[1]) + 2.0 * (x[0] - 1.0),
//!         -200.0 * (x[0].powi(2) - x[1]),
//!     ]
//! };
//!
//! // Run the solver from the standard starting point.
//! let records = QuasiNewton::new(array![-1.2, 1.0], objective, gradient)
//!     .with_max_steps(50)
//!     .run()
//!     .expect("arguments are valid");
//!
//! // The known minimum is at [1.0, 1.0].
//! let last = records.last().unwrap();
//! assert!((last.point[0] - 1.0).abs() < 1e-3);
//! assert!((last.point[1] - 1.0).abs() < 1e-3);
//! assert!(last.value < 1e-3);
//! ```

use ndarray::{Array1, Array2, Axis};

/// An error type for argument validation, raised before the first iteration.
///
/// Numerical degeneracies during the run (an exhausted line search, a skipped
/// inverse-Hessian update) are deliberately not errors; they are reported as
/// flags on the corresponding [`IterationRecord`].
#[derive(Debug, thiserror::Error)]
pub enum QuasiNewtonError {
    #[error("the gradient returned a vector of dimension {found}, but the initial point has dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("the initial point must have at least one coordinate")]
    EmptyInitialPoint,
    #[error("line-search parameter `{name}` = {value} is outside its valid open interval")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// The outcome of one completed iteration.
///
/// Records are appended in iteration order; index 0 is the first completed
/// iteration, not the initial point.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationRecord {
    /// The point reached at the end of this iteration.
    pub point: Array1<f64>,
    /// The objective value at `point`.
    pub value: f64,
    /// The accepted backtracking exponent `m`; the step scale was `b^m`.
    pub backtracks: usize,
    /// True if no exponent up to the bound satisfied both acceptance
    /// conditions and the smallest trial step was taken regardless.
    pub line_search_exhausted: bool,
    /// True if the curvature term `y^T s` was exactly zero and the previous
    /// inverse-Hessian approximation was carried forward unchanged.
    pub update_skipped: bool,
}

/// A configurable BFGS quasi-Newton solver.
///
/// The solver runs a fixed budget of iterations and returns every iterate; it
/// does not stop early on a small gradient. Callers that want early
/// termination supply a predicate via [`with_stop_predicate`].
///
/// [`with_stop_predicate`]: QuasiNewton::with_stop_predicate
pub struct QuasiNewton<ObjFn, GradFn>
where
    ObjFn: Fn(&Array1<f64>) -> f64,
    GradFn: Fn(&Array1<f64>) -> Array1<f64>,
{
    x0: Array1<f64>,
    obj_fn: ObjFn,
    grad_fn: GradFn,
    // --- Configuration ---
    max_steps: usize,
    backtrack_ratio: f64,
    sufficient_decrease: f64,
    curvature: f64,
    max_backtracks: usize,
    stop_predicate: Option<Box<dyn Fn(&Array1<f64>, f64) -> bool>>,
}

impl<ObjFn, GradFn> QuasiNewton<ObjFn, GradFn>
where
    ObjFn: Fn(&Array1<f64>) -> f64,
    GradFn: Fn(&Array1<f64>) -> Array1<f64>,
{
    /// Creates a new solver.
    ///
    /// # Arguments
    /// * `x0` - The starting point; its length fixes the problem dimension.
    /// * `obj_fn` - The objective function to minimize.
    /// * `grad_fn` - The gradient of the objective.
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn, grad_fn: GradFn) -> Self {
        Self {
            x0,
            obj_fn,
            grad_fn,
            max_steps: 50,
            backtrack_ratio: 0.55,
            sufficient_decrease: 0.4,
            curvature: 0.6,
            max_backtracks: 20,
            stop_predicate: None,
        }
    }

    /// Sets the iteration budget (default: 50). A budget of zero yields an
    /// empty record sequence.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the base backtracking ratio `b` in `(0, 1)` (default: 0.55). Trial
    /// step scales are the powers `b^0, b^1, ...`.
    pub fn with_backtrack_ratio(mut self, backtrack_ratio: f64) -> Self {
        self.backtrack_ratio = backtrack_ratio;
        self
    }

    /// Sets the sufficient-decrease coefficient `p` in `(0, 1)` and the
    /// curvature coefficient `sigma` in `(p, 1)` (defaults: 0.4 and 0.6).
    pub fn with_wolfe_coefficients(mut self, sufficient_decrease: f64, curvature: f64) -> Self {
        self.sufficient_decrease = sufficient_decrease;
        self.curvature = curvature;
        self
    }

    /// Sets the largest backtracking exponent tried per search (default: 20).
    /// This is the only built-in work cap per iteration.
    pub fn with_max_backtracks(mut self, max_backtracks: usize) -> Self {
        self.max_backtracks = max_backtracks;
        self
    }

    /// Installs a predicate consulted once after each completed iteration with
    /// the new point and its objective value; returning true ends the run
    /// early with the records accumulated so far.
    pub fn with_stop_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Array1<f64>, f64) -> bool + 'static,
    {
        self.stop_predicate = Some(Box::new(predicate));
        self
    }

    fn validate(&self) -> Result<(), QuasiNewtonError> {
        if self.x0.is_empty() {
            return Err(QuasiNewtonError::EmptyInitialPoint);
        }
        if !(self.backtrack_ratio > 0.0 && self.backtrack_ratio < 1.0) {
            return Err(QuasiNewtonError::InvalidParameter {
                name: "backtrack_ratio",
                value: self.backtrack_ratio,
            });
        }
        if !(self.sufficient_decrease > 0.0 && self.sufficient_decrease < 1.0) {
            return Err(QuasiNewtonError::InvalidParameter {
                name: "sufficient_decrease",
                value: self.sufficient_decrease,
            });
        }
        if !(self.curvature > self.sufficient_decrease && self.curvature < 1.0) {
            return Err(QuasiNewtonError::InvalidParameter {
                name: "curvature",
                value: self.curvature,
            });
        }
        Ok(())
    }

    /// Executes the solver for the configured iteration budget.
    ///
    /// Returns one record per completed iteration, in order. Without a stop
    /// predicate the sequence has length exactly `max_steps`; the run never
    /// short-circuits on its own, even if the gradient vanishes.
    pub fn run(&self) -> Result<Vec<IterationRecord>, QuasiNewtonError> {
        self.validate()?;

        let g_0 = (self.grad_fn)(&self.x0);
        if g_0.len() != self.x0.len() {
            return Err(QuasiNewtonError::DimensionMismatch {
                expected: self.x0.len(),
                found: g_0.len(),
            });
        }

        let n = self.x0.len();
        let mut x_k = self.x0.clone();
        let mut g_k = g_0;
        let mut f_k = (self.obj_fn)(&x_k);
        let mut d_inv = Array2::<f64>::eye(n);

        let mut records = Vec::with_capacity(self.max_steps);
        for _ in 0..self.max_steps {
            let d_k = -d_inv.dot(&g_k);
            // The directional derivative is constant across trial scales.
            let g_dot_d = g_k.dot(&d_k);

            let accepted = line_search(
                &self.obj_fn,
                &self.grad_fn,
                &x_k,
                &d_k,
                f_k,
                g_dot_d,
                self.backtrack_ratio,
                self.sufficient_decrease,
                self.curvature,
                self.max_backtracks,
            );

            let s_k = &accepted.point - &x_k;
            let y_k = &accepted.gradient - &g_k;
            let update_skipped = match bfgs_update(&d_inv, &s_k, &y_k) {
                Some(next) => {
                    d_inv = next;
                    false
                }
                None => true,
            };

            records.push(IterationRecord {
                point: accepted.point.clone(),
                value: accepted.value,
                backtracks: accepted.exponent,
                line_search_exhausted: accepted.exhausted,
                update_skipped,
            });

            x_k = accepted.point;
            f_k = accepted.value;
            g_k = accepted.gradient;

            if let Some(stop) = &self.stop_predicate {
                if stop(&x_k, f_k) {
                    break;
                }
            }
        }

        Ok(records)
    }
}

/// The step accepted by one line-search invocation, with the trial point's
/// value and gradient retained so the driver does not re-evaluate them.
struct AcceptedStep {
    exponent: usize,
    exhausted: bool,
    point: Array1<f64>,
    value: f64,
    gradient: Array1<f64>,
}

/// Backtracking line search over the trial scales `b^0, b^1, ..., b^m_max`.
///
/// Accepts the first exponent satisfying both the sufficient-decrease
/// condition and the weak Wolfe curvature condition. If none qualifies, the
/// `m_max` step is taken anyway and flagged: the search always returns a step,
/// bounding the work per iteration at the price of occasionally accepting a
/// poor one.
///
/// Note on the acceptance pair: a two-sided Armijo bracket was also tried in
/// place of the curvature condition and stalls short of the optimum on the
/// Rosenbrock benchmark. Keep the curvature form.
#[allow(clippy::too_many_arguments)]
fn line_search<ObjFn, GradFn>(
    obj_fn: &ObjFn,
    grad_fn: &GradFn,
    x_k: &Array1<f64>,
    d_k: &Array1<f64>,
    f_k: f64,
    g_dot_d: f64,
    backtrack_ratio: f64,
    sufficient_decrease: f64,
    curvature: f64,
    max_backtracks: usize,
) -> AcceptedStep
where
    ObjFn: Fn(&Array1<f64>) -> f64,
    GradFn: Fn(&Array1<f64>) -> Array1<f64>,
{
    let mut m = 0;
    loop {
        let scale = backtrack_ratio.powi(m as i32);
        let point = x_k + scale * d_k;
        let value = obj_fn(&point);
        let gradient = grad_fn(&point);

        let decrease_ok = value <= f_k + sufficient_decrease * scale * g_dot_d;
        let curvature_ok = gradient.dot(d_k) >= curvature * g_dot_d;
        if (decrease_ok && curvature_ok) || m == max_backtracks {
            return AcceptedStep {
                exponent: m,
                exhausted: !(decrease_ok && curvature_ok),
                point,
                value,
                gradient,
            };
        }
        m += 1;
    }
}

/// The BFGS rank-two correction applied to the inverse approximation:
///
/// ```text
/// rho     = 1 / (y^T s)
/// D_{k+1} = D_k + (rho + (y^T D_k y) * rho^2) * (s s^T)
///               - rho * (D_k y s^T + s y^T D_k)
/// ```
///
/// Returns `None` when the curvature term `y^T s` is exactly zero; the caller
/// carries `D_k` forward unchanged. No positive-definiteness check is made
/// after the update; drift under repeated non-Wolfe steps is a known
/// limitation.
fn bfgs_update(d_inv: &Array2<f64>, s_k: &Array1<f64>, y_k: &Array1<f64>) -> Option<Array2<f64>> {
    let sy = s_k.dot(y_k);
    if sy == 0.0 {
        return None;
    }
    let rho = 1.0 / sy;

    // Column views of s and y for the outer products, without consuming the
    // original 1D vectors.
    let s_col = s_k.view().insert_axis(Axis(1));
    let y_col = y_k.view().insert_axis(Axis(1));

    let y_d_y = y_k.dot(&d_inv.dot(y_k));
    let d_y = d_inv.dot(y_k);
    let d_y_col = d_y.view().insert_axis(Axis(1));
    // `y^T D` as a 1 x n row; with D symmetric this is `(D y)^T`, but the
    // formula is applied literally.
    let y_row_d = y_col.t().dot(d_inv);

    let gain = (rho + y_d_y * rho * rho) * s_col.dot(&s_col.t());
    let cross = d_y_col.dot(&s_col.t()) + s_col.dot(&y_row_d);

    Some(d_inv + gain - rho * cross)
}
