//! Bounded scalar proposal kernels for Metropolis-Hastings updates.
//!
//! Two move types cover every scalar rate update in the MCMC core:
//!
//! - [`scale_move`] — multiply by `exp(tuning · (u − ½))`, asymmetric,
//!   with a log-Hastings ratio of `ln(new/old)`.
//! - [`window_move`] — slide by `tuning · (u − ½)`, symmetric, with a
//!   log-Hastings ratio of zero.
//!
//! Out-of-bounds proposals are reflected back into `[min, max]` rather
//! than rejected, so the proposal distribution keeps its support.

use rand::Rng;

/// Scaled-multiplier move bounded to `[min, max]`.
///
/// Returns the proposed value and the log-Hastings ratio for the caller's
/// Metropolis-Hastings decision.
pub fn scale_move<R: Rng + ?Sized>(
    rng: &mut R,
    old: f64,
    min: f64,
    max: f64,
    tuning: f64,
) -> (f64, f64) {
    let c = tuning * (rng.gen::<f64>() - 0.5);
    let mut new = old * c.exp();
    // Reflect off the bounds, preserving detailed balance for the
    // multiplicative kernel.
    while new < min || new > max {
        if new < min {
            new = min * min / new;
        }
        if new > max {
            new = max * max / new;
        }
    }
    (new, (new / old).ln())
}

/// Sliding-window move bounded to `[min, max]`.
///
/// Symmetric; the log-Hastings ratio is always zero.
pub fn window_move<R: Rng + ?Sized>(
    rng: &mut R,
    old: f64,
    min: f64,
    max: f64,
    tuning: f64,
) -> (f64, f64) {
    let mut new = old + tuning * (rng.gen::<f64>() - 0.5);
    while new < min || new > max {
        if new < min {
            new = 2.0 * min - new;
        }
        if new > max {
            new = 2.0 * max - new;
        }
    }
    (new, 0.0)
}
