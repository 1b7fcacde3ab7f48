//! Log-space numeric helpers for numerically stable probability work.
//!
//! All probability composition in the MCMC core happens on the natural-log
//! scale; these helpers cover the two places a linear-scale value is needed.

/// Lower clamp threshold for [`safe_exponentiation`].
pub const LN_UNDERFLOW: f64 = -300.0;

/// Guarded exponentiation of a log-scale value.
///
/// Maps `ln_x < -300` to exactly `0.0` and `ln_x > 0` to exactly `1.0`,
/// avoiding underflow/overflow when a log-probability must be taken back
/// to the linear scale (e.g. for a Metropolis-Hastings coin flip). Exact
/// at both boundaries: `safe_exponentiation(-300.0) == exp(-300)` and
/// `safe_exponentiation(0.0) == 1.0`.
pub fn safe_exponentiation(ln_x: f64) -> f64 {
    if ln_x < LN_UNDERFLOW {
        0.0
    } else if ln_x > 0.0 {
        1.0
    } else {
        ln_x.exp()
    }
}

/// Log-sum-exp: `ln(exp(a) + exp(b))` without overflow.
pub fn ln_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (max, min) = if a >= b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}
