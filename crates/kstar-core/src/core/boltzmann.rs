//! Boltzmann weights and partition function bounds.
//!
//! Partition functions span hundreds of orders of magnitude, so weights are handled as
//! natural logarithms and summed relative to the largest term seen.

use std::f64::consts::LN_10;
use std::fmt;

/// Gas constant in kcal/(mol*K).
pub const GAS_CONSTANT: f64 = 1.9891e-3;
/// Temperature in K.
pub const TEMPERATURE: f64 = 298.15;
/// Thermal energy in kcal/mol.
pub const RT: f64 = GAS_CONSTANT * TEMPERATURE;

/// Relative tolerance allowed when comparing a lower bound against an upper bound.
pub const BOUND_TOLERANCE: f64 = 1e-9;

/// Relative size below which a [`LogSum`] total is considered to have lost its small terms.
pub const DEGRADED_FRACTION: f64 = 1e-3;

/// Natural log of the Boltzmann weight `exp(-energy / RT)`.
#[inline]
pub fn ln_weight(energy: f64) -> f64 {
    -energy / RT
}

/// `ln(exp(a) + exp(b))` without leaving log space.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Neumaier-compensated running sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StableSum {
    sum: f64,
    compensation: f64,
}

impl StableSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sums `values` in increasing magnitude order.
    pub fn from_sorted(values: &mut [f64]) -> Self {
        values.sort_unstable_by(|a, b| a.abs().total_cmp(&b.abs()));
        let mut total = Self::new();
        for &v in values.iter() {
            total.add(v);
        }
        total
    }

    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn sub(&mut self, value: f64) {
        self.add(-value);
    }

    /// Multiplies the running total by `factor`.
    pub fn rescale(&mut self, factor: f64) {
        self.sum *= factor;
        self.compensation *= factor;
    }

    /// The compensated total, never negative.
    pub fn value(&self) -> f64 {
        (self.sum + self.compensation).max(0.0)
    }
}

/// Running sum of non-negative terms given as natural logarithms.
///
/// Terms are stored relative to the largest term seen so far, so nothing overflows and a
/// term only underflows when it is negligible next to that largest term. Subtraction can
/// cancel the large terms and leave the total far below the scale; [`is_degraded`]
/// reports that case so the owner can resum its terms with [`from_ln_terms`].
///
/// [`is_degraded`]: LogSum::is_degraded
/// [`from_ln_terms`]: LogSum::from_ln_terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSum {
    ln_scale: f64,
    scaled: StableSum,
}

impl Default for LogSum {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSum {
    pub fn new() -> Self {
        Self {
            ln_scale: f64::NEG_INFINITY,
            scaled: StableSum::new(),
        }
    }

    /// Sums `ln_terms` smallest first, relative to the largest of them.
    pub fn from_ln_terms(ln_terms: &[f64]) -> Self {
        let ln_scale = ln_terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if ln_scale == f64::NEG_INFINITY {
            return Self::new();
        }
        let mut scaled: Vec<f64> = ln_terms.iter().map(|&t| (t - ln_scale).exp()).collect();
        Self {
            ln_scale,
            scaled: StableSum::from_sorted(&mut scaled),
        }
    }

    pub fn add_ln(&mut self, ln_term: f64) {
        if ln_term == f64::NEG_INFINITY {
            return;
        }
        if ln_term > self.ln_scale {
            if self.ln_scale > f64::NEG_INFINITY {
                self.scaled.rescale((self.ln_scale - ln_term).exp());
            }
            self.ln_scale = ln_term;
        }
        self.scaled.add((ln_term - self.ln_scale).exp());
    }

    pub fn sub_ln(&mut self, ln_term: f64) {
        if ln_term == f64::NEG_INFINITY || self.ln_scale == f64::NEG_INFINITY {
            return;
        }
        self.scaled.sub((ln_term - self.ln_scale).exp());
    }

    /// Natural log of the total; `-inf` only when nothing positive remains.
    pub fn ln_value(&self) -> f64 {
        let value = self.scaled.value();
        if value > 0.0 {
            self.ln_scale + value.ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Whether cancellation left the total below [`DEGRADED_FRACTION`] of the largest term.
    pub fn is_degraded(&self) -> bool {
        self.ln_scale > f64::NEG_INFINITY && self.scaled.value() < DEGRADED_FRACTION
    }
}

/// A `[Z_lo, Z_hi]` interval stored as natural logarithms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZBounds {
    pub ln_lower: f64,
    pub ln_upper: f64,
}

impl ZBounds {
    pub const UNKNOWN: ZBounds = ZBounds {
        ln_lower: f64::NEG_INFINITY,
        ln_upper: f64::INFINITY,
    };

    pub fn new(ln_lower: f64, ln_upper: f64) -> Self {
        Self { ln_lower, ln_upper }
    }

    /// Both bounds equal to zero: a state with no conformations at all.
    pub fn empty() -> Self {
        Self::new(f64::NEG_INFINITY, f64::NEG_INFINITY)
    }

    /// Whether `Z_hi / Z_lo <= 1 + epsilon`.
    pub fn is_within(&self, epsilon: f64) -> bool {
        if self.ln_upper == f64::NEG_INFINITY {
            return true;
        }
        if !self.ln_lower.is_finite() || !self.ln_upper.is_finite() {
            return false;
        }
        self.ln_upper - self.ln_lower <= epsilon.ln_1p()
    }

    /// `Z_hi / Z_lo - 1`, infinite while either side is unbounded.
    pub fn effective_epsilon(&self) -> f64 {
        if self.ln_upper == f64::NEG_INFINITY {
            return 0.0;
        }
        if !self.ln_lower.is_finite() || !self.ln_upper.is_finite() {
            return f64::INFINITY;
        }
        (self.ln_upper - self.ln_lower).exp_m1()
    }

    pub fn log10_lower(&self) -> f64 {
        self.ln_lower / LN_10
    }

    pub fn log10_upper(&self) -> f64 {
        self.ln_upper / LN_10
    }

    /// Intersects with `next`, so bounds never loosen.
    ///
    /// # Panics
    ///
    /// Panics if the tightened lower bound exceeds the upper bound beyond
    /// [`BOUND_TOLERANCE`]; that means an energy bound was not admissible.
    pub fn tighten(&mut self, next: ZBounds) {
        let ln_lower = self.ln_lower.max(next.ln_lower);
        let ln_upper = self.ln_upper.min(next.ln_upper);
        if ln_lower > ln_upper {
            let slack = if ln_upper.is_finite() {
                ln_upper.abs().max(1.0) * BOUND_TOLERANCE
            } else {
                0.0
            };
            assert!(
                ln_lower - ln_upper <= slack,
                "partition function bounds crossed: ln Z_lo = {ln_lower}, ln Z_hi = {ln_upper}"
            );
            self.ln_lower = ln_upper;
            self.ln_upper = ln_upper;
            return;
        }
        self.ln_lower = ln_lower;
        self.ln_upper = ln_upper;
    }
}

impl fmt::Display for ZBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.log10_lower(), self.log10_upper())
    }
}
