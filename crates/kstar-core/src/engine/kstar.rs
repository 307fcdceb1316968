use crate::core::boltzmann::ZBounds;
use std::f64::consts::LN_10;
use std::fmt;

/// Interval on `ln K* = ln Z_complex - ln Z_protein - ln Z_ligand`.
///
/// Endpoints combine the partition function bounds in the worst case: the lower end
/// takes the complex lower bound over the unbound upper bounds, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KStarBound {
    pub ln_lower: f64,
    pub ln_upper: f64,
}

impl KStarBound {
    pub const UNKNOWN: KStarBound = KStarBound {
        ln_lower: f64::NEG_INFINITY,
        ln_upper: f64::INFINITY,
    };

    pub fn from_bounds(protein: &ZBounds, ligand: &ZBounds, complex: &ZBounds) -> Self {
        let ln_lower = complex.ln_lower - protein.ln_upper - ligand.ln_upper;
        let ln_upper = complex.ln_upper - protein.ln_lower - ligand.ln_lower;
        // inf - inf cases carry no information
        Self {
            ln_lower: if ln_lower.is_nan() { f64::NEG_INFINITY } else { ln_lower },
            ln_upper: if ln_upper.is_nan() { f64::INFINITY } else { ln_upper },
        }
    }

    pub fn log10_lower(&self) -> f64 {
        self.ln_lower / LN_10
    }

    pub fn log10_upper(&self) -> f64 {
        self.ln_upper / LN_10
    }

    /// Width of the interval in log10 units; infinite while either end is unbounded.
    pub fn width(&self) -> f64 {
        if self.ln_lower.is_finite() && self.ln_upper.is_finite() {
            (self.ln_upper - self.ln_lower) / LN_10
        } else {
            f64::INFINITY
        }
    }

    /// Length of the part of this interval inside `[lo, hi]`, both in log10 units.
    pub fn overlap_width(&self, lo: f64, hi: f64) -> f64 {
        let start = self.log10_lower().max(lo);
        let end = self.log10_upper().min(hi);
        if end < start {
            return 0.0;
        }
        if start.is_infinite() || end.is_infinite() {
            return f64::INFINITY;
        }
        end - start
    }
}

impl fmt::Display for KStarBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.log10_lower(), self.log10_upper())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_use_worst_case_combinations() {
        let protein = ZBounds::new(1.0, 2.0);
        let ligand = ZBounds::new(3.0, 3.5);
        let complex = ZBounds::new(10.0, 11.0);
        let k = KStarBound::from_bounds(&protein, &ligand, &complex);
        assert_eq!(k.ln_lower, 10.0 - 2.0 - 3.5);
        assert_eq!(k.ln_upper, 11.0 - 1.0 - 3.0);
        assert!((k.width() - (7.0 - 4.5) / LN_10).abs() < 1e-12);
    }

    #[test]
    fn unknown_states_give_unbounded_intervals() {
        let known = ZBounds::new(1.0, 1.0);
        let k = KStarBound::from_bounds(&ZBounds::UNKNOWN, &known, &known);
        assert_eq!(k.ln_lower, f64::NEG_INFINITY);
        assert_eq!(k.ln_upper, f64::INFINITY);
        assert_eq!(k.width(), f64::INFINITY);
    }

    #[test]
    fn empty_states_do_not_produce_nan() {
        let empty = ZBounds::empty();
        let k = KStarBound::from_bounds(&empty, &empty, &empty);
        assert_eq!(k.ln_lower, f64::NEG_INFINITY);
        assert_eq!(k.ln_upper, f64::INFINITY);

        let known = ZBounds::new(2.0, 2.0);
        let k = KStarBound::from_bounds(&known, &known, &empty);
        assert_eq!(k.ln_lower, f64::NEG_INFINITY);
        assert_eq!(k.ln_upper, f64::NEG_INFINITY);
    }

    #[test]
    fn overlap_with_contested_band() {
        let k = KStarBound {
            ln_lower: 1.0 * LN_10,
            ln_upper: 3.0 * LN_10,
        };
        assert!((k.overlap_width(2.0, 5.0) - 1.0).abs() < 1e-12);
        assert_eq!(k.overlap_width(4.0, 5.0), 0.0);
        assert_eq!(KStarBound::UNKNOWN.overlap_width(0.0, 1.0), 1.0);
        assert_eq!(KStarBound::UNKNOWN.overlap_width(f64::NEG_INFINITY, 1.0), f64::INFINITY);
    }
}
