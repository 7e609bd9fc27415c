//! Integer exponential moving average.

/// EMA weighting `numerator / denominator` on history.
///
/// `next = (prev * N + raw * (D - N)) / D` with floor division, so repeated
/// application is bit-reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmaFilter {
    numerator: u32,
    denominator: u32,
}

impl EmaFilter {
    /// `numerator <= denominator` and `denominator >= 1` are checked by config validation.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        debug_assert!(denominator > 0 && numerator <= denominator);
        Self {
            numerator,
            denominator,
        }
    }

    /// Folds `raw` into `previous`. The first sample seeds the average exactly.
    pub fn apply(&self, previous: Option<u32>, raw: u32) -> u32 {
        let Some(prev) = previous else {
            return raw;
        };

        let n = u64::from(self.numerator);
        let d = u64::from(self.denominator);
        let blended = (u64::from(prev) * n + u64::from(raw) * (d - n)) / d;
        // A weighted mean of two u32 values fits in u32.
        blended as u32
    }
}

impl Default for EmaFilter {
    fn default() -> Self {
        Self::new(3, 4)
    }
}
