use std::sync::{Arc, OnceLock};

use log::debug;

use crate::filter_kit;

/// Filter-table entries per unit of fractional sample phase.
pub const NPC: usize = 4096;

/// Roll-off of the low-pass cutoff relative to Nyquist.
const ROLL_OFF: f64 = 0.90;

/// Kaiser window shape parameter.
const BETA: f64 = 6.0;

/// Filter-length multipliers for the two supported tiers.
const NMULT_HIGH: usize = 35;
const NMULT_FAST: usize = 11;

/// Resampling quality tier. `Fast` uses a short filter, `High` a long one;
/// the two differ only in stopband rejection and CPU cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quality {
    Fast,
    High,
}

impl Quality {
    pub(crate) fn nmult(self) -> usize {
        match self {
            Quality::Fast => NMULT_FAST,
            Quality::High => NMULT_HIGH,
        }
    }

    fn nwing(self) -> usize {
        NPC * (self.nmult() - 1) / 2
    }
}

/// Right wing of the oversampled low-pass impulse response plus its first
/// differences, the last difference synthesized as the negated final weight
/// so the response decays linearly to zero one slot past the end.
///
/// Immutable once built; every engine of the same tier shares one table.
pub struct FilterTable {
    pub weights: Vec<f32>,
    pub deltas: Vec<f32>,
    pub nwing: usize,
    pub(crate) nmult: usize,
}

impl FilterTable {
    fn build(quality: Quality) -> Self {
        let nwing = quality.nwing();
        let designed = filter_kit::lp_filter(nwing, 0.5 * ROLL_OFF, BETA, NPC);
        let weights: Vec<f32> = designed.iter().map(|&w| w as f32).collect();

        let mut deltas = vec![0.0f32; nwing];
        for i in 0..nwing - 1 {
            deltas[i] = weights[i + 1] - weights[i];
        }
        deltas[nwing - 1] = -weights[nwing - 1];

        debug!("built {:?} filter table ({} wing coefficients)", quality, nwing);
        Self {
            weights,
            deltas,
            nwing,
            nmult: quality.nmult(),
        }
    }

    /// Shared table for a quality tier, built lazily exactly once even under
    /// concurrent first use from multiple channels.
    pub fn shared(quality: Quality) -> Arc<FilterTable> {
        static FAST: OnceLock<Arc<FilterTable>> = OnceLock::new();
        static HIGH: OnceLock<Arc<FilterTable>> = OnceLock::new();
        let slot = match quality {
            Quality::Fast => &FAST,
            Quality::High => &HIGH,
        };
        Arc::clone(slot.get_or_init(|| Arc::new(FilterTable::build(quality))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_one_shared_table_per_tier() {
        let a = FilterTable::shared(Quality::Fast);
        let b = FilterTable::shared(Quality::Fast);
        assert!(Arc::ptr_eq(&a, &b));
        let c = FilterTable::shared(Quality::High);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn wing_lengths_match_tier_multipliers() {
        assert_eq!(FilterTable::shared(Quality::Fast).nwing, NPC * (11 - 1) / 2);
        assert_eq!(FilterTable::shared(Quality::High).nwing, NPC * (35 - 1) / 2);
    }

    #[test]
    fn deltas_are_first_differences_with_synthesized_tail() {
        let t = FilterTable::shared(Quality::Fast);
        for i in 0..t.nwing - 1 {
            assert_eq!(t.deltas[i], t.weights[i + 1] - t.weights[i]);
        }
        assert_eq!(t.deltas[t.nwing - 1], -t.weights[t.nwing - 1]);
    }
}
