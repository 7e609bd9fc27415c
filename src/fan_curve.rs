//! Tiered duty mapping with hysteresis.
//!
//! Temperature is mapped to one of five fixed duty tiers by four
//! breakpoints. A transition across a breakpoint is only let through once
//! the temperature has moved `margin` degrees past it, so a reading
//! hovering around a breakpoint does not make the fan flap.

use crate::config::{Config, TiersCfg};

/// A breakpoint together with the duties on either side of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// Whole degrees Celsius.
    pub at: u32,
    /// Duty of the tier below `at`.
    pub lo: u8,
    /// Duty of the tier at and above `at`.
    pub hi: u8,
}

/// Breakpoints and the duty of every tier, lowest first.
///
/// # Example
///
/// ```
/// use hwfand::{config::TiersCfg, fan_curve::TierTable};
///
/// let table = TierTable::new(&TiersCfg::default(), 76, 255);
/// assert_eq!(table.target_duty(39), 76);
/// assert_eq!(table.target_duty(45), 110);
/// assert_eq!(table.target_duty(70), 255);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    breakpoints: [u32; 4],
    duties: [u8; 5],
}

impl TierTable {
    pub fn new(tiers: &TiersCfg, min_duty: u8, max_duty: u8) -> Self {
        let [a, b, c] = tiers.duties;
        Self {
            breakpoints: tiers.breakpoints,
            duties: [min_duty, a, b, c, max_duty],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.tiers,
            config.control.min_duty,
            config.control.max_duty,
        )
    }

    /// Duty of the tier containing `temp_c`.
    pub fn target_duty(&self, temp_c: u32) -> u8 {
        let tier = self
            .breakpoints
            .iter()
            .take_while(|&&at| temp_c >= at)
            .count();
        self.duties[tier]
    }

    pub fn boundaries(&self) -> impl Iterator<Item = Boundary> + '_ {
        self.breakpoints
            .iter()
            .enumerate()
            .map(|(i, &at)| Boundary {
                at,
                lo: self.duties[i],
                hi: self.duties[i + 1],
            })
    }

    /// Returns `target` when the move may happen now, `last` otherwise.
    ///
    /// A rise from at or below a boundary's lower duty to at or above its
    /// upper duty needs `temp_c >= at + margin`; the mirrored fall needs
    /// `temp_c <= at - margin`.
    pub fn gate(&self, last: u8, target: u8, temp_c: u32, margin: u32) -> u8 {
        let blocked = self.boundaries().any(|b| {
            let rising = last <= b.lo && target >= b.hi;
            let falling = last >= b.hi && target <= b.lo;
            (rising && temp_c < b.at.saturating_add(margin))
                || (falling && temp_c.saturating_add(margin) > b.at)
        });

        if blocked { last } else { target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn table() -> TierTable {
        TierTable::new(&TiersCfg::default(), 76, 255)
    }

    #[test]
    fn default_tiers() {
        let t = table();
        let cases = [
            (0, 76),
            (39, 76),
            (40, 110),
            (49, 110),
            (50, 150),
            (59, 150),
            (60, 200),
            (69, 200),
            (70, 255),
            (110, 255),
        ];
        for (temp, duty) in cases {
            assert_eq!(t.target_duty(temp), duty, "at {temp}°C");
        }
    }

    #[test]
    fn outer_tiers_follow_duty_bounds() {
        let t = TierTable::new(&TiersCfg::default(), 90, 230);
        assert_eq!(t.target_duty(20), 90);
        assert_eq!(t.target_duty(85), 230);
    }

    #[test]
    fn boundaries_pair_adjacent_duties() {
        let got: Vec<Boundary> = table().boundaries().collect();
        assert_eq!(
            got,
            vec![
                Boundary { at: 40, lo: 76, hi: 110 },
                Boundary { at: 50, lo: 110, hi: 150 },
                Boundary { at: 60, lo: 150, hi: 200 },
                Boundary { at: 70, lo: 200, hi: 255 },
            ]
        );
    }

    #[test]
    fn rise_held_until_margin_is_cleared() {
        let t = table();
        assert_eq!(t.gate(110, 150, 50, 2), 110);
        assert_eq!(t.gate(110, 150, 51, 2), 110);
        assert_eq!(t.gate(110, 150, 52, 2), 150);
    }

    #[test]
    fn fall_held_until_margin_is_cleared() {
        let t = table();
        assert_eq!(t.gate(200, 150, 59, 2), 200);
        assert_eq!(t.gate(200, 150, 58, 2), 150);
    }

    #[test]
    fn oscillation_around_boundary_keeps_tier() {
        let t = table();
        let mut duty = 150;
        for temp in [58, 61, 58, 61, 59, 60, 61, 58] {
            duty = t.gate(duty, t.target_duty(temp), temp, 2);
            assert_eq!(duty, 150, "at {temp}°C");
        }
        // A genuine crossing beyond the band moves it.
        duty = t.gate(duty, t.target_duty(62), 62, 2);
        assert_eq!(duty, 200);
    }

    #[test]
    fn intermediate_duty_is_not_gated() {
        // 88 sits between tiers while the rate limiter ramps toward 110.
        assert_eq!(table().gate(88, 110, 41, 2), 110);
    }

    #[test]
    fn multi_tier_jump_held_by_nearest_boundary() {
        let t = table();
        assert_eq!(t.gate(76, 150, 51, 2), 76);
        assert_eq!(t.gate(76, 150, 52, 2), 150);
    }

    #[test]
    fn zero_margin_never_blocks() {
        let t = table();
        assert_eq!(t.gate(110, 150, 50, 0), 150);
        assert_eq!(t.gate(150, 110, 49, 0), 110);
    }

    #[test]
    fn margin_wider_than_breakpoint_blocks_fall() {
        let tiers = TiersCfg {
            breakpoints: [1, 50, 60, 70],
            duties: [110, 150, 200],
        };
        let t = TierTable::new(&tiers, 76, 255);
        assert_eq!(t.gate(110, 76, 0, 2), 110);
    }

    #[test]
    fn huge_margin_saturates_instead_of_wrapping() {
        let t = table();
        assert_eq!(t.gate(76, 110, 110, u32::MAX), 76);
        assert_eq!(t.gate(110, 76, 0, u32::MAX), 110);
    }

    proptest! {
        #[test]
        fn gate_returns_last_or_target(
            last in 0u8..=255,
            temp in 0u32..=120,
            margin in 0u32..=5,
        ) {
            let t = table();
            let target = t.target_duty(temp);
            let gated = t.gate(last, target, temp, margin);
            prop_assert!(gated == last || gated == target);
        }
    }
}
