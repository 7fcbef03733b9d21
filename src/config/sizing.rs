use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Whether sized amounts are forced into the configured stake bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClampPolicy {
    /// Plain `notional * mirror_fraction`; stake bounds are informational.
    #[default]
    #[serde(rename = "DISABLED")]
    Disabled,
    /// Magnitude of a non-zero result is clamped into `[stake_min, stake_max]`.
    #[serde(rename = "ENABLED")]
    Enabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    pub bankroll: f64,
    pub stake_min: f64,
    pub stake_max: f64,
    pub mirror_fraction: f64,
    pub clamp: ClampPolicy,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            bankroll: 1000.0,
            stake_min: 5.0,
            stake_max: 20.0,
            mirror_fraction: 0.005,
            clamp: ClampPolicy::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedAmount {
    /// Notional the amount was derived from.
    pub notional: f64,
    /// `notional * mirror_fraction`.
    pub raw: f64,
    /// Amount after the clamp policy.
    pub value: f64,
    pub clamped: bool,
}

impl SizedAmount {
    /// Effective factor applied to the notional, so token quantities can be
    /// scaled consistently with the USDC amount.
    pub fn scale(&self, fallback: f64) -> f64 {
        if self.notional == 0.0 {
            fallback
        } else {
            self.value / self.notional
        }
    }
}

impl SizingConfig {
    pub fn size(&self, notional: f64) -> SizedAmount {
        let raw = notional * self.mirror_fraction;
        let (value, clamped) = match self.clamp {
            ClampPolicy::Disabled => (raw, false),
            ClampPolicy::Enabled => clamp_magnitude(raw, self.stake_min, self.stake_max),
        };

        debug!(notional, raw, value, clamped, "sized notional");

        SizedAmount {
            notional,
            raw,
            value,
            clamped,
        }
    }

    /// Returns every violated invariant; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(self.mirror_fraction > 0.0 && self.mirror_fraction <= 1.0) {
            errors.push(format!(
                "STAKE_WHALE_PCT must be in (0, 1], got {}",
                self.mirror_fraction
            ));
        }
        if self.stake_min < 0.0 {
            errors.push("STAKE_MIN cannot be negative".to_string());
        }
        if self.stake_max <= 0.0 {
            errors.push("STAKE_MAX must be positive".to_string());
        }
        if self.stake_min > self.stake_max {
            errors.push(format!(
                "STAKE_MIN ({}) cannot be greater than STAKE_MAX ({})",
                self.stake_min, self.stake_max
            ));
        }
        if self.bankroll < 0.0 {
            errors.push("BANKROLL cannot be negative".to_string());
        }

        errors
    }
}

fn clamp_magnitude(raw: f64, min: f64, max: f64) -> (f64, bool) {
    if raw == 0.0 {
        return (0.0, false);
    }
    let magnitude = raw.abs();
    let bounded = magnitude.max(min).min(max);
    (bounded.copysign(raw), bounded != magnitude)
}

impl fmt::Display for ClampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClampPolicy::Disabled => write!(f, "DISABLED"),
            ClampPolicy::Enabled => write!(f, "ENABLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fraction: f64, clamp: ClampPolicy) -> SizingConfig {
        SizingConfig {
            mirror_fraction: fraction,
            clamp,
            ..Default::default()
        }
    }

    #[test]
    fn unclamped_size_is_plain_multiplication() {
        let sizing = config(0.01, ClampPolicy::Disabled);
        for notional in [0.0, 1.0, 150.0, 250.0, 10_000.0] {
            let sized = sizing.size(notional);
            assert_eq!(sized.value, notional * 0.01);
            assert!(!sized.clamped);
        }
    }

    #[test]
    fn unclamped_size_is_monotonic() {
        let sizing = config(0.005, ClampPolicy::Disabled);
        let mut previous = f64::MIN;
        for step in 0..200 {
            let value = sizing.size(step as f64 * 7.5).value;
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn negative_notional_keeps_sign_without_clamp() {
        let sizing = config(0.01, ClampPolicy::Disabled);
        assert_eq!(sizing.size(-250.0).value, -2.5);
    }

    // Stake bounds are configured but not applied unless the clamp is on.
    #[test]
    fn bounds_ignored_when_clamp_disabled() {
        let sizing = config(0.5, ClampPolicy::Disabled);
        assert_eq!(sizing.size(1000.0).value, 500.0);
        assert_eq!(sizing.size(2.0).value, 1.0);
    }

    #[test]
    fn clamp_enforces_bounds_on_magnitude() {
        let sizing = config(0.5, ClampPolicy::Enabled);

        let capped = sizing.size(1000.0);
        assert_eq!(capped.value, 20.0);
        assert!(capped.clamped);

        let raised = sizing.size(2.0);
        assert_eq!(raised.value, 5.0);
        assert!(raised.clamped);

        let inside = sizing.size(20.0);
        assert_eq!(inside.value, 10.0);
        assert!(!inside.clamped);

        let negative = sizing.size(-1000.0);
        assert_eq!(negative.value, -20.0);

        assert_eq!(sizing.size(0.0).value, 0.0);
    }

    #[test]
    fn scale_reflects_clamped_value() {
        let sizing = config(0.5, ClampPolicy::Enabled);
        let sized = sizing.size(1000.0);
        assert_eq!(sized.scale(0.5), 0.02);
        assert_eq!(sizing.size(0.0).scale(0.5), 0.5);
    }

    #[test]
    fn validate_reports_every_violation() {
        let sizing = SizingConfig {
            bankroll: -1.0,
            stake_min: 30.0,
            stake_max: 20.0,
            mirror_fraction: 0.0,
            clamp: ClampPolicy::Disabled,
        };
        let errors = sizing.validate();
        assert_eq!(errors.len(), 3);
        assert!(SizingConfig::default().validate().is_empty());
    }
}
