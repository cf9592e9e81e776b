// Per-side correction for mechanical asymmetry between the two motors

use crate::config::{ConfigError, CorrectionFactors};
use crate::messages::{Side, SidePowers};

/// Fixed multiplicative factors in (0, 1], one per side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideCorrection {
    left: f32,
    right: f32,
}

impl SideCorrection {
    pub fn new(left: f32, right: f32) -> Result<Self, ConfigError> {
        Ok(Self {
            left: check_factor("left", left)?,
            right: check_factor("right", right)?,
        })
    }

    pub fn factor(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Scale a raw power level. Never flips its sign.
    pub fn apply(&self, side: Side, raw: f32) -> f32 {
        raw * self.factor(side)
    }

    pub fn apply_pair(&self, raw: SidePowers) -> SidePowers {
        SidePowers {
            left: self.apply(Side::Left, raw.left),
            right: self.apply(Side::Right, raw.right),
        }
    }
}

impl TryFrom<CorrectionFactors> for SideCorrection {
    type Error = ConfigError;

    fn try_from(factors: CorrectionFactors) -> Result<Self, Self::Error> {
        Self::new(factors.left, factors.right)
    }
}

fn check_factor(side: &'static str, value: f32) -> Result<f32, ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidCorrection { side, value })
    }
}
