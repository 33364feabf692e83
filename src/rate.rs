//! Throttle Rates
//!
//! A throttle rate is a token budget per time unit ("10 items per minute").
//! The drain loop uses the budget and the unit's window length directly;
//! [`ThrottleRate::tokens_per_second`] exists for reporting only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Supported time units for a throttle rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    /// Every supported unit, shortest first
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Microsecond,
        TimeUnit::Millisecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
    ];

    /// Lowercase name used in configuration and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Microsecond => "microsecond",
            TimeUnit::Millisecond => "millisecond",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
        }
    }

    /// Length of one unit in seconds
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Microsecond => 0.000_001,
            TimeUnit::Millisecond => 0.001,
            TimeUnit::Second => 1.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Hour => 3_600.0,
            TimeUnit::Day => 86_400.0,
            TimeUnit::Week => 604_800.0,
        }
    }

    /// Length of one unit as an exact duration
    pub fn window(&self) -> Duration {
        match self {
            TimeUnit::Microsecond => Duration::from_micros(1),
            TimeUnit::Millisecond => Duration::from_millis(1),
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3_600),
            TimeUnit::Day => Duration::from_secs(86_400),
            TimeUnit::Week => Duration::from_secs(604_800),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self> {
        TimeUnit::ALL
            .iter()
            .copied()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| {
                ThrottleError::InvalidConfiguration(format!(
                    "invalid unit '{}', expected one of: {}",
                    s,
                    ThrottleRate::units().collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

/// Token budget per time unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRate {
    tokens: u32,
    unit: TimeUnit,
}

impl ThrottleRate {
    /// Create a rate of `tokens` per `unit`. Fails when `tokens` is zero.
    pub fn new(tokens: u32, unit: TimeUnit) -> Result<Self> {
        if tokens == 0 {
            return Err(ThrottleError::InvalidConfiguration(
                "invalid token amount: must be greater than 0".to_string(),
            ));
        }
        Ok(Self { tokens, unit })
    }

    /// Create a rate from raw configuration values.
    ///
    /// The unit is checked first, then the token amount.
    pub fn parse(tokens: i64, unit: &str) -> Result<Self> {
        let unit = unit.parse::<TimeUnit>()?;
        let tokens = u32::try_from(tokens).map_err(|_| {
            ThrottleError::InvalidConfiguration(format!("invalid token amount: {}", tokens))
        })?;
        Self::new(tokens, unit)
    }

    /// Names of all supported units
    pub fn units() -> impl Iterator<Item = &'static str> {
        TimeUnit::ALL.iter().map(|unit| unit.as_str())
    }

    /// One unit, by name, in seconds
    pub fn unit_in_seconds(unit: &str) -> Result<f64> {
        Ok(unit.parse::<TimeUnit>()?.seconds())
    }

    /// Budget per window
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Window length the budget applies to
    pub fn window(&self) -> Duration {
        self.unit.window()
    }

    /// Tokens allowed per second (diagnostics only)
    pub fn tokens_per_second(&self) -> f64 {
        self.tokens as f64 / self.unit.seconds()
    }
}

impl fmt::Display for ThrottleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}", self.tokens, self.unit)
    }
}
