//! Raw sensor reading to engineering units.
//!
//! `y = L((M * x + B * 10^Bexp) * 10^Rexp)` where `L` is the record's
//! linearization function.

use crate::sdr::{AnalogFormat, SensorRecord, readable};

/// Linearization codes.
pub mod linearization {
    /// Identity.
    pub const LINEAR: u8 = 0;
    /// Natural log.
    pub const LN: u8 = 1;
    /// Base-10 log.
    pub const LOG10: u8 = 2;
    /// Base-2 log.
    pub const LOG2: u8 = 3;
    /// e^x.
    pub const E: u8 = 4;
    /// 10^x.
    pub const EXP10: u8 = 5;
    /// 2^x.
    pub const EXP2: u8 = 6;
    /// 1/x.
    pub const INVERSE: u8 = 7;
    /// x^2.
    pub const SQR: u8 = 8;
    /// x^3.
    pub const CUBE: u8 = 9;
    /// sqrt(x).
    pub const SQRT: u8 = 10;
    /// x^(1/3).
    pub const CUBE_ROOT: u8 = 11;
}

/// Interpret `raw` per the record's analog data format.
fn signed_value(format: AnalogFormat, raw: u8) -> f64 {
    match format {
        AnalogFormat::Unsigned | AnalogFormat::NonNumeric => f64::from(raw),
        AnalogFormat::OnesComplement => {
            if raw & 0x80 != 0 {
                -f64::from(!raw)
            } else {
                f64::from(raw)
            }
        }
        AnalogFormat::TwosComplement => f64::from(raw as i8),
    }
}

fn linearize(code: u8, x: f64) -> Option<f64> {
    use linearization::*;

    let y = match code {
        LINEAR => x,
        LN => x.ln(),
        LOG10 => x.log10(),
        LOG2 => x.log2(),
        E => x.exp(),
        EXP10 => 10f64.powf(x),
        EXP2 => x.exp2(),
        INVERSE => x.recip(),
        SQR => x * x,
        CUBE => x * x * x,
        SQRT => x.sqrt(),
        CUBE_ROOT => x.cbrt(),
        _ => return None,
    };
    Some(y)
}

/// Convert a raw reading.
///
/// Non-numeric sensors return the raw byte. Unknown linearization codes
/// return the linear value.
pub fn convert(sensor: &SensorRecord, raw: u8) -> f64 {
    if !sensor.is_analog() {
        tracing::trace!(
            sensor = sensor.number,
            owner = sensor.owner,
            "non-numeric sensor, returning raw value"
        );
        return f64::from(raw);
    }

    let x = signed_value(sensor.format, raw);
    let m = f64::from(sensor.m);
    let b = f64::from(sensor.b);
    let value =
        (m * x + b * 10f64.powi(i32::from(sensor.b_exp))) * 10f64.powi(i32::from(sensor.r_exp));

    match linearize(sensor.linearization, value) {
        Some(y) => y,
        None => {
            tracing::debug!(
                sensor = sensor.number,
                owner = sensor.owner,
                linearization = sensor.linearization,
                "unknown linearization, value left linear"
            );
            value
        }
    }
}

/// Alarm severity raised when a threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Non-critical threshold.
    Minor,
    /// Critical threshold.
    Major,
}

/// One of the four thresholds exposed per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    /// Lower critical.
    LowerCritical,
    /// Lower non-critical.
    LowerNonCritical,
    /// Upper non-critical.
    UpperNonCritical,
    /// Upper critical.
    UpperCritical,
}

impl ThresholdKind {
    /// All kinds, lowest first.
    pub const ALL: [Self; 4] = [
        Self::LowerCritical,
        Self::LowerNonCritical,
        Self::UpperNonCritical,
        Self::UpperCritical,
    ];

    /// Severity raised by crossing this threshold.
    pub fn severity(self) -> Severity {
        match self {
            Self::LowerCritical | Self::UpperCritical => Severity::Major,
            Self::LowerNonCritical | Self::UpperNonCritical => Severity::Minor,
        }
    }

    fn readable_bit(self) -> u8 {
        match self {
            Self::LowerCritical => readable::LOWER_CRITICAL,
            Self::LowerNonCritical => readable::LOWER_NON_CRITICAL,
            Self::UpperNonCritical => readable::UPPER_NON_CRITICAL,
            Self::UpperCritical => readable::UPPER_CRITICAL,
        }
    }

    fn raw(self, sensor: &SensorRecord) -> u8 {
        let t = &sensor.thresholds;
        match self {
            Self::LowerCritical => t.lower_critical,
            Self::LowerNonCritical => t.lower_non_critical,
            Self::UpperNonCritical => t.upper_non_critical,
            Self::UpperCritical => t.upper_critical,
        }
    }
}

/// Converted thresholds; `None` means not readable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Thresholds {
    /// Lower critical.
    pub lower_critical: Option<f64>,
    /// Lower non-critical.
    pub lower_non_critical: Option<f64>,
    /// Upper non-critical.
    pub upper_non_critical: Option<f64>,
    /// Upper critical.
    pub upper_critical: Option<f64>,
}

impl Thresholds {
    /// Extract and convert the thresholds a sensor record marks readable.
    pub fn from_sensor(sensor: &SensorRecord) -> Self {
        let mut out = Self::default();
        if !sensor.is_analog() || !sensor.is_threshold() {
            return out;
        }
        for kind in ThresholdKind::ALL {
            let value = (sensor.readable_thresholds & kind.readable_bit() != 0)
                .then(|| convert(sensor, kind.raw(sensor)));
            *out.slot(kind) = value;
        }
        out
    }

    fn slot(&mut self, kind: ThresholdKind) -> &mut Option<f64> {
        match kind {
            ThresholdKind::LowerCritical => &mut self.lower_critical,
            ThresholdKind::LowerNonCritical => &mut self.lower_non_critical,
            ThresholdKind::UpperNonCritical => &mut self.upper_non_critical,
            ThresholdKind::UpperCritical => &mut self.upper_critical,
        }
    }

    /// Threshold value for `kind`.
    pub fn get(&self, kind: ThresholdKind) -> Option<f64> {
        match kind {
            ThresholdKind::LowerCritical => self.lower_critical,
            ThresholdKind::LowerNonCritical => self.lower_non_critical,
            ThresholdKind::UpperNonCritical => self.upper_non_critical,
            ThresholdKind::UpperCritical => self.upper_critical,
        }
    }

    /// Highest severity raised by `value`, if any.
    ///
    /// Upper thresholds trip at or above their value, lower thresholds at or
    /// below it.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        ThresholdKind::ALL
            .into_iter()
            .filter(|&kind| match (kind, self.get(kind)) {
                (ThresholdKind::LowerCritical | ThresholdKind::LowerNonCritical, Some(t)) => {
                    value <= t
                }
                (ThresholdKind::UpperCritical | ThresholdKind::UpperNonCritical, Some(t)) => {
                    value >= t
                }
                (_, None) => false,
            })
            .map(ThresholdKind::severity)
            .max()
    }
}
