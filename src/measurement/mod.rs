//! Measurement functions, ranges and resolutions of the 34401A.
//!
//! These types carry everything the driver needs to build SCPI configuration
//! commands and everything the logger needs to label a column.

use crate::error::{AppResult, DmmError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod sample;

pub use sample::{ExportOptions, Sample};

/// Measurement function selectable on the front panel / via `CONF:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementFunction {
    /// DC voltage.
    DcVoltage,
    /// AC voltage, true RMS.
    AcVoltage,
    /// DC current.
    DcCurrent,
    /// AC current, true RMS.
    AcCurrent,
    /// Two-wire resistance.
    #[serde(rename = "resistance_2w")]
    Resistance2W,
    /// Four-wire resistance.
    #[serde(rename = "resistance_4w")]
    Resistance4W,
    /// Frequency of an AC signal.
    Frequency,
    /// Period of an AC signal.
    Period,
    /// Continuity test, 1 kΩ range.
    Continuity,
    /// Diode test.
    Diode,
}

impl MeasurementFunction {
    /// Every function, in front-panel order.
    pub const ALL: [MeasurementFunction; 10] = [
        MeasurementFunction::DcVoltage,
        MeasurementFunction::AcVoltage,
        MeasurementFunction::DcCurrent,
        MeasurementFunction::AcCurrent,
        MeasurementFunction::Resistance2W,
        MeasurementFunction::Resistance4W,
        MeasurementFunction::Frequency,
        MeasurementFunction::Period,
        MeasurementFunction::Continuity,
        MeasurementFunction::Diode,
    ];

    /// SCPI function mnemonic used after `CONF:` and `SENS:`.
    pub fn scpi(&self) -> &'static str {
        match self {
            MeasurementFunction::DcVoltage => "VOLT:DC",
            MeasurementFunction::AcVoltage => "VOLT:AC",
            MeasurementFunction::DcCurrent => "CURR:DC",
            MeasurementFunction::AcCurrent => "CURR:AC",
            MeasurementFunction::Resistance2W => "RES",
            MeasurementFunction::Resistance4W => "FRES",
            MeasurementFunction::Frequency => "FREQ",
            MeasurementFunction::Period => "PER",
            MeasurementFunction::Continuity => "CONT",
            MeasurementFunction::Diode => "DIOD",
        }
    }

    /// Unit of a reading.
    pub fn unit(&self) -> &'static str {
        match self {
            MeasurementFunction::DcVoltage
            | MeasurementFunction::AcVoltage
            | MeasurementFunction::Diode => "V",
            MeasurementFunction::DcCurrent | MeasurementFunction::AcCurrent => "A",
            MeasurementFunction::Resistance2W
            | MeasurementFunction::Resistance4W
            | MeasurementFunction::Continuity => "Ω",
            MeasurementFunction::Frequency => "Hz",
            MeasurementFunction::Period => "s",
        }
    }

    /// Human readable name, used in column headers and chart titles.
    pub fn label(&self) -> &'static str {
        match self {
            MeasurementFunction::DcVoltage => "DC Voltage",
            MeasurementFunction::AcVoltage => "AC Voltage",
            MeasurementFunction::DcCurrent => "DC Current",
            MeasurementFunction::AcCurrent => "AC Current",
            MeasurementFunction::Resistance2W => "2W Resistance",
            MeasurementFunction::Resistance4W => "4W Resistance",
            MeasurementFunction::Frequency => "Frequency",
            MeasurementFunction::Period => "Period",
            MeasurementFunction::Continuity => "Continuity",
            MeasurementFunction::Diode => "Diode",
        }
    }

    /// Ranges offered for this function. The first entry is the default.
    pub fn ranges(&self) -> &'static [&'static str] {
        match self {
            MeasurementFunction::DcVoltage => &["AUTO", "100 mV", "1 V", "10 V", "100 V", "1000 V"],
            MeasurementFunction::AcVoltage => &["AUTO", "100 mV", "1 V", "10 V", "100 V", "750 V"],
            MeasurementFunction::DcCurrent => &["AUTO", "10 mA", "100 mA", "1 A", "3 A"],
            MeasurementFunction::AcCurrent => &["AUTO", "1 A", "3 A"],
            MeasurementFunction::Resistance2W => &[
                "AUTO", "100 Ω", "1 kΩ", "10 kΩ", "100 kΩ", "1 MΩ", "10 MΩ", "100 MΩ",
            ],
            MeasurementFunction::Resistance4W => {
                &["AUTO", "100 Ω", "1 kΩ", "10 kΩ", "100 kΩ", "1 MΩ", "10 MΩ"]
            }
            MeasurementFunction::Frequency | MeasurementFunction::Period => &["AUTO"],
            MeasurementFunction::Continuity | MeasurementFunction::Diode => &["–"],
        }
    }

    /// Integration time (NPLC) is only programmable for DC/AC voltage, current and resistance.
    pub fn supports_nplc(&self) -> bool {
        !matches!(
            self,
            MeasurementFunction::Continuity
                | MeasurementFunction::Diode
                | MeasurementFunction::Frequency
                | MeasurementFunction::Period
        )
    }
}

impl Default for MeasurementFunction {
    fn default() -> Self {
        MeasurementFunction::DcVoltage
    }
}

impl fmt::Display for MeasurementFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display resolution, mapped onto an integration time in power line cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// 3½ digits, 0.02 NPLC.
    #[serde(rename = "3.5")]
    Digits3_5,
    /// 4½ digits, 0.2 NPLC.
    #[serde(rename = "4.5")]
    Digits4_5,
    /// 5½ digits, 1 NPLC.
    #[serde(rename = "5.5")]
    Digits5_5,
    /// 6½ digits, 10 NPLC.
    #[serde(rename = "6.5")]
    Digits6_5,
}

impl Resolution {
    /// Integration time in power line cycles.
    pub fn nplc(&self) -> f64 {
        match self {
            Resolution::Digits3_5 => 0.02,
            Resolution::Digits4_5 => 0.2,
            Resolution::Digits5_5 => 1.0,
            Resolution::Digits6_5 => 10.0,
        }
    }

    /// Front-panel label, e.g. `5½ Digit`.
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Digits3_5 => "3½ Digit",
            Resolution::Digits4_5 => "4½ Digit",
            Resolution::Digits5_5 => "5½ Digit",
            Resolution::Digits6_5 => "6½ Digit",
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Digits5_5
    }
}

/// A parsed range selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementRange {
    /// Autorange, sent as `DEF`.
    Auto,
    /// Functions without a selectable range (continuity, diode).
    Fixed,
    /// Upper range limit in base units.
    Upper(f64),
}

impl MeasurementRange {
    /// Parse a front-panel range string such as `AUTO`, `100 mV` or `10 kΩ`.
    pub fn parse(text: &str) -> AppResult<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.eq_ignore_ascii_case("AUTO") || compact.eq_ignore_ascii_case("DEF") {
            return Ok(MeasurementRange::Auto);
        }
        if compact == "–" || compact == "-" || compact.is_empty() {
            return Ok(MeasurementRange::Fixed);
        }

        // Longest suffix first so that "mV" wins over "V" and "kΩ" over "Ω".
        const SUFFIXES: [(&str, f64); 9] = [
            ("mV", 1e-3),
            ("mA", 1e-3),
            ("kΩ", 1e3),
            ("MΩ", 1e6),
            ("Hz", 1.0),
            ("V", 1.0),
            ("A", 1.0),
            ("Ω", 1.0),
            ("s", 1.0),
        ];
        for (suffix, multiplier) in SUFFIXES {
            if let Some(number) = compact.strip_suffix(suffix) {
                if let Ok(value) = number.parse::<f64>() {
                    if value.is_finite() && value > 0.0 {
                        return Ok(MeasurementRange::Upper(value * multiplier));
                    }
                }
            }
        }

        Err(DmmError::Configuration(format!(
            "Unrecognized measurement range '{}'",
            text
        )))
    }

    /// Human readable form, e.g. `AUTO` or `10 V`.
    pub fn describe(&self, unit: &str) -> String {
        match self {
            MeasurementRange::Auto => "AUTO".to_string(),
            MeasurementRange::Fixed => "–".to_string(),
            MeasurementRange::Upper(value) => format!("{} {}", value, unit),
        }
    }

    /// The argument for `CONF:<function> <range>`.
    pub fn scpi_value(&self) -> String {
        match self {
            MeasurementRange::Auto | MeasurementRange::Fixed => "DEF".to_string(),
            MeasurementRange::Upper(value) => format!("{}", value),
        }
    }
}
