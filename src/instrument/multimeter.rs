//! HP/Agilent 34401A Digital Multimeter Driver
//!
//! Protocol Overview:
//! - Format: SCPI over GPIB, RS-232 or USB-GPIB adapters
//! - Identity: `*IDN?` must mention `34401` (or the 34410 successor)
//! - Configuration: `CONF:<function> <range>`, `SENS:<function>:NPLC <n>`
//! - Trigger: immediate, auto delay, one sample per trigger
//! - Query: `READ?` returns one reading in scientific notation (e.g. `+4.99871230E+00`)
//!
//! # Important Notes
//!
//! - An overloaded input reads as `+9.90000000E+37`; that is reported as an invalid
//!   response rather than logged as a value
//! - `SYST:LOC` returns the front panel to the operator on disconnect
//!
//! # Example Usage
//!
//! ```no_run
//! use dmm_logger::instrument::{DefaultOpener, Multimeter, ResourceAddress, SessionOpener};
//! use dmm_logger::measurement::{MeasurementFunction, MeasurementRange, Resolution};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let address = ResourceAddress::parse("GPIB0::22::INSTR")?;
//!     let session = DefaultOpener::default().open(&address).await?;
//!     let meter = Multimeter::connect(session, Duration::from_secs(5)).await?;
//!
//!     meter
//!         .configure(MeasurementFunction::DcVoltage, MeasurementRange::Auto, Resolution::Digits5_5)
//!         .await?;
//!     println!("{} V", meter.measure().await?);
//!     Ok(())
//! }
//! ```

use crate::error::{SessionError, SessionErrorKind};
use crate::instrument::InstrumentSession;
use crate::measurement::{MeasurementFunction, MeasurementRange, Resolution};
use std::time::Duration;
use tracing::{debug, info};

/// Models accepted by the identity check.
const SUPPORTED_MODELS: [&str; 2] = ["34401", "34410"];

/// Readings at or above this magnitude are the meter's overload marker.
const OVERLOAD_THRESHOLD: f64 = 9.0e37;

/// Driver for the 34401A on top of an open session.
pub struct Multimeter {
    session: Box<dyn InstrumentSession>,
    timeout: Duration,
    identity: String,
}

impl Multimeter {
    /// Verify the identity and reset the instrument to a known state.
    ///
    /// # Errors
    /// Returns `UnsupportedInstrument` if the identity string does not name a
    /// supported model; the session is closed in that case.
    pub async fn connect(
        session: Box<dyn InstrumentSession>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut meter = Self {
            session,
            timeout,
            identity: String::new(),
        };

        let identity = meter.query("*IDN?").await?;
        let identity = identity.trim().to_string();
        if !SUPPORTED_MODELS.iter().any(|model| identity.contains(model)) {
            let _ = meter.session.close().await;
            return Err(SessionError::new(
                meter.session.address(),
                SessionErrorKind::UnsupportedInstrument,
                format!("unknown instrument: {}", identity),
            ));
        }

        meter.write("*RST").await?;
        meter.write("*CLS").await?;
        info!(address = %meter.address(), identity = %identity, "Multimeter connected");
        meter.identity = identity;
        Ok(meter)
    }

    /// Response to `*IDN?`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Resource string of the session.
    pub fn address(&self) -> &str {
        self.session.address()
    }

    /// Select function, range and integration time, and arm an immediate trigger.
    pub async fn configure(
        &self,
        function: MeasurementFunction,
        range: MeasurementRange,
        resolution: Resolution,
    ) -> Result<(), SessionError> {
        debug!(function = %function, range = ?range, resolution = resolution.label(), "Configuring multimeter");
        self.write(&format!("CONF:{} {}", function.scpi(), range.scpi_value()))
            .await?;
        if function.supports_nplc() {
            self.write(&format!("SENS:{}:NPLC {}", function.scpi(), resolution.nplc()))
                .await?;
        }
        self.write("TRIG:SOUR IMM").await?;
        self.write("TRIG:DEL:AUTO ON").await?;
        self.write("SAMP:COUN 1").await
    }

    /// Trigger one reading and return it.
    pub async fn measure(&self) -> Result<f64, SessionError> {
        let response = self.query("READ?").await?;
        parse_reading(self.address(), &response)
    }

    /// Return the meter to local control and close the session.
    pub async fn disconnect(self) -> Result<(), SessionError> {
        let local = self.write("SYST:LOC").await;
        let closed = self.session.close().await;
        info!(address = %self.address(), "Multimeter disconnected");
        local.and(closed)
    }

    async fn write(&self, command: &str) -> Result<(), SessionError> {
        match tokio::time::timeout(self.timeout, self.session.write(command)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(command)),
        }
    }

    async fn query(&self, command: &str) -> Result<String, SessionError> {
        match tokio::time::timeout(self.timeout, self.session.query(command)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(command)),
        }
    }

    fn timeout_error(&self, command: &str) -> SessionError {
        SessionError::new(
            self.address(),
            SessionErrorKind::Timeout,
            format!("'{}' timed out after {:?}", command, self.timeout),
        )
    }
}

/// Parse a `READ?` response into a finite reading.
pub fn parse_reading(address: &str, response: &str) -> Result<f64, SessionError> {
    let text = response.trim();
    let value: f64 = text.parse().map_err(|_| {
        SessionError::new(
            address,
            SessionErrorKind::InvalidResponse,
            format!("not a number: '{}'", text),
        )
    })?;
    if !value.is_finite() || value.abs() >= OVERLOAD_THRESHOLD {
        return Err(SessionError::new(
            address,
            SessionErrorKind::InvalidResponse,
            format!("overload or invalid reading: '{}'", text),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{FailureScenario, ScriptedSession};

    const ADDRESS: &str = "GPIB0::22::INSTR";

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(parse_reading(ADDRESS, "+4.99871230E+00\n").unwrap(), 4.9987123);
        assert_eq!(parse_reading(ADDRESS, "-1.0E-03").unwrap(), -0.001);
    }

    #[test]
    fn rejects_overload_and_garbage() {
        let overload = parse_reading(ADDRESS, "+9.90000000E+37").unwrap_err();
        assert_eq!(overload.kind, SessionErrorKind::InvalidResponse);
        let garbage = parse_reading(ADDRESS, "-410,\"Query INTERRUPTED\"").unwrap_err();
        assert_eq!(garbage.kind, SessionErrorKind::InvalidResponse);
        assert!(parse_reading(ADDRESS, "NaN").is_err());
    }

    #[tokio::test]
    async fn connect_resets_supported_meter() {
        let session = ScriptedSession::new(ADDRESS, vec![1.0]);
        let log = session.command_log();
        let meter = Multimeter::connect(Box::new(session), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(meter.identity().contains("34401A"));
        assert_eq!(log.snapshot(), vec!["*IDN?", "*RST", "*CLS"]);
    }

    #[tokio::test]
    async fn connect_rejects_other_instruments() {
        let session = ScriptedSession::new(ADDRESS, vec![1.0])
            .with_identity("HEWLETT-PACKARD,3478A,0,1");
        let err = Multimeter::connect(Box::new(session), Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, SessionErrorKind::UnsupportedInstrument);
    }

    #[tokio::test]
    async fn configure_sends_function_range_and_nplc() {
        let session = ScriptedSession::new(ADDRESS, vec![1.0]);
        let log = session.command_log();
        let meter = Multimeter::connect(Box::new(session), Duration::from_millis(100))
            .await
            .unwrap();
        log.clear();

        meter
            .configure(
                MeasurementFunction::Resistance2W,
                MeasurementRange::parse("10 kΩ").unwrap(),
                Resolution::Digits6_5,
            )
            .await
            .unwrap();

        assert_eq!(
            log.snapshot(),
            vec![
                "CONF:RES 10000",
                "SENS:RES:NPLC 10",
                "TRIG:SOUR IMM",
                "TRIG:DEL:AUTO ON",
                "SAMP:COUN 1",
            ]
        );
    }

    #[tokio::test]
    async fn configure_skips_nplc_for_frequency() {
        let session = ScriptedSession::new(ADDRESS, vec![50.0]);
        let log = session.command_log();
        let meter = Multimeter::connect(Box::new(session), Duration::from_millis(100))
            .await
            .unwrap();
        log.clear();

        meter
            .configure(
                MeasurementFunction::Frequency,
                MeasurementRange::Auto,
                Resolution::default(),
            )
            .await
            .unwrap();

        let commands = log.snapshot();
        assert_eq!(commands[0], "CONF:FREQ DEF");
        assert!(!commands.iter().any(|c| c.contains("NPLC")));
    }

    #[tokio::test]
    async fn measure_times_out_on_hung_read() {
        let session = ScriptedSession::new(ADDRESS, vec![1.0, 2.0])
            .with_scenario(FailureScenario::TimeoutOnRead(2));
        let meter = Multimeter::connect(Box::new(session), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(meter.measure().await.unwrap(), 1.0);
        let err = meter.measure().await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::Timeout);
        assert!(err.message.contains("READ?"));
    }

    #[tokio::test]
    async fn disconnect_returns_to_local() {
        let session = ScriptedSession::new(ADDRESS, vec![1.0]);
        let log = session.command_log();
        let meter = Multimeter::connect(Box::new(session), Duration::from_millis(100))
            .await
            .unwrap();
        meter.disconnect().await.unwrap();

        let commands = log.snapshot();
        assert_eq!(commands.last().map(String::as_str), Some("SYST:LOC"));
        assert!(log.is_closed());
    }
}
