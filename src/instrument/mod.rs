//! Instrument sessions.
//!
//! The transport is an external collaborator: the rest of the crate only sees an
//! [`InstrumentSession`] that can `write` a command string and `query` a response
//! string, opened from a [`ResourceAddress`] by a [`SessionOpener`].
//!
//! - `multimeter` - 34401A driver on top of any session
//! - `simulation` - synthetic readings when no session is available
//! - `mock` - scripted sessions with failure injection
//! - `serial` / `visa` - real transports, behind the `instrument_serial` and
//!   `instrument_visa` features

use crate::error::{SessionError, SessionErrorKind};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

pub mod mock;
pub mod multimeter;
pub mod simulation;

#[cfg(feature = "instrument_serial")]
pub mod serial;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::{CommandLog, FailureScenario, ScriptedOpener, ScriptedSession};
pub use multimeter::Multimeter;
pub use simulation::{SimulationProfile, SimulationSource};

/// Physical interface named by a VISA resource string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    /// `GPIB<board>::<primary>[::<secondary>]::INSTR`
    Gpib,
    /// `ASRL<port>::INSTR`
    Serial,
    /// `USB<board>::<vendor>::<product>::<serial>::INSTR`
    Usb,
    /// `TCPIP<board>::<host>[::<device>]::INSTR`
    Tcpip,
}

/// Where readings come from: a VISA resource or the `SIMULATION` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Readings come from the simulation source.
    Simulation,
    /// A real instrument.
    Visa {
        /// Resource string as entered, trimmed.
        resource: String,
        /// Interface named by the resource prefix.
        interface: InterfaceKind,
    },
}

fn patterns() -> &'static [(InterfaceKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(InterfaceKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (InterfaceKind::Gpib, r"(?i)^GPIB\d*::\d+(::\d+)?::INSTR$"),
            (InterfaceKind::Serial, r"(?i)^ASRL[^:]+::INSTR$"),
            (InterfaceKind::Usb, r"(?i)^USB\d*::[^:]+::[^:]+::[^:]+(::\d+)?::INSTR$"),
            (InterfaceKind::Tcpip, r"(?i)^TCPIP\d*::[^:]+(::[^:]+)?::INSTR$"),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
        .collect()
    })
}

impl ResourceAddress {
    /// Sentinel that selects the simulation source.
    pub const SIMULATION: &'static str = "SIMULATION";

    /// Parse a resource string, e.g. `GPIB0::22::INSTR` or `SIMULATION`.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(Self::SIMULATION) {
            return Ok(ResourceAddress::Simulation);
        }
        patterns()
            .iter()
            .find(|(_, re)| re.is_match(trimmed))
            .map(|(kind, _)| ResourceAddress::Visa {
                resource: trimmed.to_string(),
                interface: *kind,
            })
            .ok_or_else(|| {
                SessionError::new(
                    trimmed,
                    SessionErrorKind::Open,
                    "not a VISA resource name (expected e.g. GPIB0::22::INSTR)",
                )
            })
    }

    /// The resource string, or `SIMULATION`.
    pub fn as_str(&self) -> &str {
        match self {
            ResourceAddress::Simulation => Self::SIMULATION,
            ResourceAddress::Visa { resource, .. } => resource,
        }
    }

    /// Whether this is the simulation sentinel.
    pub fn is_simulation(&self) -> bool {
        matches!(self, ResourceAddress::Simulation)
    }

    /// Interface of a real resource; `None` for the simulation sentinel.
    pub fn interface(&self) -> Option<InterfaceKind> {
        match self {
            ResourceAddress::Simulation => None,
            ResourceAddress::Visa { interface, .. } => Some(*interface),
        }
    }

    /// Operating-system port name for `ASRL` resources.
    ///
    /// `ASRL3::INSTR` maps to `COM3` on Windows and `/dev/ttyS2` elsewhere;
    /// `ASRL/dev/ttyUSB0::INSTR` maps to `/dev/ttyUSB0`.
    pub fn serial_port(&self) -> Option<String> {
        let ResourceAddress::Visa {
            resource,
            interface: InterfaceKind::Serial,
        } = self
        else {
            return None;
        };
        let board = resource.get(4..)?.split("::").next()?;
        match board.parse::<u32>() {
            Ok(n) if cfg!(windows) => Some(format!("COM{}", n)),
            Ok(n) => Some(format!("/dev/ttyS{}", n.saturating_sub(1))),
            Err(_) => Some(board.to_string()),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open connection to one instrument.
///
/// Commands and responses are opaque SCPI strings; termination characters are
/// the transport's business.
#[async_trait]
pub trait InstrumentSession: Send + Sync {
    /// Resource string this session was opened with.
    fn address(&self) -> &str;

    /// Send a command that produces no response.
    async fn write(&self, command: &str) -> Result<(), SessionError>;

    /// Send a command and read one response line.
    async fn query(&self, command: &str) -> Result<String, SessionError>;

    /// Release the resource.
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Opens sessions for resource addresses.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Open a session to `address`.
    async fn open(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError>;
}

/// Opener for real hardware.
///
/// `ASRL` resources go through `tokio-serial` when `instrument_serial` is enabled,
/// everything else through the VISA library when `instrument_visa` is enabled.
/// Without the matching feature the open fails with
/// [`SessionErrorKind::Unavailable`] and the caller falls back to simulation.
#[derive(Debug, Clone)]
pub struct DefaultOpener {
    timeout: Duration,
}

impl DefaultOpener {
    /// An opener whose sessions give up on a query after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Instrument resources the VISA library can see, sorted.
    ///
    /// Empty when VISA support is not compiled in or no VISA library is
    /// installed. `SIMULATION` is never part of the list.
    pub async fn list_resources(&self) -> Vec<String> {
        match self.find_resources().await {
            Ok(mut found) => {
                found.sort();
                found.dedup();
                debug!(count = found.len(), "Resource scan finished");
                found
            }
            Err(e) => {
                warn!(error = %e, "Resource scan failed");
                Vec::new()
            }
        }
    }

    #[cfg(feature = "instrument_visa")]
    async fn find_resources(&self) -> Result<Vec<String>, SessionError> {
        visa::find_resources().await
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn find_resources(&self) -> Result<Vec<String>, SessionError> {
        debug!("VISA support not enabled, no resources to scan");
        Ok(Vec::new())
    }

    #[cfg(feature = "instrument_serial")]
    async fn open_serial(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        let session = serial::SerialSession::open(address, self.timeout).await?;
        Ok(Box::new(session))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open_serial(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        self.open_visa(address).await
    }

    #[cfg(feature = "instrument_visa")]
    async fn open_visa(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        let session = visa::VisaSession::open(address, self.timeout).await?;
        Ok(Box::new(session))
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn open_visa(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        Err(SessionError::new(
            address.as_str(),
            SessionErrorKind::Unavailable,
            "VISA support not enabled. Rebuild with --features instrument_visa",
        ))
    }
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

#[async_trait]
impl SessionOpener for DefaultOpener {
    async fn open(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        match address.interface() {
            None => Err(SessionError::new(
                address.as_str(),
                SessionErrorKind::Unavailable,
                "the simulation source has no instrument session",
            )),
            Some(InterfaceKind::Serial) => self.open_serial(address).await,
            Some(_) => self.open_visa(address).await,
        }
    }
}
