//! Scripted instrument sessions.
//!
//! A `ScriptedSession` answers like a 34401A from a fixed list of readings and can
//! inject failures at chosen points, so the degrade policy and the driver can be
//! exercised without hardware. Every command is recorded in a shared
//! [`CommandLog`] that stays readable after the session has been boxed.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = ScriptedSession::new("GPIB0::22::INSTR", vec![1.23, 1.25])
//!     .with_scenario(FailureScenario::TimeoutOnRead(2));
//! let log = session.command_log();
//! ```

use crate::error::{SessionError, SessionErrorKind};
use crate::instrument::{InstrumentSession, ResourceAddress, SessionOpener};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// Identity reported by scripted sessions unless overridden.
pub const SCRIPTED_IDENTITY: &str = "HEWLETT-PACKARD,34401A,0,11-5-2";

/// Failure injected into a scripted session.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureScenario {
    /// The Nth `READ?` (1-based) never answers.
    TimeoutOnRead(usize),
    /// The Nth `READ?` answers with something that is not a number.
    GarbageOnRead(usize),
    /// After `n` successful reads every command fails with a communication error.
    CommunicationLossAfter(usize),
}

#[derive(Debug, Default)]
struct ScriptState {
    commands: Vec<String>,
    reads: usize,
    closed: bool,
}

/// Shared record of every command sent to a scripted session.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    state: Arc<Mutex<ScriptState>>,
}

impl CommandLog {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command sent so far, in order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Forget the recorded commands.
    pub fn clear(&self) {
        self.lock().commands.clear();
    }

    /// Number of `READ?` queries answered or attempted.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A session that plays back readings.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    address: String,
    identity: String,
    readings: Arc<Vec<f64>>,
    scenarios: Arc<Vec<FailureScenario>>,
    log: CommandLog,
}

impl ScriptedSession {
    /// Readings are returned in order and repeat once exhausted.
    pub fn new(address: impl Into<String>, readings: Vec<f64>) -> Self {
        Self {
            address: address.into(),
            identity: SCRIPTED_IDENTITY.to_string(),
            readings: Arc::new(readings),
            scenarios: Arc::new(Vec::new()),
            log: CommandLog::default(),
        }
    }

    /// Answer `*IDN?` with `identity`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Add a failure to inject.
    pub fn with_scenario(mut self, scenario: FailureScenario) -> Self {
        Arc::make_mut(&mut self.scenarios).push(scenario);
        self
    }

    /// Handle to the commands this session and its clones receive.
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    fn communication_lost(&self, reads: usize) -> bool {
        self.scenarios.iter().any(|scenario| {
            matches!(scenario, FailureScenario::CommunicationLossAfter(n) if reads >= *n)
        })
    }

    fn error(&self, kind: SessionErrorKind, message: &str) -> SessionError {
        SessionError::new(self.address.as_str(), kind, message)
    }
}

#[async_trait]
impl InstrumentSession for ScriptedSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, command: &str) -> Result<(), SessionError> {
        let mut state = self.log.lock();
        state.commands.push(command.to_string());
        if self.communication_lost(state.reads) {
            return Err(self.error(SessionErrorKind::Communication, "communication lost"));
        }
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, SessionError> {
        let read_number = {
            let mut state = self.log.lock();
            state.commands.push(command.to_string());
            if self.communication_lost(state.reads) {
                return Err(self.error(SessionErrorKind::Communication, "communication lost"));
            }
            if command != "READ?" {
                return match command {
                    "*IDN?" => Ok(self.identity.clone()),
                    _ => Ok(String::new()),
                };
            }
            state.reads += 1;
            state.reads
        };

        if self.scenarios.contains(&FailureScenario::TimeoutOnRead(read_number)) {
            // Never answers; the driver's timeout has to fire.
            std::future::pending::<()>().await;
        }
        if self.scenarios.contains(&FailureScenario::GarbageOnRead(read_number)) {
            return Ok("-410,\"Query INTERRUPTED\"".to_string());
        }
        if self.readings.is_empty() {
            return Err(self.error(SessionErrorKind::Communication, "no readings scripted"));
        }
        let value = self.readings[(read_number - 1) % self.readings.len()];
        Ok(format!("{:+.8E}", value))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.log.lock().closed = true;
        Ok(())
    }
}

/// Opener that hands out clones of a prepared scripted session, or refuses.
#[derive(Debug, Clone)]
pub struct ScriptedOpener {
    session: Option<ScriptedSession>,
    refusal: SessionErrorKind,
}

impl ScriptedOpener {
    /// Hand out clones of `session`.
    pub fn new(session: ScriptedSession) -> Self {
        Self {
            session: Some(session),
            refusal: SessionErrorKind::Open,
        }
    }

    /// An opener whose every open fails with `kind`.
    pub fn refusing(kind: SessionErrorKind) -> Self {
        Self {
            session: None,
            refusal: kind,
        }
    }
}

#[async_trait]
impl SessionOpener for ScriptedOpener {
    async fn open(
        &self,
        address: &ResourceAddress,
    ) -> Result<Box<dyn InstrumentSession>, SessionError> {
        match &self.session {
            Some(session) if !address.is_simulation() => {
                let mut session = session.clone();
                session.address = address.as_str().to_string();
                Ok(Box::new(session))
            }
            _ => Err(SessionError::new(
                address.as_str(),
                self.refusal,
                "scripted open refused",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readings_cycle_in_order() {
        let session = ScriptedSession::new("GPIB0::22::INSTR", vec![1.5, -2.0]);
        let first = session.query("READ?").await.unwrap();
        let second = session.query("READ?").await.unwrap();
        let third = session.query("READ?").await.unwrap();
        assert_eq!(first.parse::<f64>().unwrap(), 1.5);
        assert_eq!(second.parse::<f64>().unwrap(), -2.0);
        assert_eq!(third.parse::<f64>().unwrap(), 1.5);
        assert_eq!(session.command_log().reads(), 3);
    }

    #[tokio::test]
    async fn garbage_scenario_hits_selected_read_only() {
        let session = ScriptedSession::new("GPIB0::22::INSTR", vec![1.0])
            .with_scenario(FailureScenario::GarbageOnRead(2));
        assert!(session.query("READ?").await.unwrap().parse::<f64>().is_ok());
        assert!(session.query("READ?").await.unwrap().parse::<f64>().is_err());
        assert!(session.query("READ?").await.unwrap().parse::<f64>().is_ok());
    }

    #[tokio::test]
    async fn communication_loss_is_sticky() {
        let session = ScriptedSession::new("GPIB0::22::INSTR", vec![1.0])
            .with_scenario(FailureScenario::CommunicationLossAfter(1));
        assert!(session.query("READ?").await.is_ok());
        let err = session.query("READ?").await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::Communication);
        assert!(session.write("*CLS").await.is_err());
    }

    #[tokio::test]
    async fn opener_refuses_simulation_and_clones_log() {
        let session = ScriptedSession::new("GPIB0::1::INSTR", vec![1.0]);
        let log = session.command_log();
        let opener = ScriptedOpener::new(session);

        assert!(opener.open(&ResourceAddress::Simulation).await.is_err());

        let address = ResourceAddress::parse("GPIB0::22::INSTR").unwrap();
        let opened = opener.open(&address).await.unwrap();
        assert_eq!(opened.address(), "GPIB0::22::INSTR");
        opened.write("*RST").await.unwrap();
        assert_eq!(log.snapshot(), vec!["*RST"]);
    }
}
