//! VISA session for GPIB, USB and TCPIP resources.
//!
//! The VISA library is blocking, so every transfer runs on the blocking pool.
//! The resource manager is kept alive next to the instrument because closing it
//! closes every session it opened.

use crate::error::{SessionError, SessionErrorKind};
use crate::instrument::{InstrumentSession, ResourceAddress};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use visa_rs::prelude::*;

/// Search expression matching every instrument resource.
const RESOURCE_QUERY: &str = "?*INSTR";

/// Resource strings of every instrument the VISA library can see.
pub async fn find_resources() -> Result<Vec<String>, SessionError> {
    let scan_error = |message: String| SessionError::new(RESOURCE_QUERY, SessionErrorKind::Open, message);
    tokio::task::spawn_blocking(|| -> Result<Vec<String>, String> {
        let rm = DefaultRM::new().map_err(|e| format!("no VISA resource manager: {}", e))?;
        let expr = CString::new(RESOURCE_QUERY).map_err(|e| e.to_string())?;
        let mut list = rm.find_res_list(&expr.into()).map_err(|e| e.to_string())?;
        let mut found = Vec::new();
        while let Some(resource) = list.find_next().map_err(|e| e.to_string())? {
            found.push(CString::from(resource).to_string_lossy().into_owned());
        }
        Ok(found)
    })
    .await
    .map_err(|e| scan_error(e.to_string()))?
    .map_err(scan_error)
}

struct VisaInner {
    _rm: DefaultRM,
    instrument: Instrument,
}

/// Session to one VISA resource.
pub struct VisaSession {
    address: String,
    inner: Arc<Mutex<VisaInner>>,
}

impl VisaSession {
    /// Open `address` through the default resource manager.
    pub async fn open(address: &ResourceAddress, timeout: Duration) -> Result<Self, SessionError> {
        let resource = address.as_str().to_string();
        let opened = tokio::task::spawn_blocking(move || -> Result<VisaInner, String> {
            let rm = DefaultRM::new().map_err(|e| format!("no VISA resource manager: {}", e))?;
            let name = CString::new(resource).map_err(|e| e.to_string())?;
            let instrument = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| e.to_string())?;
            Ok(VisaInner {
                _rm: rm,
                instrument,
            })
        })
        .await
        .map_err(|e| SessionError::new(address.as_str(), SessionErrorKind::Open, e.to_string()))?
        .map_err(|e| SessionError::new(address.as_str(), SessionErrorKind::Open, e))?;

        Ok(Self {
            address: address.as_str().to_string(),
            inner: Arc::new(Mutex::new(opened)),
        })
    }

    async fn transfer(&self, command: &str, expect_response: bool) -> Result<String, SessionError> {
        debug!(address = %self.address, command, "visa transfer");
        let inner = Arc::clone(&self.inner);
        let line = format!("{}\n", command);
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.instrument.write_all(line.as_bytes())?;
            let mut response = String::new();
            if expect_response {
                let mut reader = BufReader::new(&guard.instrument);
                reader.read_line(&mut response)?;
            }
            Ok(response.trim_end().to_string())
        })
        .await
        .map_err(|e| {
            SessionError::new(self.address.as_str(), SessionErrorKind::Communication, e.to_string())
        })?;

        result.map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::TimedOut {
                SessionErrorKind::Timeout
            } else {
                SessionErrorKind::Communication
            };
            SessionError::new(self.address.as_str(), kind, e.to_string())
        })
    }
}

#[async_trait]
impl InstrumentSession for VisaSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, command: &str) -> Result<(), SessionError> {
        self.transfer(command, false).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> Result<String, SessionError> {
        self.transfer(command, true).await
    }
}
