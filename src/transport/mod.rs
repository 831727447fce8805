//! The RPC boundary to QuickBooks.
//!
//! A [`Transport`] opens a connection, begins a session against a company file and
//! executes one QBXML request per call. On Windows the real implementation is
//! [`com::ComTransport`]; [`ScriptedTransport`] replays canned responses.

#[cfg(windows)]
pub mod com;
mod scripted;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use scripted::{EventLog, ScriptedTransport};

/// Failure reported by a transport, carrying its original message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Opaque handle returned when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle(pub String);

/// Session ticket returned by `BeginSession` and passed to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket(pub String);

impl fmt::Display for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the request processor reaches QuickBooks (`QBXMLRPConnectionType`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "unknown")]
    Unknown = 0,
    #[default]
    #[serde(rename = "localQBD")]
    LocalQbd = 1,
    #[serde(rename = "remoteQBD")]
    RemoteQbd = 2,
    #[serde(rename = "localQBDLaunchUI")]
    LocalQbdLaunchUi = 3,
    #[serde(rename = "remoteQBOE")]
    RemoteQboe = 4,
}

/// Company file open mode for `BeginSession` (`QBFileMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    SingleUser = 0,
    MultiUser = 1,
    DoNotCare = 2,
}

/// Synchronous QBXML request processor.
///
/// Implementations are single-session: callers never interleave two sessions on one
/// transport.
pub trait Transport {
    /// Acquires the underlying dispatch object. Called once before opening a connection.
    fn dispatch(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn open_connection(
        &mut self,
        application_id: &str,
        application_name: &str,
        connection_type: ConnectionType,
    ) -> Result<ConnectionHandle, TransportError>;

    fn begin_session(
        &mut self,
        connection: &ConnectionHandle,
        company_file: &str,
        mode: FileMode,
    ) -> Result<SessionTicket, TransportError>;

    /// Sends one request document and returns the response document.
    fn process_request(&mut self, ticket: &SessionTicket, request: &str) -> Result<String, TransportError>;

    fn end_session(&mut self, ticket: &SessionTicket) -> Result<(), TransportError>;

    fn close_connection(&mut self, connection: &ConnectionHandle) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn dispatch(&mut self) -> Result<(), TransportError> {
        (**self).dispatch()
    }

    fn open_connection(
        &mut self,
        application_id: &str,
        application_name: &str,
        connection_type: ConnectionType,
    ) -> Result<ConnectionHandle, TransportError> {
        (**self).open_connection(application_id, application_name, connection_type)
    }

    fn begin_session(
        &mut self,
        connection: &ConnectionHandle,
        company_file: &str,
        mode: FileMode,
    ) -> Result<SessionTicket, TransportError> {
        (**self).begin_session(connection, company_file, mode)
    }

    fn process_request(&mut self, ticket: &SessionTicket, request: &str) -> Result<String, TransportError> {
        (**self).process_request(ticket, request)
    }

    fn end_session(&mut self, ticket: &SessionTicket) -> Result<(), TransportError> {
        (**self).end_session(ticket)
    }

    fn close_connection(&mut self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        (**self).close_connection(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        connection_type: ConnectionType,
    }

    #[test]
    fn test_connection_type_names() {
        let parsed: Wrapper = serde_json::from_str(r#"{"connection_type":"localQBDLaunchUI"}"#).unwrap();
        assert_eq!(parsed.connection_type, ConnectionType::LocalQbdLaunchUi);
        assert_eq!(ConnectionType::default() as i32, 1);
        assert_eq!(FileMode::DoNotCare as i32, 2);
    }
}
