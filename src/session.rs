//! Connection and session lifecycle around a [`Transport`].
//!
//! A [`SessionManager`] owns the transport and at most one active [`Session`]. Requests
//! go through [`SessionManager::call`], which builds the QBXML, executes it and
//! normalizes the response. [`ScopedSession`] ends its session when dropped, so
//! teardown runs exactly once on every exit path.

use log::{debug, info, warn};

use crate::diagnostics::{Diagnostics, Payload};
use crate::error::{QuickBooksError, Result};
use crate::field_tree::{FieldTree, Record};
use crate::request::{OnError, RequestBuilder, RequestSpec};
use crate::response::ResponseNormalizer;
use crate::transport::{ConnectionHandle, ConnectionType, FileMode, SessionTicket, Transport};

/// Who is connecting and to which company file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub application_id: String,
    pub application_name: String,
    /// Company file path; empty means the file currently open in QuickBooks.
    pub company_file: String,
    pub connection_type: ConnectionType,
}

impl SessionConfig {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_id: String::new(),
            application_name: application_name.into(),
            company_file: String::new(),
            connection_type: ConnectionType::default(),
        }
    }

    pub fn application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = application_id.into();
        self
    }

    pub fn company_file(mut self, company_file: impl Into<String>) -> Self {
        self.company_file = company_file.into();
        self
    }

    pub fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }
}

/// An open QuickBooks session.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionHandle,
    ticket: SessionTicket,
    application_id: String,
    application_name: String,
    company_file: String,
    connection_type: ConnectionType,
    ended: bool,
}

impl Session {
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn ticket(&self) -> &SessionTicket {
        &self.ticket
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn company_file(&self) -> &str {
        &self.company_file
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

/// Owns a transport and drives the request/response pipeline over it.
pub struct SessionManager<T: Transport> {
    transport: T,
    builder: RequestBuilder,
    normalizer: ResponseNormalizer,
    diagnostics: Option<Diagnostics>,
    // Handles not yet released, closed best-effort on drop.
    connection: Option<ConnectionHandle>,
    active: Option<SessionTicket>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            builder: RequestBuilder::new(),
            normalizer: ResponseNormalizer::default(),
            diagnostics: None,
            connection: None,
            active: None,
        }
    }

    /// Saves every request and response document through `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Replaces the normalizer used by [`call`](Self::call).
    pub fn with_normalizer(mut self, normalizer: ResponseNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    /// Opens a connection and begins a session with the company file in "do not care"
    /// mode.
    ///
    /// Only one session may be active per manager. If the session cannot be started the
    /// already opened connection is left open and closed later, by the next `begin` or
    /// when the manager is dropped.
    pub fn begin(&mut self, config: &SessionConfig) -> Result<Session> {
        if self.active.is_some() {
            return Err(QuickBooksError::SessionFailed {
                message: "a session is already active on this manager".to_string(),
            });
        }
        if let Some(stale) = self.connection.take() {
            debug!("Closing connection left open by a failed session start");
            if let Err(e) = self.transport.close_connection(&stale) {
                warn!("Closing stale QuickBooks connection failed: {e}");
            }
        }

        self.transport
            .dispatch()
            .map_err(|e| QuickBooksError::ConnectionFailed { message: e.0 })?;

        info!("Opening connection to QuickBooks with app: {}", config.application_name);
        let connection = self
            .transport
            .open_connection(&config.application_id, &config.application_name, config.connection_type)
            .map_err(|e| QuickBooksError::ConnectionFailed { message: e.0 })?;
        self.connection = Some(connection.clone());

        let ticket = self
            .transport
            .begin_session(&connection, &config.company_file, FileMode::DoNotCare)
            .map_err(|e| QuickBooksError::SessionFailed { message: e.0 })?;
        self.active = Some(ticket.clone());
        info!("Successfully started QuickBooks session");

        Ok(Session {
            connection,
            ticket,
            application_id: config.application_id.clone(),
            application_name: config.application_name.clone(),
            company_file: config.company_file.clone(),
            connection_type: config.connection_type,
            ended: false,
        })
    }

    /// Ends the session, then closes its connection.
    ///
    /// Teardown failures are logged and swallowed. Ending an already ended session does
    /// nothing.
    pub fn end(&mut self, session: &mut Session) {
        if session.ended {
            debug!("Session {} already ended", session.ticket);
            return;
        }
        session.ended = true;
        if self.active.as_ref() == Some(&session.ticket) {
            self.active = None;
        }

        info!("Ending QuickBooks session");
        if let Err(e) = self.transport.end_session(&session.ticket) {
            warn!("EndSession failed: {e}");
        }
        info!("Closing QuickBooks connection");
        if let Err(e) = self.transport.close_connection(&session.connection) {
            warn!("CloseConnection failed: {e}");
        }
        if self.connection.as_ref() == Some(&session.connection) {
            self.connection = None;
        }
    }

    /// Sends one request and returns the normalized response.
    ///
    /// With `continueOnError` the response statuses are kept in the tree instead of
    /// being raised.
    pub fn call(&mut self, session: &Session, spec: &RequestSpec) -> Result<FieldTree> {
        let response = self.send(session, spec)?;
        normalize(&self.normalizer, &response, spec.on_error)
    }

    /// Like [`call`](Self::call) with a normalizer carrying request-specific rules.
    pub fn call_with(
        &mut self,
        session: &Session,
        spec: &RequestSpec,
        normalizer: &ResponseNormalizer,
    ) -> Result<FieldTree> {
        let response = self.send(session, spec)?;
        normalize(normalizer, &response, spec.on_error)
    }

    /// Sends several requests in one message set.
    pub fn call_batch(
        &mut self,
        session: &Session,
        version: &str,
        on_error: OnError,
        requests: &[(&str, &Record)],
    ) -> Result<FieldTree> {
        let label = requests.first().map(|(name, _)| *name).unwrap_or("QBXMLMsgsRq");
        let xml = self.builder.build_batch(version, on_error, requests)?;
        let response = self.execute(session, label, &xml)?;
        normalize(&self.normalizer, &response, on_error)
    }

    /// Begins a session that ends itself when the returned guard is dropped.
    pub fn scoped(&mut self, config: &SessionConfig) -> Result<ScopedSession<'_, T>> {
        let session = self.begin(config)?;
        Ok(ScopedSession { manager: self, session })
    }

    fn send(&mut self, session: &Session, spec: &RequestSpec) -> Result<String> {
        let xml = self.builder.build(spec)?;
        self.execute(session, &spec.request_type, &xml)
    }

    fn execute(&mut self, session: &Session, request_type: &str, xml: &str) -> Result<String> {
        if session.ended {
            return Err(QuickBooksError::request_failed(request_type, "session has already ended"));
        }
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.save(Payload::Request, xml);
        }

        debug!("Sending {request_type} ({} bytes)", xml.len());
        let response = self
            .transport
            .process_request(&session.ticket, xml)
            .map_err(|e| QuickBooksError::request_failed(request_type, e.0))?;
        debug!("Received response for {request_type} ({} bytes)", response.len());

        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.save(Payload::Response, &response);
        }
        Ok(response)
    }
}

fn normalize(normalizer: &ResponseNormalizer, response: &str, on_error: OnError) -> Result<FieldTree> {
    match on_error {
        OnError::ContinueOnError => normalizer.parse_lenient(response),
        OnError::StopOnError | OnError::RollbackOnError => normalizer.parse(response),
    }
}

impl<T: Transport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.active.take() {
            warn!("Session dropped without being ended");
            if let Err(e) = self.transport.end_session(&ticket) {
                warn!("EndSession failed: {e}");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.transport.close_connection(&connection) {
                warn!("CloseConnection failed: {e}");
            }
        }
    }
}

/// A session that is ended when this guard goes out of scope.
pub struct ScopedSession<'a, T: Transport> {
    manager: &'a mut SessionManager<T>,
    session: Session,
}

impl<T: Transport> ScopedSession<'_, T> {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn call(&mut self, spec: &RequestSpec) -> Result<FieldTree> {
        self.manager.call(&self.session, spec)
    }

    pub fn call_with(&mut self, spec: &RequestSpec, normalizer: &ResponseNormalizer) -> Result<FieldTree> {
        self.manager.call_with(&self.session, spec, normalizer)
    }

    pub fn call_batch(&mut self, version: &str, on_error: OnError, requests: &[(&str, &Record)]) -> Result<FieldTree> {
        self.manager.call_batch(&self.session, version, on_error, requests)
    }

    /// Ends the session now instead of at the end of scope.
    pub fn end(mut self) {
        self.manager.end(&mut self.session);
    }
}

impl<T: Transport> Drop for ScopedSession<'_, T> {
    fn drop(&mut self) {
        self.manager.end(&mut self.session);
    }
}
