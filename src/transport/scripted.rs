use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use super::{ConnectionHandle, ConnectionType, FileMode, SessionTicket, Transport, TransportError};

type Responder = Box<dyn FnMut(&str) -> Result<String, TransportError>>;

/// Shared record of the transport calls made, readable after the transport is dropped.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<&'static str>>>);

impl EventLog {
    pub fn snapshot(&self) -> Vec<&'static str> {
        self.0.borrow().clone()
    }

    /// How many times `event` was recorded.
    pub fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: &'static str) {
        self.0.borrow_mut().push(event);
    }
}

/// In-memory transport that answers requests from a script.
///
/// Responses are served in order, or computed by a responder closure when one is set.
/// Every request and lifecycle call is recorded so a caller can check what was sent,
/// which makes this transport suitable both for replaying dumped responses offline and
/// for tests.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: VecDeque<Result<String, TransportError>>,
    responder: Option<Responder>,
    dispatch_error: Option<TransportError>,
    open_error: Option<TransportError>,
    begin_error: Option<TransportError>,
    end_error: Option<TransportError>,
    close_error: Option<TransportError>,
    active: Option<SessionTicket>,
    sessions: u32,
    requests: Vec<String>,
    events: EventLog,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("pending_responses", &self.responses.len())
            .field("has_responder", &self.responder.is_some())
            .field("active", &self.active)
            .field("events", &self.events)
            .finish()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response document.
    pub fn respond_with(mut self, xml: impl Into<String>) -> Self {
        self.responses.push_back(Ok(xml.into()));
        self
    }

    /// Queues a transport failure for the next request.
    pub fn respond_error(mut self, message: impl Into<String>) -> Self {
        self.responses.push_back(Err(TransportError::new(message)));
        self
    }

    /// Computes every response from the request document instead of using the queue.
    pub fn responder(mut self, responder: impl FnMut(&str) -> Result<String, TransportError> + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn fail_dispatch(mut self, message: impl Into<String>) -> Self {
        self.dispatch_error = Some(TransportError::new(message));
        self
    }

    pub fn fail_open_connection(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(TransportError::new(message));
        self
    }

    pub fn fail_begin_session(mut self, message: impl Into<String>) -> Self {
        self.begin_error = Some(TransportError::new(message));
        self
    }

    pub fn fail_end_session(mut self, message: impl Into<String>) -> Self {
        self.end_error = Some(TransportError::new(message));
        self
    }

    pub fn fail_close_connection(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(TransportError::new(message));
        self
    }

    /// Request documents received so far.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    /// Names of the transport calls made so far, in order.
    pub fn events(&self) -> Vec<&'static str> {
        self.events.snapshot()
    }

    /// A handle on the call record that outlives the transport.
    pub fn event_log(&self) -> EventLog {
        self.events.clone()
    }

    fn record(&mut self, event: &'static str, failure: Option<&TransportError>) -> Result<(), TransportError> {
        self.events.push(event);
        match failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&mut self) -> Result<(), TransportError> {
        let failure = self.dispatch_error.clone();
        self.record("dispatch", failure.as_ref())
    }

    fn open_connection(
        &mut self,
        application_id: &str,
        application_name: &str,
        _connection_type: ConnectionType,
    ) -> Result<ConnectionHandle, TransportError> {
        let failure = self.open_error.clone();
        self.record("open_connection", failure.as_ref())?;
        Ok(ConnectionHandle(format!("{application_id}:{application_name}")))
    }

    fn begin_session(
        &mut self,
        _connection: &ConnectionHandle,
        company_file: &str,
        _mode: FileMode,
    ) -> Result<SessionTicket, TransportError> {
        let failure = self.begin_error.clone();
        self.record("begin_session", failure.as_ref())?;
        self.sessions += 1;
        let ticket = SessionTicket(format!("ticket-{}-{company_file}", self.sessions));
        self.active = Some(ticket.clone());
        Ok(ticket)
    }

    fn process_request(&mut self, ticket: &SessionTicket, request: &str) -> Result<String, TransportError> {
        self.record("process_request", None)?;
        if self.active.as_ref() != Some(ticket) {
            return Err(TransportError::new(format!("unknown session ticket '{ticket}'")));
        }
        self.requests.push(request.to_string());
        match self.responder.as_mut() {
            Some(responder) => responder(request),
            None => self
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("no scripted response left"))),
        }
    }

    fn end_session(&mut self, _ticket: &SessionTicket) -> Result<(), TransportError> {
        self.active = None;
        let failure = self.end_error.clone();
        self.record("end_session", failure.as_ref())
    }

    fn close_connection(&mut self, _connection: &ConnectionHandle) -> Result<(), TransportError> {
        let failure = self.close_error.clone();
        self.record("close_connection", failure.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serves_queue_in_order_and_records() {
        let mut transport = ScriptedTransport::new().respond_with("<a/>").respond_error("boom");
        let connection = transport.open_connection("id", "app", ConnectionType::LocalQbd).unwrap();
        let ticket = transport.begin_session(&connection, "", FileMode::DoNotCare).unwrap();

        assert_eq!(transport.process_request(&ticket, "<r1/>").unwrap(), "<a/>");
        assert_eq!(transport.process_request(&ticket, "<r2/>").unwrap_err().0, "boom");
        assert!(transport.process_request(&ticket, "<r3/>").is_err());
        assert_eq!(transport.requests(), ["<r1/>", "<r2/>", "<r3/>"]);
    }

    #[test]
    fn test_rejects_requests_after_session_end() {
        let mut transport = ScriptedTransport::new().respond_with("<a/>");
        let connection = transport.open_connection("", "app", ConnectionType::LocalQbd).unwrap();
        let ticket = transport.begin_session(&connection, "", FileMode::DoNotCare).unwrap();
        transport.end_session(&ticket).unwrap();

        assert!(transport.process_request(&ticket, "<r/>").is_err());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_event_log_outlives_transport() {
        let mut transport = ScriptedTransport::new();
        let log = transport.event_log();
        let connection = transport.open_connection("", "app", ConnectionType::LocalQbd).unwrap();
        transport.close_connection(&connection).unwrap();
        drop(transport);

        assert_eq!(log.snapshot(), ["open_connection", "close_connection"]);
        assert_eq!(log.count("close_connection"), 1);
    }

    #[test]
    fn test_responder_overrides_queue() {
        let mut transport = ScriptedTransport::new().responder(|request| Ok(request.to_uppercase()));
        let connection = transport.open_connection("", "app", ConnectionType::LocalQbd).unwrap();
        let ticket = transport.begin_session(&connection, "", FileMode::DoNotCare).unwrap();
        assert_eq!(transport.process_request(&ticket, "<r/>").unwrap(), "<R/>");
    }
}
