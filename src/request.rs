//! QBXML request documents.
//!
//! A request is an XML declaration, the `qbxml` version processing instruction and a
//! `QBXML/QBXMLMsgsRq` envelope carrying the `onError` policy:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?><?qbxml version="13.0"?>
//! <QBXML><QBXMLMsgsRq onError="stopOnError"><CompanyQueryRq/></QBXMLMsgsRq></QBXML>
//! ```

use std::fmt;
use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::error::{QuickBooksError, Result};
use crate::field_tree::{FieldTree, Record};

pub const DEFAULT_QBXML_VERSION: &str = "13.0";

/// What QuickBooks does with the remaining requests of a message set after one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnError {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

impl OnError {
    pub fn as_str(self) -> &'static str {
        match self {
            OnError::StopOnError => "stopOnError",
            OnError::ContinueOnError => "continueOnError",
            OnError::RollbackOnError => "rollbackOnError",
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to send: its type (e.g. `PurchaseOrderQueryRq`), envelope settings and
/// body fields in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub request_type: String,
    pub version: String,
    pub on_error: OnError,
    pub fields: Record,
}

impl RequestSpec {
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            version: DEFAULT_QBXML_VERSION.to_string(),
            on_error: OnError::default(),
            fields: Record::new(),
        }
    }

    pub fn with_fields(mut self, fields: Record) -> Self {
        self.fields = fields;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }
}

/// Serializes [`RequestSpec`]s into QBXML.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBuilder;

impl RequestBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds a document holding a single request.
    pub fn build(&self, spec: &RequestSpec) -> Result<String> {
        self.write_document(&spec.version, spec.on_error, &[(spec.request_type.as_str(), &spec.fields)], false)
    }

    /// Builds one message set holding several requests, each tagged with its index as
    /// `requestID` so the responses can be matched up again.
    pub fn build_batch(&self, version: &str, on_error: OnError, requests: &[(&str, &Record)]) -> Result<String> {
        self.write_document(version, on_error, requests, true)
    }

    fn write_document(
        &self,
        version: &str,
        on_error: OnError,
        requests: &[(&str, &Record)],
        tag_ids: bool,
    ) -> Result<String> {
        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(QuickBooksError::InvalidRequest(format!("invalid qbxml version '{version}'")));
        }

        let mut buffer = Vec::new();
        write!(buffer, "<?xml version=\"1.0\" encoding=\"utf-8\"?><?qbxml version=\"{version}\"?>")
            .map_err(write_error)?;

        let mut writer = Writer::new(buffer);
        writer.write_event(Event::Start(BytesStart::new("QBXML"))).map_err(write_error)?;
        let mut envelope = BytesStart::new("QBXMLMsgsRq");
        envelope.push_attribute(("onError", on_error.as_str()));
        writer.write_event(Event::Start(envelope)).map_err(write_error)?;

        for (index, (request_type, fields)) in requests.iter().enumerate() {
            check_name(request_type)?;
            let mut start = BytesStart::new(*request_type);
            if tag_ids {
                start.push_attribute(("requestID", index.to_string().as_str()));
            }
            if fields.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(write_error)?;
            } else {
                writer.write_event(Event::Start(start)).map_err(write_error)?;
                write_record(&mut writer, fields)?;
                writer.write_event(Event::End(BytesEnd::new(*request_type))).map_err(write_error)?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("QBXMLMsgsRq"))).map_err(write_error)?;
        writer.write_event(Event::End(BytesEnd::new("QBXML"))).map_err(write_error)?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| QuickBooksError::InvalidRequest(format!("request is not valid UTF-8: {e}")))
    }
}

fn write_record(writer: &mut Writer<Vec<u8>>, record: &Record) -> Result<()> {
    for (name, value) in record.iter() {
        check_name(name)?;
        match value {
            FieldTree::List(items) => {
                for item in items {
                    write_field(writer, name, item)?;
                }
            }
            other => write_field(writer, name, other)?,
        }
    }
    Ok(())
}

fn write_field(writer: &mut Writer<Vec<u8>>, name: &str, value: &FieldTree) -> Result<()> {
    match value {
        FieldTree::Scalar(text) => {
            writer.write_event(Event::Start(BytesStart::new(name))).map_err(write_error)?;
            writer.write_event(Event::Text(BytesText::new(text))).map_err(write_error)?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(write_error)?;
        }
        FieldTree::Record(record) if record.is_empty() => {
            writer.write_event(Event::Empty(BytesStart::new(name))).map_err(write_error)?;
        }
        FieldTree::Record(record) => {
            writer.write_event(Event::Start(BytesStart::new(name))).map_err(write_error)?;
            write_record(writer, record)?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(write_error)?;
        }
        FieldTree::List(_) => {
            return Err(QuickBooksError::InvalidRequest(format!("field '{name}' contains a nested list")));
        }
    }
    Ok(())
}

/// QBXML element names: ASCII letter or underscore, then letters, digits, `_`, `-`, `.`.
fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(QuickBooksError::InvalidRequest(format!("'{name}' is not a valid element name")))
    }
}

fn write_error(e: impl fmt::Display) -> QuickBooksError {
    QuickBooksError::InvalidRequest(format!("failed to write request: {e}"))
}
