//! Normalization of QBXML responses into [`FieldTree`]s.
//!
//! QuickBooks writes a repeated element as plain siblings, so a document alone cannot
//! tell "one line item" apart from "a field that is never repeated". The normalizer
//! resolves this per parent element:
//!
//! * a name that occurs more than once under a parent becomes a [`FieldTree::List`];
//! * a name registered in [`CardinalityRules`] for that parent is always a list, with
//!   an empty list when the element is absent;
//! * anything else is a [`FieldTree::Record`] or [`FieldTree::Scalar`].

use std::collections::HashMap;

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{QuickBooksError, Result};
use crate::field_tree::{FieldTree, Record};

/// Key holding the text of an element that also has attributes or children.
pub const TEXT_KEY: &str = "#text";

const ENVELOPE: &str = "QBXML";
const MESSAGES: &str = "QBXMLMsgsRs";

/// Element positions that are repeatable even when a response holds a single instance.
#[derive(Debug, Clone, Default)]
pub struct CardinalityRules {
    positions: HashMap<String, Vec<String>>,
    query_results_are_lists: bool,
}

impl CardinalityRules {
    /// No rules: only duplicated siblings become lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// The QBXML convention that every `*Ret` child of a `*QueryRs` element is a list.
    pub fn qbxml() -> Self {
        Self {
            positions: HashMap::new(),
            query_results_are_lists: true,
        }
    }

    /// Marks `child` as a list whenever it appears under `parent`.
    pub fn repeatable(mut self, parent: impl Into<String>, child: impl Into<String>) -> Self {
        let child = child.into();
        let children = self.positions.entry(parent.into()).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
        self
    }

    pub fn is_repeatable(&self, parent: &str, child: &str) -> bool {
        let explicit = self
            .positions
            .get(parent)
            .is_some_and(|children| children.iter().any(|c| c == child));
        explicit || (self.query_results_are_lists && parent.ends_with("QueryRs") && child.ends_with("Ret"))
    }

    fn declared_lists(&self, parent: &str) -> &[String] {
        self.positions.get(parent).map(Vec::as_slice).unwrap_or_default()
    }
}

/// How status errors reported by QuickBooks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusPolicy {
    Raise,
    Preserve,
}

/// Parses QBXML responses into cardinality-resolved trees.
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    rules: CardinalityRules,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new(CardinalityRules::qbxml())
    }
}

impl ResponseNormalizer {
    pub fn new(rules: CardinalityRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &CardinalityRules {
        &self.rules
    }

    /// Parses a response and fails on the first response element carrying an error status.
    ///
    /// The result is a record keyed by response element name, e.g. `PurchaseOrderQueryRs`,
    /// with the status attributes folded into each response record.
    pub fn parse(&self, xml: &str) -> Result<FieldTree> {
        self.parse_with(xml, StatusPolicy::Raise)
    }

    /// Like [`parse`](Self::parse) but keeps error statuses as data, for message sets
    /// sent with `continueOnError`.
    pub fn parse_lenient(&self, xml: &str) -> Result<FieldTree> {
        self.parse_with(xml, StatusPolicy::Preserve)
    }

    fn parse_with(&self, xml: &str, policy: StatusPolicy) -> Result<FieldTree> {
        let root = read_document(xml)?;
        if root.name != ENVELOPE {
            return Err(QuickBooksError::ParseFailed(format!(
                "expected <{ENVELOPE}> root element, found <{}>",
                root.name
            )));
        }
        let messages = root
            .children
            .into_iter()
            .find(|child| child.name == MESSAGES)
            .ok_or_else(|| QuickBooksError::ParseFailed(format!("response has no <{MESSAGES}> element")))?;

        let mut body = Record::new();
        self.normalize_children(MESSAGES, messages.children, &mut body)?;

        for (response_type, node) in body.iter() {
            match node {
                FieldTree::List(items) => {
                    for item in items {
                        check_status(response_type, item, policy)?;
                    }
                }
                other => check_status(response_type, other, policy)?,
            }
        }

        Ok(FieldTree::Record(body))
    }

    fn normalize(&self, element: RawElement) -> Result<FieldTree> {
        let RawElement {
            name,
            attributes,
            children,
            text,
        } = element;

        if children.is_empty() && attributes.is_empty() && self.rules.declared_lists(&name).is_empty() {
            return Ok(FieldTree::Scalar(text));
        }

        let mut record = Record::new();
        for (key, value) in attributes {
            record.insert(key, FieldTree::Scalar(value));
        }
        self.normalize_children(&name, children, &mut record)?;
        // Whitespace between child tags is layout, not content.
        if !text.trim().is_empty() {
            record.insert(TEXT_KEY, FieldTree::Scalar(text));
        }
        Ok(FieldTree::Record(record))
    }

    fn normalize_children(&self, parent: &str, children: Vec<RawElement>, record: &mut Record) -> Result<()> {
        let mut groups: Vec<(String, Vec<RawElement>)> = Vec::new();
        for child in children {
            match groups.iter_mut().find(|(name, _)| *name == child.name) {
                Some((_, group)) => group.push(child),
                None => groups.push((child.name.clone(), vec![child])),
            }
        }

        for (name, mut group) in groups {
            if record.contains_key(&name) {
                return Err(QuickBooksError::ParseFailed(format!(
                    "<{parent}> has both an attribute and a child element named '{name}'"
                )));
            }
            let value = if group.len() > 1 || self.rules.is_repeatable(parent, &name) {
                let items = group
                    .into_iter()
                    .map(|element| self.normalize(element))
                    .collect::<Result<Vec<_>>>()?;
                FieldTree::List(items)
            } else {
                match group.pop() {
                    Some(element) => self.normalize(element)?,
                    None => continue,
                }
            };
            record.insert(name, value);
        }

        for name in self.rules.declared_lists(parent) {
            if !record.contains_key(name) {
                record.insert(name.clone(), FieldTree::List(Vec::new()));
            }
        }
        Ok(())
    }
}

/// Fails with `RequestFailed` when `node`, a response element named `response_type`,
/// carries an error status, whatever `onError` mode the request was sent with.
pub fn ensure_success(response_type: &str, node: &FieldTree) -> Result<()> {
    check_status(response_type, node, StatusPolicy::Raise)
}

fn check_status(response_type: &str, node: &FieldTree, policy: StatusPolicy) -> Result<()> {
    let Some(raw_code) = node.text_at(&["statusCode"]) else {
        return Ok(());
    };
    let code: i64 = raw_code.trim().parse().map_err(|_| {
        QuickBooksError::ParseFailed(format!("{response_type} has a non-numeric statusCode '{raw_code}'"))
    })?;
    if code == 0 {
        return Ok(());
    }

    let severity = node.text_at(&["statusSeverity"]).unwrap_or("Error");
    let message = node.text_at(&["statusMessage"]).unwrap_or_default();
    if !severity.eq_ignore_ascii_case("Error") {
        debug!("{response_type} returned status {code} ({severity}): {message}");
        return Ok(());
    }

    match policy {
        StatusPolicy::Raise => Err(QuickBooksError::RequestFailed {
            request_type: request_name(response_type),
            status_code: Some(code),
            message: message.to_string(),
        }),
        StatusPolicy::Preserve => {
            warn!("{response_type} returned status {code}: {message}");
            Ok(())
        }
    }
}

/// `PurchaseOrderQueryRs` -> `PurchaseOrderQueryRq`.
fn request_name(response_type: &str) -> String {
    match response_type.strip_suffix("Rs") {
        Some(stem) => format!("{stem}Rq"),
        None => response_type.to_string(),
    }
}

/// An element as read from the document, before cardinality is resolved.
#[derive(Debug)]
struct RawElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<RawElement>,
    text: String,
}

impl RawElement {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = utf8(start.name().as_ref())?.to_string();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute
                .map_err(|e| QuickBooksError::ParseFailed(format!("bad attribute on <{name}>: {e}")))?;
            let key = utf8(attribute.key.as_ref())?.to_string();
            let value = attribute
                .unescape_value()
                .map_err(|e| QuickBooksError::ParseFailed(format!("bad attribute value on <{name}>: {e}")))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| QuickBooksError::ParseFailed(format!("invalid UTF-8 in name: {e}")))
}

fn read_document(xml: &str) -> Result<RawElement> {
    let mut reader = Reader::from_str(xml);

    let mut open: Vec<RawElement> = Vec::new();
    let mut root: Option<RawElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            QuickBooksError::ParseFailed(format!("{e} at position {}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(start) => open.push(RawElement::open(&start)?),
            Event::Empty(start) => attach(&mut open, &mut root, RawElement::open(&start)?)?,
            Event::End(_) => {
                let element = open
                    .pop()
                    .ok_or_else(|| QuickBooksError::ParseFailed("unexpected closing tag".to_string()))?;
                attach(&mut open, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| QuickBooksError::ParseFailed(format!("bad text content: {e}")))?;
                match open.last_mut() {
                    Some(element) => element.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(QuickBooksError::ParseFailed("text outside of the root element".to_string()))
                    }
                }
            }
            Event::CData(data) => {
                if let Some(element) = open.last_mut() {
                    element.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(element) = open.last() {
        return Err(QuickBooksError::ParseFailed(format!("<{}> is never closed", element.name)));
    }
    root.ok_or_else(|| QuickBooksError::ParseFailed("empty response".to_string()))
}

fn attach(open: &mut [RawElement], root: &mut Option<RawElement>, element: RawElement) -> Result<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(QuickBooksError::ParseFailed("more than one root element".to_string())),
    }
    Ok(())
}
