//! Open purchase order retrieval.
//!
//! Queries purchase orders with their line items, keeps only the configured business
//! classes, and reshapes line items so that every order carries a `po_lines` list no
//! matter whether QuickBooks returned the lines flat or inside line groups.

use chrono::NaiveDate;
use log::{debug, info};

use crate::error::{QuickBooksError, Result};
use crate::field_tree::{FieldTree, Record};
use crate::request::{OnError, RequestSpec, DEFAULT_QBXML_VERSION};
use crate::response::{ensure_success, CardinalityRules, ResponseNormalizer};
use crate::session::ScopedSession;
use crate::transport::Transport;

pub const QUERY_REQUEST: &str = "PurchaseOrderQueryRq";
pub const QUERY_RESPONSE: &str = "PurchaseOrderQueryRs";
pub const ORDER: &str = "PurchaseOrderRet";
pub const LINE: &str = "PurchaseOrderLineRet";
pub const LINE_GROUP: &str = "PurchaseOrderLineGroupRet";
/// Key under which the flattened line items are stored on each order.
pub const PO_LINES: &str = "po_lines";

/// Settings for [`PurchaseOrderService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrderConfig {
    /// `ClassRef/FullName` values of the orders to keep.
    pub allowed_classes: Vec<String>,
    pub qbxml_version: String,
    pub on_error: OnError,
}

impl Default for PurchaseOrderConfig {
    fn default() -> Self {
        Self {
            allowed_classes: vec!["Gifting".to_string()],
            qbxml_version: DEFAULT_QBXML_VERSION.to_string(),
            on_error: OnError::StopOnError,
        }
    }
}

/// Retrieves open purchase orders for the allowed business classes.
#[derive(Debug, Clone)]
pub struct PurchaseOrderService {
    config: PurchaseOrderConfig,
    normalizer: ResponseNormalizer,
}

impl PurchaseOrderService {
    pub fn new(config: PurchaseOrderConfig) -> Self {
        Self {
            config,
            normalizer: ResponseNormalizer::new(Self::cardinality_rules()),
        }
    }

    /// Positions that are lists in a purchase order query response.
    pub fn cardinality_rules() -> CardinalityRules {
        CardinalityRules::qbxml()
            .repeatable(QUERY_RESPONSE, ORDER)
            .repeatable(ORDER, LINE)
            .repeatable(ORDER, LINE_GROUP)
            .repeatable(LINE_GROUP, LINE)
    }

    pub fn normalizer(&self) -> &ResponseNormalizer {
        &self.normalizer
    }

    /// The query request: the modified-date filter, when a start date is given, comes
    /// before `IncludeLineItems`.
    pub fn request_spec(&self, start_date: Option<NaiveDate>) -> RequestSpec {
        let mut fields = Record::new();
        if let Some(date) = start_date {
            fields.insert(
                "ModifiedDateRangeFilter",
                Record::new()
                    .with("FromModifiedDate", date.format("%Y-%m-%d").to_string())
                    .into(),
            );
        }
        fields.insert("IncludeLineItems", FieldTree::scalar("1"));

        RequestSpec::new(QUERY_REQUEST)
            .with_fields(fields)
            .version(self.config.qbxml_version.clone())
            .on_error(self.config.on_error)
    }

    /// Runs the query on `session` and returns the open orders.
    pub fn open_purchase_orders<T: Transport>(
        &self,
        session: &mut ScopedSession<'_, T>,
        start_date: Option<NaiveDate>,
    ) -> Result<Vec<FieldTree>> {
        let spec = self.request_spec(start_date);
        let response = session.call_with(&spec, &self.normalizer)?;
        let orders = self.select(response)?;
        info!("Found {} open purchase orders", orders.len());
        Ok(orders)
    }

    /// Filters and reshapes the orders of a normalized query response.
    ///
    /// The query is the only request of its message set, so an error status fails the
    /// call even when it was sent with `continueOnError`.
    pub fn select(&self, response: FieldTree) -> Result<Vec<FieldTree>> {
        let FieldTree::Record(mut body) = response else {
            return Err(QuickBooksError::ParseFailed("response body is not a record".to_string()));
        };
        let mut query = body
            .remove(QUERY_RESPONSE)
            .ok_or_else(|| QuickBooksError::ParseFailed(format!("response has no <{QUERY_RESPONSE}>")))?;
        ensure_success(QUERY_RESPONSE, &query)?;
        let orders = query
            .as_record_mut()
            .and_then(|record| record.remove(ORDER))
            .map(FieldTree::into_items)
            .unwrap_or_default();

        let mut selected = Vec::new();
        for mut order in orders {
            if !self.class_allowed(&order) {
                debug!("Skipping purchase order {:?}: class not allowed", order.text_at(&["RefNumber"]));
                continue;
            }
            if is_closed(&order) {
                debug!("Skipping purchase order {:?}: closed or received", order.text_at(&["RefNumber"]));
                continue;
            }
            if let Some(record) = order.as_record_mut() {
                let lines = flatten_lines(record);
                record.insert(PO_LINES, FieldTree::List(lines));
            }
            selected.push(order);
        }
        Ok(selected)
    }

    fn class_allowed(&self, order: &FieldTree) -> bool {
        order
            .text_at(&["ClassRef", "FullName"])
            .is_some_and(|class| self.config.allowed_classes.iter().any(|allowed| allowed == class))
    }
}

/// Only the literal `true` marks an order as closed or fully received.
fn is_closed(order: &FieldTree) -> bool {
    order.text_at(&["IsManuallyClosed"]) == Some("true") || order.text_at(&["IsFullyReceived"]) == Some("true")
}

/// Flat lines first, then the lines of each line group in group order. Where flat lines
/// and groups are interleaved in the response, that interleaving is not kept.
fn flatten_lines(order: &Record) -> Vec<FieldTree> {
    let mut lines: Vec<FieldTree> = order.get(LINE).cloned().map(FieldTree::into_items).unwrap_or_default();
    let groups = order.get(LINE_GROUP).cloned().map(FieldTree::into_items).unwrap_or_default();
    for group in groups {
        if let Some(grouped) = group.get(LINE) {
            lines.extend(grouped.clone().into_items());
        }
    }
    lines
}
