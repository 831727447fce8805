use qbxml_bridge::purchase_orders::{PurchaseOrderService, PO_LINES};
use qbxml_bridge::transport::TransportError;
use qbxml_bridge::{
    ErrorKind, FieldTree, OnError, PurchaseOrderConfig, Record, RequestSpec, ScriptedTransport, SessionConfig,
    SessionManager,
};

/// Answers every request with the same document, `Rq` names renamed to `Rs`.
fn echo(request: &str) -> Result<String, TransportError> {
    Ok(request.replace("Rq", "Rs"))
}

fn config() -> SessionConfig {
    SessionConfig::new("Integration").company_file("")
}

#[test]
fn echoed_fields_keep_their_order() {
    let mut manager = SessionManager::new(ScriptedTransport::new().responder(echo));
    let fields = Record::new()
        .with(
            "CustomerAdd",
            Record::new()
                .with("Name", "Zed & Co")
                .with("CompanyName", "Zed")
                .with("Phone", "555-0100")
                .with("Email", "a@b.c"),
        );
    let spec = RequestSpec::new("CustomerAddRq").with_fields(fields.clone());

    let response = {
        let mut session = manager.scoped(&config()).unwrap();
        session.call(&spec).unwrap()
    };

    let echoed = response.get("CustomerAddRs").unwrap();
    assert_eq!(echoed, &FieldTree::Record(fields));
    let keys: Vec<&str> = echoed
        .path(&["CustomerAdd"])
        .and_then(FieldTree::as_record)
        .unwrap()
        .keys()
        .collect();
    assert_eq!(keys, vec!["Name", "CompanyName", "Phone", "Email"]);
    assert!(!manager.has_active_session());
    assert_eq!(manager.transport().events().last(), Some(&"close_connection"));
}

const PURCHASE_ORDERS: &str = r#"<?xml version="1.0" ?>
<QBXML>
  <QBXMLMsgsRs>
    <PurchaseOrderQueryRs requestID="0" statusCode="0" statusSeverity="Info" statusMessage="Status OK">
      <PurchaseOrderRet>
        <RefNumber>1001</RefNumber>
        <ClassRef><FullName>Gifting</FullName></ClassRef>
        <IsManuallyClosed>false</IsManuallyClosed>
        <IsFullyReceived>false</IsFullyReceived>
        <PurchaseOrderLineGroupRet>
          <TxnLineID>G-1</TxnLineID>
          <PurchaseOrderLineRet><TxnLineID>L-1</TxnLineID></PurchaseOrderLineRet>
          <PurchaseOrderLineRet><TxnLineID>L-2</TxnLineID></PurchaseOrderLineRet>
        </PurchaseOrderLineGroupRet>
      </PurchaseOrderRet>
      <PurchaseOrderRet>
        <RefNumber>1002</RefNumber>
        <ClassRef><FullName>Gifting</FullName></ClassRef>
        <IsManuallyClosed>false</IsManuallyClosed>
        <IsFullyReceived>true</IsFullyReceived>
        <PurchaseOrderLineRet><TxnLineID>L-3</TxnLineID></PurchaseOrderLineRet>
      </PurchaseOrderRet>
      <PurchaseOrderRet>
        <RefNumber>1003</RefNumber>
        <ClassRef><FullName>Wholesale</FullName></ClassRef>
        <PurchaseOrderLineRet><TxnLineID>L-4</TxnLineID></PurchaseOrderLineRet>
      </PurchaseOrderRet>
    </PurchaseOrderQueryRs>
  </QBXMLMsgsRs>
</QBXML>"#;

#[test]
fn open_purchase_orders_through_a_scoped_session() {
    let mut manager = SessionManager::new(ScriptedTransport::new().respond_with(PURCHASE_ORDERS));
    let service = PurchaseOrderService::new(PurchaseOrderConfig::default());
    let since = chrono::NaiveDate::from_ymd_opt(2024, 1, 15);

    let orders = {
        let mut session = manager.scoped(&config()).unwrap();
        service.open_purchase_orders(&mut session, since).unwrap()
    };

    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].text_at(&["RefNumber"]), Some("1001"));
    let lines = orders[0].get(PO_LINES).and_then(FieldTree::as_list).unwrap();
    let ids: Vec<&str> = lines.iter().filter_map(|line| line.text_at(&["TxnLineID"])).collect();
    assert_eq!(ids, vec!["L-1", "L-2"]);

    let request = &manager.transport().requests()[0];
    let filter = request.find("<ModifiedDateRangeFilter><FromModifiedDate>2024-01-15</FromModifiedDate>").unwrap();
    let include = request.find("<IncludeLineItems>1</IncludeLineItems>").unwrap();
    assert!(filter < include);
    assert_eq!(
        manager.transport().events(),
        &["dispatch", "open_connection", "begin_session", "process_request", "end_session", "close_connection"]
    );
}

#[test]
fn failed_status_surfaces_as_request_failed_and_session_still_ends() {
    let failure = r#"<QBXML><QBXMLMsgsRs><PurchaseOrderQueryRs statusCode="3100" statusSeverity="Error" statusMessage="The name is not valid."/></QBXMLMsgsRs></QBXML>"#;
    let mut manager = SessionManager::new(ScriptedTransport::new().respond_with(failure));
    let service = PurchaseOrderService::new(PurchaseOrderConfig::default());

    let error = {
        let mut session = manager.scoped(&config()).unwrap();
        service.open_purchase_orders(&mut session, None).unwrap_err()
    };

    assert_eq!(error.kind(), ErrorKind::RequestFailed);
    assert!(error.to_string().contains("PurchaseOrderQueryRq"));
    assert!(!manager.has_active_session());
    assert_eq!(manager.transport().events().last(), Some(&"close_connection"));
}

#[test]
fn rejected_query_is_reported_under_continue_on_error() {
    let failure = r#"<QBXML><QBXMLMsgsRs><PurchaseOrderQueryRs statusCode="3100" statusSeverity="Error" statusMessage="bad"/></QBXMLMsgsRs></QBXML>"#;
    let mut manager = SessionManager::new(ScriptedTransport::new().respond_with(failure));
    let service = PurchaseOrderService::new(PurchaseOrderConfig {
        on_error: OnError::ContinueOnError,
        ..PurchaseOrderConfig::default()
    });

    let error = {
        let mut session = manager.scoped(&config()).unwrap();
        service.open_purchase_orders(&mut session, None).unwrap_err()
    };

    assert_eq!(error.kind(), ErrorKind::RequestFailed);
    assert!(manager.transport().requests()[0].contains(r#"onError="continueOnError""#));
}

#[test]
fn echoed_leaf_text_keeps_its_whitespace() {
    let mut manager = SessionManager::new(ScriptedTransport::new().responder(echo));
    let memo = "  two leading, one trailing ";
    let spec = RequestSpec::new("PurchaseOrderModRq")
        .with_fields(Record::new().with("PurchaseOrderMod", Record::new().with("TxnID", "1-A").with("Memo", memo)));

    let mut session = manager.scoped(&config()).unwrap();
    let response = session.call(&spec).unwrap();
    assert_eq!(response.text_at(&["PurchaseOrderModRs", "PurchaseOrderMod", "Memo"]), Some(memo));
}
