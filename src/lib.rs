// QuickBooks Desktop QBXML bridge library
// Requests are built from ordered field trees, sent through a Transport, and the
// responses normalized back into field trees.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod field_tree;
pub mod purchase_orders;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use error::{ErrorKind, QuickBooksError, Result};
pub use field_tree::{FieldTree, Record};
pub use purchase_orders::{PurchaseOrderConfig, PurchaseOrderService};
pub use request::{OnError, RequestBuilder, RequestSpec};
pub use response::{CardinalityRules, ResponseNormalizer};
pub use session::{ScopedSession, Session, SessionConfig, SessionManager};
pub use transport::{ConnectionType, FileMode, ScriptedTransport, Transport};
