//! A synchronous, transport-agnostic SIP dialog layer (RFC 3261 §12).
//!
//! [`Dialog`] owns the per-call state machine, the UAC/UAS transaction
//! tables, and the header-construction logic that turns a dialog's fields
//! into outgoing requests and replies. It knows nothing about message
//! parsing or network transport: both are abstracted behind
//! [`SenderSink`] and the opaque `Token` type parameter threaded through
//! every record.
//!
//! ```ignore
//! let config = DialogConfig::new("10.0.0.1", None, 5060, "", false, "sipdialog/0.1", 70);
//! let mut dlg = Dialog::without_handler(
//!     "", "", "", "", "", "", "", "", config,
//! );
//! dlg.invite(None, Vec::new(), Vec::new(), &mut sender)?;
//! ```

pub mod config;
pub mod dialog;
pub mod error;
pub mod handler;
pub mod headers;
pub mod message;
pub mod sender;
pub mod status;
pub mod trans_table;

pub use config::DialogConfig;
pub use dialog::Dialog;
pub use error::{Error, Result};
pub use handler::{DialogHandler, NullHandler};
pub use message::{Method, Reply, Request, SipFlags, TimeoutEvent, TimeoutKind, Transaction};
pub use sender::SenderSink;
pub use status::DialogStatus;
pub use trans_table::TransactionTable;
