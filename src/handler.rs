//! The outbound callback surface to the application session.
//!
//! All methods are optional — a `Dialog` built without a handler (or whose
//! handler leaves a method at its default) simply skips the notification,
//! except for `on_invite_2xx`, whose default *does* something (sends the
//! ACK itself) because RFC 3261 requires every 2xx-to-INVITE to be ACKed
//! even if nobody is listening.

use crate::message::{Method, Reply, Request, SipFlags};
use crate::status::DialogStatus;

/// Capability set an application session implements to observe and steer a
/// dialog. Modeled as a trait with default no-op methods rather than a sum
/// type of event structs, matching the polymorphic handler field the
/// teacher attaches to each dialog.
pub trait DialogHandler<Token> {
    /// A new inbound request was accepted into the dialog.
    fn on_sip_request(&mut self, _req: &Request<Token>) {}

    /// An inbound reply was processed; `old_status` is the dialog's status
    /// immediately before this reply was applied.
    fn on_sip_reply(&mut self, _reply: &Reply<Token>, _old_status: DialogStatus, _trans_method: &Method) {}

    /// About to emit a request; `hdrs` may be extended in place. `flags` is
    /// whatever the caller passed for this particular send, so the handler
    /// can tell whether `SipFlags::VERBATIM` is set before deciding what to
    /// append.
    fn on_send_request(
        &mut self,
        _method: &Method,
        _content_type: &Option<String>,
        _body: &[u8],
        _hdrs: &mut Vec<String>,
        _flags: SipFlags,
        _cseq: u32,
    ) {
    }

    /// About to emit a reply; `hdrs` may be extended in place. `flags` is
    /// whatever the caller passed to `reply()` for this response.
    fn on_send_reply(
        &mut self,
        _req: &Request<Token>,
        _code: u32,
        _reason: &str,
        _content_type: &Option<String>,
        _body: &[u8],
        _hdrs: &mut Vec<String>,
        _flags: SipFlags,
    ) {
    }

    /// A 2xx to an INVITE arrived; the transaction is retained so the
    /// caller can ACK it, possibly with a body. Returns `true` if the
    /// caller took responsibility for ACKing; the default sends a bodiless
    /// ACK immediately and returns `false`.
    fn on_invite_2xx(&mut self, _reply: &Reply<Token>) -> bool {
        false
    }

    /// The transaction layer never saw an ACK for our 2xx.
    fn on_no_ack(&mut self, _cseq: u32) {}

    /// The transaction layer never saw a PRACK for our reliable provisional.
    fn on_no_prack(&mut self, _req: &Request<Token>, _reply: &Reply<Token>) {}
}

/// A handler that does nothing at all; the default when a `Dialog` is
/// constructed without an application-supplied handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl<Token> DialogHandler<Token> for NullHandler {}
