//! The synchronous sink the dialog hands finished request/reply records to.
//!
//! The sender sink must not block: it enqueues for transport and returns
//! immediately. A caller backed by an async transport typically implements
//! this with a bounded channel's `try_send`.

use crate::message::{Reply, Request};

/// Transport-facing collaborator. Errors are opaque strings; this crate
/// wraps them in [`crate::Error::SendFailed`] without inspecting them.
pub trait SenderSink<Token> {
    /// Hand off a request for transmission. On success, returns the opaque
    /// token the transport layer assigned to the new transaction — the
    /// dialog has no way to mint one itself and stores whatever comes back.
    fn send_request(&mut self, req: Request<Token>) -> Result<Token, String>;
    fn send_reply(&mut self, reply: Reply<Token>) -> Result<(), String>;
    /// Ask the transaction layer to CANCEL the transaction identified by
    /// `token`. Returns `Ok(())` if the cancellation was accepted for
    /// processing, an error otherwise.
    fn cancel(&mut self, token: &Token) -> Result<(), String>;
}
