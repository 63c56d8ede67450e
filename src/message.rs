use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Flags a caller may attach to an outgoing request or reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SipFlags: u32 {
        /// Suppress automatic `Server`/`User-Agent`/`Max-Forwards` injection;
        /// the caller's headers are sent unmodified.
        const VERBATIM = 0b0000_0001;
    }
}

/// SIP request method, restricted to the set this dialog layer reasons about.
///
/// Methods the transaction layer forwards that this crate has no special
/// handling for are preserved verbatim via [`Method::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Refer,
    Update,
    Prack,
    Notify,
    Subscribe,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Refer => "REFER",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Notify => "NOTIFY",
            Method::Subscribe => "SUBSCRIBE",
            Method::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REFER" => Method::Refer,
            "UPDATE" => Method::Update,
            "PRACK" => Method::Prack,
            "NOTIFY" => Method::Notify,
            "SUBSCRIBE" => Method::Subscribe,
            other => Method::Other(other.to_string()),
        }
    }
}

/// An inbound or outbound SIP request record, already parsed by the
/// transaction layer. Opaque to this crate except for the fields it reasons
/// about.
#[derive(Debug, Clone)]
pub struct Request<Token> {
    pub method: Method,
    /// Request-URI.
    pub r_uri: String,
    pub from: String,
    pub to: String,
    pub from_tag: String,
    pub from_uri: String,
    pub callid: String,
    pub cseq: u32,
    pub route: String,
    pub user: String,
    pub domain: String,
    pub hdrs: Vec<String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub transport_token: Token,
}

/// An inbound or outbound SIP reply record.
#[derive(Debug, Clone)]
pub struct Reply<Token> {
    pub method: Method,
    pub code: u32,
    pub reason: String,
    pub cseq: u32,
    /// The dialog's own tag, stamped on outgoing replies (UAS side).
    pub local_tag: String,
    pub remote_tag: String,
    pub route: String,
    pub next_request_uri: String,
    pub hdrs: Vec<String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub transport_token: Token,
}

/// A single outstanding transaction, tracked by the dialog's CSeq-keyed
/// tables. The transport token is a handle the transaction layer uses to
/// correlate cancellations and replies; this crate stores and forwards it
/// but never inspects or frees it.
#[derive(Debug, Clone)]
pub struct Transaction<Token> {
    pub method: Method,
    pub cseq: u32,
    pub transport_token: Token,
}

impl<Token> Transaction<Token> {
    pub fn new(method: Method, cseq: u32, transport_token: Token) -> Self {
        Self {
            method,
            cseq,
            transport_token,
        }
    }
}

/// The kind of timer event the transaction layer may report to the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    NoAck,
    NoPrack,
}

/// A transaction-layer timeout notification. `req`/`reply` are only
/// meaningful for `NoPrack` (the PRACK-eliciting reply and the request it
/// answered); `NoAck` only needs `cseq`.
pub struct TimeoutEvent<Token> {
    pub kind: TimeoutKind,
    pub cseq: u32,
    pub req: Option<Request<Token>>,
    pub reply: Option<Reply<Token>>,
}
