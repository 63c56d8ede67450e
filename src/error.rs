use crate::status::DialogStatus;

/// Errors produced by the dialog layer.
///
/// These are the only failure modes the core surfaces to its caller; parsing,
/// transport, and authentication errors belong to the layers on either side
/// of this crate and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no UAS transaction matching cseq={cseq}")]
    NoMatchingUasTransaction { cseq: u32 },

    #[error("no pending UAC INVITE transaction to cancel")]
    NoPendingInvite,

    #[error("cannot send PRACK while dialog is in state '{status}'")]
    PrackNotAllowed { status: DialogStatus },

    #[error("sender sink rejected message: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
