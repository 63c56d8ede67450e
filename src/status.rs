use std::fmt;

/// SIP Dialog State
///
/// The four-state lifecycle an [`crate::dialog::Dialog`] moves through, driven
/// entirely by INVITE/BYE/CANCEL responses (RFC 3261 §12).
///
/// # States
///
/// * `Disconnected` - no dialog established; the initial and terminal state.
/// * `Pending` - an INVITE is outstanding (UAC: awaiting final response; UAS:
///   provisional sent or awaiting final).
/// * `Connected` - a 2xx to INVITE has been exchanged; mid-dialog requests permitted.
/// * `Disconnecting` - a teardown (BYE or CANCEL) is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DialogStatus {
    Disconnected,
    Pending,
    Connected,
    Disconnecting,
}

impl Default for DialogStatus {
    fn default() -> Self {
        DialogStatus::Disconnected
    }
}

impl fmt::Display for DialogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DialogStatus::Disconnected => "Disconnected",
            DialogStatus::Pending => "Pending",
            DialogStatus::Connected => "Connected",
            DialogStatus::Disconnecting => "Disconnecting",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_connection_progress() {
        assert!(DialogStatus::Disconnected < DialogStatus::Pending);
        assert!(DialogStatus::Pending < DialogStatus::Connected);
        assert!(DialogStatus::Connected < DialogStatus::Disconnecting);
    }

    #[test]
    fn display_names_are_verbatim() {
        assert_eq!(DialogStatus::Disconnected.to_string(), "Disconnected");
        assert_eq!(DialogStatus::Pending.to_string(), "Pending");
        assert_eq!(DialogStatus::Connected.to_string(), "Connected");
        assert_eq!(DialogStatus::Disconnecting.to_string(), "Disconnecting");
    }
}
