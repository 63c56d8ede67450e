//! Pure functions that turn dialog fields and configuration into header
//! strings. None of these functions touch dialog state; `Dialog` calls them
//! and stores/caches the results.

use crate::config::DialogConfig;

/// `Contact: <sip:[user@]host:port>` value (without the `Contact: ` label).
pub fn build_contact(user: &str, config: &DialogConfig) -> String {
    let mut s = String::from("<sip:");
    if !user.is_empty() {
        s.push_str(user);
        s.push('@');
    }
    s.push_str(config.contact_host());
    s.push(':');
    s.push_str(&config.local_sip_port().to_string());
    s.push('>');
    s
}

/// `From: <local_party>[;tag=<local_tag>]` value (without the `From: ` label).
pub fn build_from_value(local_party: &str, local_tag: &str) -> String {
    if local_tag.is_empty() {
        local_party.to_string()
    } else {
        format!("{};tag={}", local_party, local_tag)
    }
}

/// `To: <remote_party>[;tag=<remote_tag>]` value (without the `To: ` label).
pub fn build_to_value(remote_party: &str, remote_tag: &str) -> String {
    if remote_tag.is_empty() {
        remote_party.to_string()
    } else {
        format!("{};tag={}", remote_party, remote_tag)
    }
}

/// Route header value for an outgoing in-dialog request, or `None` if no
/// Route header should be sent. `outbound_proxy`/`force_outbound_proxy` are
/// the dialog's own frozen copies of the configured values (see
/// [`crate::dialog::Dialog`]), not read from a live config each call.
///
/// - If `route` is non-empty: `[<outbound_proxy;lr>, ]<route>`, the proxy
///   prefix only when `force_outbound_proxy && !outbound_proxy.is_empty()`.
/// - Else if `remote_tag` is empty and `outbound_proxy` is set:
///   `<outbound_proxy;lr>`.
/// - Else: no Route header.
pub fn build_route(
    route: &str,
    remote_tag: &str,
    outbound_proxy: &str,
    force_outbound_proxy: bool,
) -> Option<String> {
    if !route.is_empty() {
        if force_outbound_proxy && !outbound_proxy.is_empty() {
            Some(format!("<{};lr>, {}", outbound_proxy, route))
        } else {
            Some(route.to_string())
        }
    } else if remote_tag.is_empty() && !outbound_proxy.is_empty() {
        Some(format!("<{};lr>", outbound_proxy))
    } else {
        None
    }
}

/// Route header value for an ACK to a 2xx: the raw route set, never prefixed
/// with the outbound proxy.
pub fn build_ack_route(route: &str) -> Option<String> {
    if route.is_empty() {
        None
    } else {
        Some(route.to_string())
    }
}

/// `User-Agent`/`Server` signature line, or `None` if unconfigured.
pub fn build_signature(config: &DialogConfig) -> Option<&str> {
    if config.signature().is_empty() {
        None
    } else {
        Some(config.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DialogConfig {
        DialogConfig::new("10.0.0.1", None, 5060, "", false, "", 70)
    }

    #[test]
    fn contact_omits_user_when_empty() {
        assert_eq!(build_contact("", &cfg()), "<sip:10.0.0.1:5060>");
        assert_eq!(build_contact("alice", &cfg()), "<sip:alice@10.0.0.1:5060>");
    }

    #[test]
    fn from_to_omit_tag_when_empty() {
        assert_eq!(build_from_value("\"A\" <sip:a@x>", ""), "\"A\" <sip:a@x>");
        assert_eq!(build_from_value("\"A\" <sip:a@x>", "t1"), "\"A\" <sip:a@x>;tag=t1");
        assert_eq!(build_to_value("<sip:b@y>", ""), "<sip:b@y>");
        assert_eq!(build_to_value("<sip:b@y>", "t2"), "<sip:b@y>;tag=t2");
    }

    #[test]
    fn route_prefers_existing_route_set() {
        assert_eq!(
            build_route("<sip:a;lr>", "remote-tag", "sip:proxy.example.com", false),
            Some("<sip:a;lr>".to_string())
        );
    }

    #[test]
    fn route_prepends_forced_outbound_proxy() {
        assert_eq!(
            build_route("<sip:a;lr>", "remote-tag", "sip:proxy.example.com", true),
            Some("<sip:proxy.example.com;lr>, <sip:a;lr>".to_string())
        );
    }

    #[test]
    fn route_falls_back_to_outbound_proxy_before_remote_tag_learned() {
        assert_eq!(
            build_route("", "", "sip:proxy.example.com", false),
            Some("<sip:proxy.example.com;lr>".to_string())
        );
    }

    #[test]
    fn route_absent_once_remote_tag_known_and_no_route_set() {
        assert_eq!(build_route("", "remote-tag", "sip:proxy.example.com", false), None);
    }

    #[test]
    fn route_absent_when_no_route_and_no_proxy() {
        assert_eq!(build_route("", "", "", false), None);
    }

    #[test]
    fn ack_route_never_prepends_outbound_proxy() {
        assert_eq!(build_ack_route("<sip:a;lr>"), Some("<sip:a;lr>".to_string()));
        assert_eq!(build_ack_route(""), None);
    }
}
