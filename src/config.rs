use std::sync::Arc;

/// Immutable process-wide configuration snapshot.
///
/// Captured once, before any [`crate::dialog::Dialog`] is constructed, and
/// shared (cheaply, via `Arc`) across every dialog the session owns. Nothing
/// in this crate mutates a field of `DialogConfig` after construction.
#[derive(Debug, Clone)]
pub struct DialogConfig(Arc<DialogConfigInner>);

#[derive(Debug)]
struct DialogConfigInner {
    local_sip_ip: String,
    public_ip: Option<String>,
    local_sip_port: u16,
    outbound_proxy: String,
    force_outbound_proxy: bool,
    signature: String,
    max_forwards: u32,
}

impl DialogConfig {
    pub fn new(
        local_sip_ip: impl Into<String>,
        public_ip: Option<String>,
        local_sip_port: u16,
        outbound_proxy: impl Into<String>,
        force_outbound_proxy: bool,
        signature: impl Into<String>,
        max_forwards: u32,
    ) -> Self {
        Self(Arc::new(DialogConfigInner {
            local_sip_ip: local_sip_ip.into(),
            public_ip,
            local_sip_port,
            outbound_proxy: outbound_proxy.into(),
            force_outbound_proxy,
            signature: signature.into(),
            max_forwards,
        }))
    }

    /// Host to advertise in the Contact header: the public IP if configured,
    /// otherwise the local SIP IP.
    pub fn contact_host(&self) -> &str {
        self.0
            .public_ip
            .as_deref()
            .unwrap_or(&self.0.local_sip_ip)
    }

    pub fn local_sip_port(&self) -> u16 {
        self.0.local_sip_port
    }

    pub fn outbound_proxy(&self) -> &str {
        &self.0.outbound_proxy
    }

    pub fn force_outbound_proxy(&self) -> bool {
        self.0.force_outbound_proxy
    }

    pub fn signature(&self) -> &str {
        &self.0.signature
    }

    pub fn max_forwards(&self) -> u32 {
        self.0.max_forwards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_host_prefers_public_ip() {
        let cfg = DialogConfig::new("10.0.0.1", Some("203.0.113.5".to_string()), 5060, "", false, "", 70);
        assert_eq!(cfg.contact_host(), "203.0.113.5");
    }

    #[test]
    fn contact_host_falls_back_to_local_ip() {
        let cfg = DialogConfig::new("10.0.0.1", None, 5060, "", false, "", 70);
        assert_eq!(cfg.contact_host(), "10.0.0.1");
    }
}
