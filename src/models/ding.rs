//! Active ding payload served by the control plane

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// One entry of the `/dings/active` response.
///
/// The SIP fields tell the client where to INVITE, so they must name the
/// same IP and signaling port the responder puts in its Contact header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDing {
    pub id: i64,
    pub state: String,
    pub doorbot_id: u64,
    pub doorbot_description: String,
    pub device_kind: String,
    pub protocol: String,
    pub sip_server_ip: String,
    pub sip_server_port: u16,
    pub sip_server_tls: bool,
    pub sip_session_id: u64,
    pub sip_from: String,
    pub sip_to: String,
    /// `motion` or `ding`
    pub kind: String,
}

impl ActiveDing {
    /// A connected motion ding pointing at this fixture, stamped with `now_ms`.
    pub fn for_fixture(config: &Config, now_ms: i64) -> Self {
        let target = format!("sip:1-2@{}:{}", config.ip, config.signaling_port);
        Self {
            id: now_ms,
            state: "connected".to_string(),
            doorbot_id: 1,
            doorbot_description: "Test".to_string(),
            device_kind: "doorbell".to_string(),
            protocol: "sip".to_string(),
            sip_server_ip: config.ip.clone(),
            sip_server_port: config.signaling_port,
            sip_server_tls: false,
            sip_session_id: 2,
            sip_to: format!("{};transport=tcp", target),
            sip_from: target,
            kind: "motion".to_string(),
        }
    }
}
