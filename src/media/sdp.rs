//! SDP body offered in the INVITE answer (RFC 4566).
//!
//! The layout mirrors what the real device's media server returns: PCMU plus
//! telephone-event on the audio line, H.264 baseline on the video line, each
//! with its RTCP port one above the RTP port.

/// Origin session id/version pair reported by the device.
const SESSION_ID: u64 = 1427284875;
const SESSION_VERSION: u64 = 1427284876;

/// PCMU (RFC 3551 static payload type).
pub const PT_PCMU: u8 = 0;
/// Dynamic payload type for RFC 4733 DTMF events.
pub const PT_TELEPHONE_EVENT: u8 = 101;
/// Dynamic payload type for H.264.
pub const PT_H264: u8 = 97;

/// Build the session description advertising our audio and video ports.
///
/// Every line ends with CRLF regardless of platform.
pub fn session_description(local_ip: &str, audio_port: u16, video_port: u16) -> String {
    let mut sdp = String::new();

    // Session level
    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!(
        "o=FreeSWITCH {} {} IN IP4 {}\r\n",
        SESSION_ID, SESSION_VERSION, local_ip
    ));
    sdp.push_str("s=FreeSWITCH\r\n");
    sdp.push_str(&format!("c=IN IP4 {}\r\n", local_ip));
    sdp.push_str("t=0 0\r\n");

    // Audio: PCMU + telephone-event
    sdp.push_str(&format!(
        "m=audio {} RTP/AVP {} {}\r\n",
        audio_port, PT_PCMU, PT_TELEPHONE_EVENT
    ));
    sdp.push_str(&format!("a=rtpmap:{} PCMU/8000\r\n", PT_PCMU));
    sdp.push_str(&format!(
        "a=rtpmap:{} telephone-event/8000\r\n",
        PT_TELEPHONE_EVENT
    ));
    sdp.push_str(&format!("a=fmtp:{} 0-16\r\n", PT_TELEPHONE_EVENT));
    sdp.push_str("a=ptime:20\r\n");
    sdp.push_str(&format!(
        "a=rtcp:{} IN IP4 {}\r\n",
        rtcp_port(audio_port),
        local_ip
    ));

    // Video: H.264 constrained baseline, level 3.1
    sdp.push_str(&format!("m=video {} RTP/AVP {}\r\n", video_port, PT_H264));
    sdp.push_str(&format!("a=rtpmap:{} H264/90000\r\n", PT_H264));
    sdp.push_str(&format!("a=fmtp:{} profile-level-id=42801F\r\n", PT_H264));
    sdp.push_str(&format!(
        "a=rtcp:{} IN IP4 {}\r\n",
        rtcp_port(video_port),
        local_ip
    ));

    sdp
}

/// RTCP rides on the port directly above RTP.
pub fn rtcp_port(rtp_port: u16) -> u16 {
    rtp_port.wrapping_add(1)
}
