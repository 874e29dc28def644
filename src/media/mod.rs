//! Media side of the fixture: captured RTP replay, RTCP sinks and the SDP
//! that advertises them.

pub mod capture;
pub mod feedback;
pub mod replay;
pub mod sdp;
