//! Data models shared with the control-plane collaborator

mod ding;

pub use ding::*;
