//! Social-Engineering Detector
//!
//! Deterministic screening of inbound user messages. No classifier call:
//! this stage sits on the hot path of every message and must answer in
//! microseconds.

mod detector;
mod response;

pub use detector::SocialEngineeringDetector;
pub use response::refusal_message;
