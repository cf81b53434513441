//! Shared-secret authentication of remote report frames.
//!
//! Both ends hold the same key; a frame is accepted only when its tag is the
//! HMAC-SHA256 of the payload under that key.

pub mod signing;
pub mod verification;

pub use signing::{TAG_LEN, Tag, sign_payload};
pub use verification::verify_payload;
