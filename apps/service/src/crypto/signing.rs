use hmac::{Hmac, Mac};
use sha2::Sha256;

pub(crate) type HmacSha256 = Hmac<Sha256>;

pub const TAG_LEN: usize = 32;

pub type Tag = [u8; TAG_LEN];

/// Tag a payload with the shared key
pub fn sign_payload(key: &[u8], payload: &[u8]) -> Tag {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(payload);
    mac.finalize().into_bytes().into()
}
