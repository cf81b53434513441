use hmac::Mac;

use super::signing::HmacSha256;

/// Check a payload's tag in constant time
pub fn verify_payload(key: &[u8], payload: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(tag).is_ok()
}
