//! Size-string helpers shared by the host checks and the config layer.

use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    #[error("size string is empty")]
    Empty,

    #[error("`{0}` is not a size (expected digits with an optional K, M, G or T suffix)")]
    Invalid(String),

    #[error("`{0}` does not fit in 64 bits")]
    Overflow(String),
}

/// Convert a size string such as `"10G"` into bytes.
///
/// Suffixes are binary multiples and case-insensitive; a bare number is
/// taken as bytes.
pub fn size_string_to_bytes(input: &str) -> Result<u64, SizeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((index, suffix)) if suffix.is_ascii_alphabetic() => {
            let multiplier = match suffix.to_ascii_uppercase() {
                'K' => KIB,
                'M' => MIB,
                'G' => GIB,
                'T' => TIB,
                _ => return Err(SizeError::Invalid(input.to_string())),
            };
            (&trimmed[..index], multiplier)
        }
        _ => (trimmed, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SizeError::Invalid(input.to_string()));
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| SizeError::Overflow(input.to_string()))
}

/// Render a byte count with a binary suffix and two decimals.
///
/// Anything below one KiB is printed as a plain number.
pub fn bytes_to_size_string(bytes: u64) -> String {
    let scaled = |unit: u64| bytes as f64 / unit as f64;

    if bytes >= TIB {
        format!("{:.2}TiB", scaled(TIB))
    } else if bytes >= GIB {
        format!("{:.2}GiB", scaled(GIB))
    } else if bytes >= MIB {
        format!("{:.2}MiB", scaled(MIB))
    } else if bytes >= KIB {
        format!("{:.2}KiB", scaled(KIB))
    } else {
        bytes.to_string()
    }
}
