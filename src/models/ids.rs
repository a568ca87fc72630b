//! Prefixed opaque identifiers for responses, output items and tool calls.

use lazy_static::lazy_static;
use regex::Regex;

const ID_SUFFIX_LEN: usize = 24;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const RESPONSE_ID_PREFIX: &str = "resp_";
pub const MESSAGE_ITEM_ID_PREFIX: &str = "msg_";
pub const FUNCTION_CALL_ITEM_ID_PREFIX: &str = "fc_";
pub const CALL_ID_PREFIX: &str = "call_";

lazy_static! {
    static ref RESPONSE_ID_PATTERN: Regex =
        Regex::new(r"^resp_[a-zA-Z0-9]{24}$").expect("static response id pattern");
}

/// Generate a new response identifier (`resp_` + 24 alphanumerics).
pub fn new_response_id() -> String {
    prefixed(RESPONSE_ID_PREFIX)
}

pub fn new_message_item_id() -> String {
    prefixed(MESSAGE_ITEM_ID_PREFIX)
}

pub fn new_function_call_item_id() -> String {
    prefixed(FUNCTION_CALL_ITEM_ID_PREFIX)
}

pub fn new_call_id() -> String {
    prefixed(CALL_ID_PREFIX)
}

/// Check that `id` has the shape of a response identifier.
pub fn is_valid_response_id(id: &str) -> bool {
    RESPONSE_ID_PATTERN.is_match(id)
}

fn prefixed(prefix: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + ID_SUFFIX_LEN);
    id.push_str(prefix);
    id.push_str(&random_alphanumeric(ID_SUFFIX_LEN));
    id
}

/// Rejection sampling over OS randomness keeps the charset distribution uniform.
fn random_alphanumeric(len: usize) -> String {
    // Largest multiple of the charset size that fits in a byte.
    let limit = (u8::MAX as usize / ID_CHARSET.len()) * ID_CHARSET.len();
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        if getrandom::getrandom(&mut buf).is_err() {
            // OS randomness unavailable, fall back to a v4 uuid.
            let fallback = uuid::Uuid::new_v4().simple().to_string();
            for c in fallback.chars() {
                if out.len() == len {
                    break;
                }
                out.push(c);
            }
            continue;
        }
        for b in buf.iter() {
            if out.len() == len {
                break;
            }
            if (*b as usize) < limit {
                out.push(ID_CHARSET[*b as usize % ID_CHARSET.len()] as char);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_response_id_shape() {
        let id = new_response_id();
        assert!(id.starts_with("resp_"));
        assert_eq!(id.len(), RESPONSE_ID_PREFIX.len() + ID_SUFFIX_LEN);
        assert!(is_valid_response_id(&id));
    }

    #[test]
    fn test_item_id_prefixes() {
        assert!(new_message_item_id().starts_with("msg_"));
        assert!(new_function_call_item_id().starts_with("fc_"));
        assert!(new_call_id().starts_with("call_"));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_response_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_invalid_response_ids() {
        assert!(!is_valid_response_id(""));
        assert!(!is_valid_response_id("resp_short"));
        assert!(!is_valid_response_id("msg_abcdefghijklmnopqrstuvwx"));
        assert!(!is_valid_response_id("resp_abcdefghijklmnopqrstuv-x"));
    }
}
