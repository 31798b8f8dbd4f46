use crate::err::{StoreError, StoreResult};
use xxhash_rust::xxh3::xxh3_64;

// the record header stores the key length in 16 bits
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

// Check a caller supplied key before it reaches any backend.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

// Generate a key id from user key.
// The key id is a 64-bit hash, used to spread keys over lock stripes.
pub fn get_key_id(user_key: &str) -> u64 {
    xxh3_64(user_key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(validate_key("").unwrap_err().is_invalid_key());
    }

    #[test]
    fn oversized_key_is_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&key).unwrap_err().is_invalid_key());
        assert!(validate_key(&key[..MAX_KEY_LEN]).is_ok());
    }

    #[test]
    fn key_id_is_stable() {
        assert_eq!(get_key_id("storedWords"), get_key_id("storedWords"));
        assert_ne!(get_key_id("storedWords"), get_key_id("storedWords2"));
    }
}
