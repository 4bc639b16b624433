//! Utility functions for identifiers and key encoding

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique user id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Big-endian so that sled's lexicographic key order matches numeric order.
pub fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub fn u64_from_key(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

/// Owner index key: sha256 of the owner followed by the big-endian invoice id.
/// The digest is fixed width, so one owner's keys never extend another's prefix.
pub fn index_key(owner: &str, id: u64) -> Vec<u8> {
    let mut key = index_prefix(owner);
    key.extend_from_slice(&u64_key(id));
    key
}

pub fn index_prefix(owner: &str) -> Vec<u8> {
    sha256::digest(owner).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_keys_sort_by_id() {
        let a = index_key("biz_1abc", 2);
        let b = index_key("biz_1abc", 10);
        assert!(a < b);
        assert!(a.starts_with(&index_prefix("biz_1abc")));
    }

    #[test]
    fn owner_prefixes_do_not_nest() {
        let owner = "biz_1abc";
        let nested = "biz_1abc/z1def";

        assert_eq!(index_prefix(owner).len(), index_prefix(nested).len());
        assert!(!index_key(nested, 1).starts_with(&index_prefix(owner)));
    }

    #[test]
    fn u64_key_roundtrip() {
        assert_eq!(u64_from_key(&u64_key(42)), Some(42));
        assert_eq!(u64_from_key(&[1, 2, 3]), None);
    }
}
