//! Canonical JSON encoding (SPEC_FULL.md §4.1): UTF-8, object keys sorted
//! lexicographically by code point, no insignificant whitespace, numbers
//! without trailing zeros, arrays preserve order.
//!
//! `serde_json::Value`'s `Map` is a `BTreeMap` unless the `preserve_order`
//! feature is enabled (it is not, in this workspace), so round-tripping a
//! payload through `Value` and re-serializing compactly already gives
//! sorted keys for free — the same trick the canonical-JSON signing
//! surface of every spec-faithful implementation of this protocol relies
//! on.

use serde::Serialize;

/// Serialize `payload` to its canonical byte representation.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    canonical_json_value(&value)
}

/// Same as [`canonical_json`] but starting from an already-parsed `Value`
/// (the shape `Envelope::payload` carries on the wire).
pub fn canonical_json_value(value: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_regardless_of_insertion_order() {
        let a = json!({"b": 1, "a": 2, "c": 3});
        let b = json!({"c": 3, "a": 2, "b": 1});
        assert_eq!(canonical_json_value(&a).unwrap(), canonical_json_value(&b).unwrap());
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = json!({"a": 1});
        let bytes = canonical_json_value(&v).unwrap();
        assert_eq!(bytes, b"{\"a\":1}");
    }
}
