//! Request parameters are a CBOR map, usually emitted by the on-chain buffer
//! library without the map header.

use std::collections::HashSet;

use alloy_primitives::{U256, hex};
use ciborium::value::Value as Cbor;
use serde_json::{Map, Number, Value};

use crate::error::DecodeError;

const MAJOR_MAP: u8 = 5;
const BREAK: u8 = 0xff;
const INDEFINITE_MAP: u8 = 0xbf;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Decode request parameters into a JSON object.
///
/// A headerless sequence of key/value pairs is wrapped as an indefinite
/// map. Keys must be text and unique.
pub fn decode_params(data: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    if data.is_empty() {
        return Ok(Map::new());
    }
    let framed;
    let bytes = if data[0] >> 5 == MAJOR_MAP {
        data
    } else {
        framed = [&[INDEFINITE_MAP][..], data, &[BREAK][..]].concat();
        &framed[..]
    };

    let value: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| DecodeError::MalformedParams(e.to_string()))?;
    match to_json(value)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::MalformedParams(format!(
            "expected a map, got {other}"
        ))),
    }
}

fn to_json(value: Cbor) -> Result<Value, DecodeError> {
    Ok(match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Text(s) => Value::String(s),
        Cbor::Bytes(b) => Value::String(hex::encode_prefixed(b)),
        Cbor::Integer(i) => integer(i128::from(i)),
        Cbor::Float(f) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| DecodeError::MalformedParams(format!("non-finite float {f}")))?,
        // Bignums of up to 16 bytes already arrive as `Integer`.
        Cbor::Tag(TAG_POSITIVE_BIGNUM, inner) => {
            let n = bignum(*inner)?;
            match u64::try_from(n) {
                Ok(small) => Value::from(small),
                Err(_) => Value::String(n.to_string()),
            }
        }
        Cbor::Tag(TAG_NEGATIVE_BIGNUM, inner) => {
            let n = bignum(*inner)?;
            match i64::try_from(n).ok().and_then(|m| m.checked_add(1)) {
                Some(small) => Value::from(-small),
                None => Value::String(format!("-{}", n.saturating_add(U256::from(1)))),
            }
        }
        Cbor::Tag(_, inner) => to_json(*inner)?,
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Cbor::Map(entries) => {
            let mut seen = HashSet::with_capacity(entries.len());
            let mut map = Map::new();
            for (key, value) in entries {
                let Cbor::Text(key) = key else {
                    return Err(DecodeError::MalformedParams(format!(
                        "map key is not text: {key:?}"
                    )));
                };
                if !seen.insert(key.clone()) {
                    return Err(DecodeError::DuplicateKey(key));
                }
                map.insert(key, to_json(value)?);
            }
            Value::Object(map)
        }
        other => {
            return Err(DecodeError::MalformedParams(format!(
                "unsupported item {other:?}"
            )));
        }
    })
}

fn integer(i: i128) -> Value {
    if let Ok(n) = i64::try_from(i) {
        Value::from(n)
    } else if let Ok(n) = u64::try_from(i) {
        Value::from(n)
    } else {
        Value::String(i.to_string())
    }
}

fn bignum(inner: Cbor) -> Result<U256, DecodeError> {
    match inner {
        Cbor::Bytes(b) if b.len() <= 32 => Ok(U256::from_be_slice(&b)),
        other => Err(DecodeError::MalformedParams(format!(
            "bignum content is not up to 32 bytes: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Cbor) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    fn text(s: &str) -> Cbor {
        Cbor::Text(s.into())
    }

    #[test]
    fn decodes_framed_map() {
        let value = Cbor::Map(vec![
            (text("url"), text("http://x")),
            (text("times"), Cbor::Integer(100.into())),
            (text("path"), Cbor::Array(vec![text("a"), text("b")])),
        ]);
        let map = decode_params(&encode(&value)).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"url": "http://x", "times": 100, "path": ["a", "b"]})
        );
    }

    #[test]
    fn decodes_headerless_pairs() {
        let mut pairs = encode(&text("url"));
        pairs.extend(encode(&text("http://x")));
        let map = decode_params(&pairs).unwrap();
        assert_eq!(map["url"], json!("http://x"));
    }

    #[test]
    fn empty_payload_is_empty_map() {
        assert!(decode_params(&[]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let value = Cbor::Map(vec![
            (text("url"), text("http://a")),
            (text("url"), text("http://b")),
        ]);
        assert_eq!(
            decode_params(&encode(&value)),
            Err(DecodeError::DuplicateKey("url".into()))
        );
    }

    #[test]
    fn integers_beyond_64_bits_become_strings() {
        let mut huge = vec![1];
        huge.extend([0; 16]);
        let value = Cbor::Map(vec![
            (text("raw"), Cbor::Bytes(vec![0xde, 0xad])),
            (
                text("big"),
                Cbor::Tag(TAG_POSITIVE_BIGNUM, Box::new(Cbor::Bytes(vec![1, 0, 0, 0, 0, 0, 0, 0, 0]))),
            ),
            (
                text("neg"),
                Cbor::Tag(TAG_NEGATIVE_BIGNUM, Box::new(Cbor::Bytes(vec![0x09]))),
            ),
            (
                text("huge"),
                Cbor::Tag(TAG_POSITIVE_BIGNUM, Box::new(Cbor::Bytes(huge.clone()))),
            ),
            (
                text("hugeNeg"),
                Cbor::Tag(TAG_NEGATIVE_BIGNUM, Box::new(Cbor::Bytes(huge))),
            ),
        ]);
        let map = decode_params(&encode(&value)).unwrap();
        assert_eq!(map["raw"], json!("0xdead"));
        assert_eq!(map["big"], json!("18446744073709551616"));
        assert_eq!(map["neg"], json!(-10));
        assert_eq!(map["huge"], json!("340282366920938463463374607431768211456"));
        assert_eq!(map["hugeNeg"], json!("-340282366920938463463374607431768211457"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode_params(&[0xa1, 0x63]),
            Err(DecodeError::MalformedParams(_))
        ));
        let not_a_map = encode(&Cbor::Array(vec![Cbor::Integer(1.into())]));
        assert!(matches!(
            decode_params(&not_a_map),
            Err(DecodeError::MalformedParams(_))
        ));
    }
}
