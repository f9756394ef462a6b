//! Generic on-chain structured values and their CBOR form.
//!
//! [`PlutusData`] is the untyped tree a validator sees: constructors with
//! fields, maps, lists, integers and byte strings. The typed governance
//! datum and redeemers in the sibling modules are projections onto this
//! tree; this module only knows how to put a tree on the wire and take it
//! back off.
//!
//! ## CBOR mapping
//!
//! | Value            | CBOR                                              |
//! |------------------|---------------------------------------------------|
//! | `Constr(i, xs)`  | tag `121 + i` (i < 7), `1280 + i - 7` (i < 128), else tag 102 `[i, xs]` |
//! | `Map(pairs)`     | map, pairs in the given order                     |
//! | `List(xs)`       | array                                             |
//! | `Int(n)`         | int in `-2^64 ..= 2^64 - 1`, bignum tags 2/3 beyond  |
//! | `Bytes(b)`       | byte string, at most 64 bytes                     |

use ciborium::value::Value;

use crate::config::MAX_CHUNK_BYTES;
use crate::error::{GovernanceError, Result};

const TAG_CONSTR_SMALL: u64 = 121;
const TAG_CONSTR_LARGE: u64 = 1280;
const TAG_CONSTR_GENERAL: u64 = 102;
const TAG_BIGNUM_POS: u64 = 2;
const TAG_BIGNUM_NEG: u64 = 3;

/// An untyped on-chain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlutusData {
    Constr(u64, Vec<PlutusData>),
    /// Ordered key/value pairs. Order is preserved on the wire so a single
    /// encode is deterministic; the validator attaches no meaning to it.
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Int(i128),
    Bytes(Vec<u8>),
}

impl PlutusData {
    /// Nullary constructor, the on-chain spelling of an enum tag.
    pub fn unit(index: u64) -> Self {
        PlutusData::Constr(index, Vec::new())
    }

    /// Byte string from a hex field. Fails on malformed hex.
    pub fn bytes_from_hex(hex_str: &str) -> Result<Self> {
        Ok(PlutusData::Bytes(hex::decode(hex_str)?))
    }

    // -----------------------------------------------------------------------
    // Accessors used by the typed decoders
    // -----------------------------------------------------------------------

    /// Expects a constructor with the given index and arity.
    pub fn expect_constr(&self, index: u64, arity: usize, what: &str) -> Result<&[PlutusData]> {
        match self {
            PlutusData::Constr(i, fields) if *i == index && fields.len() == arity => Ok(fields),
            PlutusData::Constr(i, fields) => Err(GovernanceError::Decoding(format!(
                "{}: expected constructor {} with {} fields, found {} with {}",
                what,
                index,
                arity,
                i,
                fields.len()
            ))),
            _ => Err(unexpected(what, "constructor")),
        }
    }

    pub fn as_int(&self, what: &str) -> Result<i128> {
        match self {
            PlutusData::Int(n) => Ok(*n),
            _ => Err(unexpected(what, "integer")),
        }
    }

    /// Integer that must be non-negative and fit a `u64`.
    pub fn as_u64(&self, what: &str) -> Result<u64> {
        let n = self.as_int(what)?;
        u64::try_from(n)
            .map_err(|_| GovernanceError::Decoding(format!("{}: {} out of u64 range", what, n)))
    }

    /// Integer that must fit an `i64` (timestamps).
    pub fn as_i64(&self, what: &str) -> Result<i64> {
        let n = self.as_int(what)?;
        i64::try_from(n)
            .map_err(|_| GovernanceError::Decoding(format!("{}: {} out of i64 range", what, n)))
    }

    pub fn as_bytes(&self, what: &str) -> Result<&[u8]> {
        match self {
            PlutusData::Bytes(b) => Ok(b),
            _ => Err(unexpected(what, "bytes")),
        }
    }

    pub fn as_map(&self, what: &str) -> Result<&[(PlutusData, PlutusData)]> {
        match self {
            PlutusData::Map(pairs) => Ok(pairs),
            _ => Err(unexpected(what, "map")),
        }
    }

    // -----------------------------------------------------------------------
    // CBOR
    // -----------------------------------------------------------------------

    /// Converts to a CBOR value tree.
    pub fn to_cbor_value(&self) -> Result<Value> {
        Ok(match self {
            PlutusData::Constr(index, fields) => {
                let fields = Value::Array(
                    fields
                        .iter()
                        .map(PlutusData::to_cbor_value)
                        .collect::<Result<Vec<_>>>()?,
                );
                match *index {
                    i if i < 7 => Value::Tag(TAG_CONSTR_SMALL + i, Box::new(fields)),
                    i if i < 128 => Value::Tag(TAG_CONSTR_LARGE + i - 7, Box::new(fields)),
                    i => Value::Tag(
                        TAG_CONSTR_GENERAL,
                        Box::new(Value::Array(vec![Value::Integer(i.into()), fields])),
                    ),
                }
            }
            PlutusData::Map(pairs) => Value::Map(
                pairs
                    .iter()
                    .map(|(k, v)| Ok((k.to_cbor_value()?, v.to_cbor_value()?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            PlutusData::List(items) => Value::Array(
                items
                    .iter()
                    .map(PlutusData::to_cbor_value)
                    .collect::<Result<Vec<_>>>()?,
            ),
            // Bignum tags 2/3 beyond the 64-bit CBOR range.
            PlutusData::Int(n) => Value::from(*n),
            PlutusData::Bytes(b) => {
                if b.len() > MAX_CHUNK_BYTES {
                    return Err(GovernanceError::Encoding(format!(
                        "byte string of {} bytes exceeds the {}-byte chunk limit",
                        b.len(),
                        MAX_CHUNK_BYTES
                    )));
                }
                Value::Bytes(b.clone())
            }
        })
    }

    /// Reads a CBOR value tree.
    pub fn from_cbor_value(value: &Value) -> Result<Self> {
        match value {
            Value::Tag(tag, inner) => Self::from_tagged(*tag, inner),
            Value::Map(pairs) => Ok(PlutusData::Map(
                pairs
                    .iter()
                    .map(|(k, v)| Ok((Self::from_cbor_value(k)?, Self::from_cbor_value(v)?)))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Array(items) => Ok(PlutusData::List(
                items
                    .iter()
                    .map(Self::from_cbor_value)
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Integer(n) => Ok(PlutusData::Int(i128::from(*n))),
            Value::Bytes(b) => Ok(PlutusData::Bytes(b.clone())),
            other => Err(GovernanceError::Decoding(format!(
                "unsupported CBOR item in structured data: {:?}",
                other
            ))),
        }
    }

    fn from_tagged(tag: u64, inner: &Value) -> Result<Self> {
        let constr = |index: u64, fields: &Value| -> Result<Self> {
            match fields {
                Value::Array(items) => Ok(PlutusData::Constr(
                    index,
                    items
                        .iter()
                        .map(Self::from_cbor_value)
                        .collect::<Result<Vec<_>>>()?,
                )),
                _ => Err(GovernanceError::Decoding(
                    "constructor fields must be an array".to_string(),
                )),
            }
        };

        match tag {
            t @ 121..=127 => constr(t - TAG_CONSTR_SMALL, inner),
            t @ 1280..=1400 => constr(t - TAG_CONSTR_LARGE + 7, inner),
            TAG_CONSTR_GENERAL => match inner {
                Value::Array(parts) if parts.len() == 2 => {
                    let index = match &parts[0] {
                        Value::Integer(i) => u64::try_from(i128::from(*i)).map_err(|_| {
                            GovernanceError::Decoding("negative constructor index".to_string())
                        })?,
                        _ => {
                            return Err(GovernanceError::Decoding(
                                "constructor index must be an integer".to_string(),
                            ))
                        }
                    };
                    constr(index, &parts[1])
                }
                _ => Err(GovernanceError::Decoding(
                    "general constructor must be a 2-element array".to_string(),
                )),
            },
            TAG_BIGNUM_POS | TAG_BIGNUM_NEG => {
                let Value::Bytes(magnitude) = inner else {
                    return Err(GovernanceError::Decoding("bignum payload must be bytes".into()));
                };
                if magnitude.len() > 16 {
                    return Err(GovernanceError::Decoding("bignum wider than 128 bits".into()));
                }
                let mut n: u128 = 0;
                for byte in magnitude {
                    n = (n << 8) | u128::from(*byte);
                }
                let n = i128::try_from(n)
                    .map_err(|_| GovernanceError::Decoding("bignum out of range".into()))?;
                Ok(PlutusData::Int(if tag == TAG_BIGNUM_POS { n } else { -1 - n }))
            }
            other => Err(GovernanceError::Decoding(format!("unexpected CBOR tag {}", other))),
        }
    }

    /// Serializes to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        encode_value(&self.to_cbor_value()?)
    }

    /// Parses CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        Self::from_cbor_value(&decode_value(bytes)?)
    }

    /// Serializes to hex-encoded CBOR, the form wallets and backends exchange.
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_cbor()?))
    }

    /// Parses hex-encoded CBOR.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_cbor(&hex::decode(hex_str)?)
    }
}

fn unexpected(what: &str, expected: &str) -> GovernanceError {
    GovernanceError::Decoding(format!("{}: expected {}", what, expected))
}

/// Writes any CBOR value tree to bytes.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| GovernanceError::Encoding(format!("CBOR write failed: {}", e)))?;
    Ok(buf)
}

/// Reads one CBOR value tree from bytes.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes)
        .map_err(|e| GovernanceError::Decoding(format!("CBOR read failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_constructor_uses_tag_121() {
        let cbor = PlutusData::unit(0).to_cbor().unwrap();
        // d8 79 = tag(121), 80 = empty array
        assert_eq!(hex::encode(cbor), "d87980");
    }

    #[test]
    fn constructor_index_ranges() {
        for index in [0u64, 6, 7, 127, 128, 500] {
            let data = PlutusData::Constr(index, vec![PlutusData::Int(1)]);
            let decoded = PlutusData::from_cbor(&data.to_cbor().unwrap()).unwrap();
            assert_eq!(decoded, data, "index {}", index);
        }
    }

    #[test]
    fn tag_1280_for_index_seven() {
        let value = PlutusData::unit(7).to_cbor_value().unwrap();
        assert!(matches!(value, Value::Tag(1280, _)));
    }

    #[test]
    fn integer_range_edges_survive() {
        let top = PlutusData::Int(u64::MAX as i128);
        let bottom = PlutusData::Int(-(1i128 << 64));
        let small = PlutusData::Int(-42);
        for data in [top, bottom, small] {
            assert_eq!(PlutusData::from_cbor(&data.to_cbor().unwrap()).unwrap(), data);
        }
    }

    #[test]
    fn integers_beyond_64_bits_use_bignum_tags() {
        let above = PlutusData::Int(u64::MAX as i128 + 5);
        let below = PlutusData::Int(-(1i128 << 64) - 5);
        assert!(matches!(above.to_cbor_value().unwrap(), Value::Tag(2, _)));
        assert!(matches!(below.to_cbor_value().unwrap(), Value::Tag(3, _)));
        for data in [above, below, PlutusData::Int(i128::MAX), PlutusData::Int(i128::MIN)] {
            assert_eq!(PlutusData::from_cbor(&data.to_cbor().unwrap()).unwrap(), data);
        }
    }

    #[test]
    fn explicit_bignum_tag_decodes() {
        let value = Value::Tag(2, Box::new(Value::Bytes(vec![0x01, 0x00])));
        assert_eq!(PlutusData::from_cbor_value(&value).unwrap(), PlutusData::Int(256));
        let value = Value::Tag(3, Box::new(Value::Bytes(vec![0x00])));
        assert_eq!(PlutusData::from_cbor_value(&value).unwrap(), PlutusData::Int(-1));
    }

    #[test]
    fn oversized_bytes_are_an_encoding_error() {
        let err = PlutusData::Bytes(vec![0; 65]).to_cbor().unwrap_err();
        assert!(matches!(err, GovernanceError::Encoding(_)));
        assert!(PlutusData::Bytes(vec![0; 64]).to_cbor().is_ok());
    }

    #[test]
    fn map_order_is_preserved() {
        let map = PlutusData::Map(vec![
            (PlutusData::Bytes(vec![2]), PlutusData::Int(1)),
            (PlutusData::Bytes(vec![1]), PlutusData::Int(2)),
        ]);
        let decoded = PlutusData::from_hex(&map.to_hex().unwrap()).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn accessor_errors_name_the_field() {
        let err = PlutusData::Int(1).as_bytes("owner_pkh").unwrap_err();
        assert!(err.to_string().contains("owner_pkh"));
        assert!(PlutusData::Int(-1).as_u64("amount").is_err());
    }

    #[test]
    fn text_is_not_structured_data() {
        assert!(PlutusData::from_cbor_value(&Value::Text("nope".into())).is_err());
    }
}
