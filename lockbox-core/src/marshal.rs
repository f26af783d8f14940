//! Deterministic marshal codec.
//!
//! Signatures and persisted records are computed over marshaled bytes, so the
//! encoding must be stable: [`to_canonical_bytes`] emits compact JSON with
//! object fields sorted by name at every depth. Re-marshaling a decoded value
//! yields byte-identical output.
//!
//! Persisted entities are wrapped in a self-describing [`Record`] carrying the
//! entity id and a schema version byte.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors produced while marshaling or unmarshaling.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// The value could not be converted to or from its wire form.
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    /// A record declares a schema version this build does not understand.
    #[error("unsupported record version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version byte found in the record.
        found: u8,
        /// Version byte this build emits.
        expected: u8,
    },
}

/// Serializes `value` to canonical bytes: compact JSON, fields sorted by name.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, MarshalError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

/// Deserializes a value previously produced by [`to_canonical_bytes`].
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MarshalError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                // object keys are strings, so this cannot fail
                out.extend_from_slice(
                    serde_json::to_string(key).expect("string key encodes").as_bytes(),
                );
                out.push(b':');
                write_canonical(&map[*key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => {
            out.extend_from_slice(
                serde_json::to_string(other).expect("scalar encodes").as_bytes(),
            );
        }
    }
}

/// Schema version emitted by this build for every persisted record.
pub const RECORD_VERSION: u8 = 1;

/// A self-describing persisted record: entity id, schema version byte, and the
/// entity's field map.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct Record {
    /// Id of the entity this record stores.
    pub id: String,
    /// Schema version of the field map.
    pub version: u8,
    /// The marshaled entity fields.
    pub fields: Value,
}

impl Record {
    /// Wraps an entity into a record under the current schema version.
    pub fn new<T: Serialize>(id: impl Into<String>, entity: &T) -> Result<Self, MarshalError> {
        Ok(Self {
            id: id.into(),
            version: RECORD_VERSION,
            fields: serde_json::to_value(entity)?,
        })
    }

    /// Serializes the record to canonical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MarshalError> {
        to_canonical_bytes(self)
    }

    /// Parses a record from bytes, checking the schema version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MarshalError> {
        let record: Record = serde_json::from_slice(bytes)?;
        if record.version != RECORD_VERSION {
            return Err(MarshalError::UnsupportedVersion {
                found: record.version,
                expected: RECORD_VERSION,
            });
        }
        Ok(record)
    }

    /// Recovers the entity from the field map.
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<T, MarshalError> {
        Ok(serde_json::from_value(self.fields.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        zeta: u32,
        alpha: String,
        nested: Nested,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Nested {
        b: bool,
        a: Vec<u8>,
    }

    fn sample() -> Sample {
        Sample {
            zeta: 7,
            alpha: "x".into(),
            nested: Nested {
                b: true,
                a: vec![1, 2],
            },
        }
    }

    #[test]
    fn fields_are_sorted() {
        let bytes = to_canonical_bytes(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"alpha":"x","nested":{"a":[1,2],"b":true},"zeta":7}"#);
    }

    #[test]
    fn remarshal_is_byte_identical() {
        let bytes = to_canonical_bytes(&sample()).unwrap();
        let decoded: Sample = from_bytes(&bytes).unwrap();
        let again = to_canonical_bytes(&decoded).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn record_roundtrip() {
        let record = Record::new("entity-1", &sample()).unwrap();
        let bytes = record.to_bytes().unwrap();
        let back = Record::from_bytes(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.unpack::<Sample>().unwrap(), sample());
        assert_eq!(back.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn record_rejects_unknown_version() {
        let mut record = Record::new("entity-1", &sample()).unwrap();
        record.version = 9;
        let bytes = record.to_bytes().unwrap();
        assert!(matches!(
            Record::from_bytes(&bytes),
            Err(MarshalError::UnsupportedVersion { found: 9, .. })
        ));
    }
}
