//! Record (de)serialization injected into a `Collection`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Codec error: {0}")]
pub struct CodecError(pub String);

/// Turns records into storage values and back.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<T, CodecError>;
}

/// Compact JSON, the default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_json_codec_encodes_compact() {
        let mut value = BTreeMap::new();
        value.insert("title".to_string(), "a".to_string());
        let raw = Codec::<BTreeMap<String, String>>::encode(&JsonCodec, &value).unwrap();
        assert_eq!(raw, r#"{"title":"a"}"#);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result = Codec::<BTreeMap<String, String>>::decode(&JsonCodec, "{not json");
        assert!(result.is_err());
    }
}
