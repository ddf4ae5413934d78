//! Serde helpers storing binary fields as standard base64 text

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::Result;

/// Encode bytes as standard base64
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.as_bytes())?)
}

/// `#[serde(with = "base64_bytes")]` for `Vec<u8>`
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(de::Error::custom)
    }
}

/// `#[serde(with = "base64_array")]` for `[u8; N]`
pub mod base64_array {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = STANDARD.decode(text.as_bytes()).map_err(de::Error::custom)?;
        let len = raw.len();
        raw.try_into()
            .map_err(|_| de::Error::invalid_length(len, &"fixed-length base64 field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let text = encode(&[0, 1, 2, 250]);
        assert_eq!(decode(&text).unwrap(), vec![0, 1, 2, 250]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not base64!!").is_err());
    }
}
