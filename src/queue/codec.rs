//! Payload codec contract
//!
//! The queue never looks inside a payload. Callers hand it something that can
//! turn itself into bytes on `push` and rebuild itself from bytes on `pop`.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Encoding or decoding failure reported by a [`Marshaler`]
#[derive(Debug, thiserror::Error)]
#[error("codec error: {message}")]
pub struct CodecError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::with_source(err.to_string(), err)
    }
}

/// Caller-supplied payload encoding
///
/// `unmarshal` decodes into an existing value so a consumer loop can reuse
/// one buffer for every message.
pub trait Marshaler {
    fn marshal(&self) -> Result<Vec<u8>, CodecError>;
    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CodecError>;
}

/// Raw bytes, passed through untouched
impl Marshaler for Vec<u8> {
    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.clone())
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.clear();
        self.extend_from_slice(data);
        Ok(())
    }
}

impl Marshaler for String {
    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.as_bytes().to_vec())
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| CodecError::with_source("payload is not valid UTF-8", e))?;
        self.clear();
        self.push_str(text);
        Ok(())
    }
}

/// JSON encoding for any serde type
///
/// ```rust
/// use disruptor::queue::{Json, Marshaler};
///
/// let mut decoded = Json(Vec::<u32>::new());
/// decoded.unmarshal(&Json(vec![1u32, 2, 3]).marshal().unwrap()).unwrap();
/// assert_eq!(decoded.0, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize + DeserializeOwned> Marshaler for Json<T> {
    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.0 = serde_json::from_slice(data)?;
        Ok(())
    }
}

/// Gzip compression around another codec
///
/// `Gzip(Json(value))` serializes then compresses, and reverses both on
/// decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gzip<M>(pub M);

impl<M: Marshaler> Marshaler for Gzip<M> {
    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        let plain = self.0.marshal()?;
        let compress_error =
            |e: std::io::Error| CodecError::with_source("gzip compression failed", e);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).map_err(compress_error)?;
        encoder.finish().map_err(compress_error)
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let mut plain = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut plain)
            .map_err(|e| CodecError::with_source("payload is not valid gzip", e))?;
        self.0.unmarshal(&plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let mut target = String::from("keep");
        let err = target.unmarshal(&[0xff, 0xfe]).unwrap_err();

        assert!(err.to_string().contains("UTF-8"));
        assert_eq!(target, "keep");
    }

    #[test]
    fn test_bytes_replace_previous_content() {
        let mut target = b"previous".to_vec();
        target.unmarshal(b"next").unwrap();

        assert_eq!(target, b"next");
    }

    #[test]
    fn test_json_decode_error_surfaces() {
        let mut target: Json<Vec<u32>> = Json::default();

        assert!(target.unmarshal(b"{not json").is_err());
    }

    #[test]
    fn test_gzip_wraps_inner_encoding() {
        let text = "compressible ".repeat(64);
        let encoded = Gzip(text.clone()).marshal().unwrap();

        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
        assert!(encoded.len() < text.len());

        let mut decoded = Gzip(String::new());
        decoded.unmarshal(&encoded).unwrap();
        assert_eq!(decoded.0, text);
    }

    #[test]
    fn test_gzip_rejects_uncompressed_bytes() {
        let mut target = Gzip(Vec::<u8>::new());
        let err = target.unmarshal(b"plain text").unwrap_err();

        assert!(err.to_string().contains("gzip"));
    }
}
