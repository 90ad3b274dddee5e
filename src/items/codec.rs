//! Serialization and compression stages of the item pipeline.

use crate::error::{ClientError, Result};
use crate::types::SerialFormat;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression algorithm id recorded for zlib.
pub const ZLIB_ALGORITHM: i64 = 1;

/// Envelope written by the schema serializer.
#[derive(Serialize, Deserialize)]
struct SchemaDocument {
    #[serde(rename = "type")]
    type_name: String,
    body: serde_json::Value,
}

/// Serialize `value` to text.
///
/// Returns the text and the format actually used. `Undefined` selects the
/// schema serializer and falls back to binary when the value has no JSON
/// representation (non-string map keys, for instance).
pub fn serialize<T: Serialize + ?Sized>(
    value: &T,
    format: SerialFormat,
    type_name: &str,
) -> Result<(String, SerialFormat)> {
    match format {
        SerialFormat::Binary => serialize_binary(value).map(|t| (t, SerialFormat::Binary)),
        SerialFormat::Json => serde_json::to_string(value)
            .map(|t| (t, SerialFormat::Json))
            .map_err(|e| ClientError::serialization(SerialFormat::Json, e.to_string())),
        SerialFormat::Schema => serialize_schema(value, type_name)
            .map(|t| (t, SerialFormat::Schema))
            .map_err(|e| ClientError::serialization(SerialFormat::Schema, e.to_string())),
        SerialFormat::Undefined => match serialize_schema(value, type_name) {
            Ok(text) => Ok((text, SerialFormat::Schema)),
            Err(e) => {
                tracing::debug!(type_name, error = %e, "schema serializer failed, using binary");
                serialize_binary(value).map(|t| (t, SerialFormat::Binary))
            }
        },
    }
}

fn serialize_schema<T: Serialize + ?Sized>(
    value: &T,
    type_name: &str,
) -> std::result::Result<String, serde_json::Error> {
    let doc = SchemaDocument {
        type_name: type_name.to_string(),
        body: serde_json::to_value(value)?,
    };
    serde_json::to_string(&doc)
}

fn serialize_binary<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = rmp_serde::to_vec_named(value)
        .map_err(|e| ClientError::serialization(SerialFormat::Binary, e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Deserialize text written by [`serialize`].
///
/// `type_name` is the item's recorded data type. Text with an undefined
/// format can only be decoded when a type name is known.
pub fn deserialize<T: DeserializeOwned>(
    text: &str,
    format: SerialFormat,
    type_name: Option<&str>,
) -> Result<T> {
    match format {
        SerialFormat::Binary => {
            let bytes = hex::decode(text.trim())
                .map_err(|e| ClientError::Deserialization(format!("binary text: {}", e)))?;
            Ok(rmp_serde::from_slice(&bytes)?)
        }
        SerialFormat::Json => Ok(serde_json::from_str(text)?),
        SerialFormat::Schema => {
            let doc: SchemaDocument = serde_json::from_str(text)?;
            Ok(serde_json::from_value(doc.body)?)
        }
        SerialFormat::Undefined => {
            // Pre-serialized text: accept either a schema document or bare JSON.
            if type_name.map_or(true, str::is_empty) {
                return Err(ClientError::UnknownDataType(type_name.map(str::to_string)));
            }
            if let Ok(doc) = serde_json::from_str::<SchemaDocument>(text) {
                return Ok(serde_json::from_value(doc.body)?);
            }
            Ok(serde_json::from_str(text)?)
        }
    }
}

/// Compress text into a zlib buffer. A tombstone (no text) compresses to an
/// empty buffer.
pub fn compress(text: Option<&str>) -> Result<Vec<u8>> {
    let text = match text {
        Some(t) => t,
        None => return Ok(Vec::new()),
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Option<String>> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut decoder = ZlibDecoder::new(data);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(Some(text))
}
