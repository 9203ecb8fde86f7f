//! Codec for the `Upload-Metadata` request header.
//!
//! Wire format: comma-separated entries, each a key and a base64 encoding of
//! the value separated by whitespace. An entry whose value is empty may omit
//! the encoded part entirely. Values are opaque byte sequences -- nothing
//! here assumes UTF-8.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;

/// Request header carrying per-upload metadata.
pub const UPLOAD_METADATA_HEADER: &str = "upload-metadata";

/// Reserved key holding the server-resolved client IP. Server-set only.
pub const REMOTE_IP_KEY: &str = "RemoteIP";
/// Reserved key holding the verified token issuer. Server-set only.
pub const ISSUER_KEY: &str = "issuer";
/// Reserved key holding the verified account name. Server-set only.
pub const ACCOUNT_KEY: &str = "account";
/// Key under which clients may present a bearer token.
pub const TOKEN_KEY: &str = "extjwt";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("malformed metadata entry {entry:?}: {reason}")]
    Malformed { entry: String, reason: String },
}

impl MetadataError {
    fn malformed(entry: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            entry: entry.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Per-upload key/value metadata.
///
/// Keys are unique; values are arbitrary bytes. `decode` is the left inverse
/// of `encode` for any metadata, including values that are not valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, Vec<u8>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a metadata header value. An empty or whitespace-only header
    /// yields empty metadata; a malformed entry fails the whole parse rather
    /// than dropping data.
    pub fn decode(header: &str) -> Result<Self, MetadataError> {
        let mut map = BTreeMap::new();
        if header.trim().is_empty() {
            return Ok(Self(map));
        }

        for entry in header.split(',') {
            let entry = entry.trim();
            let mut parts = entry.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or("");
            if key.is_empty() {
                return Err(MetadataError::malformed(entry, "missing key"));
            }

            let value = match parts.next().map(str::trim) {
                None | Some("") => Vec::new(),
                Some(encoded) => STANDARD
                    .decode(encoded)
                    .map_err(|e| MetadataError::malformed(entry, e.to_string()))?,
            };

            if map.insert(key.to_owned(), value).is_some() {
                return Err(MetadataError::malformed(entry, "duplicate key"));
            }
        }

        Ok(Self(map))
    }

    /// Serialize back to the header wire form.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key} {}", STANDARD.encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Value as text, or `None` if absent or not UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.0.insert(key.to_owned(), value);
    }

    pub fn insert_str(&mut self, key: &str, value: &str) {
        self.insert(key, value.as_bytes().to_vec());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_decodes_to_empty_metadata() {
        assert!(Metadata::decode("").unwrap().is_empty());
        assert!(Metadata::decode("   ").unwrap().is_empty());
    }

    #[test]
    fn round_trips_text_values() {
        let mut m = Metadata::new();
        m.insert_str("filename", "report.pdf");
        m.insert_str("filetype", "application/pdf");
        assert_eq!(Metadata::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn round_trips_binary_values() {
        let mut m = Metadata::new();
        // Invalid UTF-8 on purpose.
        m.insert("blob", vec![0x00, 0x9f, 0x92, 0x96, 0xff]);
        m.insert("zeroes", vec![0, 0, 0]);
        assert_eq!(Metadata::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn empty_value_omits_encoding() {
        let mut m = Metadata::new();
        m.insert("is_public", Vec::new());
        assert_eq!(m.encode(), "is_public");
        assert_eq!(Metadata::decode("is_public").unwrap(), m);
    }

    #[test]
    fn decodes_known_wire_form() {
        let m = Metadata::decode("filename aGVsbG8udHh0,is_public").unwrap();
        assert_eq!(m.get_str("filename"), Some("hello.txt"));
        assert_eq!(m.get("is_public"), Some(&[][..]));
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let err = Metadata::decode("filename not!base64").unwrap_err();
        assert!(matches!(err, MetadataError::Malformed { .. }));
    }

    #[test]
    fn missing_key_is_an_error() {
        // Trailing comma produces an entry with no key.
        assert!(Metadata::decode("filename aGVsbG8=,").is_err());
    }

    #[test]
    fn duplicate_key_is_an_error() {
        assert!(Metadata::decode("a aGVsbG8=,a d29ybGQ=").is_err());
    }

    #[test]
    fn non_utf8_value_has_no_str_view() {
        let mut m = Metadata::new();
        m.insert("blob", vec![0xff, 0xfe]);
        assert_eq!(m.get_str("blob"), None);
        assert!(m.get("blob").is_some());
    }
}
