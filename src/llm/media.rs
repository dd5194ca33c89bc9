use std::fmt;

use base64::{engine::general_purpose, Engine as _};

const DATA_URI_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUriError {
    #[error("Data URI must start with 'data:'")]
    MissingScheme,
    #[error("Data URI is missing the ',' separating metadata from payload")]
    MissingSeparator,
    #[error("Data URI must declare a MIME type of the form type/subtype")]
    MissingMimeType,
    #[error("Data URI payload must be Base64 encoded (';base64')")]
    NotBase64,
    #[error("Data URI payload is empty")]
    EmptyPayload,
    #[error("Data URI payload is not valid Base64: {0}")]
    InvalidPayload(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataUri")
            .field("mime_type", &self.mime_type)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl DataUri {
    pub fn parse(value: &str) -> Result<Self, DataUriError> {
        let rest = value
            .trim()
            .strip_prefix(DATA_URI_SCHEME)
            .ok_or(DataUriError::MissingScheme)?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or(DataUriError::MissingSeparator)?;

        let mut params = meta.split(';');
        let mime_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        if !is_mime_shaped(&mime_type) {
            return Err(DataUriError::MissingMimeType);
        }
        // Parameters such as `charset=` may precede the base64 marker.
        if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
            return Err(DataUriError::NotBase64);
        }

        let payload = payload.trim();
        if payload.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }
        let data = general_purpose::STANDARD
            .decode(payload)
            .map_err(|err| DataUriError::InvalidPayload(err.to_string()))?;
        if data.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }

        Ok(DataUri { mime_type, data })
    }

    pub fn encode(mime_type: &str, data: &[u8]) -> String {
        format!(
            "{DATA_URI_SCHEME}{}{BASE64_MARKER},{}",
            mime_type,
            general_purpose::STANDARD.encode(data)
        )
    }

    pub fn payload_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.data)
    }
}

fn is_mime_shaped(value: &str) -> bool {
    match value.split_once('/') {
        Some((kind, subtype)) => {
            !kind.is_empty()
                && !subtype.is_empty()
                && !value.chars().any(|ch| ch.is_whitespace())
        }
        None => false,
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.trim().to_ascii_lowercase().starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_png_data_uri() {
        let uri = DataUri::encode("image/png", b"\x89PNG fake");
        let parsed = DataUri::parse(&uri).unwrap();
        assert_eq!(parsed.mime_type, "image/png");
        assert_eq!(parsed.data, b"\x89PNG fake");
    }

    #[test]
    fn accepts_extra_parameters_before_base64_marker() {
        let parsed = DataUri::parse("data:Image/JPEG;name=a.jpg;base64,aGVsbG8=").unwrap();
        assert_eq!(parsed.mime_type, "image/jpeg");
        assert_eq!(parsed.data, b"hello");
    }

    #[test]
    fn rejects_malformed_data_uris() {
        assert_eq!(
            DataUri::parse("image/png;base64,aGVsbG8="),
            Err(DataUriError::MissingScheme)
        );
        assert_eq!(
            DataUri::parse("data:image/png;base64"),
            Err(DataUriError::MissingSeparator)
        );
        assert_eq!(
            DataUri::parse("data:;base64,aGVsbG8="),
            Err(DataUriError::MissingMimeType)
        );
        assert_eq!(
            DataUri::parse("data:image/png,hello"),
            Err(DataUriError::NotBase64)
        );
        assert_eq!(
            DataUri::parse("data:image/png;base64,"),
            Err(DataUriError::EmptyPayload)
        );
        assert!(matches!(
            DataUri::parse("data:image/png;base64,***"),
            Err(DataUriError::InvalidPayload(_))
        ));
    }

    #[test]
    fn sniffs_png_signature() {
        let png = [
            0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
        ];
        assert_eq!(detect_mime_type(&png).as_deref(), Some("image/png"));
        assert!(is_image_mime("IMAGE/gif"));
        assert!(!is_image_mime("application/pdf"));
    }
}
