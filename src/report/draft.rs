use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::media::{detect_mime_type, is_image_mime, DataUri};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeSource {
    #[default]
    Browse,
    Drop,
}

impl IntakeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            IntakeSource::Browse => "browse",
            IntakeSource::Drop => "drop",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageFile {
    pub fn from_upload(
        name: impl Into<String>,
        declared_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Self, String> {
        let mime_type = match declared_type.map(str::trim).filter(|value| !value.is_empty()) {
            Some(declared) => declared.to_ascii_lowercase(),
            None => detect_mime_type(&bytes).unwrap_or_default(),
        };
        if !is_image_mime(&mime_type) {
            return Err(mime_type);
        }
        Ok(ImageFile {
            name: name.into(),
            mime_type,
            bytes: Arc::from(bytes),
        })
    }

    pub fn to_data_uri(&self) -> String {
        DataUri::encode(&self.mime_type, &self.bytes)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub data_uri: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Encodes the image for display and reads its pixel size. Blocking; run it
/// off the async workers.
pub fn render_preview(image: &ImageFile) -> Preview {
    let dimensions = image::ImageReader::new(Cursor::new(&image.bytes[..]))
        .with_guessed_format()
        .ok()
        .and_then(|reader| match reader.into_dimensions() {
            Ok(dimensions) => Some(dimensions),
            Err(err) => {
                debug!("Could not read dimensions of {}: {}", image.name, err);
                None
            }
        });

    Preview {
        data_uri: image.to_data_uri(),
        width: dimensions.map(|(width, _)| width),
        height: dimensions.map(|(_, height)| height),
    }
}
