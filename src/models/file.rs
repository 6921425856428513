//! File attachments that messages can reference.
//!
//! A file may exist as a named placeholder before anything is uploaded.
//! Uploaded bytes are stored as a `data:` URL so the same string can be sent
//! as `file_data` or `image_url.url` without further encoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Id of the placeholder file present in a fresh workspace.
pub const DEFAULT_FILE_ID: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAsset {
    pub id: String,
    pub name: String,
    /// `data:<mime>;base64,<payload>`, or empty before upload.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: u64,
}

impl FileAsset {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: String::new(),
            mime_type: String::new(),
            size_bytes: 0,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Replace the stored payload with `bytes`.
    pub fn set_content(&mut self, bytes: &[u8], mime_type: &str) {
        self.content = encode_data_url(bytes, mime_type);
        self.mime_type = mime_type.to_string();
        self.size_bytes = bytes.len() as u64;
    }
}

/// Encode raw bytes as a base64 `data:` URL.
pub fn encode_data_url(bytes: &[u8], mime_type: &str) -> String {
    let mime = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_content_builds_data_url() {
        let mut file = FileAsset::new("2", "notes.txt");
        assert!(!file.has_content());

        file.set_content(b"hi", "text/plain");
        assert_eq!(file.content, "data:text/plain;base64,aGk=");
        assert_eq!(file.size_bytes, 2);
        assert!(!file.is_image());
    }

    #[test]
    fn test_image_detection() {
        let mut file = FileAsset::new("3", "cat.png");
        file.set_content(&[0x89, 0x50], "image/png");
        assert!(file.is_image());
        assert!(file.content.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_empty_mime_falls_back() {
        assert!(encode_data_url(b"x", "").starts_with("data:application/octet-stream;base64,"));
    }
}
