use std::path::Path;

use crate::error::ChatError;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file selected for embedding in the retrieval tab.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        UploadFile {
            file_name,
            content_type,
            data,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, ChatError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(UploadFile::new(name, data))
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type == PDF_CONTENT_TYPE
    }
}

/// Content type derived from the file extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => PDF_CONTENT_TYPE,
        _ => FALLBACK_CONTENT_TYPE,
    }
}
