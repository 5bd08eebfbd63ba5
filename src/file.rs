//! User selection: raw input, validation and the owned [`FileHandle`].

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{OUTPUT_SUFFIX, PDF_CONTENT_TYPE};
use crate::error::SessionError;
use crate::objects::{ObjectRegistry, ObjectUrl, ScopedObject};

lazy_static! {
    static ref PDF_SUFFIX: Regex = Regex::new(r"(?i)\.pdf$").expect("valid suffix pattern");
}

/// A file as described by the user's environment.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// Rejects anything that does not report itself as a PDF.
pub fn validate(raw: &RawFile) -> Result<(), SessionError> {
    if raw.content_type == PDF_CONTENT_TYPE {
        Ok(())
    } else {
        Err(SessionError::InvalidFileType {
            name: raw.name.clone(),
            content_type: raw.content_type.clone(),
        })
    }
}

/// `report.pdf` becomes `report-min.pdf`; names without a `.pdf` suffix get
/// the marker appended.
pub fn derive_output_name(name: &str) -> String {
    if PDF_SUFFIX.is_match(name) {
        PDF_SUFFIX.replace(name, OUTPUT_SUFFIX).into_owned()
    } else {
        format!("{}{}", name, OUTPUT_SUFFIX)
    }
}

/// The selected input. Its bytes stay resolvable through [`FileHandle::source_ref`]
/// until the handle is dropped.
#[derive(Debug)]
pub struct FileHandle {
    name: String,
    size: usize,
    source: ScopedObject,
}

impl FileHandle {
    pub(crate) fn open(registry: &ObjectRegistry, raw: RawFile) -> Self {
        let size = raw.bytes.len();
        let source = registry.create_scoped(raw.bytes, &raw.content_type);
        Self {
            name: raw.name,
            size,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn source_ref(&self) -> &ObjectUrl {
        self.source.url()
    }

    pub fn output_name(&self) -> String {
        derive_output_name(&self.name)
    }
}
