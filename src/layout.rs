//! Deterministic storage keys for tome artifacts.
//!
//! ```text
//! [prefix/]{ds_type}/{tome_name}/
//! ├── tome.json                 # manifest
//! ├── metadata.json             # optional caller metadata
//! ├── rows_00000.parquet        # page 0 rows
//! ├── keyset_00000.parquet      # page 0 keys
//! └── header/                   # header snapshot the tome was built against
//!     ├── tome.json
//!     └── ...
//! ```

use std::fmt;

const MANIFEST_NAME: &str = "tome.json";
const METADATA_NAME: &str = "metadata.json";
const COPIED_HEADER_DIR: &str = "header";

/// The two physical artifacts written for every page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Rows,
    Keyset,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Rows => write!(f, "rows"),
            ArtifactKind::Keyset => write!(f, "keyset"),
        }
    }
}

/// Where one tome lives inside a [`BlobStore`](crate::store::BlobStore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TomeLocation {
    prefix: Option<String>,
    ds_type: String,
    tome_name: String,
    copied_header: bool,
}

impl TomeLocation {
    pub fn new(ds_type: impl Into<String>, tome_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            ds_type: ds_type.into(),
            tome_name: tome_name.into(),
            copied_header: false,
        }
    }

    /// Nest the collection under `prefix`.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.trim_matches('/').is_empty());
        self
    }

    /// Location of the header snapshot stored alongside this tome.
    pub fn copied_header(&self) -> Self {
        Self {
            copied_header: true,
            ..self.clone()
        }
    }

    pub fn tome_name(&self) -> &str {
        &self.tome_name
    }

    pub fn ds_type(&self) -> &str {
        &self.ds_type
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn is_copied_header(&self) -> bool {
        self.copied_header
    }

    /// Key prefix shared by every artifact of this tome.
    pub fn path(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if let Some(prefix) = &self.prefix {
            parts.push(prefix.trim_matches('/'));
        }
        parts.push(&self.ds_type);
        parts.push(&self.tome_name);
        if self.copied_header {
            parts.push(COPIED_HEADER_DIR);
        }
        parts.join("/")
    }

    pub fn manifest_key(&self) -> String {
        format!("{}/{MANIFEST_NAME}", self.path())
    }

    pub fn metadata_key(&self) -> String {
        format!("{}/{METADATA_NAME}", self.path())
    }

    pub fn page_key(&self, page_number: u32, kind: ArtifactKind) -> String {
        format!("{}/{}", self.path(), page_file_name(page_number, kind))
    }
}

impl fmt::Display for TomeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn page_file_name(page_number: u32, kind: ArtifactKind) -> String {
    format!("{kind}_{page_number:05}.parquet")
}
