//! Tome manifests and page descriptors.
//!
//! A manifest is the single JSON object describing one tome: its identity,
//! completion state and the ordered list of pages written so far. It is
//! persisted after every page so an interrupted build stays discoverable and
//! resumable.

use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    error::{TomeError, TomeResult},
    id::{next_tome_id, now_ms, TomeId},
    layout::{ArtifactKind, TomeLocation},
};

/// Manifest layout version written by this crate.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

const MANIFEST_TYPE: &str = "tome";

/// Content-type tag attached to every page artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub const PARQUET: &'static str = "application/x-parquet";

    pub fn parquet() -> Self {
        Self(Self::PARQUET.to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject anything the page codec cannot handle.
    pub fn ensure_supported(&self) -> TomeResult<()> {
        if self.0 == Self::PARQUET {
            Ok(())
        } else {
            Err(TomeError::UnsupportedFormat {
                detail: format!("content type {}", self.0),
            })
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One physical artifact of a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageArtifact {
    pub key: String,
    pub content_type: ContentType,
}

/// Wall time attributed to producing one page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTimings {
    pub elapsed_ms: u64,
}

/// Aggregate timings across all pages of a tome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTimings {
    pub total_elapsed_ms: u64,
    pub page_count: u32,
}

/// Immutable description of a written page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub number: u32,
    pub rows: PageArtifact,
    pub keyset: PageArtifact,
    pub created_at: u64,
    pub timings: PageTimings,
}

impl PageDescriptor {
    fn new(location: &TomeLocation, number: u32, elapsed_ms: u64) -> Self {
        Self {
            number,
            rows: PageArtifact {
                key: location.page_key(number, ArtifactKind::Rows),
                content_type: ContentType::parquet(),
            },
            keyset: PageArtifact {
                key: location.page_key(number, ArtifactKind::Keyset),
                content_type: ContentType::parquet(),
            },
            created_at: now_ms(),
            timings: PageTimings { elapsed_ms },
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> &PageArtifact {
        match kind {
            ArtifactKind::Rows => &self.rows,
            ArtifactKind::Keyset => &self.keyset,
        }
    }
}

/// Persisted manifest record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestData {
    pub format_version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: TomeId,
    #[serde(default)]
    pub source_id: Option<TomeId>,
    pub tome_name: String,
    pub ds_type: String,
    pub path: String,
    #[serde(default)]
    pub is_header: bool,
    #[serde(default)]
    pub is_copied_header: bool,
    #[serde(default)]
    pub header_tome_name: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub pages: Vec<PageDescriptor>,
    #[serde(default)]
    pub timings: ManifestTimings,
}

impl ManifestData {
    /// Decode a persisted manifest, rejecting layouts this crate does not know.
    pub fn decode(bytes: &[u8]) -> TomeResult<Self> {
        let data: ManifestData = serde_json::from_slice(bytes)?;
        if data.format_version != MANIFEST_FORMAT_VERSION || data.kind != MANIFEST_TYPE {
            return Err(TomeError::UnsupportedFormat {
                detail: format!(
                    "manifest {} version {} of type {}",
                    data.tome_name, data.format_version, data.kind
                ),
            });
        }
        Ok(data)
    }

    pub fn encode(&self) -> TomeResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Arguments for [`TomeManifest::create`].
#[derive(Clone, Debug, Default)]
pub struct ManifestSpec {
    pub is_header: bool,
    pub is_copied_header: bool,
    pub header_tome_name: Option<String>,
    pub source_id: Option<TomeId>,
}

/// In-memory manifest owned by a [`Scribe`](crate::scribe::Scribe) during a build.
#[derive(Debug)]
pub struct TomeManifest {
    location: TomeLocation,
    data: ManifestData,
    page_started: Option<Instant>,
}

impl TomeManifest {
    /// Start a fresh, incomplete manifest with a new id.
    pub fn create(location: TomeLocation, spec: ManifestSpec) -> Self {
        let data = ManifestData {
            format_version: MANIFEST_FORMAT_VERSION,
            kind: MANIFEST_TYPE.to_string(),
            id: next_tome_id(),
            source_id: spec.source_id,
            tome_name: location.tome_name().to_string(),
            ds_type: location.ds_type().to_string(),
            path: location.path(),
            is_header: spec.is_header,
            is_copied_header: spec.is_copied_header || location.is_copied_header(),
            header_tome_name: spec.header_tome_name,
            created_at: now_ms(),
            completed_at: None,
            is_complete: false,
            pages: Vec::new(),
            timings: ManifestTimings::default(),
        };
        Self {
            location,
            data,
            page_started: None,
        }
    }

    pub fn data(&self) -> &ManifestData {
        &self.data
    }

    pub fn location(&self) -> &TomeLocation {
        &self.location
    }

    pub fn id(&self) -> TomeId {
        self.data.id
    }

    pub fn page_count(&self) -> u32 {
        self.data.pages.len() as u32
    }

    /// Mark the beginning of the next page for timing purposes.
    pub fn start_page(&mut self) {
        self.page_started = Some(Instant::now());
    }

    /// Close the current page and append its descriptor.
    pub fn end_page(&mut self, page_number: u32) -> TomeResult<PageDescriptor> {
        let started = self
            .page_started
            .take()
            .ok_or(TomeError::PageNotStarted { page: page_number })?;
        let expected = self.page_count();
        if page_number != expected {
            self.page_started = Some(started);
            return Err(TomeError::PageOutOfOrder {
                page: page_number,
                expected,
            });
        }
        let elapsed_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        let page = PageDescriptor::new(&self.location, page_number, elapsed_ms);
        self.data.pages.push(page.clone());
        Ok(page)
    }

    /// Mark the tome complete and roll page timings into the manifest total.
    pub fn finish(&mut self) {
        self.data.is_complete = true;
        self.data.completed_at = Some(now_ms());
        self.data.timings = ManifestTimings {
            total_elapsed_ms: self
                .data
                .pages
                .iter()
                .map(|page| page.timings.elapsed_ms)
                .sum(),
            page_count: self.page_count(),
        };
        self.page_started = None;
    }

    /// Adopt a previously persisted manifest so new pages extend the same tome.
    pub fn replace(&mut self, existing: ManifestData) {
        self.data = ManifestData {
            tome_name: self.data.tome_name.clone(),
            ds_type: self.data.ds_type.clone(),
            path: self.data.path.clone(),
            is_complete: false,
            completed_at: None,
            ..existing
        };
    }
}
