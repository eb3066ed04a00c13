//! Blob storage client: directory manifests and authenticated file streams.

mod handler;

pub(crate) use handler::fetch_file;
pub use handler::{FetchOutcome, FileHandler};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dataset::DatasetMetadata;
use crate::error::{BeakerstoreError, BeakerstoreResult};
use crate::http;

/// One file listed in a dataset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
}

/// Files making up a directory dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    pub fn from_json(body: &[u8]) -> BeakerstoreResult<Self> {
        serde_json::from_slice(body).map_err(|e| BeakerstoreError::InvalidResponse {
            message: format!("manifest body: {e}"),
        })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// `{storage_address}/datasets/{storage_id}` plus `extra` segments.
fn dataset_url<'a>(
    metadata: &DatasetMetadata,
    extra: impl IntoIterator<Item = &'a str>,
) -> BeakerstoreResult<Url> {
    let mut url = metadata.storage_address().clone();
    url.path_segments_mut()
        .map_err(|_| BeakerstoreError::InvalidResponse {
            message: format!("storage address cannot be a base: {}", metadata.storage_address()),
        })?
        .pop_if_empty()
        .push("datasets")
        .push(metadata.storage_id())
        .extend(extra);
    Ok(url)
}

pub fn manifest_url(metadata: &DatasetMetadata) -> BeakerstoreResult<Url> {
    dataset_url(metadata, ["manifest"])
}

/// File URL; `/` in `file_name` stays a separator, other characters are percent-encoded.
pub fn file_url(metadata: &DatasetMetadata, file_name: &str) -> BeakerstoreResult<Url> {
    dataset_url(metadata, std::iter::once("files").chain(file_name.split('/')))
}

/// Fetch the manifest of a directory dataset.
pub fn fetch_manifest(metadata: &DatasetMetadata) -> BeakerstoreResult<Manifest> {
    let url = manifest_url(metadata)?;
    tracing::debug!(dataset = metadata.canonical_id(), "fetching manifest");
    let res = http::get(&url, Some(metadata.storage_token()))?;
    if !res.is_ok() {
        return Err(BeakerstoreError::Store {
            what: "directory manifest",
            status: res.status,
        });
    }
    Manifest::from_json(&res.body)
}
