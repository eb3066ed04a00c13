//! Dataset identity as given by the user and as returned by the registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BeakerstoreError, BeakerstoreResult};

/// Which registry/storage deployment a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Public,
    Internal,
}

impl Scope {
    /// Name used as the top-level cache directory for this scope.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Public => "public",
            Scope::Internal => "internal",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Scope::Public),
            "internal" => Ok(Scope::Internal),
            other => Err(format!("unknown scope '{other}' (expected public or internal)")),
        }
    }
}

/// A user-supplied dataset path, e.g. `ds_abc`, `ds_abc/words.txt` or
/// `author/name/sub/file.txt`, bound to a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    raw: String,
    scope: Scope,
}

impl DatasetRef {
    pub fn new(raw: impl Into<String>, scope: Scope) -> BeakerstoreResult<Self> {
        let raw = raw.into();
        let first = raw.split('/').next().unwrap_or("");
        if first.trim().is_empty() {
            return Err(BeakerstoreError::InvalidPath {
                path: raw,
                reason: "expected a dataset id or author/name at the start".to_string(),
            });
        }
        Ok(Self { raw, scope })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// First segment, read as a dataset id (`ds_abc`).
    pub fn short_id(&self) -> &str {
        self.raw.split('/').next().unwrap_or(&self.raw)
    }

    /// First two segments joined by `/` (`author/name`), if there is a second segment.
    pub fn author_and_name(&self) -> Option<&str> {
        let first = self.short_id().len();
        let rest = self.raw.get(first + 1..)?;
        let second = rest.split('/').next().unwrap_or(rest);
        Some(&self.raw[..first + 1 + second.len()])
    }

    /// Identifier forms to try against the registry, in order.
    pub fn identifier_candidates(&self) -> Vec<&str> {
        let mut out = vec![self.short_id()];
        out.extend(self.author_and_name());
        out
    }

    /// What is left once `identifier` and its separating `/` are consumed.
    /// Empty means the whole dataset.
    pub fn file_suffix(&self, identifier: &str) -> &str {
        debug_assert!(self.raw.starts_with(identifier));
        self.raw.get(identifier.len() + 1..).unwrap_or("")
    }
}

/// Storage coordinates as the registry returns them.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StorageResponse {
    pub address: String,
    pub id: String,
    pub token: String,
}

/// Registry response body; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DatasetResponse {
    pub id: String,
    pub storage: StorageResponse,
}

/// Result of a successful registry lookup. Immutable once built.
///
/// The storage token is a bearer credential: `Debug` redacts it and nothing
/// in this crate logs or persists it.
#[derive(Clone)]
pub struct DatasetMetadata {
    canonical_id: String,
    storage_address: Url,
    storage_id: String,
    storage_token: String,
}

impl DatasetMetadata {
    pub fn new(
        canonical_id: impl Into<String>,
        storage_address: Url,
        storage_id: impl Into<String>,
        storage_token: impl Into<String>,
    ) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            storage_address,
            storage_id: storage_id.into(),
            storage_token: storage_token.into(),
        }
    }

    /// Parse a registry response body.
    pub fn from_json(body: &[u8]) -> BeakerstoreResult<Self> {
        let res: DatasetResponse =
            serde_json::from_slice(body).map_err(|e| BeakerstoreError::InvalidResponse {
                message: format!("registry dataset body: {e}"),
            })?;
        Self::try_from(res)
    }

    pub fn canonical_id(&self) -> &str {
        &self.canonical_id
    }

    pub fn storage_address(&self) -> &Url {
        &self.storage_address
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn storage_token(&self) -> &str {
        &self.storage_token
    }
}

impl TryFrom<DatasetResponse> for DatasetMetadata {
    type Error = BeakerstoreError;

    fn try_from(res: DatasetResponse) -> Result<Self, Self::Error> {
        let address =
            Url::parse(&res.storage.address).map_err(|e| BeakerstoreError::InvalidResponse {
                message: format!("storage address '{}': {e}", res.storage.address),
            })?;
        Ok(Self::new(res.id, address, res.storage.id, res.storage.token))
    }
}

impl fmt::Debug for DatasetMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetMetadata")
            .field("canonical_id", &self.canonical_id)
            .field("storage_address", &self.storage_address.as_str())
            .field("storage_id", &self.storage_id)
            .field("storage_token", &"<redacted>")
            .finish()
    }
}
