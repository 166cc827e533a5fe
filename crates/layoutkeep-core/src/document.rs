//! Per-document arrangement context and stable identifiers.
//!
//! A document can carry its own arrangement and a durable identifier that
//! survives renames. Every document format goes through
//! [`DocumentContextStore`]; the capture/restore engine never sees the
//! format. [`FrontmatterAdapter`] handles plain-text documents with a YAML
//! front-matter block:
//!
//! ```text
//! ---
//! title: Plan
//! layout-id: 6f1c…
//! layout-arrangement: eyJ2IjoyLC…      (compact wire form)
//! ---
//! body text, preserved byte for byte
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{CodecError, DocumentError};
use crate::snapshot::Snapshot;
use crate::wire;

/// Front-matter key holding the compact arrangement.
pub const ARRANGEMENT_KEY: &str = "layout-arrangement";
/// Front-matter key holding the stable identifier.
pub const STABLE_ID_KEY: &str = "layout-id";

/// Arrangement and identifier storage inside a document.
#[async_trait]
pub trait DocumentContextStore: Send + Sync {
    async fn get_context(&self, path: &str) -> Result<Option<Snapshot>, DocumentError>;

    async fn set_context(&self, path: &str, snapshot: &Snapshot) -> Result<(), DocumentError>;

    async fn has_context(&self, path: &str) -> Result<bool, DocumentError> {
        Ok(self.get_context(path).await?.is_some())
    }

    async fn get_stable_id(&self, path: &str) -> Result<Option<String>, DocumentError>;

    async fn set_stable_id(&self, path: &str, id: &str) -> Result<(), DocumentError>;
}

/// Return the document's stable id, generating and storing a UUID v4 the
/// first time. An existing id is never replaced.
pub async fn ensure_stable_id(
    store: &dyn DocumentContextStore,
    path: &str,
) -> Result<String, DocumentError> {
    if let Some(id) = store.get_stable_id(path).await? {
        if !id.is_empty() {
            return Ok(id);
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    store.set_stable_id(path, &id).await?;
    debug!(path = %path, id = %id, "assigned stable id");
    Ok(id)
}

// =============================================================================
// Front matter
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct FrontMatter {
    fields: Mapping,
    body: String,
}

impl FrontMatter {
    fn parse(path: &str, text: &str) -> Result<Self, DocumentError> {
        let Some(rest) = text
            .strip_prefix("---\n")
            .or_else(|| text.strip_prefix("---\r\n"))
        else {
            return Ok(Self {
                fields: Mapping::new(),
                body: text.to_string(),
            });
        };

        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == "---" {
                let yaml = &rest[..offset];
                let body = rest[offset + line.len()..].to_string();
                let fields = if yaml.trim().is_empty() {
                    Mapping::new()
                } else {
                    match serde_yaml::from_str::<Value>(yaml) {
                        Ok(Value::Mapping(fields)) => fields,
                        Ok(Value::Null) => Mapping::new(),
                        Ok(_) => return Err(malformed(path, "front matter is not a mapping")),
                        Err(e) => return Err(malformed(path, &e.to_string())),
                    }
                };
                return Ok(Self { fields, body });
            }
            offset += line.len();
        }
        Err(malformed(path, "front matter is not terminated"))
    }

    fn render(&self, path: &str) -> Result<String, DocumentError> {
        if self.fields.is_empty() {
            return Ok(self.body.clone());
        }
        let yaml = serde_yaml::to_string(&self.fields).map_err(|e| malformed(path, &e.to_string()))?;
        Ok(format!("---\n{yaml}---\n{}", self.body))
    }

    fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn set_field(&mut self, key: &str, value: String) {
        self.fields
            .insert(Value::String(key.to_string()), Value::String(value));
    }
}

fn malformed(path: &str, reason: &str) -> DocumentError {
    DocumentError::MalformedFrontmatter {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Front-matter adapter over documents below `root`.
#[derive(Debug, Clone)]
pub struct FrontmatterAdapter {
    root: PathBuf,
}

impl FrontmatterAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, path: &str) -> Result<FrontMatter, DocumentError> {
        let full = self.root.join(path);
        let text = match tokio::fs::read_to_string(&full).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentError::NotFound(path.to_string()));
            }
            Err(source) => {
                return Err(DocumentError::Io {
                    path: path.to_string(),
                    source,
                });
            }
        };
        FrontMatter::parse(path, &text)
    }

    async fn write(&self, path: &str, doc: &FrontMatter) -> Result<(), DocumentError> {
        let text = doc.render(path)?;
        tokio::fs::write(self.root.join(path), text)
            .await
            .map_err(|source| DocumentError::Io {
                path: path.to_string(),
                source,
            })
    }

    /// Front-matter fields other than the arrangement, as YAML text.
    pub async fn describe(&self, path: &str) -> Result<String, DocumentError> {
        let mut doc = self.read(path).await?;
        doc.fields.remove(ARRANGEMENT_KEY);
        serde_yaml::to_string(&doc.fields).map_err(|e| malformed(path, &e.to_string()))
    }
}

#[async_trait]
impl DocumentContextStore for FrontmatterAdapter {
    async fn get_context(&self, path: &str) -> Result<Option<Snapshot>, DocumentError> {
        let doc = self.read(path).await?;
        match doc.field(ARRANGEMENT_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(encoded)) => {
                wire::decode(encoded)
                    .map(Some)
                    .map_err(|source| DocumentError::Arrangement {
                        path: path.to_string(),
                        source,
                    })
            }
            Some(_) => Err(DocumentError::Arrangement {
                path: path.to_string(),
                source: CodecError::Malformed(format!("{ARRANGEMENT_KEY} is not a string")),
            }),
        }
    }

    async fn set_context(&self, path: &str, snapshot: &Snapshot) -> Result<(), DocumentError> {
        let mut doc = self.read(path).await?;
        doc.set_field(ARRANGEMENT_KEY, wire::encode(snapshot));
        self.write(path, &doc).await?;
        debug!(path = %path, tabs = snapshot.tab_count(), "arrangement embedded in document");
        Ok(())
    }

    async fn get_stable_id(&self, path: &str) -> Result<Option<String>, DocumentError> {
        let doc = self.read(path).await?;
        Ok(match doc.field(STABLE_ID_KEY) {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        })
    }

    async fn set_stable_id(&self, path: &str, id: &str) -> Result<(), DocumentError> {
        let mut doc = self.read(path).await?;
        doc.set_field(STABLE_ID_KEY, id.to_string());
        self.write(path, &doc).await
    }
}
