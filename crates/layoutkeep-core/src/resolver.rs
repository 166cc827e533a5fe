//! Document lookup with fallbacks for moved or renamed files.
//!
//! A tab remembers the path it had at capture time. By restore time the file
//! may have moved; [`FileResolver`] tries the exact path first, then the
//! document's stable identifier, then a unique file-name match, and records a
//! [`PathCorrection`] whenever a fallback succeeds so the caller can rewrite
//! the stored snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{Tab, display_name_for};

/// Read access to the set of documents a restore may open.
pub trait DocumentCatalog: Send + Sync {
    /// True when a document exists at exactly this path.
    fn contains(&self, path: &str) -> bool;

    /// Every document path, in a stable order.
    fn documents(&self) -> Vec<String>;

    /// Stable identifier stored in the document's metadata, if any.
    fn stable_id(&self, path: &str) -> Option<String>;
}

/// Shared handle to a catalog.
pub type CatalogHandle = Arc<dyn DocumentCatalog>;

/// How a tab's document was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMethod {
    Path,
    Uid,
    Name,
    Unresolved,
}

/// Outcome of resolving one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub document: Option<String>,
    pub method: ResolveMethod,
}

impl Resolution {
    fn found(document: String, method: ResolveMethod) -> Self {
        Self {
            document: Some(document),
            method,
        }
    }

    fn unresolved() -> Self {
        Self {
            document: None,
            method: ResolveMethod::Unresolved,
        }
    }
}

/// A stored path that now points somewhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathCorrection {
    pub old_path: String,
    pub new_path: String,
    pub new_name: String,
}

/// Resolves tabs against a catalog and accumulates path corrections.
pub struct FileResolver {
    catalog: CatalogHandle,
    corrections: Vec<PathCorrection>,
    corrected: BTreeSet<String>,
}

impl FileResolver {
    #[must_use]
    pub fn new(catalog: CatalogHandle) -> Self {
        Self {
            catalog,
            corrections: Vec::new(),
            corrected: BTreeSet::new(),
        }
    }

    /// Resolve in strict order: exact path, stable identifier, unique name.
    ///
    /// An identifier match is final; a tab whose identifier matches nothing
    /// still falls through to the name step, but a tab whose identifier
    /// matched never reaches it.
    pub fn resolve(&mut self, tab: &Tab) -> Resolution {
        if self.catalog.contains(&tab.path) {
            return Resolution::found(tab.path.clone(), ResolveMethod::Path);
        }

        if let Some(uid) = tab.stable_id.as_deref() {
            let hit = self
                .catalog
                .documents()
                .into_iter()
                .find(|doc| self.catalog.stable_id(doc).as_deref() == Some(uid));
            if let Some(doc) = hit {
                debug!(path = %tab.path, new_path = %doc, "resolved document by stable id");
                self.record(&tab.path, &doc);
                return Resolution::found(doc, ResolveMethod::Uid);
            }
        }

        if let Some(name) = tab.display_name.as_deref() {
            let mut matches = self
                .catalog
                .documents()
                .into_iter()
                .filter(|doc| display_name_for(doc).as_deref() == Some(name));
            if let (Some(doc), None) = (matches.next(), matches.next()) {
                debug!(path = %tab.path, new_path = %doc, "resolved document by name");
                self.record(&tab.path, &doc);
                return Resolution::found(doc, ResolveMethod::Name);
            }
        }

        debug!(path = %tab.path, "document unresolved");
        Resolution::unresolved()
    }

    fn record(&mut self, old_path: &str, new_path: &str) {
        if self.corrected.insert(old_path.to_string()) {
            self.corrections.push(PathCorrection {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
                new_name: display_name_for(new_path).unwrap_or_default(),
            });
        }
    }

    #[must_use]
    pub fn corrections(&self) -> &[PathCorrection] {
        &self.corrections
    }

    pub fn take_corrections(&mut self) -> Vec<PathCorrection> {
        self.corrected.clear();
        std::mem::take(&mut self.corrections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Catalog(BTreeMap<String, Option<String>>);

    impl Catalog {
        fn handle(entries: &[(&str, Option<&str>)]) -> CatalogHandle {
            Arc::new(Self(
                entries
                    .iter()
                    .map(|(p, id)| ((*p).to_string(), id.map(str::to_string)))
                    .collect(),
            ))
        }
    }

    impl DocumentCatalog for Catalog {
        fn contains(&self, path: &str) -> bool {
            self.0.contains_key(path)
        }

        fn documents(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }

        fn stable_id(&self, path: &str) -> Option<String> {
            self.0.get(path).cloned().flatten()
        }
    }

    #[test]
    fn exact_path_wins_without_correction() {
        let mut resolver = FileResolver::new(Catalog::handle(&[("a.md", Some("u1"))]));
        let r = resolver.resolve(&Tab::new("a.md").with_stable_id("other"));
        assert_eq!(r.method, ResolveMethod::Path);
        assert_eq!(r.document.as_deref(), Some("a.md"));
        assert!(resolver.corrections().is_empty());
    }

    #[test]
    fn uid_match_records_correction() {
        let mut resolver = FileResolver::new(Catalog::handle(&[("moved/a.md", Some("u1"))]));
        let r = resolver.resolve(&Tab::new("a.md").with_stable_id("u1"));
        assert_eq!(r.method, ResolveMethod::Uid);
        assert_eq!(
            resolver.corrections(),
            &[PathCorrection {
                old_path: "a.md".to_string(),
                new_path: "moved/a.md".to_string(),
                new_name: "a".to_string(),
            }]
        );
    }

    #[test]
    fn uid_match_takes_precedence_over_name() {
        // "b.md" has the right name, "renamed.md" has the right id.
        let mut resolver = FileResolver::new(Catalog::handle(&[
            ("x/b.md", None),
            ("renamed.md", Some("u-b")),
        ]));
        let tab = Tab::new("b.md")
            .with_stable_id("u-b")
            .with_display_name("b");
        let r = resolver.resolve(&tab);
        assert_eq!(r.method, ResolveMethod::Uid);
        assert_eq!(r.document.as_deref(), Some("renamed.md"));
    }

    #[test]
    fn unique_name_match_resolves() {
        let mut resolver =
            FileResolver::new(Catalog::handle(&[("archive/plan.md", None), ("x.md", None)]));
        let r = resolver.resolve(&Tab::new("plan.md").with_display_name("plan"));
        assert_eq!(r.method, ResolveMethod::Name);
        assert_eq!(r.document.as_deref(), Some("archive/plan.md"));
    }

    #[test]
    fn ambiguous_name_fails() {
        let mut resolver =
            FileResolver::new(Catalog::handle(&[("a/plan.md", None), ("b/plan.md", None)]));
        let r = resolver.resolve(&Tab::new("plan.md").with_display_name("plan"));
        assert_eq!(r, Resolution::unresolved());
        assert!(resolver.corrections().is_empty());
    }

    #[test]
    fn corrections_are_deduplicated_by_old_path() {
        let mut resolver = FileResolver::new(Catalog::handle(&[("new/a.md", Some("u1"))]));
        let tab = Tab::new("a.md").with_stable_id("u1");
        resolver.resolve(&tab);
        resolver.resolve(&tab);
        assert_eq!(resolver.corrections().len(), 1);
        assert_eq!(resolver.take_corrections().len(), 1);
        assert!(resolver.corrections().is_empty());
    }
}
