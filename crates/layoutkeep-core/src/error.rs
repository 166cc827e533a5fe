//! Error types for layoutkeep-core

use std::fmt::Write;
use thiserror::Error;

use crate::host::{ContainerId, PaneId, WindowId};
use crate::restore::RestoreStage;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
    /// Optional platform hint (e.g., "macOS", "Linux")
    pub platform: Option<String>,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command without a platform hint
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: None,
        });
        self
    }

    /// Add a command with a platform hint
    #[must_use]
    pub fn platform_command(
        mut self,
        label: impl Into<String>,
        command: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: Some(platform.into()),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let label = cmd.platform.as_ref().map_or_else(
                    || cmd.label.clone(),
                    |platform| format!("{} ({platform})", cmd.label),
                );
                let _ = writeln!(output, "    - {label}: {}", cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for layoutkeep-core
#[derive(Error, Debug)]
pub enum Error {
    /// Layout host adapter errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Arrangement store and backup errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Document context adapter errors
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// A restore aborted part-way. Effects of earlier stages are kept.
    #[error("Restore failed during {stage}: {source}")]
    Restore {
        stage: RestoreStage,
        #[source]
        source: Box<Error>,
    },

    /// A save or restore is already running for this service
    #[error("Another arrangement operation is already in progress")]
    Busy,

    /// No stored arrangement exists for the requested key
    #[error("No saved arrangement for {0}")]
    NoArrangement(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Host(err) => Some(err.remediation()),
            Self::Store(err) => Some(err.remediation()),
            Self::Codec(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Document(err) => Some(err.remediation()),
            Self::Restore { source, .. } => source.remediation(),
            Self::Busy => Some(
                Remediation::new("Wait for the running save or restore to finish, then retry.")
                    .command("List arrangements", "lk store list"),
            ),
            Self::NoArrangement(key) => Some(
                Remediation::new(format!("Save an arrangement for {key} before restoring it."))
                    .command("List arrangements", "lk store list")
                    .alternative("Restore a backup that contains this key."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Show config", "lk config show")
                    .alternative("Verify the data directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
        }
    }

    /// The restore stage this error aborted, if it came from a restore.
    #[must_use]
    pub fn restore_stage(&self) -> Option<RestoreStage> {
        match self {
            Self::Restore { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Errors reported by a layout host adapter
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Window not found: {0}")]
    WindowNotFound(WindowId),

    #[error("Container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("Pane not found: {0}")]
    PaneNotFound(PaneId),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// The host refused or failed an operation
    #[error("Host rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

impl HostError {
    /// Shorthand for [`HostError::Rejected`].
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::WindowNotFound(_) | Self::ContainerNotFound(_) | Self::PaneNotFound(_) => {
                Remediation::new("The layout changed while the operation ran. Retry once it settles.")
                    .command("Inspect arrangement", "lk inspect <file>")
            }
            Self::DocumentNotFound(path) => {
                Remediation::new(format!("Document {path} no longer exists in the vault."))
                    .command("Dry-run restore", "lk simulate <file>")
                    .alternative("Rename the document back or save a fresh arrangement.")
            }
            Self::Rejected { operation, .. } => {
                Remediation::new(format!("The host refused `{operation}`. Retry the restore."))
                    .command("Dry-run restore", "lk simulate <file>")
                    .alternative("Close extra windows before restoring.")
            }
        }
    }
}

/// Arrangement store and backup errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Persistence backend failed for {key}: {reason}")]
    Backend { key: String, reason: String },

    #[error("Stored unit for {key} is corrupt: {details}")]
    Corrupt { key: String, details: String },

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup version ({found}) is newer than supported ({supported})")]
    UnsupportedBackupVersion { found: u32, supported: u32 },

    #[error("No data directory configured and no platform default available")]
    NoDataDir,
}

impl StoreError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Backend { .. } => Remediation::new(
                "Persisting arrangements failed. The key stays dirty and is retried on the next flush.",
            )
            .command("List arrangements", "lk store list")
            .alternative("Ensure the data directory is writable."),
            Self::Corrupt { key, .. } => {
                Remediation::new(format!("Delete or restore the stored unit for {key}."))
                    .command("Delete arrangement", format!("lk store delete {key}"))
                    .command("List backups", "lk backup list")
            }
            Self::BackupNotFound(path) => Remediation::new(format!("No backup file at {path}."))
                .command("List backups", "lk backup list"),
            Self::UnsupportedBackupVersion { .. } => {
                Remediation::new("This backup was written by a newer layoutkeep. Upgrade lk.")
                    .command(
                        "Upgrade lk",
                        "cargo install --git https://github.com/Dicklesworthstone/layoutkeep.git layoutkeep",
                    )
            }
            Self::NoDataDir => Remediation::new("Set store.data_dir in layoutkeep.toml.")
                .command("Show config", "lk config show")
                .platform_command("Set XDG data home", "export XDG_DATA_HOME=~/.local/share", "Linux"),
        }
    }
}

/// Snapshot encoding/decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u64),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),
}

impl CodecError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Base64(_) | Self::Utf8(_) => {
                Remediation::new("The compact arrangement string is truncated or mangled.")
                    .command("Decode", "lk decode <string>")
                    .alternative("Copy the whole value from the document front matter.")
            }
            Self::Json(_) | Self::Malformed(_) => {
                Remediation::new("The arrangement payload does not match the snapshot schema.")
                    .command("Inspect", "lk inspect <file>")
                    .alternative("Restore a previous record from history or a backup.")
            }
            Self::UnsupportedVersion(_) => {
                Remediation::new("This arrangement was written by a newer layoutkeep. Upgrade lk.")
                    .command(
                        "Upgrade lk",
                        "cargo install --git https://github.com/Dicklesworthstone/layoutkeep.git layoutkeep",
                    )
            }
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create {path} or omit --config to use defaults."))
                    .command("Show defaults", "lk config show")
            }
            Self::ReadFailed(path, _) => Remediation::new(format!("Check permissions on {path}."))
                .command("Inspect file", format!("ls -la \"{path}\"")),
            Self::ParseFailed(_) | Self::SerializeFailed(_) => {
                Remediation::new("Fix the TOML syntax in layoutkeep.toml.")
                    .command("Show defaults", "lk config show")
                    .alternative("Delete the file to fall back to defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Adjust the out-of-range value in layoutkeep.toml.")
                    .command("Show defaults", "lk config show")
            }
        }
    }
}

/// Document context adapter errors
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Front matter in {path} is malformed: {reason}")]
    MalformedFrontmatter { path: String, reason: String },

    #[error("Stored arrangement in {path} is unreadable: {source}")]
    Arrangement {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DocumentError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotFound(path) => Remediation::new(format!("Check that {path} exists."))
                .command("Show document context", format!("lk doc show \"{path}\"")),
            Self::MalformedFrontmatter { path, .. } => {
                Remediation::new(format!("Fix the YAML front matter at the top of {path}."))
                    .command("Show document context", format!("lk doc show \"{path}\""))
            }
            Self::Arrangement { path, .. } => {
                Remediation::new(format!("Remove the stale arrangement key from {path}."))
                    .command("Decode", "lk decode <string>")
            }
            Self::Io { path, .. } => Remediation::new(format!("Check permissions on {path}."))
                .command("Inspect file", format!("ls -la \"{path}\"")),
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_error_variants() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let errors = vec![
            Error::Host(HostError::WindowNotFound(WindowId(3))),
            Error::Host(HostError::PaneNotFound(PaneId(9))),
            Error::Host(HostError::DocumentNotFound("a.md".to_string())),
            Error::Host(HostError::rejected("split_from", "boom")),
            Error::Store(StoreError::Backend {
                key: "k".to_string(),
                reason: "disk full".to_string(),
            }),
            Error::Store(StoreError::Corrupt {
                key: "k".to_string(),
                details: "eof".to_string(),
            }),
            Error::Store(StoreError::BackupNotFound("/tmp/x.json".to_string())),
            Error::Store(StoreError::UnsupportedBackupVersion {
                found: 9,
                supported: 1,
            }),
            Error::Store(StoreError::NoDataDir),
            Error::Codec(CodecError::UnsupportedVersion(7)),
            Error::Codec(CodecError::Malformed("no main".to_string())),
            Error::Config(ConfigError::FileNotFound("lk.toml".to_string())),
            Error::Config(ConfigError::ValidationError("bad".to_string())),
            Error::Document(DocumentError::NotFound("a.md".to_string())),
            Error::Busy,
            Error::NoArrangement("doc".to_string()),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
        ];

        for error in errors {
            let remediation = error.remediation().expect("missing remediation");
            assert!(
                !remediation.summary.is_empty(),
                "remediation summary empty for {error:?}"
            );
            assert!(
                !remediation.commands.is_empty(),
                "remediation commands empty for {error:?}"
            );
        }
    }

    #[test]
    fn remediation_builder_chain() {
        let r = Remediation::new("summary")
            .command("Run", "lk store list")
            .platform_command("Export", "export X=1", "Linux")
            .alternative("Try something else");

        assert_eq!(r.summary, "summary");
        assert_eq!(r.commands.len(), 2);
        assert!(r.commands[0].platform.is_none());
        assert_eq!(r.commands[1].platform.as_deref(), Some("Linux"));
        assert_eq!(r.alternatives, vec!["Try something else"]);
    }

    #[test]
    fn render_plain_omits_empty_sections() {
        let output = Remediation::new("Only a summary").render_plain();
        assert!(output.contains("To fix:"));
        assert!(!output.contains("Commands:"));
        assert!(!output.contains("Alternatives:"));
    }

    #[test]
    fn render_plain_includes_platform_hint() {
        let output = Remediation::new("Fix it")
            .platform_command("Set", "export A=1", "Linux")
            .render_plain();
        assert!(output.contains("Set (Linux): export A=1"));
    }

    #[test]
    fn restore_error_reports_stage_and_inner_remediation() {
        let err = Error::Restore {
            stage: RestoreStage::TreeReconstruction,
            source: Box::new(Error::Host(HostError::rejected("open_document", "locked"))),
        };
        assert_eq!(err.restore_stage(), Some(RestoreStage::TreeReconstruction));
        let text = err.to_string();
        assert!(text.contains("tree reconstruction"), "{text}");
        assert!(text.contains("open_document"), "{text}");
        assert!(err.remediation().is_some());
    }

    #[test]
    fn from_host_error() {
        let err: Error = HostError::PaneNotFound(PaneId(4)).into();
        assert!(matches!(err, Error::Host(HostError::PaneNotFound(PaneId(4)))));
    }

    #[test]
    fn format_error_includes_remediation() {
        let text = format_error_with_remediation(&Error::Busy);
        assert!(text.starts_with("Error: Another arrangement operation"));
        assert!(text.contains("To fix:"));
    }
}
