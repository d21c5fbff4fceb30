//! PHPUnit language server - run PHPUnit from the editor and map failed tests
//! back onto the lines that reported them.

use std::{
    fs,
    path::{Path, PathBuf},
};

use lsp_types::{Diagnostic, Range};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub mod config;
pub mod decorate;
pub mod error;
pub mod log;
pub mod php;
pub mod protocol;
pub mod runner;
pub mod workspace;

use crate::error::LSError;

/// If the character value is greater than the line length it defaults back to
/// the line length.
pub const MAX_CHAR_LENGTH: u32 = 10000;

// --- Core Types ---

/// Outcome category of a reported test.
///
/// Only used as a lookup key: into the decoration style table and into the
/// diagnostic severity mapping.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Status {
    Passed,
    Error,
    Failure,
    Warning,
    Risky,
    Incomplete,
    Skipped,
    Failed,
}

/// One defect reported by PHPUnit, addressed to the line that reported it.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct Problem {
    /// Header text of the defect, data-set suffix included.
    pub id: String,
    pub namespace: String,
    pub class: String,
    pub method: String,
    pub status: Status,
    /// File URI of the reporting frame, empty when the trace had none.
    pub uri: String,
    pub range: Range,
    /// Body of the defect exactly as printed, diff and trace included.
    pub message: String,
    /// The other `path:line` frames of the trace, in order of appearance.
    pub files: Vec<String>,
}

/// A concrete command line for the process runner.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Default)]
pub struct Invocation {
    pub command: String,
    pub arguments: Vec<String>,
}

/// Scope of a test run.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunMode {
    All,
    File,
    Directory,
    TestAtCursor,
    Rerun,
}

/// A source document the editor asked to run tests for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub path: PathBuf,
    pub text: String,
}

impl TextDocument {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Read the document from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LSError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Ok(Self::new(path, text))
    }

    /// The document path as passed on the command line.
    #[must_use]
    pub fn file_path(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// The directory containing the document.
    #[must_use]
    pub fn directory(&self) -> String {
        self.path
            .parent()
            .map(|dir| dir.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Diagnostics for a single file.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct FileDiagnostics {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}
