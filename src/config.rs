use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::LSError, runner::TestRunner};

/// Project configuration file, looked up in the project root.
pub const CONFIG_FILE_NAME: &str = ".phpunit-lsp.toml";

/// Options recognised by the runner and the server.
///
/// Every field is optional so that sources can be layered: defaults, then the
/// project file, then LSP `initializationOptions`, then command line flags.
/// The project file uses snake_case keys, initialization options camelCase.
#[derive(clap::Args, Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// PHP interpreter; PHPUnit becomes its first argument
    #[arg(long, global = true)]
    #[serde(alias = "phpBinary")]
    pub php_binary: Option<String>,

    /// PHPUnit binary, skips the lookup in the project
    #[arg(long = "phpunit-binary", global = true)]
    #[serde(alias = "phpUnitBinary", alias = "phpunitBinary")]
    pub phpunit_binary: Option<String>,

    /// Extra PHPUnit argument, repeatable; appended to every run
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    pub args: Option<Vec<String>>,

    /// Directory for log files
    #[arg(long, global = true)]
    #[serde(alias = "logDir")]
    pub log_dir: Option<PathBuf>,

    /// Directory for cache files
    #[arg(long, global = true)]
    #[serde(alias = "cacheDir")]
    pub cache_dir: Option<PathBuf>,
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("phpunit-lsp")
}

impl Config {
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| default_cache_root().join("logs"))
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_root)
    }

    /// Parse a TOML configuration file that must exist.
    pub fn from_file(path: &Path) -> Result<Self, LSError> {
        if !path.is_file() {
            return Err(LSError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// The project file of `root`, or the defaults when there is none.
    pub fn load(root: &Path) -> Result<Self, LSError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            log::info!("reading configuration from {}", path.display());
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse LSP `initializationOptions`; `null` means no options.
    pub fn from_initialization_options(options: Option<&Value>) -> Result<Self, LSError> {
        match options {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(options) => Ok(serde_json::from_value(options.clone())?),
        }
    }

    /// Layer `other` on top of `self`: options set in `other` win.
    #[must_use]
    pub fn overlay(self, other: Self) -> Self {
        Self {
            php_binary: other.php_binary.or(self.php_binary),
            phpunit_binary: other.phpunit_binary.or(self.phpunit_binary),
            args: other.args.or(self.args),
            log_dir: other.log_dir.or(self.log_dir),
            cache_dir: other.cache_dir.or(self.cache_dir),
        }
    }

    /// Push the runner options into a runner.
    pub fn apply(&self, runner: &mut TestRunner) {
        if let Some(php_binary) = &self.php_binary {
            runner.set_php_binary(php_binary.clone());
        }
        if let Some(phpunit_binary) = &self.phpunit_binary {
            runner.set_phpunit_binary(phpunit_binary.clone());
        }
        if let Some(args) = &self.args {
            runner.set_args(args.clone());
        }
    }
}
