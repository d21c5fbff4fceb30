pub mod call;
pub mod discover;
pub mod parse;

use lsp_types::Range;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{TextDocument, runner::TestProvider};

/// Kind of a declared test unit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TestKind {
    Class,
    Method,
    /// A test method fed by a data provider.
    DataProvider,
}

/// A test class or test method declared in a PHP file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub kind: TestKind,
    /// Fully qualified name, `Ns\Class` or `Ns\Class::method`.
    pub name: String,
    pub namespace: String,
    pub class: String,
    /// Empty for classes.
    pub method: String,
    pub path: String,
    pub range: Range,
    /// Methods this test depends on, which PHPUnit must run first.
    #[serde(default)]
    pub depends: Vec<String>,
}

impl Test {
    /// Filter pattern matching this method, its dependencies and every data
    /// set of either.
    #[must_use]
    pub fn filter_pattern(&self) -> String {
        let names: Vec<String> = self
            .depends
            .iter()
            .chain(std::iter::once(&self.method))
            .map(|name| regex::escape(name))
            .collect();
        format!("^.*::({})( with data set .*)?$", names.join("|"))
    }

    /// PHPUnit arguments that run exactly this test.
    #[must_use]
    pub fn as_arguments(&self) -> Vec<String> {
        match self.kind {
            TestKind::Class => vec![self.path.clone()],
            TestKind::Method | TestKind::DataProvider => vec![
                self.path.clone(),
                "--filter".to_string(),
                self.filter_pattern(),
            ],
        }
    }
}

/// Finds tests in documents with the tree-sitter PHP grammar.
#[derive(Eq, PartialEq, Hash, Debug, Default, Clone, Copy)]
pub struct TestParser;

impl TestProvider for TestParser {
    fn tests(&self, document: &TextDocument) -> Vec<Test> {
        match discover::discover_source(&document.file_path(), &document.text) {
            Ok(tests) => tests,
            Err(e) => {
                log::warn!("test discovery failed for {}: {e}", document.path.display());
                Vec::new()
            }
        }
    }
}
