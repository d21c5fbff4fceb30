//! Test selection and PHPUnit command construction.

use std::{fs, io, path::Path};

use lsp_types::Position;

use crate::{
    Invocation, RunMode, TextDocument,
    error::LSError,
    php::{
        Test, TestKind, TestParser,
        call::{ProcessOutput, ProcessRunner, SystemProcess},
    },
    workspace::{Filesystem, ProjectFiles},
};

/// Places a PHPUnit binary is looked for, in order.
pub const PHPUNIT_CANDIDATES: [&str; 2] = ["vendor/bin/phpunit", "phpunit"];

/// Binary name used when nothing was resolved or configured.
pub const PHPUNIT: &str = "phpunit";

/// File in the cache directory holding the last invocation between CLI runs.
pub const LAST_INVOCATION_FILE: &str = "last-invocation.json";

/// The invocation saved by an earlier process, if any was saved and it still
/// parses.
#[must_use]
pub fn load_last_invocation(cache_dir: &Path) -> Option<Invocation> {
    let content = fs::read_to_string(cache_dir.join(LAST_INVOCATION_FILE)).ok()?;
    match serde_json::from_str(&content) {
        Ok(invocation) => Some(invocation),
        Err(e) => {
            log::warn!("ignoring unreadable {LAST_INVOCATION_FILE}: {e}");
            None
        }
    }
}

pub fn save_last_invocation(cache_dir: &Path, invocation: &Invocation) -> io::Result<()> {
    fs::create_dir_all(cache_dir)?;
    let content = serde_json::to_string_pretty(invocation)?;
    fs::write(cache_dir.join(LAST_INVOCATION_FILE), content)
}

/// Source of the tests declared in a document.
pub trait TestProvider {
    fn tests(&self, document: &TextDocument) -> Vec<Test>;
}

/// Which test to pick from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The smallest method test ending at or after the cursor, else the class.
    Nearest,
    /// The class test.
    Class,
}

type Selector = fn(&[Test], u32) -> Option<&Test>;

fn nearest_method(tests: &[Test], line: u32) -> Option<&Test> {
    tests
        .iter()
        .filter(|test| test.kind != TestKind::Class && test.range.end.line >= line)
        .min_by_key(|test| test.range.end.line)
}

fn first_class(tests: &[Test], _line: u32) -> Option<&Test> {
    tests.iter().find(|test| test.kind == TestKind::Class)
}

const NEAREST: &[Selector] = &[nearest_method as Selector, first_class];
const CLASS: &[Selector] = &[first_class];

/// Pick a test; the selectors of a [`Selection`] are tried in order and the
/// first match wins.
#[must_use]
pub fn select_test(tests: &[Test], selection: Selection, position: Option<Position>) -> Option<&Test> {
    let line = position.map_or(0, |position| position.line);
    let chain = match selection {
        Selection::Nearest => NEAREST,
        Selection::Class => CLASS,
    };
    chain.iter().find_map(|selector| selector(tests, line))
}

/// Mode-specific PHPUnit arguments.
#[must_use]
pub fn build_arguments(mode: RunMode, test: Option<&Test>, document: Option<&TextDocument>) -> Vec<String> {
    match mode {
        RunMode::All => Vec::new(),
        RunMode::File => document.map(TextDocument::file_path).into_iter().collect(),
        RunMode::Directory => document.map(TextDocument::directory).into_iter().collect(),
        RunMode::TestAtCursor | RunMode::Rerun => match test {
            Some(test) => test.as_arguments(),
            None => build_arguments(RunMode::File, None, document),
        },
    }
}

/// A finished PHPUnit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub invocation: Invocation,
    pub output: ProcessOutput,
}

/// Builds PHPUnit invocations for run requests and remembers the last one for
/// reruns.
pub struct TestRunner {
    process: Box<dyn ProcessRunner>,
    files: Box<dyn Filesystem>,
    tests: Box<dyn TestProvider>,
    php_binary: Option<String>,
    phpunit_binary: Option<String>,
    args: Vec<String>,
    last_invocation: Option<Invocation>,
}

impl TestRunner {
    pub fn new(
        process: Box<dyn ProcessRunner>,
        files: Box<dyn Filesystem>,
        tests: Box<dyn TestProvider>,
    ) -> Self {
        Self {
            process,
            files,
            tests,
            php_binary: None,
            phpunit_binary: None,
            args: Vec::new(),
            last_invocation: None,
        }
    }

    /// Runner executing in `root` with binary lookup from `root` and
    /// tree-sitter test discovery.
    pub fn for_project(root: &Path) -> Self {
        Self::new(
            Box::new(SystemProcess::new(Some(root.to_path_buf()))),
            Box::new(ProjectFiles::new(root)),
            Box::new(TestParser),
        )
    }

    pub fn set_php_binary(&mut self, php_binary: impl Into<String>) -> &mut Self {
        self.php_binary = Some(php_binary.into());
        self
    }

    pub fn set_phpunit_binary(&mut self, phpunit_binary: impl Into<String>) -> &mut Self {
        self.phpunit_binary = Some(phpunit_binary.into());
        self
    }

    /// Arguments appended to every run. Non-empty arguments turn off binary
    /// lookup.
    pub fn set_args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn last_invocation(&self) -> Option<&Invocation> {
        self.last_invocation.as_ref()
    }

    /// Seed the rerun state, e.g. with an invocation persisted by an earlier
    /// process.
    pub fn set_last_invocation(&mut self, invocation: Option<Invocation>) -> &mut Self {
        self.last_invocation = invocation;
        self
    }

    /// The PHPUnit binary: configured, or looked up in the project.
    pub fn resolve_binary(&self) -> String {
        if let Some(phpunit) = &self.phpunit_binary {
            return phpunit.clone();
        }
        if !self.args.is_empty() {
            return PHPUNIT.to_string();
        }
        self.files.find_up(&PHPUNIT_CANDIDATES)
    }

    fn build(&self, arguments: Vec<String>) -> Invocation {
        let phpunit = self.resolve_binary();
        let (command, mut prefix) = match &self.php_binary {
            Some(php) => (php.clone(), vec![phpunit]),
            None => (phpunit, Vec::new()),
        };
        prefix.extend(arguments);
        prefix.extend(self.args.iter().cloned());
        Invocation {
            command,
            arguments: prefix,
        }
    }

    /// The invocation a request resolves to, without running it.
    pub fn invocation(
        &self,
        mode: RunMode,
        document: Option<&TextDocument>,
        position: Option<Position>,
    ) -> Invocation {
        if mode == RunMode::Rerun {
            if let Some(last) = &self.last_invocation {
                return last.clone();
            }
        }

        let tests = match (mode, document) {
            (RunMode::TestAtCursor | RunMode::Rerun, Some(document)) => self.tests.tests(document),
            _ => Vec::new(),
        };
        let test = select_test(&tests, Selection::Nearest, position);
        if let Some(test) = test {
            log::debug!("selected {} `{}`", test.kind, test.name);
        }
        self.build(build_arguments(mode, test, document))
    }

    /// Run the tests a request selects and remember the invocation.
    pub fn run(
        &mut self,
        mode: RunMode,
        document: Option<&TextDocument>,
        position: Option<Position>,
    ) -> Result<TestRun, LSError> {
        let invocation = self.invocation(mode, document, position);
        self.execute(invocation)
    }

    /// Run the class test of a document.
    pub fn run_test(&mut self, document: &TextDocument) -> Result<TestRun, LSError> {
        let tests = self.tests.tests(document);
        let test = select_test(&tests, Selection::Class, None);
        let invocation = self.build(build_arguments(RunMode::TestAtCursor, test, Some(document)));
        self.execute(invocation)
    }

    /// Run the test nearest to a position.
    pub fn run_test_nearest(
        &mut self,
        document: &TextDocument,
        position: Option<Position>,
    ) -> Result<TestRun, LSError> {
        self.run(RunMode::TestAtCursor, Some(document), position)
    }

    /// Replay the last invocation, or run the nearest test if nothing ran
    /// yet.
    pub fn rerun_last_test(
        &mut self,
        document: Option<&TextDocument>,
        position: Option<Position>,
    ) -> Result<TestRun, LSError> {
        self.run(RunMode::Rerun, document, position)
    }

    fn execute(&mut self, invocation: Invocation) -> Result<TestRun, LSError> {
        log::info!(
            "running `{} {}`",
            invocation.command,
            invocation.arguments.join(" ")
        );
        self.last_invocation = Some(invocation.clone());
        let output = self.process.run(&invocation)?;
        log::info!("phpunit exited with {:?}", output.exit_code);
        Ok(TestRun { invocation, output })
    }
}
