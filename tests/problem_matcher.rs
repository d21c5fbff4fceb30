//! Parse a full PHPUnit report against a project on disk.

use std::{fs, path::Path};

use lsp_types::{Position, Range};
use phpunit_lsp::{
    MAX_CHAR_LENGTH, Problem, Status,
    decorate::decorate,
    php::parse::ProblemMatcher,
};
use tempfile::TempDir;

const TEST_FILE: &str = include_str!("fixtures/AssertionsTest.php");
const TEST_RESULT: &str = include_str!("fixtures/test-result.txt");

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests/AssertionsTest.php"), TEST_FILE).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn output(&self) -> String {
        TEST_RESULT.replace("{root}", &self.root().to_string_lossy())
    }

    fn uri(&self, relative: &str) -> String {
        format!("file://{}/{relative}", self.root().to_string_lossy())
    }

    fn matcher(&self) -> ProblemMatcher {
        ProblemMatcher::new(self.root())
    }

    fn parse(&self) -> Vec<Problem> {
        self.matcher().parse(&self.output())
    }
}

fn get_problem<'a>(problems: &'a [Problem], id: &str) -> &'a Problem {
    problems
        .iter()
        .find(|problem| problem.id.contains(id))
        .unwrap_or_else(|| panic!("no problem for {id}"))
}

fn range(line: u32, start: u32, end: u32) -> Range {
    Range::new(Position::new(line, start), Position::new(line, end))
}

#[test]
fn one_problem_per_block_in_report_order() {
    let project = Project::new();
    let ids: Vec<String> = project.parse().into_iter().map(|problem| problem.id).collect();
    assert_eq!(
        ids,
        vec![
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_throws",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_failed",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_isnt_same",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::addition_provider with data set #2 (1, 0, 2)",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_mock",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_risky",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_incomplete",
            "Recca0120\\VSCode\\Tests\\AssertionsTest::test_skipped",
        ]
    );
}

#[test]
fn test_isnt_same() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_isnt_same");

    assert_eq!(problem.namespace, "Recca0120\\VSCode\\Tests");
    assert_eq!(problem.class, "AssertionsTest");
    assert_eq!(problem.method, "test_isnt_same");
    assert_eq!(problem.status, Status::Failure);
    assert_eq!(problem.uri, project.uri("tests/AssertionsTest.php"));
    assert_eq!(problem.range, range(21, 8, 76));
    assert!(problem.files.is_empty());
    assert!(problem.message.contains(
        "Failed asserting that two arrays are identical.
--- Expected
+++ Actual
@@ @@
 Array &0 (
-    'a' => 'b'
-    'c' => 'd'
+    'e' => 'f'
+    0 => 'g'
+    1 => 'h'
 )
"
    ));
}

#[test]
fn addition_provider() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::addition_provider");

    assert_eq!(problem.method, "addition_provider");
    assert_eq!(problem.status, Status::Failure);
    assert_eq!(problem.range, range(34, 8, 48));
    assert!(problem.message.contains("Failed asserting that 1 matches expected 2."));
}

#[test]
fn test_failed() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_failed");

    assert_eq!(problem.status, Status::Failure);
    assert_eq!(problem.range, range(16, 8, 33));
    assert!(problem.message.contains("Failed asserting that false is true."));
}

#[test]
fn test_risky() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_risky");

    assert_eq!(problem.status, Status::Risky);
    assert_eq!(problem.range, range(24, 4, 32));
    assert!(problem.message.contains("This test did not perform any assertions"));
}

#[test]
fn test_incomplete() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_incomplete");

    assert_eq!(problem.status, Status::Incomplete);
    assert_eq!(problem.range, range(48, 8, 77));
    assert!(problem.message.contains("This test has not been implemented yet."));
}

#[test]
fn test_skipped() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_skipped");

    assert_eq!(problem.status, Status::Skipped);
    assert_eq!(problem.range, range(53, 8, 73));
    assert!(problem.message.contains("The MySQLi extension is not available."));
}

#[test]
fn test_throws() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_throws");

    assert_eq!(problem.status, Status::Error);
    assert_eq!(problem.range, range(58, 8, 44));
    assert_eq!(problem.message, format!(
        "RuntimeException: boom\n\n{}/tests/AssertionsTest.php:59",
        project.root().to_string_lossy()
    ));
}

#[test]
fn mockery_failures_point_at_the_raising_vendor_frame() {
    let project = Project::new();
    let problems = project.parse();
    let problem = get_problem(&problems, "AssertionsTest::test_mock");
    let root = project.root().to_string_lossy();

    assert_eq!(problem.status, Status::Failure);
    assert_eq!(
        problem.uri,
        project.uri("vendor/mockery/mockery/library/Mockery/CountValidator/Exact.php")
    );
    // The vendor file is not on disk, so the whole line is covered.
    assert_eq!(problem.range, range(37, 0, MAX_CHAR_LENGTH));
    assert!(problem.message.contains("InvalidCountException"));
    assert_eq!(
        problem.files,
        vec![
            format!("{root}/vendor/mockery/mockery/library/Mockery/Expectation.php:308"),
            format!("{root}/vendor/mockery/mockery/library/Mockery/ExpectationDirector.php:119"),
            format!("{root}/vendor/mockery/mockery/library/Mockery/Container.php:299"),
        ]
    );
}

#[test]
fn parsing_is_deterministic_and_ignores_colors() {
    let project = Project::new();
    let matcher = ProblemMatcher::new(project.root());
    let output = project.output();
    let colored = output
        .replace("ERRORS!", "\x1B[37;41mERRORS!\x1B[0m")
        .replace("There were 4 failures:", "\x1B[1mThere were 4 failures:\x1B[22m");

    let first = matcher.parse(&output);
    assert_eq!(first, matcher.parse(&output));
    assert_eq!(first, matcher.parse(&colored));
}

#[test]
fn problems_feed_diagnostics_and_decorations() {
    let project = Project::new();
    let problems = project.parse();

    let files = project.matcher().diagnostics(&problems);
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].uri, project.uri("tests/AssertionsTest.php"));
    assert_eq!(files[0].diagnostics.len(), 7);

    let decorations = decorate(&problems);
    assert_eq!(decorations[&Status::Failure].len(), 4);
    assert_eq!(decorations[&Status::Error], vec![range(58, 8, 44)]);
    assert!(decorations[&Status::Passed].is_empty());
}
