//! Parse PHPUnit console output into [`Problem`]s.
//!
//! The defect listing of a PHPUnit run looks like
//!
//! ```text
//! There were 2 failures:
//!
//! 1) Tests\CalculatorTest::test_sum with data set #1 (1, 2, 4)
//! Failed asserting that 3 matches expected 4.
//!
//! /project/tests/CalculatorTest.php:21
//!
//! 2) ...
//! --
//! ```
//!
//! Lines are scanned one at a time: section headers set the status of the
//! blocks that follow, numbered test headers open a block and everything up
//! to the next test header, separator or summary line is that block's body.
//! Numbered lines that do not name a test stay in the body. Bodies keep the
//! carriage returns of CRLF output.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, NumberOrString,
    Position, Range, Url,
};
use regex::Regex;

use crate::{
    FileDiagnostics, MAX_CHAR_LENGTH, Problem, Status, log::clean_ansi, workspace::resolve_path,
};

static NUMBERED_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\) (.+)$").expect("valid header pattern"));
static TEST_IDENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<class>[\w\\]+)::(?P<method>\w+)(?P<data_set> with data set .*)?$")
        .expect("valid test identity pattern")
});
static CLASS_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\\]+$").expect("valid class header pattern"));
static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^There (?:was|were) \d+ (?P<kind>.+):$").expect("valid section pattern")
});
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:--$|FAILURES!|ERRORS!|WARNINGS!|OK \(|OK, but|Tests: \d|No tests executed!)")
        .expect("valid summary pattern")
});
static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>(?:phar://|[A-Za-z]:[\\/])?[^:]*\.(?:php|phpt|inc)):(?P<line>\d+)$")
        .expect("valid frame pattern")
});
static RISKY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"did not perform any assertions|is considered risky|printed unexpected output")
        .expect("valid risky pattern")
});
static INCOMPLETE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bincomplete test\b|has not been implemented yet")
        .expect("valid incomplete pattern")
});
static SKIPPED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bskipped test\b|\btest skipped\b").expect("valid skipped pattern")
});
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\w\\]*\\)?\w*(?:Exception|Error)(?::|$)").expect("valid exception pattern")
});

/// Status of the blocks listed under a `There were N ...:` header.
fn section_status(kind: &str) -> Status {
    let kind = kind.to_lowercase();
    if kind.contains("risky") {
        Status::Risky
    } else if kind.contains("incomplete") {
        Status::Incomplete
    } else if kind.contains("skipped") {
        Status::Skipped
    } else if kind.contains("error") {
        Status::Error
    } else if kind.contains("warning") || kind.contains("deprecation") || kind.contains("notice")
    {
        Status::Warning
    } else {
        Status::Failure
    }
}

/// A `path:line` stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame<'a> {
    path: &'a str,
    line: u32,
    raw: &'a str,
}

impl<'a> Frame<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let raw = line.trim();
        let captures = FRAME.captures(raw)?;
        Some(Frame {
            path: captures.name("path")?.as_str(),
            line: captures.name("line")?.as_str().parse().ok()?,
            raw,
        })
    }

    fn is_vendor(&self) -> bool {
        let path = self.path.replace('\\', "/");
        path.starts_with("phar://") || path.starts_with("vendor/") || path.contains("/vendor/")
    }
}

/// The header of a defect block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header<'a> {
    id: &'a str,
    namespace: &'a str,
    class: &'a str,
    method: &'a str,
}

impl<'a> Header<'a> {
    fn parse(id: &'a str) -> Option<Self> {
        let captures = TEST_IDENTITY.captures(id)?;
        let qualified = captures.name("class")?.as_str();
        let (namespace, class) = qualified.rsplit_once('\\').unwrap_or(("", qualified));
        Some(Header {
            id,
            namespace,
            class,
            method: captures.name("method")?.as_str(),
        })
    }
}

#[derive(Debug)]
struct Block<'a> {
    header: Header<'a>,
    section: Option<Status>,
    body: Vec<&'a str>,
}

#[derive(Debug)]
enum BlockState<'a> {
    Scanning,
    InBlock(Block<'a>),
}

impl<'a> BlockState<'a> {
    fn finish(&mut self, blocks: &mut Vec<Block<'a>>) {
        if let BlockState::InBlock(block) = std::mem::replace(self, BlockState::Scanning) {
            blocks.push(block);
        }
    }
}

/// Split cleaned output into defect blocks, in order of appearance.
fn blocks(output: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut section: Option<Status> = None;
    let mut state = BlockState::Scanning;

    for raw in output.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(captures) = SECTION_HEADER.captures(line) {
            state.finish(&mut blocks);
            section = captures.name("kind").map(|kind| section_status(kind.as_str()));
            continue;
        }
        if SUMMARY.is_match(line) {
            state.finish(&mut blocks);
            section = None;
            continue;
        }
        if let Some(captures) = NUMBERED_HEADER.captures(line) {
            let id = captures.get(1).map_or("", |m| m.as_str()).trim_end();
            if let Some(header) = Header::parse(id) {
                state.finish(&mut blocks);
                state = BlockState::InBlock(Block {
                    header,
                    section,
                    body: Vec::new(),
                });
                continue;
            }
            if CLASS_HEADER.is_match(id) {
                // Class-level defects have no method to report against.
                state.finish(&mut blocks);
                log::debug!("skipping block with class header `{id}`");
                continue;
            }
        }
        if let BlockState::InBlock(block) = &mut state {
            block.body.push(raw);
        }
    }
    state.finish(&mut blocks);
    blocks
}

fn classify(section: Option<Status>, body: &str) -> Status {
    if RISKY_MARKER.is_match(body) {
        return Status::Risky;
    }
    if let Some(status) = section {
        return status;
    }
    if INCOMPLETE_MARKER.is_match(body) {
        Status::Incomplete
    } else if SKIPPED_MARKER.is_match(body) {
        Status::Skipped
    } else if body.lines().next().is_some_and(|line| EXCEPTION_LINE.is_match(line)) {
        Status::Error
    } else {
        Status::Failure
    }
}

/// Range of the statement on a source line: first to last non-blank
/// character, in UTF-16 code units.
#[must_use]
pub fn statement_range(line: u32, text: &str) -> Option<Range> {
    let trimmed = text.trim_end();
    let code = trimmed.trim_start();
    if code.is_empty() {
        return None;
    }
    let end = trimmed.encode_utf16().count() as u32;
    let start = end - code.encode_utf16().count() as u32;
    Some(Range::new(
        Position::new(line, start),
        Position::new(line, end),
    ))
}

/// Character bounds of source lines, looked up by line number.
pub trait SourceLines {
    /// The statement range of the zero-based `line` of `path`.
    fn line_range(&self, path: &Path, line: u32) -> Option<Range>;
}

/// [`SourceLines`] reading files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceFiles;

impl SourceLines for SourceFiles {
    fn line_range(&self, path: &Path, line: u32) -> Option<Range> {
        let source = fs::read_to_string(path).ok()?;
        let text = source.lines().nth(line as usize)?;
        statement_range(line, text)
    }
}

/// Whole-line range used when the source line cannot be read.
fn line_fallback(line: u32) -> Range {
    Range::new(Position::new(line, 0), Position::new(line, MAX_CHAR_LENGTH))
}

/// Turns PHPUnit console output into [`Problem`]s.
pub struct ProblemMatcher {
    root: PathBuf,
    lines: Box<dyn SourceLines>,
}

impl ProblemMatcher {
    /// Matcher resolving relative paths against `root` and reading line
    /// bounds from disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lines: Box::new(SourceFiles),
        }
    }

    #[must_use]
    pub fn with_source_lines(mut self, lines: impl SourceLines + 'static) -> Self {
        self.lines = Box::new(lines);
        self
    }

    /// One problem per recognised defect block, in the order PHPUnit listed
    /// them. Never fails: unrecognised output yields fewer problems.
    #[must_use]
    pub fn parse(&self, output: &str) -> Vec<Problem> {
        let output = clean_ansi(output);
        let problems: Vec<Problem> = blocks(&output)
            .into_iter()
            .map(|block| self.problem(block))
            .collect();
        log::debug!("parsed {} problems", problems.len());
        problems
    }

    fn problem(&self, mut block: Block<'_>) -> Problem {
        while block.body.last().is_some_and(|line| line.trim().is_empty()) {
            block.body.pop();
        }
        let mut message = block.body.join("\n");
        message.truncate(message.trim_end_matches('\r').len());
        let status = classify(block.section, &message);

        let frames: Vec<Frame> = block.body.iter().filter_map(|line| Frame::parse(line)).collect();
        let reporting = frames
            .iter()
            .position(|frame| !frame.is_vendor())
            .or(if frames.is_empty() { None } else { Some(0) });

        let (uri, range) = match reporting.map(|index| &frames[index]) {
            Some(frame) => {
                let path = resolve_path(&self.root, frame.path);
                let line = frame.line.saturating_sub(1);
                let range = self
                    .lines
                    .line_range(&path, line)
                    .unwrap_or_else(|| line_fallback(line));
                let uri = Url::from_file_path(&path)
                    .map_or_else(|()| frame.path.to_string(), |uri| uri.to_string());
                (uri, range)
            }
            None => (String::new(), Range::default()),
        };
        let files = frames
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != reporting)
            .map(|(_, frame)| frame.raw.to_string())
            .collect();

        Problem {
            id: block.header.id.to_string(),
            namespace: block.header.namespace.to_string(),
            class: block.header.class.to_string(),
            method: block.header.method.to_string(),
            status,
            uri,
            range,
            message,
            files,
        }
    }
}

fn severity(status: Status) -> DiagnosticSeverity {
    match status {
        Status::Error | Status::Failure | Status::Failed => DiagnosticSeverity::ERROR,
        Status::Warning | Status::Risky => DiagnosticSeverity::WARNING,
        Status::Incomplete | Status::Skipped => DiagnosticSeverity::INFORMATION,
        Status::Passed => DiagnosticSeverity::HINT,
    }
}

fn related_location(root: &Path, frame: &str) -> Option<DiagnosticRelatedInformation> {
    let frame = Frame::parse(frame)?;
    let uri = Url::from_file_path(resolve_path(root, frame.path)).ok()?;
    let line = frame.line.saturating_sub(1);
    Some(DiagnosticRelatedInformation {
        location: Location {
            uri,
            range: line_fallback(line),
        },
        message: frame.raw.to_string(),
    })
}

impl ProblemMatcher {
    /// The editor diagnostic of a problem. Related frames resolve against the
    /// project root like the reporting frame does.
    #[must_use]
    pub fn diagnostic(&self, problem: &Problem) -> Diagnostic {
        let related: Vec<DiagnosticRelatedInformation> = problem
            .files
            .iter()
            .filter_map(|frame| related_location(&self.root, frame))
            .collect();
        Diagnostic {
            range: problem.range,
            message: format!("{}\n{}", problem.id, problem.message),
            severity: Some(severity(problem.status)),
            source: Some("phpunit".to_string()),
            code: Some(NumberOrString::String(problem.status.to_string())),
            related_information: (!related.is_empty()).then_some(related),
            ..Diagnostic::default()
        }
    }

    /// Group problems into per-file diagnostics, files in order of first
    /// appearance. Problems without a location are left out.
    #[must_use]
    pub fn diagnostics(&self, problems: &[Problem]) -> Vec<FileDiagnostics> {
        let mut order: Vec<&str> = Vec::new();
        let mut by_uri: HashMap<&str, Vec<Diagnostic>> = HashMap::new();
        for problem in problems.iter().filter(|problem| !problem.uri.is_empty()) {
            if !by_uri.contains_key(problem.uri.as_str()) {
                order.push(&problem.uri);
            }
            by_uri
                .entry(&problem.uri)
                .or_default()
                .push(self.diagnostic(problem));
        }
        order
            .into_iter()
            .map(|uri| FileDiagnostics {
                uri: uri.to_string(),
                diagnostics: by_uri.remove(uri).unwrap_or_default(),
            })
            .collect()
    }
}
