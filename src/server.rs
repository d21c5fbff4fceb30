use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    env::current_dir,
    path::{Path, PathBuf},
    str::FromStr,
};

use lsp_types::{
    ExecuteCommandOptions, ExecuteCommandParams, InitializeParams, InitializeResult,
    LogMessageParams, MessageType, Position, PublishDiagnosticsParams, SaveOptions,
    ServerCapabilities, ServerInfo, ShowMessageParams, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions, Url,
    WorkDoneProgressOptions,
};
use phpunit_lsp::{
    Invocation, Problem, RunMode, Status, TextDocument,
    config::Config,
    decorate::{Decorations, StyledRanges, decorate, styled},
    error::LSError,
    log::{clean_ansi, write_result_log},
    php::parse::ProblemMatcher,
    protocol,
    runner::TestRunner,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoEnumIterator;

/// Prefix of the commands offered through `workspace/executeCommand`.
pub const COMMAND_PREFIX: &str = "phpunit.lsp.";

/// Notification carrying the decoration ranges of one file.
pub const DECORATIONS_METHOD: &str = "phpunit/decorations";

/// Command names, one per run mode.
#[must_use]
pub fn command_names() -> Vec<String> {
    RunMode::iter()
        .map(|mode| format!("{COMMAND_PREFIX}{mode}"))
        .collect()
}

/// The run mode of a command name. `phpunit.lsp.run-file` is accepted as an
/// alias of `phpunit.lsp.file`.
pub fn command_mode(command: &str) -> Result<RunMode, LSError> {
    let name = command.strip_prefix(COMMAND_PREFIX).unwrap_or(command);
    let name = name.strip_prefix("run-").unwrap_or(name);
    RunMode::from_str(name).map_err(|_| LSError::UnknownRunMode(command.to_string()))
}

/// Argument of a run command.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunArguments {
    pub uri: Option<String>,
    pub position: Option<Position>,
}

/// Result of a run command.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub invocation: Invocation,
    pub exit_code: Option<i32>,
    pub problems: Vec<Problem>,
}

/// Parameters of the decorations notification: every status with its gutter
/// style and the ranges to draw it on.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DecorationsParams {
    pub uri: String,
    pub decorations: BTreeMap<Status, StyledRanges>,
}

fn is_php(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "php")
}

pub struct PhpunitLS {
    /// Options given on the command line; they win over every other source.
    cli_config: Config,
    config: Config,
    root: PathBuf,
    runner: TestRunner,
    matcher: ProblemMatcher,
    /// Text of open documents, by path.
    documents: HashMap<PathBuf, String>,
    /// URIs that got diagnostics from the previous run.
    published: BTreeSet<String>,
}

impl PhpunitLS {
    pub fn new(cli_config: Config) -> Self {
        let root = current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let mut server = Self {
            config: cli_config.clone(),
            cli_config,
            runner: TestRunner::for_project(&root),
            matcher: ProblemMatcher::new(&root),
            root,
            documents: HashMap::new(),
            published: BTreeSet::new(),
        };
        server.config.apply(&mut server.runner);
        server
    }

    fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
        params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| &folder.uri)
            .or(params.root_uri.as_ref())
            .and_then(|uri| uri.to_file_path().ok())
    }

    /// Layer the configuration sources for `root` and rebuild the runner.
    pub fn configure(&mut self, root: PathBuf, options: Option<&Value>) -> Result<(), LSError> {
        let config = Config::load(&root)?
            .overlay(Config::from_initialization_options(options)?)
            .overlay(self.cli_config.clone());
        log::info!("project root {}, configuration {config:?}", root.display());

        self.runner = TestRunner::for_project(&root);
        config.apply(&mut self.runner);
        self.matcher = ProblemMatcher::new(&root);
        self.config = config;
        self.root = root;
        Ok(())
    }

    pub fn initialize(&mut self, id: &Value, params: InitializeParams) -> Result<(), LSError> {
        let root = Self::workspace_root(&params).unwrap_or_else(|| self.root.clone());
        if let Err(e) = self.configure(root, params.initialization_options.as_ref()) {
            log::error!("configuration failed: {e}");
            self.show_message(MessageType::WARNING, format!("phpunit-lsp: {e}"))?;
        }

        let result = InitializeResult {
            capabilities: Self::build_capabilities(),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        };
        protocol::respond(id, &result)
    }

    fn build_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::NONE),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(false),
                    })),
                    ..TextDocumentSyncOptions::default()
                },
            )),
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: command_names(),
                work_done_progress_options: WorkDoneProgressOptions::default(),
            }),
            ..ServerCapabilities::default()
        }
    }

    /// Opening a PHP file runs it.
    pub fn did_open(&mut self, uri: &str, text: String) -> Result<(), LSError> {
        let path = protocol::uri_to_path(uri)?;
        self.documents.insert(path.clone(), text.clone());
        if !is_php(&path) {
            return Ok(());
        }
        let document = TextDocument::new(path, text);
        match self.run(RunMode::File, Some(&document), None) {
            Ok(_) => Ok(()),
            Err(e) => self.report_failure(&e),
        }
    }

    pub fn did_close(&mut self, uri: &str) -> Result<(), LSError> {
        let path = protocol::uri_to_path(uri)?;
        self.documents.remove(&path);
        Ok(())
    }

    /// Saving a PHP file runs it.
    pub fn did_save(&mut self, uri: &str) -> Result<(), LSError> {
        let path = protocol::uri_to_path(uri)?;
        if !is_php(&path) {
            return Ok(());
        }
        let document = TextDocument::open(&path)?;
        if let Some(text) = self.documents.get_mut(&path) {
            text.clone_from(&document.text);
        }
        match self.run(RunMode::File, Some(&document), None) {
            Ok(_) => Ok(()),
            Err(e) => self.report_failure(&e),
        }
    }

    pub fn execute_command(&mut self, id: &Value, params: ExecuteCommandParams) -> Result<(), LSError> {
        match self.run_command(&params) {
            Ok(report) => protocol::respond(id, &report),
            Err(e) => {
                self.report_failure(&e)?;
                let code = match &e {
                    LSError::UnknownRunMode(_)
                    | LSError::MissingDocument(_)
                    | LSError::InvalidUri(_)
                    | LSError::Json(_) => protocol::INVALID_PARAMS,
                    _ => protocol::INTERNAL_ERROR,
                };
                protocol::send_error(Some(id.clone()), code, e.to_string())
            }
        }
    }

    fn run_command(&mut self, params: &ExecuteCommandParams) -> Result<RunReport, LSError> {
        let mode = command_mode(&params.command)?;
        let arguments: RunArguments = match params.arguments.first() {
            Some(argument) => serde_json::from_value(argument.clone())?,
            None => RunArguments::default(),
        };
        let document = match &arguments.uri {
            Some(uri) => Some(self.document(&protocol::uri_to_path(uri)?)?),
            None => None,
        };
        if document.is_none() && matches!(mode, RunMode::File | RunMode::Directory | RunMode::TestAtCursor) {
            return Err(LSError::MissingDocument(mode.to_string()));
        }
        self.run(mode, document.as_ref(), arguments.position)
    }

    /// Open documents come from memory, everything else from disk.
    fn document(&self, path: &Path) -> Result<TextDocument, LSError> {
        match self.documents.get(path) {
            Some(text) => Ok(TextDocument::new(path, text.clone())),
            None => TextDocument::open(path),
        }
    }

    /// Run, show the output, publish what the output reports.
    fn run(
        &mut self,
        mode: RunMode,
        document: Option<&TextDocument>,
        position: Option<Position>,
    ) -> Result<RunReport, LSError> {
        let run = self.runner.run(mode, document, position)?;
        if let Err(e) = write_result_log(&self.config.cache_dir(), "phpunit.log", &run.output) {
            log::warn!("failed to write the result log: {e}");
        }

        let command = format!("{} {}", run.invocation.command, run.invocation.arguments.join(" "));
        let mut output = clean_ansi(&run.output.stdout);
        if !run.output.stderr.is_empty() {
            output.push_str(&clean_ansi(&run.output.stderr));
        }
        self.log_message(format!("{command}\n\n{output}"))?;

        let problems = self.matcher.parse(&run.output.stdout);
        self.publish(&problems)?;
        Ok(RunReport {
            invocation: run.invocation,
            exit_code: run.output.exit_code,
            problems,
        })
    }

    /// Replace the diagnostics and decorations of the previous run.
    fn publish(&mut self, problems: &[Problem]) -> Result<(), LSError> {
        let files = self.matcher.diagnostics(problems);
        let current: BTreeSet<String> = files.iter().map(|file| file.uri.clone()).collect();

        for stale in self.published.difference(&current) {
            self.send_diagnostics(stale, Vec::new())?;
            self.send_decorations(stale, decorate(std::iter::empty::<&Problem>()))?;
        }
        for file in files {
            let in_file = problems.iter().filter(|problem| problem.uri == file.uri);
            self.send_decorations(&file.uri, decorate(in_file))?;
            self.send_diagnostics(&file.uri, file.diagnostics)?;
        }
        self.published = current;
        Ok(())
    }

    fn send_diagnostics(&self, uri: &str, diagnostics: Vec<lsp_types::Diagnostic>) -> Result<(), LSError> {
        let uri = Url::parse(uri).map_err(|_| LSError::InvalidUri(uri.to_string()))?;
        let params = PublishDiagnosticsParams::new(uri, diagnostics, None);
        protocol::notify("textDocument/publishDiagnostics", &params)
    }

    fn send_decorations(&self, uri: &str, decorations: Decorations) -> Result<(), LSError> {
        let params = DecorationsParams {
            uri: uri.to_string(),
            decorations: styled(decorations),
        };
        protocol::notify(DECORATIONS_METHOD, &params)
    }

    fn log_message(&self, message: String) -> Result<(), LSError> {
        protocol::notify(
            "window/logMessage",
            &LogMessageParams {
                typ: MessageType::LOG,
                message,
            },
        )
    }

    fn show_message(&self, typ: MessageType, message: String) -> Result<(), LSError> {
        protocol::notify("window/showMessage", &ShowMessageParams { typ, message })
    }

    /// Spawn failures are shown as they are; they never become diagnostics.
    fn report_failure(&self, error: &LSError) -> Result<(), LSError> {
        log::error!("run failed: {error}");
        self.log_message(error.to_string())?;
        if matches!(error, LSError::CommandSpawn(_)) {
            self.show_message(MessageType::ERROR, error.to_string())?;
        }
        Ok(())
    }

    pub fn shutdown(&self, id: &Value) -> Result<(), LSError> {
        protocol::respond(id, &Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn every_mode_has_a_command() {
        assert_eq!(
            command_names(),
            vec![
                "phpunit.lsp.all",
                "phpunit.lsp.file",
                "phpunit.lsp.directory",
                "phpunit.lsp.test-at-cursor",
                "phpunit.lsp.rerun",
            ]
        );
        for name in command_names() {
            assert!(command_mode(&name).is_ok(), "{name}");
        }
    }

    #[test]
    fn run_prefixed_commands_are_aliases() {
        assert_eq!(command_mode("phpunit.lsp.run-file").unwrap(), RunMode::File);
        assert_eq!(command_mode("phpunit.lsp.run-all").unwrap(), RunMode::All);
        assert!(matches!(
            command_mode("phpunit.lsp.nearest"),
            Err(LSError::UnknownRunMode(_))
        ));
    }

    #[test]
    fn run_arguments_accept_a_missing_position() {
        let arguments: RunArguments =
            serde_json::from_value(json!({"uri": "file:///p/tests/FooTest.php"})).unwrap();
        assert_eq!(arguments.uri.as_deref(), Some("file:///p/tests/FooTest.php"));
        assert_eq!(arguments.position, None);
    }

    #[test]
    fn configuration_layers_apply_to_the_runner() {
        let project = tempfile::tempdir().unwrap();
        fs::write(
            project.path().join(".phpunit-lsp.toml"),
            "php_binary = \"php8.1\"\nphpunit_binary = \"bin/phpunit\"\n",
        )
        .unwrap();
        let cli = Config {
            php_binary: Some("php8.3".to_string()),
            ..Config::default()
        };
        let mut server = PhpunitLS::new(cli);
        server
            .configure(
                project.path().to_path_buf(),
                Some(&json!({"args": ["--colors=never"]})),
            )
            .unwrap();

        let invocation = server.runner.invocation(RunMode::All, None, None);
        assert_eq!(
            invocation,
            Invocation {
                command: "php8.3".to_string(),
                arguments: vec!["bin/phpunit".to_string(), "--colors=never".to_string()],
            }
        );
    }

    #[test]
    fn open_documents_are_read_from_memory() {
        let mut server = PhpunitLS::new(Config::default());
        // Not a PHP file, so opening it does not start a run.
        server
            .did_open("file:///p/tests/fixtures/output.txt", "unsaved".to_string())
            .unwrap();
        let document = server.document(Path::new("/p/tests/fixtures/output.txt")).unwrap();
        assert_eq!(document.text, "unsaved");
        assert!(server.runner.last_invocation().is_none());

        server.did_close("file:///p/tests/fixtures/output.txt").unwrap();
        assert!(server.document(Path::new("/p/tests/fixtures/output.txt")).is_err());
    }

    #[test]
    fn document_modes_need_a_uri() {
        let mut server = PhpunitLS::new(Config::default());
        let params = ExecuteCommandParams {
            command: "phpunit.lsp.file".to_string(),
            arguments: Vec::new(),
            work_done_progress_params: lsp_types::WorkDoneProgressParams::default(),
        };
        assert!(matches!(
            server.run_command(&params),
            Err(LSError::MissingDocument(_))
        ));
        assert!(server.runner.last_invocation().is_none());
    }
}
