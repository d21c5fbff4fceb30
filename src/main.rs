mod server;

use std::{
    env::current_dir,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use lsp_types::{ExecuteCommandParams, InitializeParams, Position};
use phpunit_lsp::{
    Problem, RunMode, TextDocument,
    config::Config,
    error::LSError,
    log::{clean_ansi, init_logging, write_result_log},
    php::parse::ProblemMatcher,
    protocol,
    runner::{TestRunner, load_last_invocation, save_last_invocation},
    workspace::project_root,
};
use serde::{Deserialize, de::Error};
use serde_json::{Value, json};

use crate::server::PhpunitLS;

#[derive(Parser, Debug)]
#[command(name = "phpunit-lsp", version)]
#[command(about = "Run PHPUnit and map failed tests back onto the lines that reported them")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Configuration file layered over the project's `.phpunit-lsp.toml`
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the language server protocol over stdio (default)
    Serve,
    /// Run PHPUnit once and print the problems it reports
    Run {
        #[arg(value_enum)]
        mode: RunMode,
        /// PHP file the run is scoped to
        path: Option<PathBuf>,
        /// One-based cursor line for `test-at-cursor`
        #[arg(long)]
        line: Option<u32>,
        /// Print the invocation and problems as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse saved PHPUnit output, from stdin when no file is given
    Parse {
        file: Option<PathBuf>,
        /// Directory relative trace paths resolve against
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn extract_textdocument_uri(params: &Value) -> Result<&str, serde_json::Error> {
    params["textDocument"]["uri"]
        .as_str()
        .ok_or(serde_json::Error::custom("`textDocument.uri` is not set"))
}

/// Handle one message. `Ok(true)` once the client asked to exit.
fn dispatch(server: &mut PhpunitLS, message: &Value) -> Result<bool, LSError> {
    let Some(method) = message["method"].as_str() else {
        // Responses to our own requests carry no method.
        return Ok(false);
    };
    let id = message.get("id").cloned();
    let params = &message["params"];

    match method {
        "initialize" => {
            let initialize_params = InitializeParams::deserialize(params)?;
            server.initialize(&id.unwrap_or(Value::Null), initialize_params)?;
        }
        "initialized" | "$/cancelRequest" | "textDocument/didChange" => {}
        "shutdown" => server.shutdown(&id.unwrap_or(Value::Null))?,
        "exit" => return Ok(true),
        "textDocument/didOpen" => {
            let uri = extract_textdocument_uri(params)?;
            let text = params["textDocument"]["text"].as_str().unwrap_or_default();
            server.did_open(uri, text.to_string())?;
        }
        "textDocument/didClose" => server.did_close(extract_textdocument_uri(params)?)?,
        "textDocument/didSave" => server.did_save(extract_textdocument_uri(params)?)?,
        "workspace/executeCommand" => {
            let command_params = ExecuteCommandParams::deserialize(params)?;
            server.execute_command(&id.unwrap_or(Value::Null), command_params)?;
        }
        _ => {
            // https://microsoft.github.io/language-server-protocol/specifications/lsp/3.17/specification/#responseMessage
            if id.is_some() {
                protocol::send_error(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    format!("method not found: {method}"),
                )?;
            }
        }
    }
    Ok(false)
}

fn main_loop(server: &mut PhpunitLS) -> Result<(), LSError> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    loop {
        let message = match protocol::read_message(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e @ (LSError::Json(_) | LSError::StringUtf8(_))) => {
                log::error!("dropping unparsable message: {e}");
                protocol::send_error(None, protocol::PARSE_ERROR, e.to_string())?;
                continue;
            }
            // Only I/O errors end the session; the next frame may still be readable.
            Err(e @ LSError::MalformedHeader(_)) => {
                log::error!("dropping message: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        log::debug!("received {message}");
        match dispatch(server, &message) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                log::error!("failed to handle {}: {e}", message["method"]);
                if let Some(id) = message.get("id") {
                    protocol::send_error(Some(id.clone()), protocol::INTERNAL_ERROR, e.to_string())?;
                }
            }
        }
    }
    log::warn!("stdin closed without an exit notification");
    Ok(())
}

fn serve(config: Config) -> ExitCode {
    if let Err(e) = init_logging("server", Some(&config.log_dir())) {
        eprintln!("phpunit-lsp: failed to initialize logging: {e}");
    }
    let mut server = PhpunitLS::new(config);
    match main_loop(&mut server) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn print_problems(problems: &[Problem]) {
    for problem in problems {
        println!("{} {}", problem.status, problem.id);
        if !problem.uri.is_empty() {
            let path = protocol::uri_to_path(&problem.uri)
                .map_or_else(|_| problem.uri.clone(), |path| path.display().to_string());
            println!("  {path}:{}", problem.range.start.line + 1);
        }
        if let Some(summary) = problem.message.lines().next() {
            println!("  {summary}");
        }
    }
}

fn run_once(
    config: Config,
    mode: RunMode,
    path: Option<&Path>,
    line: Option<u32>,
    json: bool,
) -> Result<ExitCode, LSError> {
    let document = match path {
        Some(path) => Some(TextDocument::open(std::path::absolute(path)?)?),
        None => None,
    };
    if document.is_none()
        && matches!(mode, RunMode::File | RunMode::Directory | RunMode::TestAtCursor)
    {
        return Err(LSError::MissingDocument(mode.to_string()));
    }

    let root = match &document {
        Some(document) => project_root(&document.path),
        None => current_dir()?,
    };
    let config = Config::load(&root)?.overlay(config);
    let cache_dir = config.cache_dir();
    let mut runner = TestRunner::for_project(&root);
    config.apply(&mut runner);
    runner.set_last_invocation(load_last_invocation(&cache_dir));

    let position = line.map(|line| Position::new(line.saturating_sub(1), 0));
    let result = runner.run(mode, document.as_ref(), position);
    if let Some(invocation) = runner.last_invocation() {
        if let Err(e) = save_last_invocation(&cache_dir, invocation) {
            log::warn!("failed to save the last invocation: {e}");
        }
    }
    let run = result?;
    if let Err(e) = write_result_log(&cache_dir, "phpunit.log", &run.output) {
        log::warn!("failed to write the result log: {e}");
    }

    let problems = ProblemMatcher::new(&root).parse(&run.output.stdout);
    if json {
        let report = json!({
            "invocation": run.invocation,
            "exitCode": run.output.exit_code,
            "problems": problems,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", clean_ansi(&run.output.stdout));
        eprint!("{}", clean_ansi(&run.output.stderr));
        print_problems(&problems);
    }

    Ok(run
        .output
        .exit_code
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}

fn parse_saved(file: Option<&Path>, root: Option<PathBuf>, json: bool) -> Result<ExitCode, LSError> {
    let output = match file {
        Some(file) => fs::read_to_string(file)?,
        None => {
            let mut output = String::new();
            io::stdin().read_to_string(&mut output)?;
            output
        }
    };
    let root = match root {
        Some(root) => root,
        None => current_dir()?,
    };
    let problems = ProblemMatcher::new(root).parse(&output);
    if json {
        println!("{}", serde_json::to_string_pretty(&problems)?);
    } else {
        print_problems(&problems);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_cli_logging() {
    if let Err(e) = init_logging("cli", None) {
        eprintln!("phpunit-lsp: failed to initialize logging: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config_file {
        Some(path) => match Config::from_file(path) {
            Ok(file) => file.overlay(cli.config),
            Err(e) => {
                eprintln!("phpunit-lsp: {e}");
                return ExitCode::from(2);
            }
        },
        None => cli.config,
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => return serve(config),
        Command::Run {
            mode,
            path,
            line,
            json,
        } => {
            init_cli_logging();
            run_once(config, mode, path.as_deref(), line, json)
        }
        Command::Parse { file, root, json } => {
            init_cli_logging();
            parse_saved(file.as_deref(), root, json)
        }
    };
    result.unwrap_or_else(|e| {
        eprintln!("phpunit-lsp: {e}");
        ExitCode::from(2)
    })
}
