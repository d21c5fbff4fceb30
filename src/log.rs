use std::{
    fs::{self, OpenOptions},
    io,
    path::Path,
    sync::LazyLock,
};

use env_logger::{Builder, Env, Target};
use regex::Regex;

use crate::{error::LSError, php::call::ProcessOutput};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x1B\x{9B}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]")
        .expect("valid ANSI escape pattern")
});

/// Initialize the `log` backend.
///
/// With a log directory the records go to `<log_dir>/<name>.log`, otherwise
/// to stderr. The filter is read from `RUST_LOG` and defaults to `info`.
pub fn init_logging(name: &str, log_dir: Option<&Path>) -> Result<(), LSError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(log_dir) = log_dir {
        fs::create_dir_all(log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(format!("{name}.log")))?;
        builder.target(Target::Pipe(Box::new(file)));
    } else {
        builder.target(Target::Stderr);
    }
    // A second initialization (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

/// Write test command output to a log file for debugging.
pub fn write_result_log(cache_dir: &Path, file_name: &str, output: &ProcessOutput) -> io::Result<()> {
    let content = format!(
        "exit code: {:?}\nstdout:\n{}\nstderr:\n{}",
        output.exit_code, output.stdout, output.stderr
    );
    fs::create_dir_all(cache_dir)?;
    fs::write(cache_dir.join(file_name), content)
}

/// Clean ANSI escape sequences from text.
#[must_use]
pub fn clean_ansi(input: &str) -> String {
    ANSI_ESCAPE.replace_all(input, "").to_string()
}
