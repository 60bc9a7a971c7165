//! CLI error type with per-verb exit codes

use miette::Diagnostic;
use thiserror::Error;

use zarf_packager::PackagerError;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("{message}")]
    #[diagnostic(code(zarf::cli))]
    Command { message: String, code: i32 },
}

impl CliError {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        CliError::Command {
            message: message.into(),
            code,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Command { code, .. } => *code,
        }
    }
}

/// Render the full cause chain, the way the packager promises it: verb,
/// component, operation, then the underlying causes.
pub fn error_chain(err: &PackagerError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    message
}

/// Walk through component wrappers to the root packager error
pub fn root_error(err: &PackagerError) -> &PackagerError {
    match err {
        PackagerError::Component { source, .. } => root_error(source),
        other => other,
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
