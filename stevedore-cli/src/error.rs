//! CLI error handling with user-facing messages and exit codes.

use std::fmt;
use std::process;

use stevedore::error::JobError;

/// CLI-level errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration could not be loaded
    Config(String),
    /// A local file could not be read
    FileRead { path: String, error: std::io::Error },
    /// A local file could not be written
    FileWrite { path: String, error: std::io::Error },
    /// The job itself failed
    Job(JobError),
    /// The job was aborted (by a warning veto or a kill)
    Canceled,
}

impl CliError {
    /// Prints the error and exits with an appropriate code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Job(JobError::UnsupportedProtocol(protocol)) => {
                eprintln!();
                eprintln!("No worker is registered for '{protocol}'. Add one to the");
                eprintln!("[workers] section of your configuration, e.g.:");
                eprintln!("  [workers]");
                eprintln!("  {protocol} = /usr/libexec/stevedore/{protocol}-worker");
            }
            CliError::Canceled => process::exit(130),
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(message) => {
                write!(f, "failed to initialize logging: {message}")
            }
            CliError::Config(message) => write!(f, "configuration error: {message}"),
            CliError::FileRead { path, error } => {
                write!(f, "cannot read '{path}': {error}")
            }
            CliError::FileWrite { path, error } => {
                write!(f, "cannot write '{path}': {error}")
            }
            CliError::Job(error) => write!(f, "{error}"),
            CliError::Canceled => write!(f, "operation aborted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::FileRead { error, .. } | CliError::FileWrite { error, .. } => Some(error),
            CliError::Job(error) => Some(error),
            _ => None,
        }
    }
}
