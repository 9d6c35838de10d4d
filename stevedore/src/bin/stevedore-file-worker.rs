//! The `file` protocol worker binary.
//!
//! Speaks the worker wire contract on stdin/stdout; logs go to stderr so
//! the frame stream stays clean.

use tracing_subscriber::EnvFilter;

use stevedore::workers::{serve, FileWorker};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = serve(FileWorker::new()).await {
        tracing::error!(error = %e, "worker stream failed");
        std::process::exit(1);
    }
}
