//! Stevedore — out-of-process protocol worker engine.
//!
//! Remote-file operations (copy, move, get, put, list, …) are executed by
//! per-protocol worker processes. The engine spawns workers on demand,
//! multiplexes their framed stdin/stdout streams, reuses idle workers
//! through a bounded pool, and surfaces each operation as a job with an
//! asynchronous event stream.
//!
//! # Quick start
//!
//! ```ignore
//! use stevedore::config::EngineConfig;
//! use stevedore::engine::Engine;
//!
//! let engine = Engine::new(EngineConfig::load("stevedore.ini".as_ref())?);
//! let handle = engine.copy("ftp://host/file", "file:///tmp/file")?;
//! match handle.wait().await {
//!     stevedore::job::JobOutcome::Finished => println!("done"),
//!     outcome => eprintln!("copy ended: {outcome:?}"),
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod job;
pub mod locator;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod worker;
pub mod workers;

/// Version of the stevedore library and its bundled workers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
