//! Wire protocol between the engine and its worker processes.
//!
//! Both sides exchange length-prefixed frames over the worker's
//! stdin/stdout: the engine writes [`Command`] frames, the worker answers
//! with [`WorkerMessage`] frames. Third-party workers only need to honor
//! the same framing contract; the built-in scaffolding in
//! [`crate::workers`] implements the worker side.

mod codec;
mod message;

pub use codec::{decode, encode, WireError, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
pub use message::{Command, DirEntry, EntryKind, WorkerMessage, DATA_CHUNK_SIZE};
