//! Persistence boundary for serialized sessions.
//!
//! The manager calls `open`/`read` once when a session starts and
//! `write`/`close` once when it is written back. The blob is opaque to the
//! handler.

pub mod cache;
pub mod file;
pub mod memory;

pub use cache::CacheSaveHandler;
pub use file::FileSaveHandler;
pub use memory::MemorySaveHandler;

use crate::error::SaveHandlerError;

pub trait SaveHandler: Send {
    fn open(&mut self, save_path: &str, session_name: &str) -> Result<bool, SaveHandlerError>;

    fn close(&mut self) -> Result<bool, SaveHandlerError>;

    /// Serialized session for `id`; an empty string when none exists.
    fn read(&mut self, id: &str) -> Result<String, SaveHandlerError>;

    fn write(&mut self, id: &str, data: &str) -> Result<bool, SaveHandlerError>;

    fn destroy(&mut self, id: &str) -> Result<bool, SaveHandlerError>;

    /// Remove sessions idle for longer than `max_lifetime` seconds.
    fn gc(&mut self, max_lifetime: u64) -> Result<bool, SaveHandlerError>;
}
