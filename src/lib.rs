//! Session containers with expiry and a persisted validator chain.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  SaveHandler   │◀───▶│SessionManager│────▶│ ValidatorChain  │
//! │ (memory/file/  │     │              │     │   (_VALID)      │
//! │    redis)      │     └──────┬───────┘     └─────────────────┘
//! └────────────────┘            │ storage()
//!                               ▼
//!                        ┌──────────────┐     ┌─────────────────┐
//!                        │   Storage    │◀────│    Container    │
//!                        │data+metadata │     │ (EXPIRE, hops)  │
//!                        └──────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sessionkit::{Container, RequestContext, SessionConfig, SessionManager};
//! use sessionkit::save_handler::FileSaveHandler;
//!
//! let manager = SessionManager::new(SessionConfig::from_env()?, Box::new(FileSaveHandler::new()))?;
//! let request = RequestContext::new().with_user_agent("Mozilla/5.0");
//! manager.start(cookie_id.as_deref(), &request)?;
//!
//! let flash = Container::new("Flash", Some(manager.clone()))?;
//! flash.set("notice", "Saved")?;
//! flash.set_expiration_hops(1, None)?;
//!
//! manager.write_close()?;
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod manager;
pub mod save_handler;
pub mod storage;
pub mod validator;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use container::Container;
pub use error::{Result, SaveHandlerError, SessionError, StorageError};
pub use manager::{CookieParams, SessionManager};
pub use save_handler::SaveHandler;
pub use storage::{SharedStorage, Storage};
pub use validator::{RequestContext, ValidationReport, Validator, ValidatorChain, ValidatorRegistry};
