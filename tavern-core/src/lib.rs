//! State engine for AI-narrated games.
//!
//! This crate provides:
//! - A versioned game-state document and a migrator for every older save shape
//! - A `set/add/push/delete/pull` command interpreter addressed by dotted paths
//! - A validation and repair pipeline for commands written by a language model
//! - Tiered memory (short, implicit mid, mid, long) with AI-driven compaction
//! - A clock-driven world event scheduler
//! - Session orchestration and save persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use tavern_core::{ClaudeCollaborator, EngineConfig, FileStore, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileStore::open("saves").await?;
//!     let mut session = Session::new(ClaudeCollaborator::from_env()?, EngineConfig::default());
//!
//!     let report = session.player_turn("我推开山门", None, &|| false).await?;
//!     println!("{}", report.text);
//!     print!("{}", report.change_log);
//!
//!     session.save(&store, "auto").await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod clock;
pub mod command;
pub mod config;
pub mod document;
pub mod events;
pub mod memory;
pub mod persist;
pub mod session;
pub mod testing;

// Primary public API
pub use ai::{ClaudeCollaborator, Collaborator, CollaboratorError};
pub use clock::ClockTime;
pub use command::{ChangeLog, Command, RawCommand};
pub use config::EngineConfig;
pub use document::{migrate, Document, MigrationReport, Path};
pub use events::{Event, EventScheduler, EventState};
pub use memory::{MemoryEntry, MemoryManager, MemoryTier};
pub use persist::{FileStore, MemoryStore, Store};
pub use session::{Session, SessionError, TurnReport};
pub use testing::{MockCollaborator, TestHarness};
