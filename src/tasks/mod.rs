//! Task subsystem: parsing, storage and scheduling of reminders.

pub mod database;
pub mod memory;
pub mod parser;
pub mod scheduler;
pub mod store;

pub use database::Database;
pub use memory::MemoryStore;
pub use parser::{is_quick_task, parse_task, ValidationError};
pub use scheduler::{Notifier, Scheduler};
pub use store::{StorageError, Task, TaskDraft, TaskStore, DUE_FORMAT};
