mod error;
mod memory;
mod record;
mod sqlite;
mod staging;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStore};
pub use sqlite::{SqliteSnapshot, SqliteStore};
pub use record::{
    CommentKind, CommentRecord, HistoryMetadata, HistoryRecord, NewHistoryEntry, NewTicket,
    ParseEnumError, Priority, TicketFilter, TicketRecord, TicketStatus, TicketType,
};
pub use traits::TicketStore;
