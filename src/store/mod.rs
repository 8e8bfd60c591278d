pub mod note_store;
pub mod schema;
pub mod session_store;

pub use note_store::{NoteStore, SyncStatusSnapshot};
pub use session_store::{SessionStore, SqliteSessionStore};
