//! Authenticated session: model, persistence and the lifecycle manager.

mod manager;
mod model;
mod store;

pub use manager::SessionManager;
pub use model::{LogoutReason, Session, SessionEvent};
pub use store::{FileSessionStore, MemorySessionStore, STORAGE_KEY};
