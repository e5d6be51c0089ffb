pub mod alloc;
pub mod in_memory;
pub mod state_db;

pub use alloc::{AccountAlloc, AllocDivergence, StateAlloc};
pub use in_memory::InMemoryStateDb;
pub use state_db::StateDb;
