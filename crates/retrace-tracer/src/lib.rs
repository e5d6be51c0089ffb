//! Recording and replaying of state-database operation traces.
//!
//! During recording, a [`RecordingStateDb`] wraps the state DB a
//! transaction executor runs against, compacts every observed call through
//! the shared [`DictionaryContext`], and hands the resulting [`Operation`]
//! to the [`TraceWriter`] over a bounded channel. During replay, a
//! [`TraceIterator`] reads the operations back in order so they can be
//! re-applied to a fresh state DB.

pub mod dictionary;
pub mod dictionary_context;
pub mod index;
pub mod iter;
pub mod operation;
pub mod proxy;
pub mod writer;

pub use dictionary::{
    ContractDictionary, Dictionary, DictionaryError, StorageDictionary, ValueDictionary,
};
pub use dictionary_context::DictionaryContext;
pub use index::{BlockIndex, IndexContext, IndexError, OperationIndex};
pub use iter::{IteratorError, TraceIterator};
pub use operation::{Operation, TraceError};
pub use proxy::RecordingStateDb;
pub use writer::{TraceWriter, WriterError, WriterReport, DEFAULT_QUEUE_CAPACITY, TRACE_FILE};
