//!
//! cmsbridge record engine
//! -----------------------
//! Workspace-transparent reads, writes and search over CMS records. Every operation runs
//! through a [`Session`] bound to the acting user's workspace; callers only ever see live
//! uids or the uids of records that exist solely in their workspace.

pub mod filter;
pub mod mutation;
pub mod relations;
pub mod retrieval;
pub mod search;
mod session;

pub use mutation::{BatchOutcome, FailedRecord, Position, RecordWriter, Translation, WriteAction};
pub use retrieval::{ReadQuery, ReadResult, RecordReader};
pub use search::{RecordSearch, SearchHit, SearchQuery, SearchResult, TermLogic};
pub use session::{Session, VisibleRecord};
