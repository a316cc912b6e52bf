//! camel-store: a local mail storage engine.
//!
//! This crate owns the parts of a mail client that have nothing to do
//! with any particular network protocol: a per-account database of
//! folders and messages ([`store::db::StoreDb`]), an in-memory summary
//! cache kept in sync with it ([`summary::FolderSummary`]), local folder
//! formats for mbox/MH/maildir ([`adapters`]), an s-expression search
//! compiler and execution engine ([`search`]), and an arena-based
//! threading pass ([`threads`]).

pub mod adapters;
pub mod cancel;
pub mod error;
pub mod folder;
pub mod folder_state;
pub mod models;
pub mod search;
pub mod store;
pub mod summary;
pub mod threads;

pub use cancel::Cancellable;
pub use error::{Result, StoreError};
pub use folder::Folder;
pub use folder_state::{FolderState, PropertyValue};
pub use models::{
    ChangeInfo, ChangeState, CountKind, FolderRecord, FolderType, MessageIdHash, MessageInfo,
    MessagePart, MessageRecord, ThreadItem,
};
pub use search::{CmpKind, Expr, IndexKey, SearchContext, SearchRegistry, StoreSearch, ThreadKind};
pub use store::StoreDb;
pub use summary::FolderSummary;
pub use threads::ThreadTree;
