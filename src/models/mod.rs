pub mod change_info;
pub mod folder;
pub mod message;
pub mod thread_item;

pub use change_info::{ChangeInfo, ChangeInfoDiff, ChangeState};
pub use folder::{CountKind, FolderRecord, FolderType};
pub use message::{MessageIdHash, MessageInfo, MessagePart, MessageRecord};
pub use thread_item::ThreadItem;
