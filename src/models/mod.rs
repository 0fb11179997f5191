pub mod dead_letter;
pub mod file_request;
pub mod queue_item;

pub use dead_letter::DeadLetterItem;
pub use file_request::FileRequest;
pub use queue_item::QueueItem;
