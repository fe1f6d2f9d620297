pub mod file_info;
pub mod progress;
pub mod walker;

pub use file_info::{calculate_hash, get_utc_timestamp};
pub use progress::BulkReport;
pub use walker::FileWalker;
