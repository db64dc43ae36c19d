pub mod app_root;
pub mod format_duration;
pub mod format_memory;
pub mod scratch_folder;

pub use app_root::compute_app_root;
pub use format_duration::format_duration;
pub use format_memory::{format_memory, format_memory_delta};
pub use scratch_folder::create_scratch_folder;
