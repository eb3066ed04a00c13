//! CLI command handlers, one per file.

mod cache_dir;
mod completions;
mod locks;
mod path;

pub use cache_dir::run_cache_dir;
pub use completions::run_completions;
pub use locks::run_locks;
pub use path::run_path;
