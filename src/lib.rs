pub mod config;
pub mod error;
pub mod highlights;
pub mod model;
pub mod store;
pub mod sync;
pub mod watch;

pub use error::unpack_error;

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Modify time of a file in epoch milliseconds, falling back to now when the
/// file system does not report one.
pub fn file_mtime_ms(path: &Path) -> i64 {
    let modified = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or_else(|_| SystemTime::now());
    DateTime::<Utc>::from(modified).timestamp_millis()
}

/// Store key for a path: forward slashes, no leading `./`.
pub fn path_key(path: &Path) -> String {
    let key = path.to_string_lossy().replace('\\', "/");
    key.strip_prefix("./").map(str::to_string).unwrap_or(key)
}
