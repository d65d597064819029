// Cursor persistence: remembers the last mention the poller advanced past.
//
// Two backends: a one-line text file (the default) and the SQLite scan_state
// table. Either way the cursor is written synchronously after every mention,
// so a crash re-processes at most the mention that was in flight.

pub mod file;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::platform::PostId;

pub use file::FileCursorStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;

/// Backend-agnostic cursor storage.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted cursor. `None` means unset.
    async fn load(&self) -> Result<Option<PostId>>;

    /// Persist a new cursor value.
    async fn save(&self, cursor: PostId) -> Result<()>;

    /// Record when the last poll cycle ran. Backends without a place to put
    /// it may ignore this.
    async fn record_poll(&self, _at: &str) -> Result<()> {
        Ok(())
    }

    /// When the last poll cycle ran, if recorded.
    async fn last_poll(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
