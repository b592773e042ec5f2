//! # Engine Builder
//!
//! Fluent configuration for opening an [`Rvm`] engine. The only required
//! setting is the directory; durability policy defaults to syncing the log
//! on every commit.
//!
//! ```ignore
//! let rvm = Rvm::builder()
//!     .directory("./rvm_segments")
//!     .sync_mode(SyncMode::Full)
//!     .open()?;
//! ```

use std::path::{Path, PathBuf};

use eyre::{eyre, Result};

use super::Rvm;

/// Durability policy for the redo log.
///
/// | Mode   | Behavior                                                  |
/// |--------|-----------------------------------------------------------|
/// | `Full` | fsync after every commit frame and checkpoint fold        |
/// | `Off`  | write without fsync; durable only once the OS flushes     |
///
/// `Full` is the default: a commit that returned is durable across power
/// loss. `Off` trades that for speed in tests and bulk loads, keeping only
/// torn-tail atomicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Full,
    Off,
}

/// Builder for configuring and opening an [`Rvm`] engine.
pub struct RvmBuilder {
    directory: Option<PathBuf>,
    sync_mode: SyncMode,
}

impl Default for RvmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RvmBuilder {
    pub fn new() -> Self {
        Self {
            directory: None,
            sync_mode: SyncMode::default(),
        }
    }

    /// Sets the engine directory. Created (mode 0700 on unix) when absent.
    pub fn directory<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.directory = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the durability policy for commits and checkpoints.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Opens the engine: creates the directory when needed, completes any
    /// interrupted truncation, and replays the redo log.
    pub fn open(self) -> Result<Rvm> {
        let directory = self
            .directory
            .ok_or_else(|| eyre!("no directory configured for the engine"))?;
        Rvm::open_with(directory, self.sync_mode)
    }
}
