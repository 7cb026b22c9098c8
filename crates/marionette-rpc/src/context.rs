//! Process-wide collaborators shared by every connection.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use marionette_core::{ConnectionId, DataManager, FormatRegistry, ManagerFactory, TreeSerializer};

use crate::fetch::ResourceFetcher;

/// Registry of open connections, seen from a session.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Forget a connection. Removing an unknown id is a no-op.
    async fn deregister(&self, id: &ConnectionId);
}

/// Shared context handed to every connection session.
pub struct ServiceContext {
    /// Project lookup and persistence.
    pub data: Arc<dyn DataManager>,
    /// Known model and results formats.
    pub formats: Arc<dyn FormatRegistry>,
    /// Runtime tree rendering.
    pub serializer: Arc<dyn TreeSerializer>,
    /// Builds one manager per connection.
    pub managers: Arc<dyn ManagerFactory>,
    /// URL fetching for scripts, project documents, remote results.
    pub fetcher: Arc<dyn ResourceFetcher>,
    /// Open connections.
    pub connections: Arc<dyn ConnectionDirectory>,
    /// Root of the per-connection archive scratch space.
    pub archive_root: PathBuf,
    /// Version reported by `get_version`.
    pub version: String,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("default_backend", &self.data.is_default())
            .field("archive_root", &self.archive_root)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
