//! Session and data-synchronization layer for a video-sharing service.
//!
//! The crate keeps an authenticated session against the service's REST API
//! (renewing the credential transparently when it expires) and a normalized,
//! race-free cache of users, channels, videos, playlists and subscriptions that
//! any number of concurrent callers can read and mutate.
//!
//! ```no_run
//! # async fn demo() -> eyre::Result<()> {
//! use vidshare_client::{ClientConfig, Credentials, VidshareClient, VideoQuery};
//!
//! let client = VidshareClient::connect(ClientConfig::from_env()?).await?;
//! client
//!     .store()
//!     .login(Credentials::email("alice@example.com", "hunter2"))
//!     .await?;
//! let page = client.store().fetch_videos(VideoQuery::default().limit(10)).await?;
//! for video in &page.videos {
//!     println!("{}", video.title.as_deref().unwrap_or("untitled"));
//! }
//! # Ok(())
//! # }
//! ```

use eyre::Context;
use std::sync::Arc;

pub mod config;
mod endpoints;
pub mod error;
pub mod forms;
pub mod lifecycle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod model;
pub mod query;
pub mod session;
pub mod storage;
pub mod store;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ApiError, TransportError};
pub use forms::{
    Credentials, PlaylistDraft, PlaylistEdit, ProfileUpdate, RegisterForm, SortDirection,
    VideoDraft, VideoEdit, VideoQuery,
};
pub use lifecycle::{EntityKind, OperationKind, OperationStatus};
pub use query::{QueryCoordinator, ViewError};
pub use session::{Session, SessionManager, SessionStatus};
pub use storage::{FileStorage, MemoryStorage, ProfileStorage};
pub use store::{CacheState, EntityStore};
pub use transport::{FileUpload, HttpTransport, Transport};

/// Everything a presentation layer needs, wired together.
#[derive(Debug, Clone)]
pub struct VidshareClient {
    store: EntityStore,
    queries: QueryCoordinator,
}

impl VidshareClient {
    /// Builds the HTTP client and restores the session persisted by a previous run, if any.
    pub async fn connect(config: ClientConfig) -> eyre::Result<Self> {
        let transport = HttpTransport::new(&config).context("set up HTTP transport")?;
        let storage: Arc<dyn ProfileStorage> = match &config.state_dir {
            Some(dir) => Arc::new(FileStorage::new(dir)),
            None => Arc::new(MemoryStorage::new()),
        };
        let client = Self::with_parts(Arc::new(transport), storage);
        if let Some(user) = client
            .session()
            .restore()
            .await
            .context("restore persisted session")?
        {
            tracing::info!(username = %user.username, "restored previous session");
        }
        Ok(client)
    }

    pub fn with_parts(transport: Arc<dyn Transport>, storage: Arc<dyn ProfileStorage>) -> Self {
        let session = Arc::new(SessionManager::new(transport, storage));
        let store = EntityStore::new(session);
        let queries = QueryCoordinator::new(store.clone());
        Self { store, queries }
    }

    pub fn session(&self) -> &SessionManager {
        self.store.session()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn queries(&self) -> &QueryCoordinator {
        &self.queries
    }
}
