use crate::config::Config;
use crate::lister::Lister;
use crate::reader::Reader;
use crate::storage::{ObjectStoreClient, S3Backend};
use crate::types::Result;
use std::sync::Arc;

/// Owns the store client for the lifetime of a run
///
/// The client is built once and shared read-only by every lister and reader
/// handed out. [`Session::close`] gives up the session's handle; the client
/// itself is released when the last lister, reader or session clone drops.
#[derive(Clone)]
pub struct Session {
    pub client: Arc<dyn ObjectStoreClient>,
    pub config: Config,
}

impl Session {
    pub fn new(client: Arc<dyn ObjectStoreClient>, config: Config) -> Self {
        Self { client, config }
    }

    /// Connect to S3 with the settings in `config.client`
    pub async fn connect(config: Config) -> Result<Self> {
        let backend = S3Backend::new(&config.client).await?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn lister(&self) -> Lister {
        Lister::new(
            Arc::clone(&self.client),
            self.config.listing.clone(),
            self.config.retry.clone(),
        )
    }

    pub fn reader(&self) -> Reader {
        Reader::new(
            Arc::clone(&self.client),
            self.config.reading.clone(),
            self.config.retry.clone(),
        )
    }

    /// Drop this handle on the client and return how many handles remain.
    ///
    /// Zero means the client has been released. Otherwise listers, readers or
    /// session clones still hold it and it goes away with the last of them.
    pub fn close(self) -> usize {
        let remaining = Arc::strong_count(&self.client) - 1;
        if remaining == 0 {
            tracing::debug!("Closing session, releasing the store client");
        } else {
            tracing::debug!(
                "Closing session, {} handles still hold the store client",
                remaining
            );
        }
        remaining
    }
}
