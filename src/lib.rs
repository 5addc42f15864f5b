// Library exports for the CLI and integration tests
pub mod config;
pub mod download;
pub mod lister;
pub mod reader;
pub mod retry;
pub mod session;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{ClientConfig, Config, ListingConfig, ReadingConfig};
pub use download::{
    DownloadOutcome, MemoryOutcome, OutputFormat, Payload, download_keys, download_keys_to_memory,
    download_prefixes, list_object_keys,
};
pub use lister::{DescriptorStream, Lister};
pub use reader::{Progress, Reader};
pub use retry::RetryConfig;
pub use session::Session;
pub use storage::{InMemoryStorage, ObjectStoreClient, ObjectStream, S3Backend};
pub use types::{
    ByteRange, CompletionStatus, ListPage, ListingQuery, ObjectDescriptor, PageToken,
    ReadRequest, ReadResult, Result, StoreError,
};
