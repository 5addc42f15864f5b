mod backend;
mod in_memory;
mod s3;

pub use backend::{ObjectStoreClient, ObjectStream};
pub use in_memory::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE, InMemoryStorage};
pub use s3::S3Backend;
