pub mod error;
pub mod models;

pub use error::{Result, StoreError};
pub use models::{
    ByteRange, CompletionStatus, ListPage, ListingQuery, ObjectDescriptor, PageToken,
    ReadRequest, ReadResult,
};
