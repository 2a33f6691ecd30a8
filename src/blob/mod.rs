mod store;

pub use store::{BlobError, BlobStore, StagedBlob, is_valid_hash};
