pub mod result_sink;
pub mod s3_service;

pub use result_sink::{DurableResultSink, PersistError};
pub use s3_service::{S3Service, S3ServiceError};
