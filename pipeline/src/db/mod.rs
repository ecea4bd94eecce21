pub mod credentials;
pub mod image_repository;

pub use credentials::{CredentialsError, DbCredentials};
pub use image_repository::ImageRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database query failed")]
    Database(#[from] sqlx::Error),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}
