pub mod api;
pub mod auth;
pub mod payload;
pub mod runner;
pub mod server;

pub use api::{ApiError, IngestState, TailFormat};
pub use auth::{ApiKey, API_KEY_HEADER};
pub use payload::{IngestPayload, TailRecord};
pub use runner::{build_version, IngestService, ServiceError};
pub use server::{router, serve};
