pub mod error;
pub mod provider;
pub mod storage_path;
pub mod token;

pub use error::{ErrorCode, ProxyError};
pub use provider::Provider;
pub use storage_path::{ValidatedPath, validate_storage_path};
pub use token::{CombinedToken, parse_combined_token};
