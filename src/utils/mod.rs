pub mod url_validation;
pub use url_validation::{UrlPolicy, UrlValidationError, check_webhook_url, resolve_public_addrs};
