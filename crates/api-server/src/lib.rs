pub mod admin_rest;
pub mod error;
pub mod locale;
pub mod members_rest;
pub mod middleware;
pub mod rest;
pub mod server;
pub mod sessions;

pub use error::{ApiError, ErrorBody};
pub use locale::Locale;
pub use rest::ApiState;
pub use server::{router, ApiServer};
pub use sessions::SessionManager;
