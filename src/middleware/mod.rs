// Middleware modules
pub mod identity;
pub mod logging;

pub use identity::UserIdentity;
pub use logging::logging_middleware;
