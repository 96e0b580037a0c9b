// Library modules
pub mod auth;
pub mod config;
pub mod constants;
pub mod inside;
pub mod net;
pub mod outside;
pub mod pool;
pub mod probe;
pub mod protocol;
pub mod rate_limit;
pub mod splice;

// Re-export commonly used types
pub use auth::AuthToken;
pub use config::{Config, Role};
pub use pool::BridgePool;
