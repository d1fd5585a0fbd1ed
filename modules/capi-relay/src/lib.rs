pub mod client_ip;
pub mod config;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod normalize;
pub mod routes;
pub mod upstream;

pub use normalize::normalize;
pub use routes::{router, AppState};
pub use upstream::{Credentials, UpstreamClient};
