// Core serving machinery
pub mod archive;
pub mod bandwidth;
pub mod cache;
pub mod roots;
pub mod watcher;

// HTTP surface
pub mod http_server;
pub mod server;

// Supporting modules
pub mod config;
pub mod error;
pub mod mime;
pub mod net;
pub mod state;
pub mod stats;

pub use config::{Cli, Config};
pub use error::ServeError;
pub use roots::Roots;
pub use state::AppState;
