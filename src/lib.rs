//! A local development server that serves an HTML entry file with its sibling
//! assets and reloads connected browsers whenever the directory changes.
//!
//! The moving parts, leaf first:
//!
//! - [`watcher`]: native filesystem events for every directory under the root
//! - [`dispatch`]: filters and debounces changes into reload broadcasts
//! - [`broadcast`]: the registry of connected reload clients
//! - [`endpoint`]: the WebSocket route that enrolls browsers
//! - [`inject`]: middleware that splices the reload script into the entry page
//! - [`server`]: wires it all to an axum router and a listener

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod inject;
pub mod server;
pub mod site;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use server::LiveServer;
pub use site::Site;
