//! `tvmux` - live-TV and VOD stream resolution across provider adapters
//!
//! # Features
//!
//! - **Adapters**: one trait per provider, with optional live and VOD capabilities
//! - **Fallback**: resolve a channel on the first adapter that has it
//! - **Caching**: per-adapter TTL cache persisted to disk, swept periodically
//! - **Sessions**: lazy login and token refresh, persisted per adapter
//! - **Playlists**: HLS master selection and absolute URI rewriting
//!
//! # Example
//!
//! ```rust,no_run
//! use tvmux::{AppConfig, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::bootstrap(&AppConfig::load()?).await?;
//!     let resolution = engine.resolve("news", None).await?;
//!     println!("{}", resolution.data.stream_url);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod http;
pub mod manifest;
pub mod registry;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use adapter::{
    Adapter, AdapterDescriptor, Capabilities, ChannelEntry, ChannelMap, LiveSource, Session,
    StreamDescriptor, VodListing, VodOptions, VodSource,
};
pub use cache::{CacheEntry, CacheStore};
pub use config::{AdapterConfig, AppConfig};
pub use credentials::{CredentialRecord, CredentialStore};
pub use engine::{Engine, Resolution};
pub use error::{Error, ErrorBody, ErrorKind, Result};
pub use http::UpstreamClient;
pub use manifest::{ManifestRewriter, Playback};
pub use registry::Registry;
pub use session::SessionManager;

/// Version of tvmux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
