//! Rust SDK for the Voxline speech transcription API.
//!
//! The crate is organized by transport surface:
//! - `live`: realtime websocket streaming client (connection lifecycle,
//!   keepalive, reconnection, event dispatch).
//! - `batch`: HTTP client for pre-recorded transcription.
//! - `usage`: HTTP client for account usage metrics.
//!
//! # Quick start
//!
//! ```no_run
//! use voxline::live::{EventCategory, LiveOptions};
//! use voxline::{ClientConfig, VoxlineClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VoxlineClient::new(ClientConfig::from_env());
//!
//! let live = client.live(LiveOptions {
//!     model: Some("general".to_string()),
//!     interim_results: Some(true),
//!     ..Default::default()
//! });
//!
//! live.on(EventCategory::Result, |event| {
//!     println!("transcript event: {:?}", event);
//! });
//!
//! live.start().await?;
//! live.send(vec![0u8; 3200]).await?;
//! live.finish().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The crate uses the `log` facade for diagnostics and never installs a
//! logger; the embedding application picks the backend.

/// Pre-recorded transcription client and response types.
pub mod batch;
/// Top-level client facade.
pub mod client;
/// Credential and endpoint configuration.
pub mod config;
/// Realtime streaming client, protocol types, and connection management.
pub mod live;
/// Usage metrics client.
pub mod usage;

pub use client::VoxlineClient;
pub use config::ClientConfig;
