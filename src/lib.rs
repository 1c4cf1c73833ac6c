//! Multi-wallet SPV synchronization progress engine.
//!
//! This library drives and reports on the staged process of bringing one
//! or more SPV wallets into agreement with the current blockchain state:
//!
//! - Compact filter fetch, header fetch, address discovery, and headers
//!   rescan, advanced in order by events from an external sync engine
//! - Live percent-complete and ETA estimation for the active stage and the
//!   whole pipeline, with dead-time (device sleep) compensation
//! - Fan-out progress notification to any number of named listeners, with
//!   last-known-state replay for late joiners
//! - Race-free cancellation and restart: `cancel_sync` returns only after
//!   the run has fully unwound
//! - Standalone per-wallet blocks rescans, mutually exclusive with sync
//!
//! The actual peer-to-peer protocol and wallet storage stay behind the
//! [`ChainEngine`] and [`WalletBackend`] traits; this crate owns only the
//! coordination, estimation, and reporting.
//!
//! # Quick Start
//!
//! ```no_run
//! use spv_sync::{ChainEngine, ChainEvent, SyncConfig, SyncSession, WalletBackend};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # struct MyEngine;
//! # #[async_trait::async_trait]
//! # impl ChainEngine for MyEngine {
//! #     async fn run(
//! #         &self,
//! #         _peers: Vec<String>,
//! #         _events: tokio::sync::mpsc::UnboundedSender<ChainEvent>,
//! #         cancel: tokio_util::sync::CancellationToken,
//! #     ) -> spv_sync::EngineResult<()> {
//! #         cancel.cancelled().await;
//! #         Err(spv_sync::EngineError::Canceled)
//! #     }
//! # }
//! # struct MyWallet;
//! # #[async_trait::async_trait]
//! # impl WalletBackend for MyWallet {
//! #     fn best_block_height(&self) -> i32 { 0 }
//! #     fn best_block_timestamp(&self) -> i64 { 0 }
//! #     fn has_network_backend(&self) -> bool { true }
//! #     fn is_account_mixer_active(&self) -> bool { false }
//! #     async fn stop_account_mixer(&self) -> spv_sync::WalletResult<()> { Ok(()) }
//! #     async fn rescan_from_height(
//! #         &self,
//! #         _from_height: i32,
//! #         _progress: tokio::sync::mpsc::UnboundedSender<i32>,
//! #         _cancel: tokio_util::sync::CancellationToken,
//! #     ) -> spv_sync::WalletResult<()> { Ok(()) }
//! #     async fn save_rescan_checkpoint(&self, _height: i32) -> spv_sync::WalletResult<()> { Ok(()) }
//! #     async fn index_transactions(&self) -> spv_sync::WalletResult<()> { Ok(()) }
//! #     async fn reindex_transactions(&self) -> spv_sync::WalletResult<()> { Ok(()) }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(MyEngine);
//!     let mut wallets: HashMap<i32, Arc<dyn WalletBackend>> = HashMap::new();
//!     wallets.insert(1, Arc::new(MyWallet));
//!
//!     let session = SyncSession::new(SyncConfig::default(), engine, wallets)?;
//!     session.start().await?;
//!
//!     // ... observe progress through a registered listener ...
//!
//!     session.cancel_sync().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod events;
pub mod inactivity;
pub mod logging;
pub mod notifications;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use engine::{ChainEngine, WalletBackend};
pub use error::{
    EngineError, EngineResult, SyncError, SyncResult, WalletError, WalletResult,
};
pub use estimator::EstimatorTuning;
pub use events::ChainEvent;
pub use inactivity::InactivityAccountant;
pub use logging::{init_console_logging, init_logging, LoggingConfig};
pub use notifications::{NotificationRegistry, SyncProgressListener};
pub use session::SyncSession;
pub use types::{
    AddressDiscoveryProgress, BlockInfo, CFiltersFetchProgress, DebugTimes, GeneralSyncProgress,
    HeadersFetchProgress, HeadersRescanProgress, RescanSnapshot, SyncStage, WalletId,
};
