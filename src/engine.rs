//! External collaborator traits.
//!
//! The session never talks to the network or to wallet storage directly;
//! it drives a [`ChainEngine`] and queries [`WalletBackend`]s through these
//! seams. Embedders implement them over their real peer-to-peer and wallet
//! layers; tests implement them with mocks.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineResult, WalletResult};
use crate::events::ChainEvent;

/// The external sync engine that performs the actual network work.
#[async_trait]
pub trait ChainEngine: Send + Sync + 'static {
    /// Run the sync until completion, error, or cancellation.
    ///
    /// `persistent_peers` is the validated list of peers the engine should
    /// hold connections to (empty when discovery is left to the engine).
    /// The engine reports all notable occurrences as [`ChainEvent`]s over
    /// `events` and must return promptly with
    /// [`EngineError::Canceled`](crate::error::EngineError::Canceled) once
    /// `cancel` trips. The call blocks for the life of the sync run.
    async fn run(
        &self,
        persistent_peers: Vec<String>,
        events: mpsc::UnboundedSender<ChainEvent>,
        cancel: CancellationToken,
    ) -> EngineResult<()>;
}

/// Per-wallet queries and operations the session needs.
///
/// The cheap block queries are synchronous; they are called while holding
/// the session lock and must not block.
#[async_trait]
pub trait WalletBackend: Send + Sync + 'static {
    /// Height of the wallet's best known block.
    fn best_block_height(&self) -> i32;

    /// Timestamp of the wallet's best known block (unix seconds).
    fn best_block_timestamp(&self) -> i64;

    /// Whether the wallet currently has a usable network backend.
    fn has_network_backend(&self) -> bool;

    /// Whether an account mixer is currently running for this wallet.
    fn is_account_mixer_active(&self) -> bool;

    /// Stop the wallet's account mixer. Called before sync cancellation;
    /// mixing must never run unattended while chain state is unstable.
    async fn stop_account_mixer(&self) -> WalletResult<()>;

    /// Walk already-downloaded headers from `from_height`, reporting each
    /// scanned-through height over `progress`. Must stop promptly and
    /// return `Ok` once `cancel` trips.
    async fn rescan_from_height(
        &self,
        from_height: i32,
        progress: mpsc::UnboundedSender<i32>,
        cancel: CancellationToken,
    ) -> WalletResult<()>;

    /// Persist the resume checkpoint for a height-bounded rescan.
    async fn save_rescan_checkpoint(&self, height: i32) -> WalletResult<()>;

    /// Index transactions found after a sync or partial rescan.
    async fn index_transactions(&self) -> WalletResult<()>;

    /// Drop and rebuild the transaction index after a full rescan.
    async fn reindex_transactions(&self) -> WalletResult<()>;
}
