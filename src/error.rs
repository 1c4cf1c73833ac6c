//! Error types for the sync engine.

use thiserror::Error;

use crate::types::WalletId;

/// Errors returned synchronously from session setup operations.
///
/// These are the only errors a caller ever receives directly; failures that
/// occur after a session is running are reported through
/// [`SyncProgressListener::on_sync_ended_with_error`](crate::notifications::SyncProgressListener::on_sync_ended_with_error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A sync session is already running (or the session is already synced).
    #[error("Sync already in progress")]
    AlreadySyncing,

    /// A standalone rescan is already running.
    #[error("Rescan already in progress")]
    AlreadyRescanning,

    /// The target wallet has no usable network backend.
    #[error("Not connected to the network")]
    NotConnected,

    /// A progress listener is already registered under this key.
    #[error("Progress listener already registered: {0}")]
    ListenerAlreadyExists(String),

    /// None of the configured persistent peer addresses is usable.
    #[error("Invalid persistent peer address: {0}")]
    InvalidPeerAddress(String),

    /// The requested operation is not valid in the current session state
    /// (e.g. rescan requested while a sync is active).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No managed wallet with the given id.
    #[error("No wallet with id {0}")]
    WalletNotFound(WalletId),
}

/// Type alias for session operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the external chain engine's run loop.
///
/// Never returned to callers of [`SyncSession::start`](crate::SyncSession::start);
/// delivered only through the `sync_ended_with_error` / `sync_canceled`
/// notification paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The run context was canceled. Reported as a clean cancellation,
    /// not as an error.
    #[error("Sync canceled")]
    Canceled,

    /// An engine-side deadline expired before sync completed.
    #[error("Synchronization deadline exceeded")]
    DeadlineExceeded,

    /// Transport failure (lost all peers, protocol error, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// Any other engine failure.
    #[error("Engine failure: {0}")]
    Engine(String),
}

/// Type alias for engine run results.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors from wallet backend operations (rescan drive, indexing, mixer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The rescan walk itself failed.
    #[error("Rescan failed: {0}")]
    Rescan(String),

    /// Transaction (re)indexing failed after a rescan.
    #[error("Transaction indexing failed: {0}")]
    Indexing(String),

    /// Persisting the rescan resume checkpoint failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stopping the account mixer failed.
    #[error("Account mixer error: {0}")]
    Mixer(String),
}

/// Type alias for wallet backend results.
pub type WalletResult<T> = std::result::Result<T, WalletError>;
