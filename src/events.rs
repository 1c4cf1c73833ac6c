//! Events emitted by the external chain engine.
//!
//! The engine reports everything that happens during a run over a single
//! channel of `ChainEvent` values, consumed by one dispatcher task per
//! session. A closed enum (rather than a struct of callbacks) keeps event
//! ordering total and easy to reason about.

use crate::types::WalletId;

/// Everything the external chain engine can report during a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A peer connection was established.
    PeerConnected {
        /// Connected peer count after this connection.
        peer_count: i32,
        /// Remote address of the peer.
        address: String,
    },

    /// A peer connection was lost.
    PeerDisconnected {
        /// Connected peer count after this disconnection.
        peer_count: i32,
        /// Remote address of the peer.
        address: String,
    },

    /// CFilter fetching began for a wallet.
    ///
    /// May be emitted once per connected peer; only the first is acted on.
    CFiltersFetchStarted {
        /// Wallet whose filters are being fetched.
        wallet_id: WalletId,
    },

    /// A batch of CFilters was fetched.
    CFiltersFetchProgress {
        /// Wallet whose filters are being fetched.
        wallet_id: WalletId,
        /// First filter height in the batch.
        start_height: i32,
        /// One past the last filter height in the batch.
        end_height: i32,
    },

    /// CFilter fetching completed for a wallet.
    CFiltersFetchFinished {
        /// Wallet whose filters were fetched.
        wallet_id: WalletId,
    },

    /// Header fetching began.
    ///
    /// Emitted once per connected peer; only the first is acted on.
    HeadersFetchStarted {
        /// Best height reported by the peer that triggered the fetch.
        peer_initial_height: i32,
    },

    /// A batch of headers was fetched and stored.
    HeadersFetchProgress {
        /// Height of the last fetched header.
        last_header_height: i32,
        /// Timestamp of the last fetched header (unix seconds).
        last_header_timestamp: i64,
    },

    /// Header fetching reached the chain tip.
    HeadersFetchFinished,

    /// Address discovery began for a wallet.
    AddressDiscoveryStarted {
        /// Wallet running discovery.
        wallet_id: WalletId,
    },

    /// Address discovery completed for a wallet.
    AddressDiscoveryFinished {
        /// Wallet that finished discovery.
        wallet_id: WalletId,
    },

    /// The in-sync headers rescan began for a wallet.
    RescanStarted {
        /// Wallet being rescanned.
        wallet_id: WalletId,
    },

    /// The in-sync headers rescan advanced.
    RescanProgress {
        /// Wallet being rescanned.
        wallet_id: WalletId,
        /// Height scanned through so far.
        scanned_through: i32,
    },

    /// The in-sync headers rescan completed for a wallet.
    RescanFinished {
        /// Wallet that finished rescanning.
        wallet_id: WalletId,
    },

    /// A wallet reached (or lost) agreement with the chain tip.
    WalletSynced {
        /// The wallet in question.
        wallet_id: WalletId,
        /// Whether the wallet is now synced.
        synced: bool,
    },
}

impl ChainEvent {
    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            ChainEvent::PeerConnected {
                peer_count,
                address,
            } => format!("PeerConnected({}, peers={})", address, peer_count),
            ChainEvent::PeerDisconnected {
                peer_count,
                address,
            } => format!("PeerDisconnected({}, peers={})", address, peer_count),
            ChainEvent::CFiltersFetchStarted {
                wallet_id,
            } => format!("CFiltersFetchStarted(wallet={})", wallet_id),
            ChainEvent::CFiltersFetchProgress {
                wallet_id,
                start_height,
                end_height,
            } => format!("CFiltersFetchProgress(wallet={}, {}-{})", wallet_id, start_height, end_height),
            ChainEvent::CFiltersFetchFinished {
                wallet_id,
            } => format!("CFiltersFetchFinished(wallet={})", wallet_id),
            ChainEvent::HeadersFetchStarted {
                peer_initial_height,
            } => format!("HeadersFetchStarted(peer_height={})", peer_initial_height),
            ChainEvent::HeadersFetchProgress {
                last_header_height,
                ..
            } => format!("HeadersFetchProgress(height={})", last_header_height),
            ChainEvent::HeadersFetchFinished => "HeadersFetchFinished".to_string(),
            ChainEvent::AddressDiscoveryStarted {
                wallet_id,
            } => format!("AddressDiscoveryStarted(wallet={})", wallet_id),
            ChainEvent::AddressDiscoveryFinished {
                wallet_id,
            } => format!("AddressDiscoveryFinished(wallet={})", wallet_id),
            ChainEvent::RescanStarted {
                wallet_id,
            } => format!("RescanStarted(wallet={})", wallet_id),
            ChainEvent::RescanProgress {
                wallet_id,
                scanned_through,
            } => format!("RescanProgress(wallet={}, through={})", wallet_id, scanned_through),
            ChainEvent::RescanFinished {
                wallet_id,
            } => format!("RescanFinished(wallet={})", wallet_id),
            ChainEvent::WalletSynced {
                wallet_id,
                synced,
            } => format!("WalletSynced(wallet={}, synced={})", wallet_id, synced),
        }
    }
}
