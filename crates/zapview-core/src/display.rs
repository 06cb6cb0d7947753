//! The presentation seam.
//!
//! The coordinator pushes every visible change through [`DisplaySink`]. How
//! those changes are rendered is up to the host; [`ChannelDisplay`] turns them
//! into typed messages for a consumer task.

use nostr_sdk::PublicKey;
use tokio::sync::mpsc;

use crate::coordinator::ViewId;
use crate::models::{Profile, SharedZap};
use crate::profiles::IdentityStatus;
use crate::stats::StatsView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchUpdateOptions {
    /// Part of the initial load, before end-of-stored-events
    pub is_initial: bool,
    pub max_visible: Option<usize>,
    pub color_mode: bool,
}

/// Consumer of view updates.
///
/// Calls for a view always arrive in cache order. Follow-up updates
/// (references, profiles, stats) may arrive in any order relative to each
/// other.
pub trait DisplaySink: Send + Sync {
    /// Add one older event at the end of the list
    fn append(&self, view: &ViewId, zap: SharedZap);

    /// Replace the visible list with `zaps`, newest first
    fn batch_update(&self, view: &ViewId, zaps: Vec<SharedZap>, options: BatchUpdateOptions);

    /// `zap`'s referenced event has been resolved
    fn update_reference(&self, view: &ViewId, zap: SharedZap);

    fn update_profile(&self, _view: &ViewId, _pubkey: PublicKey, _profile: Profile) {}

    fn update_identity(&self, _view: &ViewId, _pubkey: PublicKey, _status: IdentityStatus) {}

    fn display_stats(&self, view: &ViewId, stats: StatsView);

    /// The initial load finished without a single event
    fn show_empty(&self, view: &ViewId);
}

#[derive(Debug, Clone)]
pub enum DisplayUpdate {
    Append {
        view: ViewId,
        zap: SharedZap,
    },
    BatchUpdate {
        view: ViewId,
        zaps: Vec<SharedZap>,
        options: BatchUpdateOptions,
    },
    Reference {
        view: ViewId,
        zap: SharedZap,
    },
    Profile {
        view: ViewId,
        pubkey: PublicKey,
        profile: Profile,
    },
    Identity {
        view: ViewId,
        pubkey: PublicKey,
        status: IdentityStatus,
    },
    Stats {
        view: ViewId,
        stats: StatsView,
    },
    Empty {
        view: ViewId,
    },
}

impl DisplayUpdate {
    pub fn view(&self) -> &ViewId {
        match self {
            Self::Append { view, .. }
            | Self::BatchUpdate { view, .. }
            | Self::Reference { view, .. }
            | Self::Profile { view, .. }
            | Self::Identity { view, .. }
            | Self::Stats { view, .. }
            | Self::Empty { view } => view,
        }
    }
}

/// [`DisplaySink`] that forwards every call as a [`DisplayUpdate`]
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    tx: mpsc::UnboundedSender<DisplayUpdate>,
}

impl ChannelDisplay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: DisplayUpdate) {
        // A dropped receiver means nobody is watching any more
        let _ = self.tx.send(update);
    }
}

impl DisplaySink for ChannelDisplay {
    fn append(&self, view: &ViewId, zap: SharedZap) {
        self.send(DisplayUpdate::Append {
            view: view.clone(),
            zap,
        });
    }

    fn batch_update(&self, view: &ViewId, zaps: Vec<SharedZap>, options: BatchUpdateOptions) {
        self.send(DisplayUpdate::BatchUpdate {
            view: view.clone(),
            zaps,
            options,
        });
    }

    fn update_reference(&self, view: &ViewId, zap: SharedZap) {
        self.send(DisplayUpdate::Reference {
            view: view.clone(),
            zap,
        });
    }

    fn update_profile(&self, view: &ViewId, pubkey: PublicKey, profile: Profile) {
        self.send(DisplayUpdate::Profile {
            view: view.clone(),
            pubkey,
            profile,
        });
    }

    fn update_identity(&self, view: &ViewId, pubkey: PublicKey, status: IdentityStatus) {
        self.send(DisplayUpdate::Identity {
            view: view.clone(),
            pubkey,
            status,
        });
    }

    fn display_stats(&self, view: &ViewId, stats: StatsView) {
        self.send(DisplayUpdate::Stats {
            view: view.clone(),
            stats,
        });
    }

    fn show_empty(&self, view: &ViewId) {
        self.send(DisplayUpdate::Empty { view: view.clone() });
    }
}
