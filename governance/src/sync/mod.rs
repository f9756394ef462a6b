//! Reconciling optimistic state with the backend.

pub mod poller;
pub mod store;
pub mod view;

pub use poller::{Baseline, ReconciliationPoller, SyncEvent, SyncFlow, SyncState, WatchedFields};
pub use store::{MarkerStore, MemoryMarkerStore, SledMarkerStore, SyncMarkers};
pub use view::{LocalProposal, ProposalView};
