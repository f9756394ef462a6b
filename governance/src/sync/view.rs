//! The locally displayed proposals.
//!
//! Holds what the user sees: optimistic records written right after a
//! submission (flagged `pending`), replaced by the backend's record once
//! the poller confirms it.

use dashmap::DashMap;
use serde::Serialize;

use crate::proposal::Proposal;

/// A proposal as shown locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalProposal {
    pub proposal: Proposal,
    /// Optimistic and not yet confirmed by the backend.
    pub pending: bool,
}

#[derive(Debug, Default)]
pub struct ProposalView {
    entries: DashMap<String, LocalProposal>,
}

impl ProposalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows `proposal` immediately, marked pending.
    pub fn apply_optimistic(&self, proposal: Proposal) {
        self.entries.insert(
            proposal.id.clone(),
            LocalProposal {
                proposal,
                pending: true,
            },
        );
    }

    /// Replaces whatever is shown with the authoritative record.
    pub fn confirm(&self, proposal: Proposal) {
        self.entries.insert(
            proposal.id.clone(),
            LocalProposal {
                proposal,
                pending: false,
            },
        );
    }

    /// Drops the pending flag and keeps the record as it is.
    pub fn settle(&self, proposal_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(proposal_id) {
            entry.pending = false;
        }
    }

    pub fn get(&self, proposal_id: &str) -> Option<LocalProposal> {
        self.entries.get(proposal_id).map(|e| e.value().clone())
    }

    /// Every shown proposal, ordered by id.
    pub fn list(&self) -> Vec<LocalProposal> {
        let mut all: Vec<LocalProposal> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.proposal.id.cmp(&b.proposal.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::model::tests::sample_proposal;
    use crate::proposal::ProposalStatus;

    #[test]
    fn optimistic_then_confirmed() {
        let view = ProposalView::new();
        view.apply_optimistic(sample_proposal(ProposalStatus::Draft));
        assert!(view.get("prop-1").unwrap().pending);

        let confirmed = sample_proposal(ProposalStatus::Proposed);
        view.confirm(confirmed.clone());
        let shown = view.get("prop-1").unwrap();
        assert!(!shown.pending);
        assert_eq!(shown.proposal, confirmed);
    }

    #[test]
    fn settle_keeps_the_record() {
        let view = ProposalView::new();
        view.apply_optimistic(sample_proposal(ProposalStatus::Voting));
        view.settle("prop-1");
        view.settle("missing");
        let shown = view.get("prop-1").unwrap();
        assert!(!shown.pending);
        assert_eq!(shown.proposal.status, ProposalStatus::Voting);
        assert_eq!(view.list().len(), 1);
    }
}
