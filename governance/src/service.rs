//! # Governance Service
//!
//! The end-to-end flows, wired from the components:
//!
//! ```text
//! action ─► DatumCodec + Redeemer ─► GovTxBuilder ─► SigningSubmitter
//!                                                         │
//!        local view (pending) ◄── ReconciliationPoller ◄──┴──► validate_gov_tx
//! ```
//!
//! Every check that can fail without the network runs first. Once a
//! transaction is accepted, funds have moved: from there on nothing rolls
//! the optimistic state back. A backend that refuses the record afterwards
//! surfaces as [`GovernanceError::BackendValidation`] while polling keeps
//! running, because the chain, not the backend, is the source of truth.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::address::Address;
use crate::backend::{GovernanceBackend, ValidateGovTxRequest};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::plutus::{CreateDatumRequest, DatumCodec, GovAction, GovDatum, Redeemer};
use crate::proposal::{normalize_pkh, normalize_pkh_keys, AssetBundle, Proposal, ProposalStatus};
use crate::submit::SigningSubmitter;
use crate::sync::{Baseline, LocalProposal, ProposalView, ReconciliationPoller, SyncEvent, SyncFlow, SyncMarkers};
use crate::transaction::{GovTxBuilder, ParameterSource, Transaction, ValidatorScript};
use crate::wallet::{FeeEstimate, WalletGateway, WalletHandle, WalletHost, WalletSummary};

/// Action name recorded with the backend for proposal creation.
const CREATE_ACTION: &str = "Create";

/// Input for a new proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProposal {
    /// Chosen by the caller, or a fresh UUID when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discussion_url: String,
    /// Defaults to the signing wallet's key hash.
    #[serde(default)]
    pub owner_pkh: Option<String>,
    pub voting_start: i64,
    pub voting_end: i64,
    pub min_voting_tokens: u64,
    #[serde(default)]
    pub authorized_pkhs: BTreeMap<String, u64>,
}

impl NewProposal {
    /// Lowercases every key hash in the request.
    pub fn normalized(mut self) -> Self {
        self.owner_pkh = self.owner_pkh.as_deref().map(normalize_pkh);
        self.authorized_pkhs = normalize_pkh_keys(self.authorized_pkhs);
        self
    }
}

/// A transaction accepted by the network, and what is shown meanwhile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub proposal_id: String,
    pub tx_hash: String,
    pub optimistic: Proposal,
}

/// Composes the governance pipeline for one deployment.
pub struct GovernanceService {
    config: Arc<GovernanceConfig>,
    backend: Arc<dyn GovernanceBackend>,
    params: Arc<dyn ParameterSource>,
    gateway: WalletGateway,
    codec: DatumCodec,
    script: ValidatorScript,
    submitter: SigningSubmitter,
    poller: ReconciliationPoller,
}

impl GovernanceService {
    pub fn new(
        config: GovernanceConfig,
        backend: Arc<dyn GovernanceBackend>,
        params: Arc<dyn ParameterSource>,
        host: Arc<dyn WalletHost>,
        markers: SyncMarkers,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let script = ValidatorScript::from_config(&config)?;
        let poller = ReconciliationPoller::from_config(backend.clone(), markers, Arc::new(ProposalView::new()), &config);
        Ok(Self {
            gateway: WalletGateway::new(host, config.clone()),
            codec: DatumCodec::new(config.proposal_uri_base.clone()),
            submitter: SigningSubmitter::new(),
            config,
            backend,
            params,
            script,
            poller,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn gateway(&self) -> &WalletGateway {
        &self.gateway
    }

    pub fn poller(&self) -> &ReconciliationPoller {
        &self.poller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.poller.subscribe()
    }

    /// Bech32 address of the governance validator on the configured network.
    pub fn script_address(&self) -> Result<String> {
        self.script.address(self.config.network).to_bech32()
    }

    fn builder(&self, handle: &WalletHandle) -> GovTxBuilder {
        GovTxBuilder::new(self.params.clone(), handle.api(), self.script.clone())
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Builds, signs and submits a new proposal, shows it as a pending draft
    /// and starts polling for it.
    pub async fn create_proposal(&self, wallet: &str, request: NewProposal) -> Result<Submitted> {
        let request = request.normalized();
        let handle = self.gateway.enable(wallet).await?;
        let signer = self.gateway.get_pub_key_hash(&handle).await?;
        let proposal_id = request.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let owner_pkh = request.owner_pkh.clone().unwrap_or_else(|| signer.clone());

        let (datum, tx) = self.build_create(&handle, &proposal_id, &owner_pkh, &signer, &request).await?;
        let tx_hash = self.submitter.sign_and_submit(&tx, &handle).await?;

        let now = Utc::now();
        let optimistic = Proposal {
            id: proposal_id.clone(),
            owner_pkh,
            proposer_pkh: signer.clone(),
            title: request.title,
            description: request.description,
            discussion_url: request.discussion_url,
            status: ProposalStatus::Draft,
            min_voting_tokens: request.min_voting_tokens,
            authorized_pkhs: request.authorized_pkhs,
            vote_tally: BTreeMap::new(),
            voting_start: request.voting_start,
            voting_end: request.voting_end,
            created_at: now,
            updated_at: now,
            transaction_hash: Some(tx_hash.clone()),
            owner_address: self.owner_address(&handle).await,
        };
        self.poller
            .track(optimistic.clone(), Baseline::AwaitNonDraft, SyncFlow::Create)?;
        info!(proposal_id = %proposal_id, tx_hash = %tx_hash, "proposal submitted");

        self.record(ValidateGovTxRequest {
            proposal: optimistic.clone(),
            tx_hash: tx_hash.clone(),
            action: CREATE_ACTION.to_string(),
            signer_pkh: signer,
            datum: datum.to_hex()?,
            redeemer: None,
        })
        .await?;

        Ok(Submitted {
            proposal_id,
            tx_hash,
            optimistic,
        })
    }

    /// Whether the wallet can pay for creating `request`: builds the
    /// creation transaction without signing it.
    pub async fn estimate_create_fee(&self, wallet: &str, request: &NewProposal) -> Result<FeeEstimate> {
        let request = &request.clone().normalized();
        let handle = self.gateway.enable(wallet).await?;
        let signer = self.gateway.get_pub_key_hash(&handle).await?;
        let proposal_id = request.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let owner_pkh = request.owner_pkh.clone().unwrap_or_else(|| signer.clone());

        self.gateway
            .estimate_fee_sufficiency(&handle, self.config.proposal_deposit, || async {
                self.build_create(&handle, &proposal_id, &owner_pkh, &signer, request)
                    .await
                    .map(|(_, tx)| tx)
            })
            .await
    }

    async fn build_create(
        &self,
        handle: &WalletHandle,
        proposal_id: &str,
        owner_pkh: &str,
        signer: &str,
        request: &NewProposal,
    ) -> Result<(GovDatum, Transaction)> {
        let (datum, metadata) = self.codec.encode_create(&CreateDatumRequest {
            proposal_id: proposal_id.to_string(),
            proposer_pkh: signer.to_string(),
            owner_pkh: owner_pkh.to_string(),
            voting_start: request.voting_start,
            voting_end: request.voting_end,
            min_voting_tokens: request.min_voting_tokens,
            authorized_pkhs: request.authorized_pkhs.clone(),
        })?;
        let deposit = AssetBundle::from_lovelace(self.config.proposal_deposit);
        let tx = self
            .builder(handle)
            .create(&self.script_address()?, &datum.to_plutus()?, &deposit, Some(&metadata))
            .await?;
        Ok((datum, tx))
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// String entry point: parses `action` and `payload`, then
    /// [`apply_action`](Self::apply_action). Unknown actions and missing
    /// fields fail before any wallet is touched.
    pub async fn apply_request(&self, wallet: &str, proposal_id: &str, action: &str, payload: &Json) -> Result<Submitted> {
        let action = GovAction::from_request(action, payload)?;
        self.apply_action(wallet, proposal_id, action).await
    }

    /// Spends the proposal's current output with `action`, shows the
    /// expected next state as pending and starts polling.
    pub async fn apply_action(&self, wallet: &str, proposal_id: &str, action: GovAction) -> Result<Submitted> {
        // Validate the redeemer before any network traffic.
        let redeemer_hex = Redeemer::build(&action)?.to_hex()?;

        let current = self.backend.fetch_status(proposal_id).await?;
        let handle = self.gateway.enable(wallet).await?;
        let signer = self.gateway.get_pub_key_hash(&handle).await?;

        let next = current.authorize(&action, &signer, Utc::now().timestamp_millis())?;
        if let GovAction::Vote { amount, .. } = &action {
            self.ensure_voting_tokens(&handle, *amount).await?;
        }
        let overrides = Proposal::overrides_for(&action, next);
        let (datum, _) = self.codec.encode_update(&current, &overrides)?;

        let utxo = self
            .backend
            .fetch_utxos(proposal_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GovernanceError::NotFound(format!("current output of proposal {}", proposal_id)))?;

        let tx = self
            .builder(&handle)
            .update(&utxo, &datum.to_plutus()?, &redeemer_hex, &self.script_address()?, &signer)
            .await?;
        let tx_hash = self.submitter.sign_and_submit(&tx, &handle).await?;

        let mut optimistic = current.with_overrides(&overrides);
        optimistic.transaction_hash = Some(tx_hash.clone());
        self.poller
            .track(optimistic.clone(), Baseline::snapshot(&current), SyncFlow::Update)?;
        info!(proposal_id, action = %action, tx_hash = %tx_hash, next = %next, "action submitted");

        self.record(ValidateGovTxRequest {
            proposal: optimistic.clone(),
            tx_hash: tx_hash.clone(),
            action: action.name().to_string(),
            signer_pkh: signer,
            datum: datum.to_hex()?,
            redeemer: Some(redeemer_hex),
        })
        .await?;

        Ok(Submitted {
            proposal_id: proposal_id.to_string(),
            tx_hash,
            optimistic,
        })
    }

    async fn ensure_voting_tokens(&self, handle: &WalletHandle, amount: u64) -> Result<()> {
        let balance = self.gateway.get_balance(handle).await?;
        if balance.token < amount {
            return Err(GovernanceError::InsufficientFunds {
                unit: self.config.token_policy_id.clone(),
                required: amount,
                available: balance.token,
            });
        }
        Ok(())
    }

    async fn owner_address(&self, handle: &WalletHandle) -> Option<String> {
        let raw = handle.api().get_change_address().await.ok()?;
        Address::parse(&raw).and_then(|a| a.to_bech32()).ok()
    }

    /// Posts the submitted transaction to the backend. Anything but a clean
    /// acceptance is a [`GovernanceError::BackendValidation`]; the pending
    /// view and the poll stay as they are.
    async fn record(&self, request: ValidateGovTxRequest) -> Result<()> {
        let reason = match self.backend.validate_gov_tx(&request).await {
            Ok(verdict) if verdict.valid => return Ok(()),
            Ok(verdict) => verdict.reason.unwrap_or_else(|| "rejected without a reason".to_string()),
            Err(e) => e.to_string(),
        };
        warn!(
            proposal_id = %request.proposal.id,
            tx_hash = %request.tx_hash,
            reason = %reason,
            "backend did not record the transaction"
        );
        Err(GovernanceError::BackendValidation {
            tx_hash: request.tx_hash,
            reason,
        })
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Restarts polling for every proposal left marked as syncing.
    pub fn resume_pending(&self) -> Result<Vec<String>> {
        self.poller.resume_pending()
    }

    pub fn local(&self, proposal_id: &str) -> Option<LocalProposal> {
        self.poller.view().get(proposal_id)
    }

    pub fn proposals(&self) -> Vec<LocalProposal> {
        self.poller.view().list()
    }

    /// Fetches the backend's record. It replaces the local one unless a
    /// poll is still waiting to confirm an optimistic state.
    pub async fn status(&self, proposal_id: &str) -> Result<Proposal> {
        let proposal = self.backend.fetch_status(proposal_id).await?;
        let pending = self.local(proposal_id).is_some_and(|p| p.pending);
        if !pending {
            self.poller.view().confirm(proposal.clone());
        }
        Ok(proposal)
    }

    pub async fn wallet_summaries(&self, login_wallet: Option<&str>) -> Vec<WalletSummary> {
        self.gateway.summaries(login_wallet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ValidationVerdict;
    use crate::mock::{MockBackend, MockParams, MockWallet, MockWalletHost};
    use crate::proposal::model::tests::{sample_proposal, OWNER, VOTER};
    use crate::proposal::{AssetAmount, MatchingUtxo};
    use crate::sync::SyncState;

    const SCRIPT_HEX: &str = "4e4d0100";
    const POLICY: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

    struct Harness {
        service: GovernanceService,
        backend: Arc<MockBackend>,
        wallet: Arc<MockWallet>,
        host: Arc<MockWalletHost>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MockBackend::new());
        let wallet = Arc::new(MockWallet::with_seed(7));
        wallet.fund(&[20_000_000, 5_000_000]);
        let host = Arc::new(MockWalletHost::new());
        host.install("eternl", wallet.clone());
        let config = GovernanceConfig {
            validator_script_hex: SCRIPT_HEX.to_string(),
            token_policy_id: POLICY.to_string(),
            ..GovernanceConfig::default()
        };
        let service = GovernanceService::new(
            config,
            backend.clone(),
            Arc::new(MockParams::default()),
            host.clone(),
            SyncMarkers::in_memory(),
        )
        .unwrap();
        Harness {
            service,
            backend,
            wallet,
            host,
        }
    }

    fn new_proposal() -> NewProposal {
        NewProposal {
            id: Some("prop-new".into()),
            title: "Fund the indexer".into(),
            voting_start: 1_000,
            voting_end: 2_000,
            min_voting_tokens: 50,
            authorized_pkhs: BTreeMap::from([(VOTER.to_string(), 1)]),
            ..NewProposal::default()
        }
    }

    /// A live proposal owned by the harness wallet, with its current output
    /// registered at the backend.
    fn owned_proposal(h: &Harness, status: ProposalStatus) -> Proposal {
        let mut proposal = sample_proposal(status);
        proposal.owner_pkh = h.wallet.key_hash_hex();
        h.backend.insert(proposal.clone());

        let datum = DatumCodec::new("https://verity.example")
            .encode_update(&proposal, &Default::default())
            .unwrap()
            .0;
        h.backend.set_utxos(
            &proposal.id,
            vec![MatchingUtxo {
                tx_hash: Some("ab".repeat(32)),
                output_index: Some(0),
                amount: Some(vec![AssetAmount {
                    unit: "lovelace".into(),
                    quantity: "3000000".into(),
                }]),
                inline_datum: Some(datum.to_hex().unwrap()),
                address: Some(h.service.script_address().unwrap()),
            }],
        );
        proposal
    }

    #[tokio::test(start_paused = true)]
    async fn create_shows_pending_draft_then_confirms() {
        let h = harness();
        let mut indexed = sample_proposal(ProposalStatus::Proposed);
        indexed.id = "prop-new".into();
        h.backend.insert(indexed.clone());

        let submitted = h.service.create_proposal("eternl", new_proposal()).await.unwrap();
        assert_eq!(submitted.optimistic.status, ProposalStatus::Draft);
        assert_eq!(h.wallet.submitted().len(), 1);

        let local = h.service.local("prop-new").unwrap();
        assert!(local.pending);
        assert!(h.service.poller().markers().is_marked("prop-new").unwrap());

        let recorded = h.backend.validations();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].action, "Create");
        assert_eq!(recorded[0].tx_hash, submitted.tx_hash);
        assert!(recorded[0].redeemer.is_none());

        assert_eq!(h.service.poller().wait("prop-new").await, SyncState::Synced);
        let local = h.service.local("prop-new").unwrap();
        assert!(!local.pending);
        assert_eq!(local.proposal, indexed);
        assert!(!h.service.poller().markers().is_marked("prop-new").unwrap());
    }

    #[test]
    fn new_proposal_pkhs_normalize() {
        let mut request = new_proposal();
        request.owner_pkh = Some(format!(" {} ", OWNER.to_uppercase()));
        request.authorized_pkhs = BTreeMap::from([(VOTER.to_uppercase(), 2)]);

        let request = request.normalized();
        assert_eq!(request.owner_pkh.as_deref(), Some(OWNER));
        assert_eq!(request.authorized_pkhs, BTreeMap::from([(VOTER.to_string(), 2)]));
    }

    #[tokio::test]
    async fn invalid_create_touches_nothing() {
        let h = harness();
        let mut request = new_proposal();
        request.voting_end = request.voting_start;

        let err = h.service.create_proposal("eternl", request).await.unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
        assert_eq!(h.wallet.submit_attempts(), 0);
        assert!(h.service.local("prop-new").is_none());
        assert!(h.backend.validations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn owner_update_is_optimistic_and_recorded() {
        let h = harness();
        let current = owned_proposal(&h, ProposalStatus::Proposed);

        let submitted = h
            .service
            .apply_action("eternl", &current.id, GovAction::UpdateMinVotingTokens { amount: 500 })
            .await
            .unwrap();

        let local = h.service.local(&current.id).unwrap();
        assert!(local.pending);
        assert_eq!(local.proposal.min_voting_tokens, 500);
        assert_eq!(local.proposal.authorized_pkhs, current.authorized_pkhs);
        assert_eq!(local.proposal.transaction_hash.as_deref(), Some(submitted.tx_hash.as_str()));
        assert_eq!(h.service.poller().state(&current.id), SyncState::Syncing);

        let recorded = h.backend.validations();
        assert_eq!(recorded[0].action, "UpdateMinVotingTokens");
        assert!(recorded[0].redeemer.is_some());
    }

    #[tokio::test]
    async fn unknown_action_fails_before_wallet() {
        let h = harness();
        let err = h
            .service
            .apply_request("eternl", "prop-1", "Bogus", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::UnknownAction(ref a) if a == "Bogus"));
        assert_eq!(h.host.enable_calls("eternl"), 0);
        assert_eq!(h.backend.status_calls("prop-1"), 0);
    }

    #[tokio::test]
    async fn vote_by_someone_else_is_refused_locally() {
        let h = harness();
        let current = owned_proposal(&h, ProposalStatus::Voting);
        let err = h
            .service
            .apply_action(
                "eternl",
                &current.id,
                GovAction::Vote {
                    voter_pkh: VOTER.to_string(),
                    amount: 10,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
        assert_eq!(h.wallet.submit_attempts(), 0);
    }

    #[tokio::test]
    async fn vote_without_tokens_is_insufficient() {
        let h = harness();
        let mut current = owned_proposal(&h, ProposalStatus::Voting);
        let voter = h.wallet.key_hash_hex();
        current.authorized_pkhs.insert(voter.clone(), 1);
        current.voting_start = 0;
        current.voting_end = i64::MAX;
        h.backend.insert(current.clone());

        let err = h
            .service
            .apply_action("eternl", &current.id, GovAction::Vote { voter_pkh: voter, amount: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InsufficientFunds { required: 10, available: 0, .. }));
        assert_eq!(h.wallet.submit_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_rejection_keeps_the_pending_state() {
        let h = harness();
        let current = owned_proposal(&h, ProposalStatus::Proposed);
        h.backend.set_verdict(ValidationVerdict {
            valid: false,
            reason: Some("datum mismatch".into()),
        });

        let err = h
            .service
            .apply_action("eternl", &current.id, GovAction::UpdateMinVotingTokens { amount: 7 })
            .await
            .unwrap_err();
        match err {
            GovernanceError::BackendValidation { reason, .. } => assert_eq!(reason, "datum mismatch"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.wallet.submit_attempts(), 1, "the transaction did go out");
        assert!(h.service.local(&current.id).unwrap().pending);
        assert!(h.service.poller().is_polling(&current.id));
        assert!(h.service.poller().markers().is_marked(&current.id).unwrap());
    }

    #[tokio::test]
    async fn status_refreshes_settled_entries_only() {
        let h = harness();
        let record = sample_proposal(ProposalStatus::Voting);
        h.backend.insert(record.clone());
        assert_eq!(h.service.status("prop-1").await.unwrap(), record);
        assert!(!h.service.local("prop-1").unwrap().pending);
        assert_eq!(h.service.proposals().len(), 1);
    }

    #[test]
    fn missing_script_is_a_configuration_error() {
        let result = GovernanceService::new(
            GovernanceConfig::default(),
            Arc::new(MockBackend::new()),
            Arc::new(MockParams::default()),
            Arc::new(MockWalletHost::new()),
            SyncMarkers::in_memory(),
        );
        assert!(matches!(result, Err(GovernanceError::Validation(_))));
    }
}
