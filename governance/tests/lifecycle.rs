//! End-to-end tests for the proposal lifecycle.
//!
//! Everything outside the process is an in-memory double from
//! `verity_governance::mock`: the chain behind the local key wallet, the
//! network parameters and the governance backend. Time is paused, so the
//! ten-second poll interval costs nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use verity_governance::config::{GovernanceConfig, Network};
use verity_governance::crypto::PaymentKeypair;
use verity_governance::mock::{MockBackend, MockChain, MockParams, MockWallet, MockWalletHost};
use verity_governance::plutus::{DatumCodec, GovAction};
use verity_governance::proposal::{AssetAmount, AssetBundle, MatchingUtxo, Proposal, ProposalStatus, Utxo};
use verity_governance::sync::{SledMarkerStore, SyncEvent, SyncMarkers, SyncState};
use verity_governance::wallet::{KeyWallet, LocalWalletHost};
use verity_governance::{GovernanceError, GovernanceService, NewProposal, TraceCode};

const SCRIPT_HEX: &str = "4e4d0100";
const VOTER: &str = "bb000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn config() -> GovernanceConfig {
    GovernanceConfig {
        validator_script_hex: SCRIPT_HEX.to_string(),
        token_policy_id: "c0ffee00".repeat(7),
        ..GovernanceConfig::default()
    }
}

/// A key wallet registered as `local`, funded on the mock chain.
fn key_wallet_host(chain: Arc<MockChain>) -> (Arc<LocalWalletHost>, String) {
    let keypair = PaymentKeypair::from_seed(&[42; 32]);
    let pkh = keypair.key_hash_hex();
    let wallet = KeyWallet::new(keypair, Network::Testnet, chain.clone());
    let address = wallet.address().to_bech32().unwrap();
    for (i, lovelace) in [30_000_000u64, 8_000_000].into_iter().enumerate() {
        chain.add_utxo(Utxo {
            tx_hash: format!("{:02x}", i + 1).repeat(32),
            output_index: 0,
            address: address.clone(),
            assets: AssetBundle::from_lovelace(lovelace),
            inline_datum: None,
        });
    }
    let mut host = LocalWalletHost::new();
    host.add("local", wallet);
    (Arc::new(host), pkh)
}

fn request(id: &str) -> NewProposal {
    NewProposal {
        id: Some(id.to_string()),
        title: "Adopt the new fee schedule".into(),
        description: "Lower verification fees by a third.".into(),
        voting_start: 1_700_000_000_000,
        voting_end: 1_700_600_000_000,
        min_voting_tokens: 1_000,
        authorized_pkhs: BTreeMap::from([(VOTER.to_string(), 1)]),
        ..NewProposal::default()
    }
}

/// The record the backend serves once it has indexed `local`.
fn indexed(local: &Proposal, status: ProposalStatus) -> Proposal {
    let mut record = local.clone();
    record.status = status;
    record.updated_at = local.updated_at + chrono::Duration::seconds(40);
    record
}

/// Registers the proposal's current output at the backend.
fn register_output(backend: &MockBackend, service: &GovernanceService, proposal: &Proposal) {
    let datum = DatumCodec::new("https://verity.example")
        .encode_update(proposal, &Default::default())
        .unwrap()
        .0;
    backend.set_utxos(
        &proposal.id,
        vec![MatchingUtxo {
            tx_hash: Some("7e".repeat(32)),
            output_index: Some(0),
            amount: Some(vec![AssetAmount {
                unit: "lovelace".into(),
                quantity: "2500000".into(),
            }]),
            inline_datum: Some(datum.to_hex().unwrap()),
            address: Some(service.script_address().unwrap()),
        }],
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn create_then_update_with_a_key_wallet() {
    let chain = Arc::new(MockChain::default());
    let (host, owner) = key_wallet_host(chain.clone());
    let backend = Arc::new(MockBackend::new());
    let service = GovernanceService::new(
        config(),
        backend.clone(),
        Arc::new(MockParams::default()),
        host,
        SyncMarkers::in_memory(),
    )
    .unwrap();
    let mut events = service.subscribe();

    // Create: optimistic draft first, confirmed once the backend indexes it.
    let created = service.create_proposal("local", request("fee-schedule")).await.unwrap();
    assert_eq!(chain.submitted().len(), 1);
    assert!(service.local("fee-schedule").unwrap().pending);
    assert_eq!(created.optimistic.owner_pkh, owner);

    let live = indexed(&created.optimistic, ProposalStatus::Proposed);
    backend.insert(live.clone());
    assert_eq!(service.poller().wait("fee-schedule").await, SyncState::Synced);
    match events.recv().await.unwrap() {
        SyncEvent::Synced { proposal_id, proposal, .. } => {
            assert_eq!(proposal_id, "fee-schedule");
            assert_eq!(*proposal, live);
        }
        other => panic!("unexpected {:?}", other),
    }

    // Update: the owner widens the voter set.
    register_output(&backend, &service, &live);
    let voters = BTreeMap::from([(VOTER.to_string(), 1), ("cc".repeat(28), 2)]);
    let updated = service
        .apply_action(
            "local",
            "fee-schedule",
            GovAction::UpdateAuthorizedPkhs { pkhs: voters.clone() },
        )
        .await
        .unwrap();
    assert_eq!(chain.submitted().len(), 2);
    assert_eq!(updated.optimistic.authorized_pkhs, voters);
    assert_eq!(updated.optimistic.min_voting_tokens, live.min_voting_tokens);

    let recorded = backend.validations();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].action, "UpdateAuthorizedPKHs");
    let datum = DatumCodec::new("https://verity.example").decode(&recorded[1].datum).unwrap();
    assert_eq!(datum.params.authorized_pkhs, voters);
    assert_eq!(datum.params.min_voting_tokens, live.min_voting_tokens);

    let mut confirmed = indexed(&live, ProposalStatus::Proposed);
    confirmed.authorized_pkhs = voters;
    backend.insert(confirmed.clone());
    assert_eq!(service.poller().wait("fee-schedule").await, SyncState::Synced);
    assert_eq!(service.local("fee-schedule").unwrap().proposal, confirmed);
}

#[tokio::test(start_paused = true)]
async fn stale_output_rejection_asks_for_refresh() {
    let wallet = Arc::new(MockWallet::with_seed(9));
    wallet.fund(&[25_000_000, 4_000_000]);
    wallet.reject_submissions("ConwayUtxowFailure (UtxoFailure (BadInputsUTxO (fromList [...])))");
    let host = Arc::new(MockWalletHost::new());
    host.install("eternl", wallet.clone());
    let backend = Arc::new(MockBackend::new());
    let service = GovernanceService::new(
        config(),
        backend.clone(),
        Arc::new(MockParams::default()),
        host,
        SyncMarkers::in_memory(),
    )
    .unwrap();

    let proposal = base_proposal(&wallet.key_hash_hex());
    backend.insert(proposal.clone());
    register_output(&backend, &service, &proposal);

    let err = service
        .apply_action("eternl", &proposal.id, GovAction::UpdateMinVotingTokens { amount: 9 })
        .await
        .unwrap_err();
    match &err {
        GovernanceError::Submission { trace, .. } => assert_eq!(*trace, Some(TraceCode::BadInputs)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(err.user_message(), TraceCode::BadInputs.user_message());
    assert_eq!(wallet.submit_attempts(), 1);
    assert!(service.local(&proposal.id).is_none(), "no optimistic state after a rejection");
    assert!(backend.validations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_creation_resumes_after_restart() {
    let store = Arc::new(SledMarkerStore::open_temporary().unwrap());
    let chain = Arc::new(MockChain::default());
    let backend = Arc::new(MockBackend::new());

    {
        let (host, _) = key_wallet_host(chain.clone());
        let first = GovernanceService::new(
            config(),
            backend.clone(),
            Arc::new(MockParams::default()),
            host,
            SyncMarkers::new(store.clone()),
        )
        .unwrap();
        first.create_proposal("local", request("restarted")).await.unwrap();
        assert!(first.poller().cancel("restarted"));
    }

    let mut live = base_proposal(&"aa".repeat(28));
    live.id = "restarted".into();
    backend.insert(live.clone());

    let (host, _) = key_wallet_host(Arc::new(MockChain::default()));
    let second = GovernanceService::new(
        config(),
        backend.clone(),
        Arc::new(MockParams::default()),
        host,
        SyncMarkers::new(store),
    )
    .unwrap();
    assert_eq!(second.resume_pending().unwrap(), vec!["restarted".to_string()]);
    assert_eq!(second.poller().wait("restarted").await, SyncState::Synced);
    assert_eq!(second.local("restarted").unwrap().proposal, live);
    assert!(second.poller().markers().pending_ids().unwrap().is_empty());
}

#[tokio::test]
async fn summaries_list_every_allowed_wallet() {
    let host = Arc::new(MockWalletHost::new());
    let funded = Arc::new(MockWallet::with_seed(1));
    funded.fund(&[2_500_000]);
    host.install("eternl", funded);
    host.install("nami", Arc::new(MockWallet::with_seed(2)));
    host.lock("nami");
    host.install("unlisted", Arc::new(MockWallet::with_seed(3)));

    let service = GovernanceService::new(
        config(),
        Arc::new(MockBackend::new()),
        Arc::new(MockParams::default()),
        host,
        SyncMarkers::in_memory(),
    )
    .unwrap();

    let rows = service.wallet_summaries(None).await;
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["eternl", "nami"]);
    assert_eq!(rows[0].native_balance, 2_500_000);
    assert_eq!(rows[0].token_balance, 0);
    assert!(rows[1].error.is_some());
}

fn base_proposal(owner: &str) -> Proposal {
    let now = chrono::Utc::now();
    Proposal {
        id: "prop-stale".into(),
        owner_pkh: owner.to_string(),
        proposer_pkh: owner.to_string(),
        title: "Stale".into(),
        description: String::new(),
        discussion_url: String::new(),
        status: ProposalStatus::Proposed,
        min_voting_tokens: 10,
        authorized_pkhs: BTreeMap::new(),
        vote_tally: BTreeMap::new(),
        voting_start: 0,
        voting_end: 1,
        created_at: now,
        updated_at: now,
        transaction_hash: None,
        owner_address: None,
    }
}
