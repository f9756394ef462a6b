// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # verity-gov
//!
//! Command-line client for proposal governance. Signs with a local payment
//! key, submits through a Blockfrost-compatible chain API and then sits
//! with the reconciliation poller until the governance backend catches up.

mod cli;
mod logging;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;

use verity_governance::backend::{GovernanceBackend, HttpBackend, HttpChain};
use verity_governance::config::GovernanceConfig;
use verity_governance::crypto::PaymentKeypair;
use verity_governance::address::Address;
use verity_governance::sync::{SledMarkerStore, SyncEvent, SyncMarkers, SyncState};
use verity_governance::wallet::{KeyWallet, LocalWalletHost};
use verity_governance::{GovernanceError, GovernanceService, NewProposal, Submitted};

use cli::{ActArgs, Commands, CreateArgs, DeploymentArgs, StatusArgs, VerityCli};

/// Name the local key wallet is registered under.
const LOCAL_WALLET: &str = "local";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VerityCli::parse();
    logging::init_logging(cli.log_format);

    match cli.command {
        Commands::Keygen => keygen(&cli.deployment),
        Commands::Wallets => list_wallets(&cli.deployment).await,
        Commands::Create(args) => create(&cli.deployment, args).await,
        Commands::Act(args) => act(&cli.deployment, args).await,
        Commands::Status(args) => status(&cli.deployment, args).await,
        Commands::Resume => resume(&cli.deployment).await,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn keygen(deployment: &DeploymentArgs) -> Result<()> {
    let keypair = PaymentKeypair::generate();
    let address = Address::enterprise_key(deployment.network.into(), &keypair.key_hash())
        .to_bech32()
        .context("failed to encode address")?;

    println!("signing key : {}", keypair.secret_key_hex());
    println!("key hash    : {}", keypair.key_hash_hex());
    println!("address     : {}", address);
    eprintln!("Keep the signing key secret. Export it as VERITY_SIGNING_KEY.");
    Ok(())
}

async fn list_wallets(deployment: &DeploymentArgs) -> Result<()> {
    let service = build_service(deployment)?;
    let rows = service.wallet_summaries(Some(LOCAL_WALLET)).await;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn create(deployment: &DeploymentArgs, args: CreateArgs) -> Result<()> {
    let service = build_service(deployment)?;
    let proposal_id = args.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = NewProposal {
        id: Some(proposal_id.clone()),
        title: args.title,
        description: args.description,
        discussion_url: args.discussion_url,
        owner_pkh: args.owner,
        voting_start: args.voting_start,
        voting_end: args.voting_end,
        min_voting_tokens: args.min_voting_tokens,
        authorized_pkhs: parse_voters(&args.voters)?,
    };

    tracing::info!(proposal_id = %proposal_id, "creating proposal");
    let outcome = service.create_proposal(LOCAL_WALLET, request).await;
    report_submission(&service, &proposal_id, outcome, args.no_wait).await
}

async fn act(deployment: &DeploymentArgs, args: ActArgs) -> Result<()> {
    let service = build_service(deployment)?;
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;

    tracing::info!(proposal_id = %args.id, action = %args.action, "applying action");
    let outcome = service
        .apply_request(LOCAL_WALLET, &args.id, &args.action, &payload)
        .await;
    report_submission(&service, &args.id, outcome, args.no_wait).await
}

async fn status(deployment: &DeploymentArgs, args: StatusArgs) -> Result<()> {
    let backend = HttpBackend::new(deployment.backend_url.clone())?;
    let proposal = backend
        .fetch_status(&args.id)
        .await
        .map_err(|e| anyhow!(e.user_message()))
        .with_context(|| format!("failed to fetch proposal {}", args.id))?;
    println!("{}", serde_json::to_string_pretty(&proposal)?);
    Ok(())
}

async fn resume(deployment: &DeploymentArgs) -> Result<()> {
    let service = build_service(deployment)?;
    let resumed = service.resume_pending().context("failed to read syncing markers")?;
    if resumed.is_empty() {
        println!("nothing pending");
        return Ok(());
    }

    let mut events = service.subscribe();
    for id in &resumed {
        tracing::info!(proposal_id = %id, "resumed polling");
    }
    for _ in 0..resumed.len() {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(e) => bail!("event stream closed: {}", e),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_service(deployment: &DeploymentArgs) -> Result<GovernanceService> {
    let config = GovernanceConfig {
        network: deployment.network.into(),
        validator_script_hex: deployment.validator_script.clone(),
        plutus_version: deployment.plutus_version.into(),
        token_policy_id: deployment.token_policy.clone(),
        token_decimals: deployment.token_decimals,
        proposal_deposit: deployment.deposit,
        proposal_uri_base: deployment.uri_base.clone(),
        poll_attempts: deployment.poll_attempts,
        poll_interval_ms: deployment.poll_interval_ms,
        ..GovernanceConfig::default()
    };

    let backend = Arc::new(HttpBackend::new(deployment.backend_url.clone())?);
    let chain = Arc::new(HttpChain::new(deployment.chain_url.clone(), deployment.project_id.clone())?);

    let mut host = LocalWalletHost::new();
    if let Some(secret) = &deployment.signing_key {
        let keypair = PaymentKeypair::from_hex(secret).context("invalid signing key")?;
        host.add(LOCAL_WALLET, KeyWallet::new(keypair, config.network, chain.clone()));
    } else {
        tracing::warn!("no signing key configured; the local wallet is unavailable");
    }

    std::fs::create_dir_all(&deployment.data_dir)
        .with_context(|| format!("failed to create data directory: {}", deployment.data_dir.display()))?;
    let store = SledMarkerStore::open(deployment.data_dir.join("markers")).with_context(|| {
        format!("failed to open marker store in {}", deployment.data_dir.display())
    })?;

    GovernanceService::new(config, backend, chain, Arc::new(host), SyncMarkers::new(Arc::new(store)))
        .context("invalid governance configuration")
}

/// Prints the submission, then waits for the poller unless told not to.
///
/// A backend that refused the record is only a warning: the transaction is
/// on its way and the poller keeps watching.
async fn report_submission(
    service: &GovernanceService,
    proposal_id: &str,
    outcome: verity_governance::Result<Submitted>,
    no_wait: bool,
) -> Result<()> {
    let mut events = service.subscribe();
    match outcome {
        Ok(submitted) => println!("submitted {} in tx {}", submitted.proposal_id, submitted.tx_hash),
        Err(GovernanceError::BackendValidation { tx_hash, reason }) => {
            tracing::warn!(tx_hash = %tx_hash, reason = %reason, "backend refused the record");
            println!("submitted tx {} but the backend refused it: {}", tx_hash, reason);
        }
        Err(e) => bail!("{}", failure_message(&e)),
    }

    if no_wait {
        return Ok(());
    }

    let state = service.poller().wait(proposal_id).await;
    while let Ok(event) = events.try_recv() {
        if event.proposal_id() == proposal_id {
            print_event(&event);
        }
    }
    match state {
        SyncState::Synced => Ok(()),
        SyncState::TimedOut => Err(GovernanceError::PollingTimeout {
            proposal_id: proposal_id.to_string(),
            attempts: service.config().poll_attempts,
        })
        .context("still shown as pending; run `verity-gov resume` later"),
        other => bail!("polling for {} ended in state {:?}", proposal_id, other),
    }
}

/// User-facing text for a failed submission. Errors raised before anything
/// left the process say so.
fn failure_message(err: &GovernanceError) -> String {
    if err.is_preflight() {
        format!("{} (nothing was submitted)", err.user_message())
    } else {
        err.user_message()
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Synced { proposal_id, proposal, attempts } => println!(
            "synced {} after {} poll(s): status {:?}",
            proposal_id, attempts, proposal.status
        ),
        SyncEvent::TimedOut { proposal_id, attempts } => {
            println!("timed out waiting for {} after {} poll(s)", proposal_id, attempts)
        }
    }
}

/// Parses repeated `pkh=weight` pairs.
fn parse_voters(pairs: &[String]) -> Result<BTreeMap<String, u64>> {
    pairs
        .iter()
        .map(|pair| {
            let (pkh, weight) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("voter {:?} is not pkh=weight", pair))?;
            let weight = weight
                .trim()
                .parse::<u64>()
                .with_context(|| format!("voter {:?} has a non-numeric weight", pair))?;
            Ok((pkh.trim().to_lowercase(), weight))
        })
        .collect()
}
