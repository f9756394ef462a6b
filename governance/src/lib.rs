// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Verity Governance: Proposal Transaction Engine
//!
//! Turns governance decisions into ledger transactions and then waits,
//! patiently, for the rest of the world to agree that they happened.
//!
//! A proposal lives in a single output locked by the governance validator.
//! Its state is the inline datum; every lifecycle step (tuning parameters,
//! opening the vote, voting, finalizing, executing) spends that output and
//! recreates it with the next datum. The chain is the only arbiter of who
//! got there first. We just make sure our transactions are well-formed
//! before a wallet ever asks the user to sign.
//!
//! ## Architecture
//!
//! - **plutus**: On-chain data model: datums, redeemers, their CBOR.
//! - **transaction**: Network parameters, tx body model, the builder.
//! - **wallet**: Capability port, session gateway, a local key wallet.
//! - **submit**: Detached signing and single-shot submission.
//! - **sync**: Durable markers and the reconciliation poller.
//! - **backend**: The governance REST backend and chain API ports.
//! - **service**: The end-to-end create and update flows.
//! - **proposal**: Proposal records, lifecycle rules, UTXOs and values.
//! - **address**, **crypto**: Shelley addresses, blake2b, Ed25519.
//! - **config**: Protocol constants and deployment settings.
//! - **mock**: In-memory doubles for every port.
//!
//! ## Ground Rules
//!
//! 1. Fail before the network whenever possible.
//! 2. Never resend a rejected transaction on our own.
//! 3. Optimistic state is always marked as such until the backend agrees.

pub mod address;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mock;
pub mod plutus;
pub mod proposal;
pub mod service;
pub mod submit;
pub mod sync;
pub mod transaction;
pub mod wallet;

pub use error::{GovernanceError, Result, TraceCode};
pub use service::{GovernanceService, NewProposal, Submitted};
