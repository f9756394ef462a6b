//! reqwest clients for the governance backend and a Blockfrost-shaped chain
//! API.
//!
//! Neither client retries. A failed status poll is retried by the poller on
//! its own schedule, and a failed submission must never be blindly resent.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChainProvider, GovernanceBackend, UtxosResponse, ValidateGovTxRequest, ValidationVerdict};
use crate::error::{GovernanceError, Result, TraceCode};
use crate::proposal::utxo::bundle_from_amounts;
use crate::proposal::{AssetAmount, MatchingUtxo, Proposal, Utxo};
use crate::transaction::params::{ParameterSource, ProtocolParameters, Ratio};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Denominator used to turn decimal execution prices into exact ratios.
const PRICE_DENOMINATOR: u64 = 10_000_000;

fn client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(GovernanceError::from)
}

async fn failure(context: &str, resp: Response) -> GovernanceError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    GovernanceError::Backend(format!("{} failed {} {}", context, status, text))
}

// ---------------------------------------------------------------------------
// Governance backend
// ---------------------------------------------------------------------------

/// HTTP client for the governance backend.
#[derive(Clone)]
pub struct HttpBackend {
    base: Url,
    client: Client,
}

impl HttpBackend {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let base = base.into();
        let base = Url::parse(&base)
            .map_err(|e| GovernanceError::Validation(format!("invalid backend url {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(GovernanceError::Validation(format!("backend url {} cannot take a path", base)));
        }
        Ok(Self { base, client: client()? })
    }

    /// `base` plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Dot segments would be dropped from the path, so such ids are refused.
    fn proposal_endpoint(&self, proposal_id: &str, leaf: &str) -> Result<Url> {
        if matches!(proposal_id, "" | "." | "..") {
            return Err(GovernanceError::Validation(format!("invalid proposal id {:?}", proposal_id)));
        }
        Ok(self.endpoint(&["api", "proposal", proposal_id, leaf]))
    }
}

#[async_trait]
impl GovernanceBackend for HttpBackend {
    async fn fetch_status(&self, proposal_id: &str) -> Result<Proposal> {
        let url = self.proposal_endpoint(proposal_id, "status")?;
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json::<Proposal>().await?),
            StatusCode::NOT_FOUND => Err(GovernanceError::NotFound(format!("proposal {}", proposal_id))),
            _ => Err(failure("fetch_status", resp).await),
        }
    }

    async fn fetch_utxos(&self, proposal_id: &str) -> Result<Vec<MatchingUtxo>> {
        let url = self.proposal_endpoint(proposal_id, "utxos")?;
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json::<UtxosResponse>().await?.matching_utxos),
            StatusCode::NOT_FOUND => Err(GovernanceError::NotFound(format!("utxos of proposal {}", proposal_id))),
            _ => Err(failure("fetch_utxos", resp).await),
        }
    }

    async fn validate_gov_tx(&self, request: &ValidateGovTxRequest) -> Result<ValidationVerdict> {
        let url = self.endpoint(&["api", "validate_gov_tx"]);
        let resp = self.client.post(url).json(request).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<ValidationVerdict>().await?);
        }
        // A 4xx is the backend saying no, with a reason in the body.
        if status.is_client_error() {
            let reason = resp.text().await.unwrap_or_default();
            debug!(tx_hash = %request.tx_hash, %status, "backend refused transaction");
            return Ok(ValidationVerdict {
                valid: false,
                reason: Some(if reason.is_empty() { status.to_string() } else { reason }),
            });
        }
        Err(failure("validate_gov_tx", resp).await)
    }
}

// ---------------------------------------------------------------------------
// Chain API
// ---------------------------------------------------------------------------

/// Blockfrost-compatible chain API client. Also serves the network
/// parameters for the transaction builder.
#[derive(Clone)]
pub struct HttpChain {
    base: String,
    project_id: Option<String>,
    client: Client,
}

impl HttpChain {
    pub fn new(base: impl Into<String>, project_id: Option<String>) -> Result<Self> {
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            project_id,
            client: client()?,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base, path)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.project_id {
            Some(id) => req.header("project_id", id),
            None => req,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChainUtxo {
    tx_hash: String,
    output_index: u32,
    address: String,
    amount: Vec<AssetAmount>,
    #[serde(default)]
    inline_datum: Option<String>,
}

impl ChainUtxo {
    fn into_utxo(self) -> Result<Utxo> {
        Ok(Utxo {
            assets: bundle_from_amounts(&self.amount)?,
            tx_hash: self.tx_hash,
            output_index: self.output_index,
            address: self.address,
            inline_datum: self.inline_datum,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChainParameters {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: u64,
    #[serde(default)]
    price_mem: Option<f64>,
    #[serde(default)]
    price_step: Option<f64>,
    #[serde(default)]
    coins_per_utxo_size: Option<String>,
    #[serde(default)]
    collateral_percent: Option<u64>,
    #[serde(default)]
    cost_models_raw: Option<BTreeMap<String, Vec<i64>>>,
}

impl ChainParameters {
    fn into_parameters(self) -> Result<ProtocolParameters> {
        let missing = |field: &str| GovernanceError::Backend(format!("network parameters lack {}", field));
        let coins_per_utxo_byte = self
            .coins_per_utxo_size
            .ok_or_else(|| missing("coins_per_utxo_size"))?
            .parse::<u64>()
            .map_err(|_| GovernanceError::Backend("coins_per_utxo_size is not an integer".into()))?;
        Ok(ProtocolParameters {
            min_fee_a: self.min_fee_a,
            min_fee_b: self.min_fee_b,
            max_tx_size: self.max_tx_size,
            price_mem: Ratio::from_decimal(self.price_mem.ok_or_else(|| missing("price_mem"))?, PRICE_DENOMINATOR)?,
            price_step: Ratio::from_decimal(self.price_step.ok_or_else(|| missing("price_step"))?, PRICE_DENOMINATOR)?,
            coins_per_utxo_byte,
            collateral_percent: self.collateral_percent.ok_or_else(|| missing("collateral_percent"))?,
            cost_models: self.cost_models_raw.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChainProvider for HttpChain {
    async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let resp = self.get(&format!("/addresses/{}/utxos", address)).send().await?;
        match resp.status() {
            s if s.is_success() => resp
                .json::<Vec<ChainUtxo>>()
                .await?
                .into_iter()
                .map(ChainUtxo::into_utxo)
                .collect(),
            // An address that never received anything is unknown, not broken.
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(failure("address_utxos", resp).await),
        }
    }

    async fn submit_tx(&self, tx_cbor: &[u8]) -> Result<String> {
        let req = self
            .client
            .post(format!("{}/tx/submit", self.base))
            .header("Content-Type", "application/cbor")
            .body(tx_cbor.to_vec());
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<String>().await?);
        }
        let message = resp.text().await.unwrap_or_default();
        warn!(%status, "chain rejected transaction");
        Err(GovernanceError::Submission {
            trace: TraceCode::recognize(&message),
            message,
        })
    }
}

#[async_trait]
impl ParameterSource for HttpChain {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters> {
        let resp = self.get("/epochs/latest/parameters").send().await?;
        if !resp.status().is_success() {
            return Err(failure("protocol_parameters", resp).await);
        }
        resp.json::<ChainParameters>().await?.into_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_parameters_convert() {
        let raw = serde_json::json!({
            "min_fee_a": 44,
            "min_fee_b": 155381,
            "max_tx_size": 16384,
            "price_mem": 0.0577,
            "price_step": 0.0000721,
            "coins_per_utxo_size": "4310",
            "collateral_percent": 150,
            "cost_models_raw": { "PlutusV3": [1, 2, 3] },
            "e_max": 18
        });
        let params = serde_json::from_value::<ChainParameters>(raw).unwrap().into_parameters().unwrap();
        assert_eq!(params.min_fee_a, 44);
        assert_eq!(params.coins_per_utxo_byte, 4310);
        assert_eq!(params.price_mem, Ratio::new(577_000, PRICE_DENOMINATOR));
        assert_eq!(params.price_step, Ratio::new(721, PRICE_DENOMINATOR));
        assert_eq!(params.cost_models["PlutusV3"], vec![1, 2, 3]);
    }

    #[test]
    fn missing_price_is_a_backend_error() {
        let raw = serde_json::json!({
            "min_fee_a": 44,
            "min_fee_b": 155381,
            "max_tx_size": 16384,
            "coins_per_utxo_size": "4310",
            "collateral_percent": 150
        });
        let err = serde_json::from_value::<ChainParameters>(raw).unwrap().into_parameters().unwrap_err();
        assert!(matches!(err, GovernanceError::Backend(ref m) if m.contains("price_mem")));
    }

    #[test]
    fn chain_utxo_converts() {
        let raw = serde_json::json!({
            "tx_hash": "ab".repeat(32),
            "output_index": 1,
            "address": "addr_test1vq",
            "amount": [{ "unit": "lovelace", "quantity": "1500000" }],
            "inline_datum": null,
            "data_hash": null
        });
        let utxo = serde_json::from_value::<ChainUtxo>(raw).unwrap().into_utxo().unwrap();
        assert_eq!(utxo.assets.lovelace(), 1_500_000);
        assert_eq!(utxo.output_index, 1);
        assert!(utxo.inline_datum.is_none());
    }

    #[test]
    fn utxos_response_tolerates_sparse_entries() {
        let raw = r#"{"matching_utxos":[{"tx_hash":"aa","output_index":0}]}"#;
        let resp: UtxosResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.matching_utxos.len(), 1);
        assert!(resp.matching_utxos[0].inline_datum.is_none());
    }

    #[test]
    fn proposal_ids_are_one_encoded_segment() {
        let backend = HttpBackend::new("http://localhost:8080/").unwrap();
        assert_eq!(
            backend.proposal_endpoint("a/b c", "status").unwrap().as_str(),
            "http://localhost:8080/api/proposal/a%2Fb%20c/status"
        );
        assert_eq!(
            backend.proposal_endpoint("../admin?x#y", "utxos").unwrap().as_str(),
            "http://localhost:8080/api/proposal/..%2Fadmin%3Fx%23y/utxos"
        );
        assert!(backend.proposal_endpoint("..", "status").is_err());

        let prefixed = HttpBackend::new("https://gov.example/v1").unwrap();
        assert_eq!(
            prefixed.endpoint(&["api", "validate_gov_tx"]).as_str(),
            "https://gov.example/v1/api/validate_gov_tx"
        );
    }

    #[test]
    fn backend_url_must_be_absolute() {
        assert!(matches!(HttpBackend::new("localhost:8080"), Err(GovernanceError::Validation(_))));
        assert!(matches!(HttpBackend::new("not a url"), Err(GovernanceError::Validation(_))));
    }

    #[test]
    fn clients_build() {
        assert!(HttpBackend::new("http://localhost:8080/").is_ok());
        assert!(HttpChain::new("http://localhost:3000", Some("preprod123".into())).is_ok());
    }
}
