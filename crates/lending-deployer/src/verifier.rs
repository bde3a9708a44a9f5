use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    types::Address,
    utils::hex,
};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{
    artifacts::{ArtifactStore, ContractRef},
    constants::{POLL_INTERVAL, VERIFY_STATUS_CHECKS},
    errors::VerificationError,
};

/// Publishes contract sources to a block explorer.
///
/// Verification is best-effort: callers treat errors as warnings, and
/// verifying an already verified contract succeeds.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        address: Address,
        contract: &ContractRef,
        constructor_args: &[Token],
    ) -> Result<(), VerificationError>;
}

/// A verifier for Etherscan-compatible explorer APIs, submitting the solc
/// standard JSON input from Hardhat's build info.
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    artifacts: ArtifactStore,
    poll_interval: Duration,
    status_checks: usize,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    result: String,
}

impl ApiResponse {
    fn already_verified(&self) -> bool {
        self.result.to_lowercase().contains("already verified")
    }
}

impl EtherscanVerifier {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, artifacts: ArtifactStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            artifacts,
            poll_interval: *POLL_INTERVAL,
            status_checks: *VERIFY_STATUS_CHECKS,
        }
    }

    /// Overrides how often, and how many times, a submitted job is polled.
    pub fn with_polling(mut self, poll_interval: Duration, status_checks: usize) -> Self {
        self.poll_interval = poll_interval;
        self.status_checks = status_checks;
        self
    }

    async fn check_status(&self, guid: &str) -> Result<ApiResponse, VerificationError> {
        self.client
            .get(&self.api_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .map_err(|e| VerificationError::Request(e.to_string()))?
            .json::<ApiResponse>()
            .await
            .map_err(|e| VerificationError::Request(e.to_string()))
    }
}

#[async_trait]
impl Verifier for EtherscanVerifier {
    async fn verify(
        &self,
        address: Address,
        contract: &ContractRef,
        constructor_args: &[Token],
    ) -> Result<(), VerificationError> {
        let build_info = self
            .artifacts
            .build_info(contract)
            .map_err(|e| VerificationError::BuildInfo(e.to_string()))?;

        // Submit the verification job.
        let form = [
            ("apikey", self.api_key.clone()),
            ("module", "contract".into()),
            ("action", "verifysourcecode".into()),
            ("contractaddress", format!("{address:#x}")),
            ("sourceCode", build_info.input.to_string()),
            ("codeformat", "solidity-standard-json-input".into()),
            ("contractname", contract.fully_qualified_name()),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // The misspelling is part of the API.
            ("constructorArguements", hex::encode(abi::encode(constructor_args))),
        ];
        let submitted = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| VerificationError::Request(e.to_string()))?
            .json::<ApiResponse>()
            .await
            .map_err(|e| VerificationError::Request(e.to_string()))?;
        if submitted.already_verified() {
            info!(%contract, ?address, "contract is already verified");
            return Ok(());
        }
        if submitted.status != "1" {
            return Err(VerificationError::Rejected(submitted.result));
        }

        // Poll the job until the explorer has compiled and compared the code.
        let guid = submitted.result;
        for _ in 0..self.status_checks {
            sleep(self.poll_interval).await;
            let status = self.check_status(&guid).await?;
            debug!(%contract, %guid, result = %status.result, "verification status");
            if status.result.starts_with("Pending") {
                continue;
            }
            if status.status == "1" || status.already_verified() {
                info!(%contract, ?address, "contract verified");
                return Ok(());
            }
            return Err(VerificationError::Rejected(status.result));
        }
        Err(VerificationError::Pending(self.status_checks))
    }
}
