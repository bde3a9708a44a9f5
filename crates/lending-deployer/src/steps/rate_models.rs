use async_trait::async_trait;
use deployment_ledger::LedgerKey;
use ethers::{
    abi::Token,
    types::{Address, U256},
};
use lending_params::RateModelParams;
use tracing::warn;

use crate::{
    errors::DeployError,
    executor::StepExecutor,
    keys,
    orchestrator::Step,
    solidity::{BLOCKS_PER_YEAR, JUMP_RATE_MODEL_V2, WHITE_PAPER_MODEL},
};

/// Deploys an interest rate model under its coefficient key.
pub struct DeployRateModel {
    model: RateModelParams,
    admin: Option<Address>,
}

impl DeployRateModel {
    pub fn new(model: RateModelParams, admin: Option<Address>) -> Self {
        Self { model, admin }
    }
}

#[async_trait]
impl Step for DeployRateModel {
    fn id(&self) -> String {
        format!("deploy-rate-model:{}", keys::rate_model(&self.model))
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::rate_model(&self.model)]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let key = keys::rate_model(&self.model);
        match &self.model {
            RateModelParams::WhitePaper(params) => {
                let args = params.derive()?;
                executor
                    .deploy(
                        key,
                        &WHITE_PAPER_MODEL,
                        vec![
                            Token::Uint(args.base_rate_per_year),
                            Token::Uint(args.multiplier_per_year),
                        ],
                    )
                    .await?;
            }
            RateModelParams::JumpRate(params) => {
                // A model recorded under a different block rate by an earlier
                // run is reported again instead of being redeployed.
                let recorded =
                    mismatched_deployment(executor, &self.model, params.blocks_per_year)?;
                if let Some((actual, address)) = recorded {
                    return Err(DeployError::UnexpectedState(format!(
                        "rate model at {address:#x} is recorded at {actual}, expected {key}"
                    )));
                }
                let args = params.derive()?;
                let owner = params
                    .admin
                    .or(self.admin)
                    .unwrap_or_else(|| executor.sender());
                let address = executor
                    .deploy(
                        key.clone(),
                        &JUMP_RATE_MODEL_V2,
                        vec![
                            Token::Uint(args.base_rate_per_year),
                            Token::Uint(args.multiplier_per_year),
                            Token::Uint(args.jump_multiplier_per_year),
                            Token::Uint(args.kink),
                            Token::Address(owner),
                        ],
                    )
                    .await?;

                // The contract hard codes its block time, so the key has to
                // reflect what it actually reports.
                let observed = executor.read_uint(address, BLOCKS_PER_YEAR, vec![]).await?;
                if observed != U256::from(params.blocks_per_year) {
                    executor.ledger().remove(&key)?;
                    let observed = u64::try_from(observed).map_err(|_| {
                        DeployError::UnexpectedState(format!(
                            "rate model at {address:#x} reports {observed} blocks per year"
                        ))
                    })?;
                    let actual = keys::jump_rate_model(observed, &self.model.fragment());
                    warn!(expected = %key, %actual, "rate model reports a different blocks per year");
                    executor.record(&actual, address)?;
                    return Err(DeployError::UnexpectedState(format!(
                        "rate model at {address:#x} reports {observed} blocks per year, expected {}",
                        params.blocks_per_year
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Finds a jump rate model with these coefficients that the ledger holds
/// under another blocks-per-year value.
fn mismatched_deployment(
    executor: &StepExecutor,
    model: &RateModelParams,
    blocks_per_year: u64,
) -> Result<Option<(LedgerKey, Address)>, DeployError> {
    let expected = keys::jump_rate_model(blocks_per_year, &model.fragment());
    let found = executor.ledger().entries()?.into_iter().find(|(key, _)| {
        let (segments, wanted) = (key.segments(), expected.segments());
        segments.len() == wanted.len()
            && segments[..2] == wanted[..2]
            && segments[3] == wanted[3]
            && segments[2] != wanted[2]
    });
    Ok(found)
}
