//! Loading compiled contracts from a Hardhat `artifacts/` directory.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use ethers::{abi::Abi, types::Bytes};
use serde::{de::DeserializeOwned, Deserialize};

use crate::errors::DeployError;

/// Identifies a contract by its source file and name, the same way
/// Hardhat's fully qualified names do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContractRef {
    pub source: &'static str,
    pub name: &'static str,
}

impl ContractRef {
    pub const fn new(source: &'static str, name: &'static str) -> Self {
        Self { source, name }
    }

    /// e.g. `contracts/CErc20Immutable.sol:CErc20Immutable`.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source, self.name)
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

/// The solc invocation that produced an artifact. Explorers need the exact
/// compiler version and standard JSON input to reproduce the bytecode.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn artifact_path(&self, contract: &ContractRef) -> PathBuf {
        self.root
            .join(contract.source)
            .join(format!("{}.json", contract.name))
    }

    pub fn load(&self, contract: &ContractRef) -> Result<Artifact, DeployError> {
        let artifact: Artifact = read_json(contract, &self.artifact_path(contract))?;
        if artifact.bytecode.is_empty() {
            return Err(DeployError::Artifact {
                contract: contract.to_string(),
                reason: "artifact has no bytecode; is the contract abstract?".into(),
            });
        }
        Ok(artifact)
    }

    /// Follows the artifact's `.dbg.json` file to its build info.
    pub fn build_info(&self, contract: &ContractRef) -> Result<BuildInfo, DeployError> {
        let dbg_path = self
            .root
            .join(contract.source)
            .join(format!("{}.dbg.json", contract.name));
        let dbg: DebugFile = read_json(contract, &dbg_path)?;
        let build_info_path = dbg_path
            .parent()
            .unwrap_or(&self.root)
            .join(dbg.build_info);
        read_json(contract, &build_info_path)
    }
}

fn read_json<T: DeserializeOwned>(contract: &ContractRef, path: &Path) -> Result<T, DeployError> {
    let artifact_err = |reason: String| DeployError::Artifact {
        contract: contract.to_string(),
        reason,
    };
    let contents = fs::read_to_string(path)
        .map_err(|e| artifact_err(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents).map_err(|e| artifact_err(format!("{}: {e}", path.display())))
}
