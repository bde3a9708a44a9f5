use std::{env, time::Duration};

use ethers::{signers::LocalWallet, utils::keccak256};

lazy_static! {
    // Well-known accounts for local and mock deployments.
    pub static ref ALICE: LocalWallet = LocalWallet::from_bytes(&keccak256("alice")).unwrap();
    pub static ref BOB: LocalWallet = LocalWallet::from_bytes(&keccak256("bob")).unwrap();

    // How often pending transactions and explorer jobs are polled.
    pub static ref POLL_INTERVAL: Duration = env::var("DEPLOY_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2));

    // The number of times a verification job is checked before giving up.
    pub static ref VERIFY_STATUS_CHECKS: usize = env::var("DEPLOY_VERIFY_STATUS_CHECKS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);
}
