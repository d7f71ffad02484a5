//! Fire-and-forget status updates
//!
//! Each update is one signed transaction carrying one UpdateStatus
//! instruction. Submission skips preflight and does not wait for
//! confirmation, so a returned signature says nothing about whether the
//! write lands.

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{chain::LedgerRpc, error::OrchestratorError};
use sol_verify_sdk::{codes, VerifierInstruction};

/// Prefix every status message with the target program
pub fn program_message(target: &Pubkey, text: &str) -> String {
    format!("Program {target} : {text}")
}

pub struct StatusReporter {
    rpc: Arc<dyn LedgerRpc>,
    program_id: Pubkey,
    authority: Arc<Keypair>,
}

impl StatusReporter {
    pub fn new(rpc: Arc<dyn LedgerRpc>, program_id: Pubkey, authority: Arc<Keypair>) -> Self {
        Self {
            rpc,
            program_id,
            authority,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Build the signed UpdateStatus transaction
    pub async fn build(
        &self,
        submitter: &Pubkey,
        status_code: u8,
        message: &str,
    ) -> Result<Transaction, OrchestratorError> {
        let instruction = VerifierInstruction::update_status(
            &self.program_id,
            &self.authority.pubkey(),
            submitter,
            status_code,
            message,
        )?;

        let recent_blockhash = self.rpc.latest_blockhash().await?;

        Ok(Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.authority.pubkey()),
            &[self.authority.as_ref()],
            recent_blockhash,
        ))
    }

    /// Build and submit one status update
    pub async fn send(
        &self,
        submitter: &Pubkey,
        status_code: u8,
        message: &str,
    ) -> Result<Signature, OrchestratorError> {
        let transaction = self.build(submitter, status_code, message).await?;
        self.rpc.send_unconfirmed(&transaction).await
    }

    /// Best-effort update; failures are logged, never returned
    pub async fn report(&self, submitter: &Pubkey, status_code: u8, message: &str) {
        match self.send(submitter, status_code, message).await {
            Ok(signature) => debug!(
                "Status {} ({}) for {} sent in {}",
                status_code,
                codes::describe(status_code),
                submitter,
                signature
            ),
            Err(e) => warn!(
                "Failed to send status {} for {}: {}",
                status_code, submitter, e
            ),
        }
    }
}
