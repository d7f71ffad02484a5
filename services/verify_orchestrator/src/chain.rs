//! Ledger RPC access
//!
//! Everything the orchestrator needs from a cluster goes through [`LedgerRpc`]
//! so the control loop can run against an in-memory ledger in tests.

use async_trait::async_trait;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig},
};
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use std::{str::FromStr, sync::Arc};

use crate::error::OrchestratorError;
use sol_verify_sdk::Network;

/// One entry of a signature listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub signature: Signature,
    pub slot: u64,
    pub failed: bool,
}

/// An instruction with its account indices resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// A fetched transaction reduced to what the poller inspects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub signature: Signature,
    pub slot: u64,
    pub failed: bool,
    pub instructions: Vec<ObservedInstruction>,
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_slot(&self) -> Result<u64, OrchestratorError>;

    /// `Ok(None)` when the account does not exist
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, OrchestratorError>;

    /// Signatures mentioning `address`, newest first, strictly older than
    /// `before` and strictly newer than `until`.
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>, OrchestratorError>;

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<ObservedTransaction, OrchestratorError>;

    async fn latest_blockhash(&self) -> Result<Hash, OrchestratorError>;

    /// Submit without preflight simulation and without waiting for confirmation
    async fn send_unconfirmed(&self, transaction: &Transaction)
        -> Result<Signature, OrchestratorError>;
}

/// [`LedgerRpc`] backed by a Solana JSON-RPC endpoint
pub struct SolanaLedger {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl SolanaLedger {
    pub fn new(rpc_url: &str) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            client: RpcClient::new_with_commitment(rpc_url.to_string(), commitment),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedger {
    async fn get_slot(&self) -> Result<u64, OrchestratorError> {
        Ok(self.client.get_slot().await?)
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, OrchestratorError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>, OrchestratorError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before,
            until,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await?;

        statuses
            .into_iter()
            .map(|status| {
                let signature = Signature::from_str(&status.signature).map_err(|e| {
                    OrchestratorError::RpcError(format!(
                        "malformed signature {}: {}",
                        status.signature, e
                    ))
                })?;
                Ok(SignatureEntry {
                    signature,
                    slot: status.slot,
                    failed: status.err.is_some(),
                })
            })
            .collect()
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<ObservedTransaction, OrchestratorError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        let confirmed = self
            .client
            .get_transaction_with_config(signature, config)
            .await?;

        let failed = confirmed
            .transaction
            .meta
            .as_ref()
            .is_some_and(|meta| meta.err.is_some());

        let transaction = confirmed.transaction.transaction.decode().ok_or_else(|| {
            OrchestratorError::RpcError(format!("could not decode transaction {signature}"))
        })?;

        let keys = transaction.message.static_account_keys();
        let instructions = transaction
            .message
            .instructions()
            .iter()
            .filter_map(|ix| {
                // Accounts loaded through address lookup tables are not
                // resolved; instructions referencing them are dropped.
                let program_id = *keys.get(usize::from(ix.program_id_index))?;
                let accounts = ix
                    .accounts
                    .iter()
                    .map(|&i| keys.get(usize::from(i)).copied())
                    .collect::<Option<Vec<_>>>()?;
                Some(ObservedInstruction {
                    program_id,
                    accounts,
                    data: ix.data.clone(),
                })
            })
            .collect();

        Ok(ObservedTransaction {
            signature: *signature,
            slot: confirmed.slot,
            failed,
            instructions,
        })
    }

    async fn latest_blockhash(&self) -> Result<Hash, OrchestratorError> {
        Ok(self.client.get_latest_blockhash().await?)
    }

    async fn send_unconfirmed(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, OrchestratorError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            ..RpcSendTransactionConfig::default()
        };
        Ok(self
            .client
            .send_transaction_with_config(transaction, config)
            .await?)
    }
}

/// One RPC handle per network a target program can live on
#[derive(Clone)]
pub struct Clusters {
    pub test_net: Arc<dyn LedgerRpc>,
    pub dev_net: Arc<dyn LedgerRpc>,
    pub main_net: Arc<dyn LedgerRpc>,
}

impl Clusters {
    /// Use the same endpoint for every network
    pub fn uniform(rpc: Arc<dyn LedgerRpc>) -> Self {
        Self {
            test_net: rpc.clone(),
            dev_net: rpc.clone(),
            main_net: rpc,
        }
    }

    pub fn get(&self, network: Network) -> &dyn LedgerRpc {
        match network {
            Network::TestNet => self.test_net.as_ref(),
            Network::DevNet => self.dev_net.as_ref(),
            Network::MainNet => self.main_net.as_ref(),
        }
    }
}
