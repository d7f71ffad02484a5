//! Error types for the verification orchestrator

use sol_verify_sdk::InstructionError;
use solana_client::client_error::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("RPC connection error: {0}")]
    RpcError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Instruction error: {0}")]
    InstructionError(#[from] InstructionError),

    #[error("Keypair error: {0}")]
    KeypairError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Container runtime error: {0}")]
    ContainerError(String),

    #[error("Source probe error: {0}")]
    SourceError(String),

    #[error("Build environment error: {0}")]
    EnvironmentError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ClientError> for OrchestratorError {
    fn from(err: ClientError) -> Self {
        OrchestratorError::RpcError(err.to_string())
    }
}
