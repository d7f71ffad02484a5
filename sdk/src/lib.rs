//! Sol Verify SDK - ledger-facing types for the program verification service
//!
//! This crate provides:
//! - The verifier program's instruction codec
//! - The status-code taxonomy shared by the orchestrator, build jobs and the verifier
//! - Status account and verification record layouts
//! - PDA derivation for both account kinds

pub mod codes;
pub mod instruction;
pub mod pda;
pub mod state;

pub use codes::VerificationCode;
pub use instruction::{
    CodeMeta, InstructionError, Network, StatusMeta, SubmitProgramMeta, VerifierInstruction,
    VerifyProgramMeta,
};
pub use pda::PdaDeriver;
pub use state::{StatusRecord, VerificationRecord};

/// Seed suffix of the per-submitter status account
pub const STATUS_SEED: &[u8] = b"user_account";
