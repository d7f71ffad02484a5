//! Instruction codec for the verifier program
//!
//! The ledger program decodes a borsh tagged union: one discriminant byte
//! followed by the variant's fields. Addresses are raw 32-byte arrays and
//! strings are u32-LE length prefixed.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::{
    fmt,
    io::{self, Read, Write},
};
use thiserror::Error;

use crate::pda::PdaDeriver;

/// Size of the delimited code metadata blob
pub const CODE_META_LEN: usize = 512;

pub const COMMIT_MARKER: &str = "=======BEGIN GIT COMMIT=======";
pub const DIR_MARKER: &str = "=======BEGIN GIT DIR=======";
pub const END_MARKER: &str = "=======END GIT DIR=======";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InstructionError {
    #[error("empty instruction data")]
    Empty,

    #[error("unknown instruction tag: {0}")]
    UnknownTag(u8),

    #[error("malformed instruction payload: {0}")]
    Malformed(String),

    #[error("code metadata is {0} bytes, limit is {CODE_META_LEN}")]
    CodeMetaTooLong(usize),
}

/// Cluster the target program is deployed on
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum Network {
    TestNet,
    DevNet,
    MainNet,
}

impl Network {
    /// Seed used when deriving the verification record address
    pub fn seed(&self) -> &'static str {
        match self {
            Network::TestNet => "test_net",
            Network::DevNet => "dev_net",
            Network::MainNet => "main_net",
        }
    }

    /// Wire discriminant, also passed to the verifier on its command line
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Network::TestNet),
            1 => Some(Network::DevNet),
            2 => Some(Network::MainNet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.seed())
    }
}

/// A request to verify that `address` was built from the given source
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmitProgramMeta {
    pub address: [u8; 32],
    pub network: Network,
    pub git_repo: String,
    /// Empty when the repo field points at a downloadable archive
    pub git_commit: String,
    pub directory: String,
    /// Named build environment; empty means the explicit versions below apply
    pub docker_version: String,
    pub rust_version: String,
    pub solana_version: String,
    pub anchor_version: String,
}

impl SubmitProgramMeta {
    pub fn target(&self) -> Pubkey {
        Pubkey::new_from_array(self.address)
    }

    pub fn is_archive(&self) -> bool {
        self.git_commit.is_empty()
    }

    pub fn preset(&self) -> Option<&str> {
        if self.docker_version.is_empty() {
            None
        } else {
            Some(&self.docker_version)
        }
    }
}

/// Verification outcome written by the external verifier
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifyProgramMeta {
    pub test_address: [u8; 32],
    pub last_verified_slot: u64,
    pub verified: u8,
    pub data_hash: [u8; 32],
    pub code_meta: CodeMeta,
}

/// Status update for a submitter's status account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusMeta {
    pub address: [u8; 32],
    pub status_code: u8,
    pub log_message: String,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum VerifierInstruction {
    SubmitProgram(SubmitProgramMeta),
    VerifyProgram(VerifyProgramMeta),
    UpdateStatus(StatusMeta),
}

impl VerifierInstruction {
    const MAX_TAG: u8 = 2;

    pub fn pack(&self) -> Result<Vec<u8>, InstructionError> {
        self.try_to_vec()
            .map_err(|e| InstructionError::Malformed(e.to_string()))
    }

    /// Decode instruction data. Anything that is not exactly one known
    /// variant is rejected, including trailing bytes.
    pub fn unpack(data: &[u8]) -> Result<Self, InstructionError> {
        let tag = *data.first().ok_or(InstructionError::Empty)?;
        if tag > Self::MAX_TAG {
            return Err(InstructionError::UnknownTag(tag));
        }

        Self::try_from_slice(data).map_err(|e| InstructionError::Malformed(e.to_string()))
    }

    /// Build an UpdateStatus instruction signed by `authority`
    pub fn update_status(
        program_id: &Pubkey,
        authority: &Pubkey,
        submitter: &Pubkey,
        status_code: u8,
        log_message: &str,
    ) -> Result<Instruction, InstructionError> {
        let data = VerifierInstruction::UpdateStatus(StatusMeta {
            address: submitter.to_bytes(),
            status_code,
            log_message: log_message.to_string(),
        })
        .pack()?;

        let (status_account, _) = PdaDeriver::derive_status(submitter, program_id);

        Ok(Instruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*authority, true),
                AccountMeta::new(status_account, false),
                AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
            ],
            data,
        })
    }

    /// Build a SubmitProgram instruction signed by the submitter
    pub fn submit_program(
        program_id: &Pubkey,
        submitter: &Pubkey,
        meta: SubmitProgramMeta,
    ) -> Result<Instruction, InstructionError> {
        let (record_account, _) =
            PdaDeriver::derive_verification(&meta.target(), meta.network, program_id);
        let (status_account, _) = PdaDeriver::derive_status(submitter, program_id);
        let data = VerifierInstruction::SubmitProgram(meta).pack()?;

        Ok(Instruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new_readonly(*submitter, true),
                AccountMeta::new(record_account, false),
                AccountMeta::new(status_account, false),
                AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
            ],
            data,
        })
    }
}

/// Source fields recovered from a code metadata blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMetaFields {
    pub git_repo: String,
    pub git_commit: String,
    pub directory: String,
}

/// Fixed-size, marker-delimited record of where verified code came from
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CodeMeta(pub [u8; CODE_META_LEN]);

impl CodeMeta {
    pub fn new(git_repo: &str, git_commit: &str, directory: &str) -> Result<Self, InstructionError> {
        let text = format!("{git_repo}{COMMIT_MARKER}{git_commit}{DIR_MARKER}{directory}{END_MARKER}");
        if text.len() > CODE_META_LEN {
            return Err(InstructionError::CodeMetaTooLong(text.len()));
        }

        let mut bytes = [0u8; CODE_META_LEN];
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self(bytes))
    }

    /// Split the blob back into its fields. Returns `None` when a marker is
    /// missing or out of order.
    pub fn fields(&self) -> Option<CodeMetaFields> {
        let text = std::str::from_utf8(&self.0).ok()?;
        let (git_repo, rest) = text.split_once(COMMIT_MARKER)?;
        let (git_commit, rest) = rest.split_once(DIR_MARKER)?;
        let (directory, _) = rest.split_once(END_MARKER)?;

        Some(CodeMetaFields {
            git_repo: git_repo.to_string(),
            git_commit: git_commit.to_string(),
            directory: directory.to_string(),
        })
    }
}

impl Default for CodeMeta {
    fn default() -> Self {
        Self([0u8; CODE_META_LEN])
    }
}

impl fmt::Debug for CodeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fields() {
            Some(fields) => f.debug_tuple("CodeMeta").field(&fields).finish(),
            None => f.write_str("CodeMeta(<unparsed>)"),
        }
    }
}

impl BorshSerialize for CodeMeta {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl BorshDeserialize for CodeMeta {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; CODE_META_LEN];
        reader.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }
}
