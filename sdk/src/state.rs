//! Account layouts owned by the verifier program

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

use crate::{
    codes::{self, VerificationCode},
    instruction::CodeMeta,
};

/// Current contents of a submitter's status account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub code: u8,
    pub message: String,
}

impl StatusRecord {
    /// Byte 0 is the code, the remainder is the message padded with zeros.
    pub fn from_account_data(data: &[u8]) -> Option<Self> {
        let (&code, rest) = data.split_first()?;
        let end = rest.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);

        Some(Self {
            code,
            message: String::from_utf8_lossy(&rest[..end]).into_owned(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        codes::is_terminal(self.code)
    }
}

/// A target program's verification record
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub verified_code: u8,
    pub test_address: [u8; 32],
    pub last_verified_slot: u64,
    pub data_hash: [u8; 32],
    pub code_meta: CodeMeta,
}

impl VerificationRecord {
    /// Decode the record prefix; trailing account space is ignored.
    pub fn from_account_data(data: &[u8]) -> std::io::Result<Self> {
        let mut buf = data;
        Self::deserialize(&mut buf)
    }

    pub fn code(&self) -> Option<VerificationCode> {
        VerificationCode::from_u8(self.verified_code)
    }

    pub fn test_address(&self) -> Pubkey {
        Pubkey::new_from_array(self.test_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_record_trims_padding() {
        let mut data = vec![105u8];
        data.extend_from_slice(b"Program abc : build failed");
        data.extend_from_slice(&[0u8; 40]);

        let record = StatusRecord::from_account_data(&data).unwrap();
        assert_eq!(record.code, codes::BUILD_FAILED);
        assert_eq!(record.message, "Program abc : build failed");
        assert!(record.is_terminal());
    }

    #[test]
    fn test_status_record_code_only() {
        let record = StatusRecord::from_account_data(&[0u8; 16]).unwrap();
        assert_eq!(record.code, codes::IN_PROGRESS);
        assert!(record.message.is_empty());
        assert!(!record.is_terminal());

        assert!(StatusRecord::from_account_data(&[]).is_none());
    }

    #[test]
    fn test_verification_record_ignores_trailing_space() {
        let record = VerificationRecord {
            verified_code: 2,
            test_address: [4u8; 32],
            last_verified_slot: 1_000,
            data_hash: [5u8; 32],
            code_meta: CodeMeta::new("https://github.com/a/b", "abc", "program").unwrap(),
        };
        let mut data = record.try_to_vec().unwrap();
        data.extend_from_slice(&[0u8; 64]);

        let decoded = VerificationRecord::from_account_data(&data).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.code(), Some(VerificationCode::MatchButUpgradeable));
        assert_eq!(decoded.code_meta.fields().unwrap().git_commit, "abc");
    }

    #[test]
    fn test_verification_record_truncated() {
        assert!(VerificationRecord::from_account_data(&[3u8; 20]).is_err());
    }
}
