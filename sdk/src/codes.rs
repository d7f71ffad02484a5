//! Status codes written to submitter status accounts
//!
//! 0 means a job is still in progress, 1 is the success terminal, and every
//! value from 100 up is a terminal error. 2-99 are reserved.

use serde::{Deserialize, Serialize};

pub const IN_PROGRESS: u8 = 0;
pub const SUCCESS: u8 = 1;

/// First code of the error range
pub const ERROR_BASE: u8 = 100;

pub const PROGRAM_DOESNT_EXIST: u8 = 100;
pub const GIT_REPO_DOESNT_EXIST: u8 = 101;
pub const GIT_DIR_DOESNT_EXIST: u8 = 102;
pub const GIT_COMMIT_DOESNT_EXIST: u8 = 103;
pub const UNSUPPORTED_LANGUAGE: u8 = 104;
pub const BUILD_FAILED: u8 = 105;
pub const DOCKER_DOESNT_EXIST: u8 = 106;
pub const DOCKER_BUILD_FAILED: u8 = 107;
pub const SECURITY_TXT_MISMATCH: u8 = 108;
/// Emitted by the verifier: program is verified and immutable, new run mismatched
pub const VERIFIED_IMMUTABLE_MISMATCH: u8 = 109;
/// Emitted by the verifier: program unchanged since last verification, new run mismatched
pub const VERIFIED_UNCHANGED_MISMATCH: u8 = 110;
pub const ARCHIVE_EXTRACT_FAILED: u8 = 111;
pub const OUTPUT_DIR_NOT_FOUND: u8 = 112;
pub const ARTIFACT_NOT_FOUND: u8 = 113;
pub const DEPLOY_FAILED: u8 = 114;
pub const FUNDING_FAILED: u8 = 115;
pub const TOOLKIT_FETCH_FAILED: u8 = 116;
pub const VERIFICATION_FAILED: u8 = 117;

/// Whether a status code ends a job's lifecycle
pub fn is_terminal(code: u8) -> bool {
    code == SUCCESS || code >= ERROR_BASE
}

pub fn is_error(code: u8) -> bool {
    code >= ERROR_BASE
}

pub fn describe(code: u8) -> &'static str {
    match code {
        IN_PROGRESS => "in progress",
        SUCCESS => "complete",
        PROGRAM_DOESNT_EXIST => "program doesn't exist",
        GIT_REPO_DOESNT_EXIST => "git repo doesn't exist",
        GIT_DIR_DOESNT_EXIST => "git directory doesn't exist",
        GIT_COMMIT_DOESNT_EXIST => "git commit doesn't exist",
        UNSUPPORTED_LANGUAGE => "no recognized build manifest",
        BUILD_FAILED => "build failed",
        DOCKER_DOESNT_EXIST => "build environment doesn't exist",
        DOCKER_BUILD_FAILED => "build environment failed to build",
        SECURITY_TXT_MISMATCH => "security.txt source mismatch",
        VERIFIED_IMMUTABLE_MISMATCH => "verified immutable program no longer matches",
        VERIFIED_UNCHANGED_MISMATCH => "unchanged program no longer matches",
        ARCHIVE_EXTRACT_FAILED => "archive failed to extract",
        OUTPUT_DIR_NOT_FOUND => "build output directory not found",
        ARTIFACT_NOT_FOUND => "build produced no program artifact",
        DEPLOY_FAILED => "test deployment failed",
        FUNDING_FAILED => "deploy key funding failed",
        TOOLKIT_FETCH_FAILED => "verifier toolkit fetch failed",
        VERIFICATION_FAILED => "verifier failed to run",
        c if c >= ERROR_BASE => "unknown error",
        _ => "reserved",
    }
}

/// Outcome stored in a program's verification record
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationCode {
    Uninitialised = 0,
    Mismatch = 1,
    MatchButUpgradeable = 2,
    Match = 3,
}

impl VerificationCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Uninitialised),
            1 => Some(Self::Mismatch),
            2 => Some(Self::MatchButUpgradeable),
            3 => Some(Self::Match),
            _ => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::MatchButUpgradeable | Self::Match)
    }
}
