//! Pre-flight checks run on every submission before a job is created
//!
//! Checks run in a fixed order and stop at the first failure. A failing
//! submission gets exactly one status update carrying the failure code.
//! When the ledger itself cannot be read nothing is reported and the
//! submission is left for the next cycle.

use solana_sdk::{
    account::Account,
    bpf_loader_upgradeable::{self, UpgradeableLoaderState},
    pubkey::Pubkey,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    chain::{Clusters, LedgerRpc},
    environment::{self, BuildEnvironment},
    error::OrchestratorError,
    reporter::{program_message, StatusReporter},
    source::{RefMap, SourceProbe},
};
use sol_verify_sdk::{codes, SubmitProgramMeta};

/// A submission that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub submitter: Pubkey,
    pub submission: SubmitProgramMeta,
    /// Remote refs, present in commit mode
    pub refs: Option<RefMap>,
    pub environment: BuildEnvironment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: u8,
    pub message: String,
}

#[derive(Debug)]
pub enum ValidationFailure {
    /// Reported on-chain; the submission is done
    Rejected(Rejection),
    /// The cluster could not be read; nothing was reported
    Unavailable(OrchestratorError),
}

impl From<Rejection> for ValidationFailure {
    fn from(rejection: Rejection) -> Self {
        ValidationFailure::Rejected(rejection)
    }
}

impl Rejection {
    fn new(code: u8, target: &Pubkey, text: &str) -> Self {
        Self {
            code,
            message: program_message(target, text),
        }
    }
}

pub struct SubmissionValidator {
    clusters: Clusters,
    probe: Arc<dyn SourceProbe>,
    reporter: Arc<StatusReporter>,
}

impl SubmissionValidator {
    pub fn new(clusters: Clusters, probe: Arc<dyn SourceProbe>, reporter: Arc<StatusReporter>) -> Self {
        Self {
            clusters,
            probe,
            reporter,
        }
    }

    /// Run every check; on rejection the failure has already been reported
    pub async fn validate(
        &self,
        submitter: &Pubkey,
        submission: SubmitProgramMeta,
    ) -> Result<ValidatedSubmission, ValidationFailure> {
        match self.check(&submission).await {
            Ok((refs, environment)) => {
                debug!("Submission from {} for {} accepted", submitter, submission.target());
                Ok(ValidatedSubmission {
                    submitter: *submitter,
                    submission,
                    refs,
                    environment,
                })
            }
            Err(ValidationFailure::Rejected(rejection)) => {
                info!(
                    "Rejecting submission from {}: {} ({})",
                    submitter,
                    rejection.message,
                    codes::describe(rejection.code)
                );
                self.reporter
                    .report(submitter, rejection.code, &rejection.message)
                    .await;
                Err(ValidationFailure::Rejected(rejection))
            }
            Err(ValidationFailure::Unavailable(e)) => {
                warn!(
                    "Could not validate submission from {} on {}: {}",
                    submitter, submission.network, e
                );
                Err(ValidationFailure::Unavailable(e))
            }
        }
    }

    async fn check(
        &self,
        submission: &SubmitProgramMeta,
    ) -> Result<(Option<RefMap>, BuildEnvironment), ValidationFailure> {
        let target = submission.target();
        let rpc = self.clusters.get(submission.network);

        // 1. target exists and is funded
        let account = match rpc.get_account(&target).await {
            Ok(Some(account)) if account.lamports > 0 => account,
            Ok(_) => {
                return Err(Rejection::new(
                    codes::PROGRAM_DOESNT_EXIST,
                    &target,
                    &format!("program doesn't exist on {}", submission.network),
                )
                .into())
            }
            Err(e) => return Err(ValidationFailure::Unavailable(e)),
        };

        // 2. security.txt source pointer
        let published = security_txt_source(rpc, &account)
            .await
            .map_err(ValidationFailure::Unavailable)?;
        if let Some(published) = published {
            if !same_source(&published, &submission.git_repo) {
                return Err(Rejection::new(
                    codes::SECURITY_TXT_MISMATCH,
                    &target,
                    &format!("security.txt source {published} does not match submitted repo"),
                )
                .into());
            }
        }

        // 3. source reachability
        let refs = if submission.is_archive() {
            match self.probe.archive_reachable(&submission.git_repo).await {
                Ok(true) => None,
                Ok(false) | Err(_) => {
                    return Err(Rejection::new(
                        codes::GIT_REPO_DOESNT_EXIST,
                        &target,
                        "archive url is not reachable",
                    )
                    .into())
                }
            }
        } else {
            match self.probe.list_refs(&submission.git_repo).await {
                Ok(refs) => Some(refs),
                Err(e) => {
                    debug!("ls-remote failed: {}", e);
                    return Err(Rejection::new(
                        codes::GIT_REPO_DOESNT_EXIST,
                        &target,
                        "git repo doesn't exist",
                    )
                    .into());
                }
            }
        };

        // 4. build environment
        let environment = environment::resolve(submission).map_err(|e| {
            ValidationFailure::from(Rejection::new(codes::DOCKER_DOESNT_EXIST, &target, &e.to_string()))
        })?;

        Ok((refs, environment))
    }
}

/// The `source_code` field of an upgradeable program's security.txt, if any
async fn security_txt_source(
    rpc: &dyn LedgerRpc,
    program: &Account,
) -> Result<Option<String>, OrchestratorError> {
    if !bpf_loader_upgradeable::check_id(&program.owner) {
        return Ok(None);
    }

    let Ok(UpgradeableLoaderState::Program {
        programdata_address,
    }) = bincode::deserialize::<UpgradeableLoaderState>(&program.data)
    else {
        return Ok(None);
    };

    let Some(program_data) = rpc.get_account(&programdata_address).await? else {
        return Ok(None);
    };
    let Some(elf) = program_data
        .data
        .get(UpgradeableLoaderState::size_of_programdata_metadata()..)
    else {
        return Ok(None);
    };

    Ok(solana_security_txt::find_and_parse(elf)
        .ok()
        .and_then(|txt| txt.source_code))
}

fn normalise_source(url: &str) -> &str {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url)
}

/// Compare source locations, ignoring a trailing slash and a `.git` suffix
pub fn same_source(published: &str, submitted: &str) -> bool {
    normalise_source(published).eq_ignore_ascii_case(normalise_source(submitted))
}
