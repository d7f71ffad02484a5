//! Reclaims jobs whose status account holds a terminal code
//!
//! A resubmitting submitter's account still shows the last run's terminal
//! code until the new run's first update lands, so that exact record is
//! ignored for the new job.

use solana_sdk::pubkey::Pubkey;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{chain::LedgerRpc, container::ContainerRuntime, jobs::{Job, JobTable}, metrics::METRICS};
use sol_verify_sdk::{codes, PdaDeriver, StatusRecord};

pub struct StatusTracker {
    rpc: Arc<dyn LedgerRpc>,
    runtime: Arc<dyn ContainerRuntime>,
    program_id: Pubkey,
    pacing: Duration,
}

impl StatusTracker {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        runtime: Arc<dyn ContainerRuntime>,
        program_id: Pubkey,
        pacing: Duration,
    ) -> Self {
        Self {
            rpc,
            runtime,
            program_id,
            pacing,
        }
    }

    /// Current status of a submitter. `None` when it cannot be read.
    pub async fn status_of(&self, submitter: &Pubkey) -> Option<StatusRecord> {
        let (address, _) = PdaDeriver::derive_status(submitter, &self.program_id);
        match self.rpc.get_account(&address).await {
            Ok(Some(account)) => StatusRecord::from_account_data(&account.data),
            Ok(None) => None,
            Err(e) => {
                debug!("Status read for {} failed: {}", submitter, e);
                None
            }
        }
    }

    /// Check every active job once and return the ones that finished
    pub async fn reconcile(&self, jobs: &mut JobTable) -> Vec<Job> {
        let mut finished = Vec::new();

        for (i, submitter) in jobs.submitters().into_iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let Some(status) = self.status_of(&submitter).await else {
                continue;
            };
            let Some(job) = jobs.get_mut(&submitter) else {
                continue;
            };
            if !status.is_terminal() {
                job.stale_status = None;
                continue;
            }
            if !job.finished_by(&status) {
                debug!(
                    "Job {} for {} still sees the previous run's status {}",
                    job.slot, submitter, status.code
                );
                continue;
            }

            let Some(job) = jobs.finish(&submitter) else {
                continue;
            };
            info!(
                "Job {} for {} finished with status {} ({})",
                job.slot,
                submitter,
                status.code,
                codes::describe(status.code)
            );
            if let Err(e) = self.runtime.stop(job.slot).await {
                warn!("Could not stop container for job {}: {}", job.slot, e);
            }
            METRICS.record_job_finished();
            finished.push(job);
        }

        finished
    }
}
