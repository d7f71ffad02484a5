//! The control loop
//!
//! Each cycle reconciles finished jobs, then walks every signature newer
//! than the cursor in ascending chain order and routes decoded
//! SubmitProgram instructions through validation and dispatch. The cursor
//! only moves past transactions that were fully handled; a cluster read
//! failure abandons the cycle at that transaction.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    chain::{LedgerRpc, ObservedTransaction, SignatureEntry},
    dispatcher::{DispatchOutcome, JobDispatcher},
    error::OrchestratorError,
    jobs::JobTable,
    metrics::METRICS,
    tracker::StatusTracker,
    validator::{SubmissionValidator, ValidationFailure},
};
use sol_verify_sdk::{SubmitProgramMeta, VerifierInstruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    ReconcileJobs,
    FetchSignatures,
    FetchTransactions,
    DecodeAndDispatch,
    Sleep,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub signatures: usize,
    pub submissions: usize,
    pub dispatched: Vec<DispatchOutcome>,
    pub finished: usize,
}

pub struct ChainPoller {
    rpc: Arc<dyn LedgerRpc>,
    program_id: Pubkey,
    validator: SubmissionValidator,
    dispatcher: JobDispatcher,
    tracker: StatusTracker,
    jobs: JobTable,
    cursor: Option<Signature>,
    page_limit: usize,
    interval: Duration,
    phase: PollPhase,
}

impl ChainPoller {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        program_id: Pubkey,
        validator: SubmissionValidator,
        dispatcher: JobDispatcher,
        tracker: StatusTracker,
        page_limit: usize,
        interval: Duration,
    ) -> Self {
        Self {
            rpc,
            program_id,
            validator,
            dispatcher,
            tracker,
            jobs: JobTable::new(),
            cursor: None,
            page_limit: page_limit.max(1),
            interval,
            phase: PollPhase::Idle,
        }
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn cursor(&self) -> Option<Signature> {
        self.cursor
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    fn enter(&mut self, phase: PollPhase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Start from the newest signature currently on chain
    pub async fn initialise_cursor(&mut self) -> Result<(), OrchestratorError> {
        let newest = self
            .rpc
            .signatures_for_address(&self.program_id, None, None, 1)
            .await?;
        self.cursor = newest.first().map(|entry| entry.signature);

        match self.cursor {
            Some(signature) => info!("Starting after signature {}", signature),
            None => info!("No history for {}, starting from the beginning", self.program_id),
        }
        Ok(())
    }

    /// Signatures newer than the cursor, oldest first
    async fn new_signatures(&self) -> Result<Vec<SignatureEntry>, OrchestratorError> {
        let mut collected: Vec<SignatureEntry> = Vec::new();
        let mut before = None;

        loop {
            let page = self
                .rpc
                .signatures_for_address(&self.program_id, before, self.cursor, self.page_limit)
                .await?;
            let full = page.len() >= self.page_limit;
            before = page.last().map(|entry| entry.signature);
            collected.extend(page);

            if !full || before.is_none() {
                break;
            }
        }

        collected.reverse();
        Ok(collected)
    }

    pub async fn poll_once(&mut self) -> Result<CycleReport, OrchestratorError> {
        let mut report = CycleReport::default();

        self.enter(PollPhase::ReconcileJobs);
        let finished = self.tracker.reconcile(&mut self.jobs).await;
        for job in &finished {
            self.dispatcher.discard_context(job.slot).await;
        }
        report.finished = finished.len();

        self.enter(PollPhase::FetchSignatures);
        let entries = self.new_signatures().await?;
        report.signatures = entries.len();
        if entries.is_empty() {
            self.enter(PollPhase::Idle);
            return Ok(report);
        }

        self.enter(PollPhase::FetchTransactions);
        let mut batch = Vec::with_capacity(entries.len());
        for entry in &entries {
            let transaction = if entry.failed {
                None
            } else {
                Some(self.rpc.get_transaction(&entry.signature).await?)
            };
            batch.push((entry.signature, transaction));
        }

        self.enter(PollPhase::DecodeAndDispatch);
        for (signature, transaction) in &batch {
            if let Some(transaction) = transaction {
                for (submitter, submission) in self.submissions_in(transaction) {
                    report.submissions += 1;
                    match self.handle_submission(submitter, submission).await {
                        Ok(Some(outcome)) => report.dispatched.push(outcome),
                        Ok(None) => {}
                        Err(e) => {
                            self.enter(PollPhase::Idle);
                            return Err(e);
                        }
                    }
                }
            }
            self.cursor = Some(*signature);
        }

        self.enter(PollPhase::Idle);
        Ok(report)
    }

    fn submissions_in(&self, transaction: &ObservedTransaction) -> Vec<(Pubkey, SubmitProgramMeta)> {
        if transaction.failed {
            return Vec::new();
        }

        transaction
            .instructions
            .iter()
            .filter(|ix| ix.program_id == self.program_id)
            .filter_map(|ix| match VerifierInstruction::unpack(&ix.data) {
                Ok(VerifierInstruction::SubmitProgram(meta)) => {
                    let submitter = ix.accounts.first().copied()?;
                    Some((submitter, meta))
                }
                Ok(_) => None,
                Err(e) => {
                    debug!("Skipping undecodable instruction in {}: {}", transaction.signature, e);
                    None
                }
            })
            .collect()
    }

    async fn handle_submission(
        &mut self,
        submitter: Pubkey,
        submission: SubmitProgramMeta,
    ) -> Result<Option<DispatchOutcome>, OrchestratorError> {
        METRICS.record_submission_seen();
        info!(
            "Submission from {} for {} on {}",
            submitter,
            submission.target(),
            submission.network
        );

        if self.jobs.is_active(&submitter) {
            info!("Submitter {} already has an active job, ignoring submission", submitter);
            METRICS.record_duplicate_submission();
            return Ok(Some(DispatchOutcome::Duplicate));
        }

        let validated = match self.validator.validate(&submitter, submission).await {
            Ok(validated) => validated,
            Err(ValidationFailure::Rejected(_)) => {
                METRICS.record_submission_rejected();
                return Ok(None);
            }
            Err(ValidationFailure::Unavailable(e)) => return Err(e),
        };

        let previous = self.tracker.status_of(&submitter).await;
        Ok(Some(
            self.dispatcher
                .dispatch(&mut self.jobs, validated, previous)
                .await,
        ))
    }

    pub async fn run(&mut self) -> Result<(), OrchestratorError> {
        info!(
            "Polling {} every {}s",
            self.program_id,
            self.interval.as_secs()
        );

        loop {
            match self.poll_once().await {
                Ok(report) if report.signatures > 0 || report.finished > 0 => info!(
                    "Cycle: {} signatures, {} submissions, {} jobs finished, {} active",
                    report.signatures,
                    report.submissions,
                    report.finished,
                    self.jobs.len()
                ),
                Ok(_) => {}
                Err(e) => {
                    METRICS.record_poll_error();
                    warn!("Poll cycle abandoned: {}", e);
                }
            }

            self.enter(PollPhase::Sleep);
            tokio::time::sleep(self.interval).await;
            self.enter(PollPhase::Idle);
        }
    }
}
