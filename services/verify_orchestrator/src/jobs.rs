//! Table of in-flight verification jobs, one per submitter

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;

use sol_verify_sdk::{StatusRecord, SubmitProgramMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Active,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub slot: u64,
    pub submitter: Pubkey,
    pub submission: SubmitProgramMeta,
    pub state: JobState,
    /// Terminal status left by the submitter's previous run. It does not
    /// end this job unless the account changes first.
    #[serde(skip)]
    pub stale_status: Option<StatusRecord>,
}

impl Job {
    /// Whether an observed status ends this job
    pub fn finished_by(&self, status: &StatusRecord) -> bool {
        status.is_terminal() && self.stale_status.as_ref() != Some(status)
    }
}

/// Active jobs keyed by submitter. Slots are never reused.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<Pubkey, Job>,
    next_slot: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, submitter: &Pubkey) -> bool {
        self.jobs.contains_key(submitter)
    }

    pub fn allocate_slot(&mut self) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Returns false, leaving the table untouched, when the submitter already has a job
    pub fn insert(&mut self, job: Job) -> bool {
        if self.is_active(&job.submitter) {
            return false;
        }
        self.jobs.insert(job.submitter, job);
        true
    }

    pub fn get(&self, submitter: &Pubkey) -> Option<&Job> {
        self.jobs.get(submitter)
    }

    pub fn get_mut(&mut self, submitter: &Pubkey) -> Option<&mut Job> {
        self.jobs.get_mut(submitter)
    }

    /// Remove the submitter's job and hand it back marked finished
    pub fn finish(&mut self, submitter: &Pubkey) -> Option<Job> {
        let mut job = self.jobs.remove(submitter)?;
        job.state = JobState::Finished;
        Some(job)
    }

    pub fn submitters(&self) -> Vec<Pubkey> {
        self.jobs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
