//! Turns validated submissions into running job containers

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

use crate::{
    container::ContainerRuntime,
    environment::{BuildEnvironment, ReporterInstall},
    error::OrchestratorError,
    jobs::{Job, JobState, JobTable},
    metrics::METRICS,
    reporter::{program_message, StatusReporter},
    script::ScriptGenerator,
    validator::ValidatedSubmission,
};
use sol_verify_sdk::{codes, StatusRecord, SubmitProgramMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started { slot: u64 },
    /// Submitter already has an active job; nothing was written on-chain
    Duplicate,
    /// Image or container creation failed and was reported; nothing is left behind
    Failed { slot: u64 },
}

/// Written next to the build context for operators
#[derive(Serialize)]
struct JobManifest<'a> {
    slot: u64,
    submitter: String,
    submission: &'a SubmitProgramMeta,
    environment: &'a BuildEnvironment,
}

pub struct JobDispatcher {
    runtime: Arc<dyn ContainerRuntime>,
    reporter: Arc<StatusReporter>,
    generator: ScriptGenerator,
    reporter_install: ReporterInstall,
    work_dir: PathBuf,
    keypair_path: PathBuf,
}

impl JobDispatcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        reporter: Arc<StatusReporter>,
        generator: ScriptGenerator,
        reporter_install: ReporterInstall,
        work_dir: PathBuf,
        keypair_path: PathBuf,
    ) -> Self {
        Self {
            runtime,
            reporter,
            generator,
            reporter_install,
            work_dir,
            keypair_path,
        }
    }

    pub fn context_dir(&self, slot: u64) -> PathBuf {
        self.work_dir.join(format!("job-{slot}"))
    }

    /// Start a job for `validated`. `previous` is the submitter's status as
    /// read before this dispatch.
    pub async fn dispatch(
        &self,
        jobs: &mut JobTable,
        validated: ValidatedSubmission,
        previous: Option<StatusRecord>,
    ) -> DispatchOutcome {
        let ValidatedSubmission {
            submitter,
            submission,
            environment,
            ..
        } = validated;

        if jobs.is_active(&submitter) {
            info!("Submitter {} already has an active job, ignoring submission", submitter);
            METRICS.record_duplicate_submission();
            return DispatchOutcome::Duplicate;
        }

        let slot = jobs.allocate_slot();
        let target = submission.target();

        self.reporter
            .report(
                &submitter,
                codes::IN_PROGRESS,
                &program_message(&target, "creating isolated build container"),
            )
            .await;

        if let Err(e) = self.launch(slot, &submitter, &submission, &environment).await {
            error!("Job {} for {} failed to start: {}", slot, submitter, e);
            METRICS.record_job_start_failed();
            self.reporter
                .report(
                    &submitter,
                    codes::DOCKER_BUILD_FAILED,
                    &program_message(&target, "build container could not be created"),
                )
                .await;
            if let Err(e) = self.runtime.stop(slot).await {
                debug!("Nothing to remove for job {}: {}", slot, e);
            }
            self.discard_context(slot).await;
            return DispatchOutcome::Failed { slot };
        }

        jobs.insert(Job {
            slot,
            submitter,
            submission,
            state: JobState::Active,
            stale_status: previous.filter(StatusRecord::is_terminal),
        });
        METRICS.record_job_started();
        info!("Job {} started for submitter {} (program {})", slot, submitter, target);

        DispatchOutcome::Started { slot }
    }

    /// Remove a slot's build context once nothing needs it
    pub async fn discard_context(&self, slot: u64) {
        let context = self.context_dir(slot);
        match tokio::fs::remove_dir_all(&context).await {
            Ok(()) => debug!("Removed build context {}", context.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove build context {}: {}", context.display(), e),
        }
    }

    async fn launch(
        &self,
        slot: u64,
        submitter: &Pubkey,
        submission: &SubmitProgramMeta,
        environment: &BuildEnvironment,
    ) -> Result<(), OrchestratorError> {
        let context = self.context_dir(slot);
        self.write_context(&context, slot, submitter, submission, environment)
            .await?;

        let built = self.runtime.build_image(slot, &context).await;
        // the image carries its own copy of the authority key
        tokio::fs::remove_file(context.join("id.json")).await?;
        built?;

        self.runtime.start(slot).await
    }

    async fn write_context(
        &self,
        dir: &Path,
        slot: u64,
        submitter: &Pubkey,
        submission: &SubmitProgramMeta,
        environment: &BuildEnvironment,
    ) -> Result<(), OrchestratorError> {
        if tokio::fs::try_exists(dir).await? {
            warn!("Replacing stale build context {}", dir.display());
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        let script = self.generator.generate(submitter, submission, environment, slot);
        tokio::fs::write(dir.join("run.sh"), script.render()).await?;
        tokio::fs::write(
            dir.join("Dockerfile"),
            environment.dockerfile(&self.reporter_install),
        )
        .await?;
        tokio::fs::copy(&self.keypair_path, dir.join("id.json")).await?;

        let manifest = JobManifest {
            slot,
            submitter: submitter.to_string(),
            submission,
            environment,
        };
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| OrchestratorError::ContainerError(e.to_string()))?;
        tokio::fs::write(dir.join("job.json"), manifest).await?;

        Ok(())
    }
}
