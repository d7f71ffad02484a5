//! Verification orchestrator
//!
//! Watches the verifier program for SubmitProgram instructions, validates
//! each submission, runs an isolated build-and-verify container per
//! submitter and reclaims it once the submitter's status account reports a
//! terminal code.

pub mod chain;
pub mod config;
pub mod container;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod poller;
pub mod reporter;
pub mod script;
pub mod source;
pub mod tracker;
pub mod validator;

pub use chain::{Clusters, LedgerRpc, SolanaLedger};
pub use config::Config;
pub use container::{ContainerRuntime, DockerRuntime};
pub use dispatcher::{DispatchOutcome, JobDispatcher};
pub use error::OrchestratorError;
pub use jobs::{Job, JobState, JobTable};
pub use poller::{ChainPoller, CycleReport};
pub use reporter::StatusReporter;
pub use script::{BuildScript, ScriptConfig, ScriptGenerator};
pub use source::{GitSourceProbe, SourceProbe};
pub use tracker::StatusTracker;
pub use validator::{SubmissionValidator, ValidatedSubmission, ValidationFailure};
