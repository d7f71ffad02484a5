//! Build-and-verify procedure executed inside each job container
//!
//! A [`BuildScript`] is an ordered list of typed steps. Every action that
//! can fail carries the status code it reports before the procedure exits,
//! so a job never fails without leaving a terminal code on-chain. Values
//! taken from a submission only reach the shell through [`sh_quote`].

use solana_sdk::pubkey::Pubkey;
use std::fmt::Write as _;

use crate::{environment::BuildEnvironment, reporter::program_message};
use sol_verify_sdk::{codes, SubmitProgramMeta};

pub const JOB_DIR: &str = "/build";
pub const SOURCE_DIR: &str = "/build/source";
pub const ARCHIVE_PATH: &str = "/build/source.archive";
pub const TOOLKIT_DIR: &str = "/build/verifier";
pub const EPHEMERAL_KEYPAIR: &str = "/build/ephemeral.json";
pub const AUTHORITY_KEYPAIR: &str = "/root/.config/solana/id.json";
pub const DEPLOY_KEYPAIR: &str = "/root/.config/solana/deploy.json";

/// Passed to the verifier when the submission is an archive
pub const NO_COMMIT: &str = "no_commit";

/// Quote a value for a POSIX shell
pub fn sh_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Service-wide settings baked into every script
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Cluster the test deployment goes to
    pub cluster_url: String,
    /// Cluster holding the verifier program and the status accounts
    pub status_rpc_url: String,
    pub program_id: Pubkey,
    pub verifier_repo: String,
    pub verifier_revision: String,
    /// Command run from the toolkit checkout, followed by the verifier arguments
    pub verifier_command: String,
    pub airdrop_sol: String,
    pub transfer_sol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    FetchSource,
    FetchToolkit,
    FundDeployKey,
    CheckDirectory,
    CheckCommit,
    DetectBuildSystem,
    Build,
    LocateOutput,
    LocateArtifact,
    Deploy,
    Verify,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write a status update and carry on
    Report { code: u8, message: String },
    /// Run a command whose result does not matter
    Run(String),
    /// Run a command; on failure report `code` and stop the procedure
    Guarded {
        command: String,
        code: u8,
        message: String,
    },
    /// Report `code` only if the status still shows the job in progress.
    /// An unreadable status gets `fallback` so the job still ends.
    Settle {
        code: u8,
        message: String,
        fallback: u8,
        fallback_message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub actions: Vec<Action>,
}

impl Step {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            actions: Vec::new(),
        }
    }

    fn report(mut self, code: u8, message: String) -> Self {
        self.actions.push(Action::Report { code, message });
        self
    }

    fn run(mut self, command: impl Into<String>) -> Self {
        self.actions.push(Action::Run(command.into()));
        self
    }

    fn guarded(mut self, command: impl Into<String>, code: u8, message: String) -> Self {
        self.actions.push(Action::Guarded {
            command: command.into(),
            code,
            message,
        });
        self
    }

    /// Status codes this step aborts with
    pub fn failure_codes(&self) -> Vec<u8> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::Guarded { code, .. } => Some(*code),
                _ => None,
            })
            .collect()
    }
}

/// A candidate build manifest and how to build it
struct BuildSystem {
    manifest: &'static str,
    command: String,
    sentinel: &'static str,
}

fn build_systems(env: &BuildEnvironment) -> Vec<BuildSystem> {
    let mut systems = Vec::new();
    if env.anchor_version.is_some() {
        systems.push(BuildSystem {
            manifest: "Anchor.toml",
            command: "anchor build".to_string(),
            sentinel: "target/idl",
        });
    }
    systems.push(BuildSystem {
        manifest: "Cargo.toml",
        command: env.cargo_build_command().to_string(),
        sentinel: "Cargo.lock",
    });
    systems.push(BuildSystem {
        manifest: "Makefile",
        command: "make".to_string(),
        sentinel: "target",
    });
    systems
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
    pub slot: u64,
    pub submitter: Pubkey,
    pub preamble: String,
    pub steps: Vec<Step>,
}

impl BuildScript {
    pub fn step(&self, kind: StepKind) -> Option<&Step> {
        self.steps.iter().find(|step| step.kind == kind)
    }

    pub fn position(&self, kind: StepKind) -> Option<usize> {
        self.steps.iter().position(|step| step.kind == kind)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#!/usr/bin/env bash\n");
        let _ = writeln!(out, "# verification job slot {}", self.slot);
        out.push_str("set -o pipefail\n\n");
        out.push_str(&self.preamble);

        for step in &self.steps {
            let _ = writeln!(out, "\n# {:?}", step.kind);
            for action in &step.actions {
                match action {
                    Action::Report { code, message } => {
                        let _ = writeln!(out, "report {} {}", code, sh_quote(message));
                    }
                    Action::Run(command) => {
                        let _ = writeln!(out, "{command}");
                    }
                    Action::Guarded {
                        command,
                        code,
                        message,
                    } => {
                        let _ = writeln!(out, "if ! {{ {command}; }}; then");
                        let _ = writeln!(out, "    report {} {}", code, sh_quote(message));
                        out.push_str("    exit 1\nfi\n");
                    }
                    Action::Settle {
                        code,
                        message,
                        fallback,
                        fallback_message,
                    } => {
                        out.push_str("case \"$(current_status)\" in\n");
                        let _ = writeln!(out, "{}) report {} {} ;;", codes::IN_PROGRESS, code, sh_quote(message));
                        let _ = writeln!(out, "'') report {} {} ;;", fallback, sh_quote(fallback_message));
                        out.push_str("esac\n");
                    }
                }
            }
        }
        out
    }
}

/// Produces the per-job procedure. Pure: same inputs, same script.
pub struct ScriptGenerator {
    config: ScriptConfig,
}

impl ScriptGenerator {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    pub fn generate(
        &self,
        submitter: &Pubkey,
        submission: &SubmitProgramMeta,
        env: &BuildEnvironment,
        slot: u64,
    ) -> BuildScript {
        let target = submission.target();
        let msg = |text: &str| program_message(&target, text);
        let cluster = sh_quote(&self.config.cluster_url);
        let systems = build_systems(env);

        let mut steps = Vec::new();

        // 1. source
        let mut fetch = Step::new(StepKind::FetchSource).report(codes::IN_PROGRESS, msg("fetching source"));
        if submission.is_archive() {
            fetch = fetch
                .guarded(
                    format!(
                        "curl -sSfL --proto '=https' -o {} -- {}",
                        ARCHIVE_PATH,
                        sh_quote(&submission.git_repo)
                    ),
                    codes::GIT_REPO_DOESNT_EXIST,
                    msg("archive could not be downloaded"),
                )
                .guarded(
                    extract_command(&submission.git_repo),
                    codes::ARCHIVE_EXTRACT_FAILED,
                    msg("archive failed to extract"),
                );
        } else {
            fetch = fetch
                .guarded(
                    format!(
                        "git clone --quiet -- {} {}",
                        sh_quote(&submission.git_repo),
                        SOURCE_DIR
                    ),
                    codes::GIT_REPO_DOESNT_EXIST,
                    msg("git repo could not be cloned"),
                )
                // A failed checkout is diagnosed by the commit check below
                .run(format!(
                    "git -C {} checkout --quiet {} 2>/dev/null || true",
                    SOURCE_DIR,
                    sh_quote(&submission.git_commit)
                ));
        }
        steps.push(fetch);

        // 2. verifier toolkit at a fixed revision
        steps.push(
            Step::new(StepKind::FetchToolkit)
                .report(codes::IN_PROGRESS, msg("fetching verifier toolkit"))
                .guarded(
                    format!(
                        "git clone --quiet -- {repo} {dir} && git -C {dir} checkout --quiet {rev}",
                        repo = sh_quote(&self.config.verifier_repo),
                        dir = TOOLKIT_DIR,
                        rev = sh_quote(&self.config.verifier_revision),
                    ),
                    codes::TOOLKIT_FETCH_FAILED,
                    msg("verifier toolkit could not be fetched"),
                ),
        );

        // 3. fund a throwaway key from the faucet, then move the funds to the deploy key
        steps.push(
            Step::new(StepKind::FundDeployKey)
                .report(codes::IN_PROGRESS, msg("airdropping funds"))
                .guarded(
                    format!(
                        "solana-keygen new --no-bip39-passphrase --silent --force -o {EPHEMERAL_KEYPAIR} \
                         && solana airdrop {amount} \"$(solana-keygen pubkey {EPHEMERAL_KEYPAIR})\" --url {cluster} \
                         && solana transfer --from {EPHEMERAL_KEYPAIR} --fee-payer {EPHEMERAL_KEYPAIR} \
                         --allow-unfunded-recipient --url {cluster} \
                         \"$(solana-keygen pubkey {DEPLOY_KEYPAIR})\" {transfer}",
                        amount = sh_quote(&self.config.airdrop_sol),
                        transfer = sh_quote(&self.config.transfer_sol),
                    ),
                    codes::FUNDING_FAILED,
                    msg("deploy key could not be funded"),
                )
                .report(codes::IN_PROGRESS, msg("funds received, building program")),
        );

        // 4. build directory
        let project_dir = format!("{}/{}", SOURCE_DIR, submission.directory.trim_start_matches('/'));
        steps.push(Step::new(StepKind::CheckDirectory).guarded(
            format!("[ -d {dir} ] && cd -- {dir}", dir = sh_quote(&project_dir)),
            codes::GIT_DIR_DOESNT_EXIST,
            msg("directory doesn't exist in source"),
        ));

        // 5. commit object
        if !submission.is_archive() {
            steps.push(Step::new(StepKind::CheckCommit).guarded(
                format!(
                    "git -C {} cat-file -e {}",
                    SOURCE_DIR,
                    sh_quote(&format!("{}^{{commit}}", submission.git_commit))
                ),
                codes::GIT_COMMIT_DOESNT_EXIST,
                msg("commit doesn't exist in repo"),
            ));
        }

        // 6. build manifest
        let mut detect = String::new();
        for (i, system) in systems.iter().enumerate() {
            let keyword = if i == 0 { "if" } else { "elif" };
            let _ = write!(
                detect,
                "{keyword} [ -f {} ]; then BUILD_CMD={}; SENTINEL={}; ",
                system.manifest,
                sh_quote(&system.command),
                system.sentinel
            );
        }
        detect.push_str("else false; fi");
        steps.push(Step::new(StepKind::DetectBuildSystem).guarded(
            detect,
            codes::UNSUPPORTED_LANGUAGE,
            msg("no recognized build manifest"),
        ));

        // 7. build
        steps.push(Step::new(StepKind::Build).guarded(
            "$BUILD_CMD && [ -e \"$SENTINEL\" ]",
            codes::BUILD_FAILED,
            msg("build failed"),
        ));

        // 8. output directory
        // cargo knows where a workspace member's target directory lives
        steps.push(Step::new(StepKind::LocateOutput).guarded(
            "OUT_DIR=\"$(cargo metadata --no-deps --format-version 1 2>/dev/null \
             | grep -o '\"target_directory\":\"[^\"]*\"' | cut -d'\"' -f4)/deploy\"; \
             [ -d \"$OUT_DIR\" ] || OUT_DIR=\"$(find \"$PWD\" -type d -path '*/target/deploy' -print -quit)\"; \
             [ -n \"$OUT_DIR\" ] && [ -d \"$OUT_DIR\" ]",
            codes::OUTPUT_DIR_NOT_FOUND,
            msg("build output directory not found"),
        ));

        // 9. artifact
        steps.push(Step::new(StepKind::LocateArtifact).guarded(
            "PROGRAM_SO=\"$(find \"$OUT_DIR\" -maxdepth 1 -name '*.so' -print -quit)\" \
             && [ -n \"$PROGRAM_SO\" ] \
             && PROGRAM_KEYPAIR=\"${PROGRAM_SO%.so}-keypair.json\" \
             && [ -f \"$PROGRAM_KEYPAIR\" ]",
            codes::ARTIFACT_NOT_FOUND,
            msg("build did not produce a program artifact"),
        ));

        // 10. deploy
        steps.push(
            Step::new(StepKind::Deploy)
                .report(codes::IN_PROGRESS, msg("deploying test program"))
                .guarded(
                    format!(
                        "solana program deploy --url {cluster} --commitment finalized \
                         --keypair {DEPLOY_KEYPAIR} --program-id \"$PROGRAM_KEYPAIR\" \"$PROGRAM_SO\""
                    ),
                    codes::DEPLOY_FAILED,
                    msg("test deployment failed"),
                ),
        );

        // 11. verifier
        let commit = if submission.is_archive() {
            NO_COMMIT
        } else {
            submission.git_commit.as_str()
        };
        steps.push(
            Step::new(StepKind::Verify)
                .report(codes::IN_PROGRESS, msg("running verification"))
                .guarded(
                    format!(
                        "(cd {TOOLKIT_DIR} && {command} {AUTHORITY_KEYPAIR} verify \"$PROGRAM_KEYPAIR\" {target} {network} {submitter} {repo} {commit} {dir})",
                        command = self.config.verifier_command,
                        target = target,
                        network = submission.network.id(),
                        submitter = submitter,
                        repo = sh_quote(&submission.git_repo),
                        commit = sh_quote(commit),
                        dir = sh_quote(&submission.directory),
                    ),
                    codes::VERIFICATION_FAILED,
                    msg("verifier did not complete"),
                ),
        );

        // 12. done, unless the verifier already recorded a mismatch
        let mut complete = Step::new(StepKind::Complete);
        complete.actions.push(Action::Settle {
            code: codes::SUCCESS,
            message: msg("verification complete"),
            fallback: codes::VERIFICATION_FAILED,
            fallback_message: msg("verification result could not be read"),
        });
        steps.push(complete);

        BuildScript {
            slot,
            submitter: *submitter,
            preamble: self.preamble(submitter),
            steps,
        }
    }

    fn preamble(&self, submitter: &Pubkey) -> String {
        let rpc_url = sh_quote(&self.config.status_rpc_url);
        let program_id = self.config.program_id;
        format!(
            "report() {{\n    sol-verify update-status --rpc-url {rpc_url} --program-id {program_id} \
             --keypair {AUTHORITY_KEYPAIR} --submitter {submitter} --code \"$1\" --message \"$2\" || true\n}}\n\
             current_status() {{\n    for _ in 1 2 3; do\n        \
             if line=\"$(sol-verify check-status --rpc-url {rpc_url} --program-id {program_id} \
             --submitter {submitter})\"; then\n            echo \"${{line%% *}}\"\n            return 0\n        fi\n        \
             sleep 5\n    done\n}}\n"
        )
    }
}

fn extract_command(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let unpack = if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
        format!("tar -xzf {ARCHIVE_PATH} -C {SOURCE_DIR}")
    } else {
        format!("unzip -q {ARCHIVE_PATH} -d {SOURCE_DIR}")
    };
    format!("mkdir -p {SOURCE_DIR} && {unpack}")
}
