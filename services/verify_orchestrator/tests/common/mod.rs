//! In-memory collaborators for driving the orchestrator without a cluster,
//! a git host or a container runtime.

#![allow(dead_code)]

use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    system_program,
    transaction::Transaction,
};
use std::{
    collections::{HashMap, HashSet},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use sol_verify_orchestrator::{
    chain::{Clusters, LedgerRpc, ObservedInstruction, ObservedTransaction, SignatureEntry},
    environment::ReporterInstall,
    source::{RefMap, SourceProbe},
    ChainPoller, ContainerRuntime, JobDispatcher, OrchestratorError, ScriptConfig,
    ScriptGenerator, StatusReporter, StatusTracker, SubmissionValidator,
};
use sol_verify_sdk::{
    Network, PdaDeriver, StatusMeta, SubmitProgramMeta, VerifierInstruction,
};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    /// Oldest first
    history: Vec<ObservedTransaction>,
    sent: Vec<Transaction>,
    fail_transaction_fetch: bool,
    unreadable: HashSet<Pubkey>,
    signature_calls: usize,
}

#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.state.lock().unwrap().accounts.insert(address, account);
    }

    /// A funded, non-upgradeable program account
    pub fn add_program(&self, address: Pubkey) {
        self.set_account(
            address,
            Account {
                lamports: 1_141_440,
                data: vec![0u8; 36],
                owner: system_program::id(),
                executable: true,
                rent_epoch: 0,
            },
        );
    }

    pub fn set_status(&self, program_id: &Pubkey, submitter: &Pubkey, code: u8, message: &str) {
        let (address, _) = PdaDeriver::derive_status(submitter, program_id);
        let mut data = vec![code];
        data.extend_from_slice(message.as_bytes());
        data.resize(data.len() + 32, 0);
        self.set_account(
            address,
            Account {
                lamports: 1,
                data,
                owner: *program_id,
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    pub fn push_transaction(&self, instructions: Vec<ObservedInstruction>, failed: bool) -> Signature {
        let mut state = self.state.lock().unwrap();
        let signature = Signature::new_unique();
        let slot = state.history.len() as u64 + 1;
        state.history.push(ObservedTransaction {
            signature,
            slot,
            failed,
            instructions,
        });
        signature
    }

    pub fn push_submission(
        &self,
        program_id: &Pubkey,
        submitter: &Pubkey,
        meta: SubmitProgramMeta,
    ) -> Signature {
        let ix = VerifierInstruction::submit_program(program_id, submitter, meta).unwrap();
        self.push_transaction(vec![observed(ix)], false)
    }

    pub fn fail_transaction_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_transaction_fetch = fail;
    }

    /// Make reads of one account fail like an unavailable node
    pub fn fail_account_reads(&self, address: Pubkey, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.unreadable.insert(address);
        } else {
            state.unreadable.remove(&address);
        }
    }

    pub fn signature_calls(&self) -> usize {
        self.state.lock().unwrap().signature_calls
    }

    /// UpdateStatus payloads of every transaction sent so far
    pub fn sent_updates(&self) -> Vec<StatusMeta> {
        let state = self.state.lock().unwrap();
        state
            .sent
            .iter()
            .flat_map(|tx| tx.message.instructions.iter())
            .filter_map(|ix| match VerifierInstruction::unpack(&ix.data) {
                Ok(VerifierInstruction::UpdateStatus(meta)) => Some(meta),
                _ => None,
            })
            .collect()
    }

    pub fn sent_codes(&self) -> Vec<u8> {
        self.sent_updates().iter().map(|meta| meta.status_code).collect()
    }
}

pub fn observed(ix: Instruction) -> ObservedInstruction {
    ObservedInstruction {
        program_id: ix.program_id,
        accounts: ix.accounts.iter().map(|meta| meta.pubkey).collect(),
        data: ix.data,
    }
}

#[async_trait]
impl LedgerRpc for FakeLedger {
    async fn get_slot(&self) -> Result<u64, OrchestratorError> {
        Ok(self.state.lock().unwrap().history.len() as u64)
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, OrchestratorError> {
        let state = self.state.lock().unwrap();
        if state.unreadable.contains(address) {
            return Err(OrchestratorError::RpcError("503 Service Unavailable".to_string()));
        }
        Ok(state.accounts.get(address).cloned())
    }

    async fn signatures_for_address(
        &self,
        _address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureEntry>, OrchestratorError> {
        let mut state = self.state.lock().unwrap();
        state.signature_calls += 1;

        let mut out = Vec::new();
        let mut started = before.is_none();
        for tx in state.history.iter().rev() {
            if !started {
                started = Some(tx.signature) == before;
                continue;
            }
            if Some(tx.signature) == until || out.len() == limit {
                break;
            }
            out.push(SignatureEntry {
                signature: tx.signature,
                slot: tx.slot,
                failed: tx.failed,
            });
        }
        Ok(out)
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<ObservedTransaction, OrchestratorError> {
        let state = self.state.lock().unwrap();
        if state.fail_transaction_fetch {
            return Err(OrchestratorError::RpcError("connection reset".to_string()));
        }
        state
            .history
            .iter()
            .find(|tx| tx.signature == *signature)
            .cloned()
            .ok_or_else(|| OrchestratorError::RpcError(format!("unknown signature {signature}")))
    }

    async fn latest_blockhash(&self) -> Result<Hash, OrchestratorError> {
        Ok(Hash::new_unique())
    }

    async fn send_unconfirmed(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, OrchestratorError> {
        let signature = transaction.signatures[0];
        self.state.lock().unwrap().sent.push(transaction.clone());
        Ok(signature)
    }
}

pub struct FakeProbe {
    pub repo_exists: bool,
    pub archive_reachable: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn new(repo_exists: bool, archive_reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            repo_exists,
            archive_reachable,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceProbe for FakeProbe {
    async fn list_refs(&self, repo: &str) -> Result<RefMap, OrchestratorError> {
        self.calls.lock().unwrap().push(format!("ls-remote {repo}"));
        if !self.repo_exists {
            return Err(OrchestratorError::SourceError("repository not found".to_string()));
        }
        Ok(RefMap::from([(
            "refs/heads/main".to_string(),
            "4f2a9c1e".to_string(),
        )]))
    }

    async fn archive_reachable(&self, url: &str) -> Result<bool, OrchestratorError> {
        self.calls.lock().unwrap().push(format!("head {url}"));
        Ok(self.archive_reachable)
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub fail_build: bool,
    pub built: Mutex<Vec<u64>>,
    pub started: Mutex<Vec<u64>>,
    pub stopped: Mutex<Vec<u64>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_build: true,
            ..Self::default()
        })
    }

    pub fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }

    pub fn built(&self) -> Vec<u64> {
        self.built.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<u64> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, slot: u64, context: &Path) -> Result<(), OrchestratorError> {
        if self.fail_build {
            return Err(OrchestratorError::ContainerError("image build failed".to_string()));
        }
        assert!(context.join("Dockerfile").exists());
        assert!(context.join("run.sh").exists());
        self.built.lock().unwrap().push(slot);
        Ok(())
    }

    async fn start(&self, slot: u64) -> Result<(), OrchestratorError> {
        self.started.lock().unwrap().push(slot);
        Ok(())
    }

    async fn stop(&self, slot: u64) -> Result<(), OrchestratorError> {
        self.stopped.lock().unwrap().push(slot);
        Ok(())
    }
}

/// Everything needed to run poll cycles against fakes
pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub probe: Arc<FakeProbe>,
    pub runtime: Arc<FakeRuntime>,
    pub program_id: Pubkey,
    pub work_dir: tempfile::TempDir,
    keypair_path: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeProbe::new(true, true), FakeRuntime::new())
    }

    pub fn with(probe: Arc<FakeProbe>, runtime: Arc<FakeRuntime>) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let keypair_path = work_dir.path().join("authority.json");
        let keypair = Keypair::new();
        let mut file = std::fs::File::create(&keypair_path).unwrap();
        file.write_all(
            serde_json::to_string(&keypair.to_bytes().to_vec())
                .unwrap()
                .as_bytes(),
        )
        .unwrap();

        Self {
            ledger: FakeLedger::new(),
            probe,
            runtime,
            program_id: Pubkey::new_unique(),
            work_dir,
            keypair_path,
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.path().join("jobs")
    }

    pub fn poller(&self, page_limit: usize) -> ChainPoller {
        let rpc: Arc<dyn LedgerRpc> = self.ledger.clone();
        let authority =
            Arc::new(sol_verify_orchestrator::config::load_keypair(self.keypair_path.to_str().unwrap()).unwrap());
        let reporter = Arc::new(StatusReporter::new(rpc.clone(), self.program_id, authority));

        let validator =
            SubmissionValidator::new(Clusters::uniform(rpc.clone()), self.probe.clone(), reporter.clone());
        let dispatcher = JobDispatcher::new(
            self.runtime.clone(),
            reporter,
            ScriptGenerator::new(ScriptConfig {
                cluster_url: "https://api.devnet.solana.com".to_string(),
                status_rpc_url: "http://127.0.0.1:8899".to_string(),
                program_id: self.program_id,
                verifier_repo: "https://github.com/daoplays/solana_verify".to_string(),
                verifier_revision: "0123abcd".to_string(),
                verifier_command: "cargo run --release --manifest-path client/Cargo.toml --"
                    .to_string(),
                airdrop_sol: "2".to_string(),
                transfer_sol: "1.9".to_string(),
            }),
            ReporterInstall {
                repo: "https://github.com/daoplays/solana_verify".to_string(),
                revision: "main".to_string(),
            },
            self.jobs_dir(),
            self.keypair_path.clone(),
        );
        let tracker = StatusTracker::new(rpc.clone(), self.runtime.clone(), self.program_id, Duration::ZERO);

        ChainPoller::new(
            rpc,
            self.program_id,
            validator,
            dispatcher,
            tracker,
            page_limit,
            Duration::from_millis(10),
        )
    }

    /// Submit a commit-mode request for a target that exists on chain
    pub fn submit(&self, submitter: &Pubkey) -> (Pubkey, Signature) {
        let target = Pubkey::new_unique();
        self.ledger.add_program(target);
        let signature = self
            .ledger
            .push_submission(&self.program_id, submitter, submission(target, "4f2a9c1e"));
        (target, signature)
    }
}

pub fn submission(target: Pubkey, commit: &str) -> SubmitProgramMeta {
    SubmitProgramMeta {
        address: target.to_bytes(),
        network: Network::DevNet,
        git_repo: "https://github.com/daoplays/example".to_string(),
        git_commit: commit.to_string(),
        directory: "program".to_string(),
        docker_version: String::new(),
        rust_version: "1.62".to_string(),
        solana_version: "1.10.39".to_string(),
        anchor_version: String::new(),
    }
}
