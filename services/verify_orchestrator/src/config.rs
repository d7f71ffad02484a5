//! Configuration module for the verification orchestrator

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::{fs, path::PathBuf, str::FromStr};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// RPC endpoint the verifier program lives on
    pub rpc_url: String,

    /// Keypair authorised to write status updates
    pub keypair_path: String,

    /// Verifier program ID
    pub program_id: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay between status account reads during reconciliation
    #[serde(default = "default_status_pacing_ms")]
    pub status_pacing_ms: u64,

    #[serde(default = "default_signature_page_limit")]
    pub signature_page_limit: usize,

    #[serde(default)]
    pub clusters: ClusterConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub toolkit: ToolkitConfig,

    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Endpoints used to look up target programs, per network
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_test_net_url")]
    pub test_net_url: String,
    #[serde(default = "default_dev_net_url")]
    pub dev_net_url: String,
    #[serde(default = "default_main_net_url")]
    pub main_net_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// docker-compatible CLI
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Per-job build contexts are written here
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolkitConfig {
    /// Where job images install `sol-verify` from
    #[serde(default = "default_reporter_repo")]
    pub reporter_repo: String,
    #[serde(default = "default_revision")]
    pub reporter_revision: String,

    #[serde(default = "default_verifier_repo")]
    pub verifier_repo: String,
    #[serde(default = "default_revision")]
    pub verifier_revision: String,
    #[serde(default = "default_verifier_command")]
    pub verifier_command: String,

    /// Cluster test deployments go to
    #[serde(default = "default_dev_net_url")]
    pub deploy_cluster_url: String,
    #[serde(default = "default_airdrop_sol")]
    pub airdrop_sol: String,
    #[serde(default = "default_transfer_sol")]
    pub transfer_sol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from file or environment variables
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let config = if let Some(path) = config_path {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {}", path))?
        } else {
            Self::from_env()?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok();

        Ok(Config {
            rpc_url: std::env::var("RPC_URL").context("RPC_URL environment variable is required")?,
            keypair_path: std::env::var("KEYPAIR_PATH")
                .context("KEYPAIR_PATH environment variable is required")?,
            program_id: std::env::var("VERIFIER_PROGRAM_ID")
                .context("VERIFIER_PROGRAM_ID environment variable is required")?,
            poll_interval_secs: var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|| default_poll_interval().to_string())
                .parse()?,
            status_pacing_ms: var("STATUS_PACING_MS")
                .unwrap_or_else(|| default_status_pacing_ms().to_string())
                .parse()?,
            signature_page_limit: var("SIGNATURE_PAGE_LIMIT")
                .unwrap_or_else(|| default_signature_page_limit().to_string())
                .parse()?,
            clusters: ClusterConfig {
                test_net_url: var("TEST_NET_URL").unwrap_or_else(default_test_net_url),
                dev_net_url: var("DEV_NET_URL").unwrap_or_else(default_dev_net_url),
                main_net_url: var("MAIN_NET_URL").unwrap_or_else(default_main_net_url),
            },
            container: ContainerConfig {
                runtime: var("CONTAINER_RUNTIME").unwrap_or_else(default_runtime),
                work_dir: var("WORK_DIR").unwrap_or_else(default_work_dir),
                image_prefix: var("IMAGE_PREFIX").unwrap_or_else(default_image_prefix),
            },
            toolkit: ToolkitConfig {
                reporter_repo: var("REPORTER_REPO").unwrap_or_else(default_reporter_repo),
                reporter_revision: var("REPORTER_REVISION").unwrap_or_else(default_revision),
                verifier_repo: var("VERIFIER_REPO").unwrap_or_else(default_verifier_repo),
                verifier_revision: var("VERIFIER_REVISION").unwrap_or_else(default_revision),
                verifier_command: var("VERIFIER_COMMAND").unwrap_or_else(default_verifier_command),
                deploy_cluster_url: var("DEPLOY_CLUSTER_URL").unwrap_or_else(default_dev_net_url),
                airdrop_sol: var("AIRDROP_SOL").unwrap_or_else(default_airdrop_sol),
                transfer_sol: var("TRANSFER_SOL").unwrap_or_else(default_transfer_sol),
            },
            probe: ProbeConfig {
                timeout_secs: var("PROBE_TIMEOUT_SECS")
                    .unwrap_or_else(|| default_probe_timeout().to_string())
                    .parse()?,
            },
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for url in [
            &self.rpc_url,
            &self.clusters.test_net_url,
            &self.clusters.dev_net_url,
            &self.clusters.main_net_url,
            &self.toolkit.deploy_cluster_url,
        ] {
            if !url.starts_with("http") {
                anyhow::bail!("RPC URL must start with http or https: {}", url);
            }
        }

        if !self.keypair_path().exists() {
            anyhow::bail!("Keypair file does not exist: {}", self.keypair_path);
        }

        self.program_id()?;

        if self.signature_page_limit == 0 || self.signature_page_limit > 1000 {
            anyhow::bail!("signature_page_limit must be between 1 and 1000");
        }
        if self.container.image_prefix.is_empty()
            || !self
                .container
                .image_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!("image_prefix must be lowercase alphanumeric or '-'");
        }

        Ok(())
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.program_id).context("Invalid verifier program ID")
    }

    /// Keypair path with `~` and environment variables expanded
    pub fn keypair_path(&self) -> PathBuf {
        expand_path(&self.keypair_path)
    }

    pub fn work_dir(&self) -> PathBuf {
        expand_path(&self.container.work_dir)
    }

    pub fn load_keypair(&self) -> Result<Keypair> {
        load_keypair(&self.keypair_path)
    }
}

fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}

/// Read a keypair stored as 64 raw bytes or as a JSON byte array
pub fn load_keypair(path: &str) -> Result<Keypair> {
    let path = expand_path(path);
    let keypair_data = fs::read(&path)
        .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

    let keypair = if keypair_data.len() == 64 {
        Keypair::from_bytes(&keypair_data)?
    } else {
        let json: Vec<u8> =
            serde_json::from_slice(&keypair_data).context("Failed to parse keypair JSON")?;
        Keypair::from_bytes(&json)?
    };

    Ok(keypair)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            test_net_url: default_test_net_url(),
            dev_net_url: default_dev_net_url(),
            main_net_url: default_main_net_url(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            work_dir: default_work_dir(),
            image_prefix: default_image_prefix(),
        }
    }
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            reporter_repo: default_reporter_repo(),
            reporter_revision: default_revision(),
            verifier_repo: default_verifier_repo(),
            verifier_revision: default_revision(),
            verifier_command: default_verifier_command(),
            deploy_cluster_url: default_dev_net_url(),
            airdrop_sol: default_airdrop_sol(),
            transfer_sol: default_transfer_sol(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
        }
    }
}

// Default values
fn default_poll_interval() -> u64 { 10 }
fn default_status_pacing_ms() -> u64 { 1000 }
fn default_signature_page_limit() -> usize { 1000 }
fn default_probe_timeout() -> u64 { 10 }
fn default_test_net_url() -> String { "https://api.testnet.solana.com".to_string() }
fn default_dev_net_url() -> String { "https://api.devnet.solana.com".to_string() }
fn default_main_net_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_runtime() -> String { "docker".to_string() }
fn default_work_dir() -> String { "~/.sol-verify/jobs".to_string() }
fn default_image_prefix() -> String { "sol-verify".to_string() }
fn default_reporter_repo() -> String { "https://github.com/daoplays/solana_verify".to_string() }
fn default_verifier_repo() -> String { "https://github.com/daoplays/solana_verify".to_string() }
fn default_revision() -> String { "main".to_string() }
fn default_verifier_command() -> String {
    "cargo run --release --manifest-path client/Cargo.toml --".to_string()
}
fn default_airdrop_sol() -> String { "2".to_string() }
fn default_transfer_sol() -> String { "1.9".to_string() }
