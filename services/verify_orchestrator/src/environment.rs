//! Build environments and the image recipe derived from them

use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;

use sol_verify_sdk::SubmitProgramMeta;

use crate::script::{AUTHORITY_KEYPAIR, DEPLOY_KEYPAIR, JOB_DIR};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("unknown build environment preset: {0}")]
    UnknownPreset(String),

    #[error("invalid {tool} version: {version:?}")]
    InvalidVersion { tool: &'static str, version: String },
}

/// Resolved toolchain versions for one job. Unset fields use the image defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildEnvironment {
    pub rust_version: Option<String>,
    pub solana_version: Option<String>,
    pub anchor_version: Option<String>,
}

/// A named build environment
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub rust: &'static str,
    pub solana: &'static str,
    pub anchor: Option<&'static str>,
}

pub const PRESETS: &[Preset] = &[
    Preset { name: "solana_v1.9", rust: "1.59", solana: "1.9.29", anchor: None },
    Preset { name: "solana_v1.10", rust: "1.62", solana: "1.10.39", anchor: None },
    Preset { name: "anchor_v0.25", rust: "1.62", solana: "1.10.39", anchor: Some("0.25.0") },
    Preset { name: "solana_v1.14", rust: "1.66", solana: "1.14.18", anchor: None },
    Preset { name: "anchor_v0.27", rust: "1.66", solana: "1.14.18", anchor: Some("0.27.0") },
    Preset { name: "solana_v1.16", rust: "1.69", solana: "1.16.27", anchor: None },
    Preset { name: "anchor_v0.29", rust: "1.75", solana: "1.17.34", anchor: Some("0.29.0") },
    Preset { name: "solana_v1.18", rust: "1.75", solana: "1.18.26", anchor: None },
];

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|preset| preset.name == name)
}

/// Look up the named preset, or take the explicit versions field by field
pub fn resolve(meta: &SubmitProgramMeta) -> Result<BuildEnvironment, EnvironmentError> {
    if let Some(name) = meta.preset() {
        let preset =
            find_preset(name).ok_or_else(|| EnvironmentError::UnknownPreset(name.to_string()))?;
        return Ok(BuildEnvironment {
            rust_version: Some(preset.rust.to_string()),
            solana_version: Some(preset.solana.to_string()),
            anchor_version: preset.anchor.map(str::to_string),
        });
    }

    Ok(BuildEnvironment {
        rust_version: explicit("rust", &meta.rust_version)?,
        solana_version: explicit("solana", &meta.solana_version)?,
        anchor_version: explicit("anchor", &meta.anchor_version)?,
    })
}

fn explicit(tool: &'static str, version: &str) -> Result<Option<String>, EnvironmentError> {
    let version = version.trim();
    if version.is_empty() {
        return Ok(None);
    }

    // Versions end up in image tags and install URLs
    let valid = version.len() <= 32
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid {
        return Err(EnvironmentError::InvalidVersion {
            tool,
            version: version.to_string(),
        });
    }

    Ok(Some(version.trim_start_matches('v').to_string()))
}

/// Where the in-container status reporter is installed from
#[derive(Debug, Clone)]
pub struct ReporterInstall {
    pub repo: String,
    pub revision: String,
}

impl BuildEnvironment {
    pub fn base_image(&self) -> String {
        format!("rust:{}", self.rust_version.as_deref().unwrap_or("latest"))
    }

    pub fn solana_release(&self) -> String {
        match &self.solana_version {
            Some(version) => format!("v{version}"),
            None => "stable".to_string(),
        }
    }

    /// Releases from 1.16 on ship `build-sbf`; older ones only `build-bpf`.
    pub fn cargo_build_command(&self) -> &'static str {
        let modern = self
            .solana_version
            .as_deref()
            .and_then(parse_major_minor)
            .map_or(true, |version| version >= (1, 16));
        if modern {
            "cargo build-sbf"
        } else {
            "cargo build-bpf"
        }
    }

    /// Image recipe for a job slot
    pub fn dockerfile(&self, reporter: &ReporterInstall) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FROM {}", self.base_image());
        let _ = writeln!(
            out,
            "RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             git curl ca-certificates unzip pkg-config libssl-dev libudev-dev \\\n    \
             && rm -rf /var/lib/apt/lists/*"
        );
        let _ = writeln!(
            out,
            "RUN sh -c \"$(curl -sSfL https://release.anza.xyz/{}/install)\"",
            self.solana_release()
        );
        let _ = writeln!(
            out,
            "ENV PATH=\"/root/.local/share/solana/install/active_release/bin:${{PATH}}\""
        );
        if let Some(anchor) = &self.anchor_version {
            let _ = writeln!(
                out,
                "RUN cargo install --git https://github.com/coral-xyz/anchor --tag v{anchor} anchor-cli --locked"
            );
        }
        let _ = writeln!(
            out,
            "RUN cargo install --git {} --rev {} --locked sol-verify-orchestrator",
            reporter.repo, reporter.revision
        );
        let _ = writeln!(
            out,
            "RUN mkdir -p /root/.config/solana && solana-keygen new --no-bip39-passphrase --silent --force -o {DEPLOY_KEYPAIR}"
        );
        let _ = writeln!(out, "COPY id.json {AUTHORITY_KEYPAIR}");
        let _ = writeln!(out, "COPY run.sh {JOB_DIR}/run.sh");
        let _ = writeln!(out, "WORKDIR {JOB_DIR}");
        let _ = writeln!(out, "CMD [\"bash\", \"{JOB_DIR}/run.sh\"]");
        out
    }
}

fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
