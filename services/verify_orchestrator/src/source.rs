//! Pre-flight probes against a submission's source location

use async_trait::async_trait;
use std::{collections::BTreeMap, time::Duration};
use tokio::process::Command;
use tracing::debug;

use crate::error::OrchestratorError;

/// Ref name to object id, as advertised by a remote
pub type RefMap = BTreeMap<String, String>;

#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// List the refs a repository advertises. Any error means the repo is unreachable.
    async fn list_refs(&self, repo: &str) -> Result<RefMap, OrchestratorError>;

    /// Whether the archive URL answers with a success status
    async fn archive_reachable(&self, url: &str) -> Result<bool, OrchestratorError>;
}

/// Probes using the local `git` binary and an HTTP client
pub struct GitSourceProbe {
    http: reqwest::Client,
    timeout: Duration,
}

impl GitSourceProbe {
    pub fn new(timeout: Duration) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .map_err(|e| OrchestratorError::SourceError(e.to_string()))?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl SourceProbe for GitSourceProbe {
    async fn list_refs(&self, repo: &str) -> Result<RefMap, OrchestratorError> {
        if repo.starts_with('-') {
            return Err(OrchestratorError::SourceError(format!(
                "refusing repo argument {repo:?}"
            )));
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new("git")
                .arg("ls-remote")
                .arg("--")
                .arg(repo)
                .env("GIT_TERMINAL_PROMPT", "0")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| OrchestratorError::TimeoutError(format!("git ls-remote {repo}")))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::SourceError(format!(
                "git ls-remote {} failed: {}",
                repo,
                stderr.trim()
            )));
        }

        let refs = parse_ls_remote(&String::from_utf8_lossy(&output.stdout));
        debug!("{} advertises {} refs", repo, refs.len());
        Ok(refs)
    }

    async fn archive_reachable(&self, url: &str) -> Result<bool, OrchestratorError> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| OrchestratorError::SourceError(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Parse `<oid>\t<ref>` lines; anything else is ignored
pub fn parse_ls_remote(output: &str) -> RefMap {
    output
        .lines()
        .filter_map(|line| {
            let (oid, name) = line.split_once('\t')?;
            let oid = oid.trim();
            let name = name.trim();
            if oid.is_empty() || name.is_empty() {
                return None;
            }
            Some((name.to_string(), oid.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_remote() {
        let output = "4f2a9c1e\tHEAD\n4f2a9c1e\trefs/heads/main\n\nwarning: noise\n0badc0de\trefs/tags/v1\n";
        let refs = parse_ls_remote(output);

        assert_eq!(refs.len(), 3);
        assert_eq!(refs.get("HEAD").map(String::as_str), Some("4f2a9c1e"));
        assert_eq!(refs.get("refs/tags/v1").map(String::as_str), Some("0badc0de"));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_ls_remote("").is_empty());
    }

    #[tokio::test]
    async fn test_rejects_option_like_repo() {
        let probe = GitSourceProbe::new(Duration::from_secs(1)).unwrap();
        let result = probe.list_refs("--upload-pack=touch /tmp/x").await;
        assert!(matches!(result, Err(OrchestratorError::SourceError(_))));
    }
}
