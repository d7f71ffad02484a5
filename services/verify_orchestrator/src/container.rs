//! Isolated job containers
//!
//! Each job slot gets its own image, built from the context directory the
//! dispatcher writes, and its own detached container. Nothing is reused
//! between slots, and both the container and the image go away when the
//! job ends.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build the slot's image from a prepared context directory
    async fn build_image(&self, slot: u64, context: &Path) -> Result<(), OrchestratorError>;

    /// Start the slot's container without waiting for it
    async fn start(&self, slot: u64) -> Result<(), OrchestratorError>;

    /// Remove the slot's container and image
    async fn stop(&self, slot: u64) -> Result<(), OrchestratorError>;
}

/// [`ContainerRuntime`] driving a docker-compatible CLI
pub struct DockerRuntime {
    binary: String,
    image_prefix: String,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>, image_prefix: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            image_prefix: image_prefix.into(),
        }
    }

    pub fn name(&self, slot: u64) -> String {
        format!("{}-{}", self.image_prefix, slot)
    }

    /// Fail early when the runtime binary is missing or broken
    pub async fn check_available(&self) -> Result<(), OrchestratorError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::ContainerError(format!(
                    "failed to execute '{} --version': {}",
                    self.binary, e
                ))
            })?;

        if !output.status.success() {
            return Err(OrchestratorError::ContainerError(format!(
                "{} is not working correctly",
                self.binary
            )));
        }

        info!(
            "Container runtime available: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn exec(&self, args: &[&str]) -> Result<String, OrchestratorError> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::ContainerError(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, slot: u64, context: &Path) -> Result<(), OrchestratorError> {
        let tag = self.name(slot);
        let context = context.to_string_lossy();
        info!("Building image {} from {}", tag, context);
        self.exec(&["build", "--quiet", "-t", &tag, &context]).await?;
        Ok(())
    }

    async fn start(&self, slot: u64) -> Result<(), OrchestratorError> {
        let name = self.name(slot);
        let id = self.exec(&["run", "-d", "--name", &name, &name]).await?;
        info!("Started container {} ({})", name, id);
        Ok(())
    }

    async fn stop(&self, slot: u64) -> Result<(), OrchestratorError> {
        let name = self.name(slot);
        // both removals are attempted even if the container is already gone
        let container = self.exec(&["rm", "-f", &name]).await;
        let image = self.exec(&["rmi", "-f", &name]).await;

        match (container, image) {
            (Ok(_), Ok(_)) => {
                debug!("Container and image {} removed", name);
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to clean up {}: {}", name, e);
                Err(e)
            }
        }
    }
}
