//! Discovery Registry Client: register on boot, deregister on shutdown.
//! No concrete registry SDK appears anywhere in the retrieved pack, so
//! this is a thin `reqwest`-based HTTP client performing the documented
//! register/deregister calls against a named external collaborator.

use serde::Serialize;
use thiserror::Error;

use crate::config::{RegistrySettings, ServerSettings};

/// Errors registering or deregistering with the discovery registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build registry HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// The register/deregister call failed or the registry rejected it.
    #[error("registry request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The registry returned a non-2xx status.
    #[error("registry returned status {0}")]
    Rejected(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
struct InstanceMetadata<'a> {
    environment: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    service_name: &'a str,
    ip: &'a str,
    port: u16,
    metadata: InstanceMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct DeregisterRequest<'a> {
    service_name: &'a str,
    ip: &'a str,
    port: u16,
}

/// Registers/deregisters this worker instance with the configured external
/// discovery registry. A no-op (logs and returns `Ok`) when
/// `registry.addr` is empty, so local development doesn't need a live
/// registry.
pub struct RegistryClient {
    client: reqwest::Client,
    settings: RegistrySettings,
    server: ServerSettings,
    instance_ip: String,
}

impl RegistryClient {
    /// Build a client for the configured registry address. `instance_ip`
    /// is the address this instance should be reachable at.
    pub fn new(
        settings: RegistrySettings,
        server: ServerSettings,
        instance_ip: String,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(RegistryError::ClientBuild)?;
        Ok(Self {
            client,
            settings,
            server,
            instance_ip,
        })
    }

    fn enabled(&self) -> bool {
        !self.settings.addr.is_empty()
    }

    /// Register this instance: `{service_name, ip, port, metadata:
    /// {environment, version}}`. No-op if no registry address is
    /// configured.
    pub async fn register(&self) -> Result<(), RegistryError> {
        if !self.enabled() {
            tracing::info!("no registry address configured, skipping registration");
            return Ok(());
        }
        let url = format!("{}/v1/instances", self.settings.addr.trim_end_matches('/'));
        let body = RegisterRequest {
            service_name: &self.settings.service_name,
            ip: &self.instance_ip,
            port: self.server.port,
            metadata: InstanceMetadata {
                environment: &self.server.environment,
                version: &self.server.version,
            },
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(RegistryError::Request)?;
        if !response.status().is_success() {
            return Err(RegistryError::Rejected(response.status()));
        }
        tracing::info!(service = %self.settings.service_name, "registered with discovery registry");
        Ok(())
    }

    /// Deregister this instance on shutdown. No-op if no registry address
    /// is configured.
    pub async fn deregister(&self) -> Result<(), RegistryError> {
        if !self.enabled() {
            return Ok(());
        }
        let url = format!("{}/v1/instances", self.settings.addr.trim_end_matches('/'));
        let body = DeregisterRequest {
            service_name: &self.settings.service_name,
            ip: &self.instance_ip,
            port: self.server.port,
        };
        let response = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await
            .map_err(RegistryError::Request)?;
        if !response.status().is_success() {
            return Err(RegistryError::Rejected(response.status()));
        }
        tracing::info!(service = %self.settings.service_name, "deregistered from discovery registry");
        Ok(())
    }
}
