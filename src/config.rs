use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::EndpointKind;
use crate::session::{SessionConfig, VitalsThreshold};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub backend: BackendConfig,
    pub session: SessionDefaults,
    pub vitals: VitalsConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub ws_base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionDefaults {
    pub connect_timeout_secs: u64,
    pub summary_timeout_secs: u64,
    pub show_header: bool,
}

/// Normal-range rule per endpoint
#[derive(Debug, Deserialize)]
pub struct VitalsConfig {
    pub chat: VitalsThreshold,
    pub health_chat: VitalsThreshold,
    pub triage: VitalsThreshold,
}

impl VitalsConfig {
    pub fn threshold_for(&self, endpoint: EndpointKind) -> VitalsThreshold {
        match endpoint {
            EndpointKind::Chat => self.chat,
            EndpointKind::HealthChat => self.health_chat,
            EndpointKind::Triage => self.triage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub playback_dir: String,
}

impl AudioConfig {
    /// Playback directory with `~` expanded
    pub fn playback_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.playback_dir)
            .with_context(|| format!("Failed to expand playback_dir '{}'", self.playback_dir))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

impl Config {
    /// Load `path` (extension optional) with `PULSERA__SECTION__KEY`
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PULSERA").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self, patient_id: &str, endpoint: EndpointKind) -> SessionConfig {
        SessionConfig::new(patient_id, endpoint)
            .with_base_url(self.backend.ws_base_url.clone())
            .with_connect_timeout(Duration::from_secs(self.session.connect_timeout_secs))
            .with_summary_timeout(Duration::from_secs(self.session.summary_timeout_secs))
            .with_threshold(self.vitals.threshold_for(endpoint))
            .with_header(self.session.show_header)
    }
}
