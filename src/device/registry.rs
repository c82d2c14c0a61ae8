use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;

use super::detector::ScaleDetector;
use super::models::DetectionReport;
use super::{DeviceError, Result};
use crate::config::{PortSettings, ScaleConfig};
use crate::serial::{PortConnector, ScaleSession, SystemPorts};

static GLOBAL: OnceCell<ScaleRegistry> = OnceCell::new();

/// Holds the active scale session.
///
/// The session is created lazily from the configured port on first use
/// and replaced when detection finds a scale. Creation and detection are
/// serialized, so concurrent callers always share one session.
pub struct ScaleRegistry {
    settings: Arc<dyn PortSettings>,
    connector: Arc<dyn PortConnector>,
    active: Mutex<Option<Arc<ScaleSession>>>,
}

impl ScaleRegistry {
    pub fn new(settings: Arc<dyn PortSettings>, connector: Arc<dyn PortConnector>) -> Self {
        Self {
            settings,
            connector,
            active: Mutex::new(None),
        }
    }

    /// Process-wide registry. Unless [`ScaleRegistry::init_global`] ran
    /// first, it is built from the environment and the system ports.
    pub fn global() -> &'static ScaleRegistry {
        GLOBAL.get_or_init(|| {
            ScaleRegistry::new(Arc::new(ScaleConfig::from_env()), Arc::new(SystemPorts))
        })
    }

    /// Install the process-wide registry. Fails once it exists.
    pub fn init_global(registry: ScaleRegistry) -> Result<()> {
        GLOBAL
            .set(registry)
            .map_err(|_| DeviceError::AlreadyInitialized)
    }

    /// The active session, opening one on the configured port if needed.
    ///
    /// Returns `None` when no session is active and no port is configured.
    pub async fn current(&self) -> Result<Option<Arc<ScaleSession>>> {
        let mut active = self.active.lock().await;
        if active.is_none() {
            if let Some(port_name) = self.settings.scale_port() {
                let session = ScaleSession::open(&port_name, self.connector.clone())?;
                log::info!("Active scale session created on {}", port_name);
                *active = Some(Arc::new(session));
            }
        }
        Ok(active.clone())
    }

    /// Make `session` the active one, returning the session it replaced.
    pub async fn install(&self, session: Arc<ScaleSession>) -> Option<Arc<ScaleSession>> {
        self.active.lock().await.replace(session)
    }

    /// Remove the active session without closing it.
    pub async fn take(&self) -> Option<Arc<ScaleSession>> {
        self.active.lock().await.take()
    }

    pub fn detector(&self) -> ScaleDetector {
        ScaleDetector::new(self.connector.clone())
    }

    /// Run detection and keep the session it finds.
    pub async fn detect_report(&self) -> Result<DetectionReport> {
        let mut active = self.active.lock().await;
        self.detector().detect(&mut active).await
    }

    /// Run detection and return the port of the scale, if one answered.
    pub async fn detect(&self) -> Result<Option<String>> {
        Ok(self.detect_report().await?.port_name)
    }
}
