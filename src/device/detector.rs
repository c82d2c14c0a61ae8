use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::models::{DetectionReport, ProbeOutcome, ProbeRecord};
use super::Result;
use crate::serial::{PortConnector, ScaleSession};

/// Wait after closing the previous session; the OS does not release a
/// serial port immediately after it is closed.
pub const RELEASE_DELAY: Duration = Duration::from_secs(3);

/// Finds the port a scale is attached to by probing every candidate.
pub struct ScaleDetector {
    connector: Arc<dyn PortConnector>,
}

impl ScaleDetector {
    pub fn new(connector: Arc<dyn PortConnector>) -> Self {
        Self { connector }
    }

    /// Ports visible to the OS, in probing order (descending by name).
    pub fn candidate_ports(&self) -> Result<Vec<String>> {
        let mut ports = self.connector.available_ports()?;
        ports.sort_by(|a, b| b.cmp(a));
        ports.dedup();
        Ok(ports)
    }

    /// Probe candidate ports until one returns a non-negative reading.
    ///
    /// Any session in `active` is closed first. On success the winning
    /// session is stored in `active`; every other probe session is closed
    /// before moving on. Only a failure to list ports is an error.
    pub async fn detect(&self, active: &mut Option<Arc<ScaleSession>>) -> Result<DetectionReport> {
        if let Some(previous) = active.take() {
            log::info!(
                "Closing scale session on {} before detection",
                previous.port_name()
            );
            previous.close().await;
            sleep(RELEASE_DELAY).await;
        }

        let ports = self.candidate_ports()?;
        log::info!("The following serial ports were found: {:?}", ports);

        let mut probes = Vec::with_capacity(ports.len());
        for port_name in ports {
            let session = match ScaleSession::open(&port_name, self.connector.clone()) {
                Ok(session) => session,
                Err(e) => {
                    log::debug!("Skipping {}: {}", port_name, e);
                    probes.push(ProbeRecord::new(
                        port_name,
                        ProbeOutcome::OpenFailed { error: e.to_string() },
                    ));
                    continue;
                }
            };

            let weight = session.read_value().await;
            if weight.is_measurement() {
                log::info!("Scale detected on {} (read {})", port_name, weight);
                let outcome = session.last_outcome().await;
                probes.push(ProbeRecord::new(
                    port_name.clone(),
                    ProbeOutcome::Detected { weight, outcome },
                ));
                *active = Some(Arc::new(session));
                return Ok(DetectionReport::found(port_name, probes));
            }

            let error = session.last_error().await;
            log::debug!("Skipping {}: read returned {} ({:?})", port_name, weight, error);
            session.close().await;
            probes.push(ProbeRecord::new(
                port_name,
                ProbeOutcome::ReadFailed { weight, error },
            ));
        }

        log::warn!("No scale detected on {} candidate port(s)", probes.len());
        Ok(DetectionReport::not_found(probes))
    }
}
