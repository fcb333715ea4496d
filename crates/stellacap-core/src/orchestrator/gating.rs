use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::{Mount, SharedMount};
use crate::config::{GatingConfig, SlewPolicy};
use crate::error::DeviceError;

use super::types::GateReason;

/// Pointing-safety checks around an exposure.
pub struct MountGate {
    config: GatingConfig,
}

impl MountGate {
    pub fn new(config: GatingConfig) -> Self {
        Self { config }
    }

    /// Check before exposing. Under `SlewPolicy::Wait` this polls every
    /// `check_interval` through `pause`, which returns `false` once a stop
    /// was requested.
    pub fn pre_capture(
        &self,
        mount: Option<&SharedMount>,
        mut pause: impl FnMut(Duration) -> bool,
    ) -> Result<(), GateReason> {
        let Some(mount) = mount.filter(|_| self.config.enabled && self.config.check_before_capture)
        else {
            return Ok(());
        };

        let start = Instant::now();
        let timeout = self.config.wait_timeout();
        loop {
            match query(mount, |m| m.is_slewing()) {
                Ok(false) => break,
                Ok(true) => {}
                Err(e) => {
                    warn!(error = %e, "Could not check slewing status; proceeding");
                    break;
                }
            }
            if self.config.policy == SlewPolicy::Skip {
                info!("Mount slewing; skipping capture");
                return Err(GateReason::Slewing);
            }
            let waited = start.elapsed();
            if waited >= timeout {
                warn!(?waited, "Timed out waiting for slew to finish");
                return Err(GateReason::SlewWaitTimeout(waited));
            }
            debug!(?waited, "Waiting for slew to finish");
            if !pause(self.config.check_interval().min(timeout - waited)) {
                return Err(GateReason::Stopped);
            }
        }

        self.check_tracking(mount)
    }

    /// Re-check after the exposure. Never waits.
    pub fn post_capture(&self, mount: Option<&SharedMount>) -> Result<(), GateReason> {
        let Some(mount) = mount.filter(|_| self.config.enabled && self.config.check_after_capture)
        else {
            return Ok(());
        };
        match query(mount, |m| m.is_slewing()) {
            Ok(true) => {
                warn!("Mount slewed during exposure; discarding frame");
                return Err(GateReason::SlewedDuringExposure);
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not check slewing status after capture"),
        }
        self.check_tracking(mount)
    }

    fn check_tracking(&self, mount: &SharedMount) -> Result<(), GateReason> {
        if !self.config.require_tracking {
            return Ok(());
        }
        match query(mount, |m| m.is_tracking()) {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("Mount not tracking");
                Err(GateReason::NotTracking)
            }
            Err(e) if e.is_unsupported() => {
                debug!("Mount does not report tracking; proceeding");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not check tracking status; proceeding");
                Ok(())
            }
        }
    }
}

fn query<T>(
    mount: &SharedMount,
    f: impl FnOnce(&mut Box<dyn Mount>) -> Result<T, DeviceError>,
) -> Result<T, DeviceError> {
    let mut guard = mount.lock().map_err(|_| DeviceError::NotConnected)?;
    f(&mut *guard)
}
