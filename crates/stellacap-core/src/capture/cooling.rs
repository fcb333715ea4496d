use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CoolingConfig;
use crate::consts::WORKER_JOIN_TIMEOUT;
use crate::error::DeviceError;
use crate::status::Status;

use super::device::{DeviceResult, SharedCamera, TemperatureControl};

/// Consecutive in-tolerance readings required before the sensor counts as
/// stable.
const REQUIRED_STABLE_READINGS: u32 = 6;

/// Snapshot of the cooler, as reported to callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CoolingStatus {
    pub temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub cooler_power: Option<f64>,
    pub cooler_on: Option<bool>,
    pub is_cooling: bool,
    pub is_warming_up: bool,
    pub can_set_temperature: bool,
    pub can_get_power: bool,
}

/// Last known cooling state, persisted so a restarted process can see what
/// the previous session left behind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoolingCache {
    pub target_temperature: Option<f64>,
    pub last_temperature: Option<f64>,
    pub cooler_on: bool,
    pub is_cooling: bool,
    pub is_warming_up: bool,
    pub updated_at: String,
}

impl CoolingCache {
    pub fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&text) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cooling cache");
                None
            }
        }
    }

    fn save(&self, path: &Path) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let text = toml::to_string_pretty(self)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, text)
        };
        if let Err(e) = write() {
            warn!(path = %path.display(), error = %e, "Failed to write cooling cache");
        }
    }
}

#[derive(Debug, Default)]
struct WarmupSignal {
    stop_request: bool,
    done: bool,
}

#[derive(Debug, Default)]
struct CoolingState {
    target: Option<f64>,
    is_cooling: bool,
    is_warming_up: bool,
}

/// Owns cooler control for one camera: cool-down, stabilization and a
/// gradual warm-up that runs on its own thread.
pub struct CoolingService {
    camera: SharedCamera,
    config: CoolingConfig,
    state: Arc<Mutex<CoolingState>>,
    warmup: Arc<(Mutex<WarmupSignal>, Condvar)>,
    monitor_thread: Option<JoinHandle<()>>,
}

impl CoolingService {
    pub fn new(camera: SharedCamera, config: CoolingConfig) -> Self {
        if let Some(previous) = CoolingCache::load(&config.cache_path) {
            debug!(
                target = ?previous.target_temperature,
                cooler_on = previous.cooler_on,
                warming = previous.is_warming_up,
                updated = %previous.updated_at,
                "Previous cooling state"
            );
        }
        Self {
            camera,
            config,
            state: Arc::new(Mutex::new(CoolingState::default())),
            warmup: Arc::new((Mutex::new(WarmupSignal::default()), Condvar::new())),
            monitor_thread: None,
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.config.cache_path
    }

    pub fn is_warming_up(&self) -> bool {
        lock(&self.state).is_warming_up
    }

    /// Cool to the configured target and, if configured, wait until stable.
    pub fn initialize_and_stabilize(&mut self) -> Status<CoolingStatus> {
        let can_set = with_cooler(&self.camera, |_| Ok(())).is_ok();
        if !can_set {
            warn!("Cooling enabled but camera does not support cooling");
            return Status::warning("Camera does not support cooling", None);
        }
        let status = self.set_target_temperature(self.config.target_temperature);
        if !status.is_ok() || !self.config.wait_for_cooling {
            return status;
        }
        self.wait_for_stabilization(
            self.config.stabilization_timeout(),
            self.config.stabilization_tolerance,
        )
    }

    /// Set the cooler set-point and switch the cooler on.
    pub fn set_target_temperature(&mut self, celsius: f64) -> Status<CoolingStatus> {
        info!(target = celsius, "Setting cooling target temperature");
        let result = with_cooler(&self.camera, |tc| {
            tc.set_target_temperature(celsius)?;
            tc.set_cooler_on(true)
        });
        if let Err(e) = result {
            return Status::error(format!("Failed to set cooling: {e}"));
        }
        {
            let mut state = lock(&self.state);
            state.target = Some(celsius);
            state.is_cooling = true;
            state.is_warming_up = false;
        }
        let status = self.cooling_status();
        self.persist(&status);
        Status::success(format!("Cooling set to {celsius:.1}°C"), status)
            .with_detail("target_temperature", celsius)
    }

    /// Poll until `REQUIRED_STABLE_READINGS` consecutive readings are within
    /// `tolerance` of the set-point, or `timeout` passes.
    pub fn wait_for_stabilization(
        &mut self,
        timeout: Duration,
        tolerance: f64,
    ) -> Status<CoolingStatus> {
        info!(?timeout, tolerance, "Waiting for temperature stabilization");
        let start = Instant::now();
        let mut stable = 0;
        while start.elapsed() < timeout {
            let reading = with_cooler(&self.camera, |tc| {
                Ok((tc.ccd_temperature()?, tc.target_temperature()?))
            });
            let (temp, target) = match reading {
                Ok(r) => r,
                Err(e) => return Status::error(format!("Temperature read failed: {e}")),
            };
            let diff = (temp - target).abs();
            debug!(
                elapsed = start.elapsed().as_secs_f64(),
                temp,
                target,
                diff,
                "Cooling"
            );
            if diff <= tolerance {
                stable += 1;
                if stable >= REQUIRED_STABLE_READINGS {
                    info!(temp, target, "Temperature stabilized");
                    let status = self.cooling_status();
                    self.persist(&status);
                    return Status::success(format!("Temperature stabilized at {temp:.1}°C"), status)
                        .with_detail("elapsed_seconds", format!("{:.1}", start.elapsed().as_secs_f64()));
                }
            } else {
                stable = 0;
            }
            thread::sleep(self.config.poll());
        }
        let status = self.cooling_status();
        warn!(final_temp = ?status.temperature, "Temperature stabilization timeout");
        self.persist(&status);
        Status::warning("Temperature stabilization timeout", Some(status))
    }

    /// Start ramping the set-point up to `warmup_final_temp` on a monitor
    /// thread; the cooler is switched off once the ramp completes.
    pub fn start_warmup(&mut self) -> Status<CoolingStatus> {
        if self.monitor_thread.is_some() && self.is_warming_up() {
            return Status::warning("Warm-up already running", Some(self.cooling_status()));
        }
        self.reap_monitor();

        let start_point = match with_cooler(&self.camera, |tc| tc.target_temperature()) {
            Ok(t) => t,
            Err(e) => return Status::error(format!("Failed to start warm-up: {e}")),
        };
        let final_temp = self.config.warmup_final_temp;
        info!(from = start_point, to = final_temp, rate = self.config.warmup_rate_per_min, "Starting warm-up");

        {
            let mut state = lock(&self.state);
            state.is_cooling = false;
            state.is_warming_up = true;
        }
        *lock(&self.warmup.0) = WarmupSignal::default();

        let job = WarmupJob {
            camera: self.camera.clone(),
            state: self.state.clone(),
            signal: self.warmup.clone(),
            cache_path: self.config.cache_path.clone(),
            start_point,
            final_temp,
            rate_per_min: self.config.warmup_rate_per_min.max(f64::EPSILON),
            poll: self.config.poll(),
        };
        self.monitor_thread = Some(thread::spawn(move || job.run()));

        let status = self.cooling_status();
        self.persist(&status);
        Status::success(format!("Warm-up started to {final_temp:.1}°C"), status)
    }

    /// Ask the monitor to stop and wait briefly for it.
    pub fn stop_warmup(&mut self) -> Status<CoolingStatus> {
        {
            let (signal, cvar) = &*self.warmup;
            lock(signal).stop_request = true;
            cvar.notify_all();
        }
        let finished = self.wait_done(WORKER_JOIN_TIMEOUT);
        lock(&self.state).is_warming_up = false;
        let status = self.cooling_status();
        self.persist(&status);
        if finished {
            Status::success("Warm-up stopped", status)
        } else {
            Status::warning("Warm-up monitor did not stop in time", Some(status))
        }
    }

    /// Block until the warm-up ramp completes or `timeout` passes.
    pub fn wait_for_warmup_completion(&mut self, timeout: Duration) -> Status<CoolingStatus> {
        if self.monitor_thread.is_none() {
            return Status::success("No warm-up in progress", self.cooling_status());
        }
        if self.wait_done(timeout) {
            Status::success("Warm-up completed", self.cooling_status())
        } else {
            Status::warning("Warm-up still in progress", Some(self.cooling_status()))
        }
    }

    pub fn cooling_status(&self) -> CoolingStatus {
        let (is_cooling, is_warming_up, configured_target) = {
            let s = lock(&self.state);
            (s.is_cooling, s.is_warming_up, s.target)
        };
        let mut status = CoolingStatus {
            is_cooling,
            is_warming_up,
            target_temperature: configured_target,
            ..Default::default()
        };
        if let Ok(mut camera) = self.camera.lock() {
            let caps = camera.capabilities().clone();
            status.can_set_temperature = caps.can_set_temperature;
            status.can_get_power = caps.can_get_power;
            if let Some(tc) = camera.temperature_control() {
                status.temperature = tc.ccd_temperature().ok();
                status.cooler_on = tc.cooler_on().ok();
                status.cooler_power = tc.cooler_power().ok();
                if status.target_temperature.is_none() {
                    status.target_temperature = tc.target_temperature().ok();
                }
            }
        }
        status
    }

    fn persist(&self, status: &CoolingStatus) {
        CoolingCache {
            target_temperature: status.target_temperature,
            last_temperature: status.temperature,
            cooler_on: status.cooler_on.unwrap_or(false),
            is_cooling: status.is_cooling,
            is_warming_up: status.is_warming_up,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
        .save(&self.config.cache_path);
    }

    /// Wait on the monitor's done flag; join it if it finished.
    fn wait_done(&mut self, timeout: Duration) -> bool {
        let running = self.monitor_thread.is_some();
        let done = {
            let (signal, cvar) = &*self.warmup;
            let guard = lock(signal);
            let (guard, _) = cvar
                .wait_timeout_while(guard, timeout, |s| !s.done && running)
                .unwrap_or_else(|e| e.into_inner());
            guard.done
        };
        if done {
            self.reap_monitor();
        }
        done || self.monitor_thread.is_none()
    }

    fn reap_monitor(&mut self) {
        if let Some(handle) = self.monitor_thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                self.monitor_thread = Some(handle);
            }
        }
    }
}

impl Drop for CoolingService {
    fn drop(&mut self) {
        if self.monitor_thread.is_some() {
            let (signal, cvar) = &*self.warmup;
            lock(signal).stop_request = true;
            cvar.notify_all();
        }
    }
}

struct WarmupJob {
    camera: SharedCamera,
    state: Arc<Mutex<CoolingState>>,
    signal: Arc<(Mutex<WarmupSignal>, Condvar)>,
    cache_path: PathBuf,
    start_point: f64,
    final_temp: f64,
    rate_per_min: f64,
    poll: Duration,
}

impl WarmupJob {
    fn run(self) {
        let started = Instant::now();
        let (signal, cvar) = &*self.signal;
        loop {
            let minutes = started.elapsed().as_secs_f64() / 60.0;
            let set_point = (self.start_point + self.rate_per_min * minutes).min(self.final_temp);
            let ramp_done = set_point >= self.final_temp;

            let step = with_cooler(&self.camera, |tc| {
                tc.set_target_temperature(set_point)?;
                if ramp_done {
                    tc.set_cooler_on(false)?;
                }
                tc.ccd_temperature()
            });
            match step {
                Ok(temp) => debug!(set_point, temp, "Warm-up"),
                Err(e) => warn!(error = %e, "Warm-up step failed"),
            }
            lock(&self.state).target = Some(set_point);

            if ramp_done {
                info!(final_temp = self.final_temp, "Warm-up completed, cooler off");
                break;
            }
            let guard = lock(signal);
            let (guard, _) = cvar
                .wait_timeout_while(guard, self.poll, |s| !s.stop_request)
                .unwrap_or_else(|e| e.into_inner());
            if guard.stop_request {
                info!("Warm-up stopped");
                break;
            }
        }

        {
            let mut state = lock(&self.state);
            state.is_warming_up = false;
            state.is_cooling = false;
        }
        CoolingCache {
            target_temperature: Some(self.final_temp),
            last_temperature: None,
            cooler_on: false,
            is_cooling: false,
            is_warming_up: false,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
        .save(&self.cache_path);

        lock(signal).done = true;
        cvar.notify_all();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run `f` against the camera's cooler, failing with `Unsupported` when the
/// camera has none.
fn with_cooler<R>(
    camera: &SharedCamera,
    f: impl FnOnce(&mut dyn TemperatureControl) -> DeviceResult<R>,
) -> DeviceResult<R> {
    let mut camera = camera.lock().map_err(|_| DeviceError::NotConnected)?;
    if !camera.capabilities().can_set_temperature {
        return Err(DeviceError::Unsupported("temperature control".into()));
    }
    match camera.temperature_control() {
        Some(tc) => f(tc),
        None => Err(DeviceError::Unsupported("temperature control".into())),
    }
}
