use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::BrightBodyConfig;
use crate::solve::ephemeris::{assess_field, BodyVerdict};
use crate::solve::{BrightBody, PlateSolveResult};

/// What to do with a frame before handing it to the solver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SolveDecision {
    Solve,
    Skip(BrightBody),
}

/// Tracks bright bodies near the field and the override they trigger: a
/// capped exposure and, for failed solves, the last good result.
pub struct BrightBodyGuard {
    config: BrightBodyConfig,
    override_until: Option<Instant>,
    last_good: Option<(PlateSolveResult, Instant)>,
}

impl BrightBodyGuard {
    pub fn new(config: BrightBodyConfig) -> Self {
        Self {
            config,
            override_until: None,
            last_good: None,
        }
    }

    pub fn last_good(&self) -> Option<&PlateSolveResult> {
        self.last_good.as_ref().map(|(r, _)| r)
    }

    pub fn override_active(&self, now: Instant) -> bool {
        self.override_until.is_some_and(|until| now < until)
    }

    /// Exposure ceiling while the override is active.
    pub fn exposure_cap(&self, now: Instant) -> Option<f64> {
        self.override_active(now).then_some(self.config.max_exposure_secs)
    }

    /// Check the field centred on `center` (degrees). A body anywhere in the
    /// field starts or extends the override; a dead-centre body also skips
    /// the solve.
    pub fn assess(
        &mut self,
        center: (f64, f64),
        fov: (f64, f64),
        when: DateTime<Utc>,
        now: Instant,
    ) -> SolveDecision {
        if !self.config.enabled || self.config.bodies.is_empty() {
            return SolveDecision::Solve;
        }
        let verdict = assess_field(
            center,
            fov,
            &self.config.bodies,
            when,
            self.config.dead_center_fraction,
        );
        match verdict {
            BodyVerdict::Clear => SolveDecision::Solve,
            BodyVerdict::InField {
                body,
                separation_deg,
            } => {
                self.extend_override(now);
                info!(%body, separation_deg, cap = self.config.max_exposure_secs, "Bright body in field; capping exposure");
                SolveDecision::Solve
            }
            BodyVerdict::DeadCenter {
                body,
                separation_deg,
            } => {
                self.extend_override(now);
                warn!(%body, separation_deg, "Bright body at field centre; skipping solve");
                SolveDecision::Skip(body)
            }
        }
    }

    pub fn record_success(&mut self, result: &PlateSolveResult, now: Instant) {
        self.last_good = Some((result.clone(), now));
    }

    /// The last good solve, if the override is active and the result is
    /// recent enough to stand in for a failure.
    pub fn fallback(&self, now: Instant) -> Option<PlateSolveResult> {
        if !self.override_active(now) {
            return None;
        }
        let (result, at) = self.last_good.as_ref()?;
        (now.duration_since(*at) <= self.config.last_good_max_age()).then(|| result.clone())
    }

    fn extend_override(&mut self, now: Instant) {
        self.override_until = Some(now + self.config.override_window());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn result() -> PlateSolveResult {
        PlateSolveResult {
            ra_center: 10.0,
            dec_center: 20.0,
            fov_width: 1.0,
            fov_height: 0.7,
            position_angle: 0.0,
            image_size: None,
            confidence: 0.99,
            is_flipped: false,
            solving_time: Duration::from_secs(1),
            method: "test".into(),
            stars_detected: None,
            pixel_scale: None,
        }
    }

    #[test]
    fn test_no_override_no_fallback() {
        let mut guard = BrightBodyGuard::new(BrightBodyConfig::default());
        let now = Instant::now();
        guard.record_success(&result(), now);
        assert!(guard.fallback(now).is_none());
        assert!(guard.exposure_cap(now).is_none());
    }

    #[test]
    fn test_override_window_expires() {
        let config = BrightBodyConfig {
            override_window_secs: 10.0,
            max_exposure_secs: 0.5,
            ..Default::default()
        };
        let mut guard = BrightBodyGuard::new(config);
        let now = Instant::now();
        guard.record_success(&result(), now);
        guard.extend_override(now);
        assert_eq!(guard.exposure_cap(now), Some(0.5));
        assert_eq!(guard.fallback(now), Some(result()));
        let later = now + Duration::from_secs(11);
        assert!(guard.exposure_cap(later).is_none());
        assert!(guard.fallback(later).is_none());
    }

    #[test]
    fn test_stale_last_good_is_not_used() {
        let config = BrightBodyConfig {
            override_window_secs: 100.0,
            last_good_max_age_secs: 5.0,
            ..Default::default()
        };
        let mut guard = BrightBodyGuard::new(config);
        let now = Instant::now();
        guard.record_success(&result(), now);
        let later = now + Duration::from_secs(6);
        guard.extend_override(later);
        assert!(guard.fallback(later).is_none());
    }
}
