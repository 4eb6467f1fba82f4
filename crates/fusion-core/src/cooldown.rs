use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Debounce clock for vision triggers.
///
/// Clones share the same last-fired instant, so the sensor path and the manual
/// trigger put each other on cooldown. Eligibility returns purely by elapsed
/// time; nothing resets the gate early.
#[derive(Clone, Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_fired: Arc<Mutex<Option<Instant>>>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Fire if at least `cooldown` has passed since the last firing.
    ///
    /// On cooldown, returns the time still remaining and leaves the gate untouched.
    pub fn try_fire(&self, now: Instant) -> Result<(), Duration> {
        let mut last = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = remaining_after(*last, self.cooldown, now) {
            return Err(remaining);
        }
        *last = Some(now);
        Ok(())
    }

    /// Time until the gate can fire again, `None` if it is ready.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        remaining_after(*last, self.cooldown, now)
    }
}

fn remaining_after(last: Option<Instant>, cooldown: Duration, now: Instant) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last?);
    (elapsed < cooldown).then(|| cooldown - elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_cooldown() {
        let gate = CooldownGate::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert_eq!(gate.try_fire(t0), Ok(()));
        assert_eq!(
            gate.try_fire(t0 + Duration::from_secs(2)),
            Err(Duration::from_secs(8))
        );
        assert_eq!(gate.remaining(t0 + Duration::from_secs(9)), Some(Duration::from_secs(1)));
        assert_eq!(gate.try_fire(t0 + Duration::from_secs(10)), Ok(()));
        assert!(gate.try_fire(t0 + Duration::from_secs(15)).is_err());
    }

    #[test]
    fn clones_share_the_clock() {
        let sensor = CooldownGate::new(Duration::from_secs(10));
        let manual = sensor.clone();
        let t0 = Instant::now();
        assert!(manual.try_fire(t0).is_ok());
        assert!(sensor.try_fire(t0 + Duration::from_secs(3)).is_err());
        assert_eq!(sensor.remaining(t0 + Duration::from_secs(11)), None);
    }
}
