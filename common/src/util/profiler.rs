use std::time::Instant;

/// Logs how long a phase took when dropped. Phases faster than the
/// reporting floor stay quiet, so tight loops can carry one without
/// flooding the log.
pub struct ScopedTimer {
    name: &'static str,
    start: Instant,
    floor_ms: u128,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            floor_ms: 0,
        }
    }

    pub fn quiet_below_ms(name: &'static str, floor_ms: u128) -> Self {
        Self {
            name,
            start: Instant::now(),
            floor_ms,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let ms = self.start.elapsed().as_millis();
        if ms >= self.floor_ms {
            log::info!("{} took {} ms", self.name, ms);
        }
    }
}
