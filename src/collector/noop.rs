//! A source that never produces events.
//!
//! Used where no input device can be read (non-Linux targets, or no sensor
//! attached) so the agent still runs and reports configured sensors as
//! silent.

use super::{CollectorError, KeySource, SourceEvent};
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct NoopSource {
    device_id: String,
}

impl NoopSource {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

impl KeySource for NoopSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn next_event(&mut self) -> Result<SourceEvent, CollectorError> {
        std::thread::sleep(IDLE_POLL);
        Ok(SourceEvent::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_is_always_idle() {
        let mut source = NoopSource::new("none");
        assert_eq!(source.device_id(), "none");
        assert_eq!(source.next_event().unwrap(), SourceEvent::Idle);
    }
}
