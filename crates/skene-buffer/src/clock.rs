#![forbid(unsafe_code)]

use tokio::sync::watch;

/// One playback clock observation.
///
/// `wanted_offset` models an upcoming seek: the pipelines buffer around
/// `position + wanted_offset` while the playhead is still at `position`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackTick {
    pub position: f64,
    pub wanted_offset: f64,
}

impl PlaybackTick {
    #[must_use]
    pub fn at(position: f64) -> Self {
        Self {
            position,
            wanted_offset: 0.0,
        }
    }

    /// The position buffering should target.
    #[must_use]
    pub fn wanted_position(&self) -> f64 {
        self.position + self.wanted_offset
    }
}

/// Publishes playback ticks to every pipeline.
///
/// Backed by a `watch` channel: observers always see the latest tick and
/// never queue up stale ones.
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    tx: watch::Sender<PlaybackTick>,
}

impl PlaybackClock {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PlaybackTick::default());
        Self { tx }
    }

    pub fn tick(&self, tick: PlaybackTick) {
        self.tx.send_replace(tick);
    }

    pub fn set_position(&self, position: f64) {
        self.tick(PlaybackTick::at(position));
    }

    #[must_use]
    pub fn observe(&self) -> watch::Receiver<PlaybackTick> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> PlaybackTick {
        *self.tx.borrow()
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observers_see_latest_tick() {
        let clock = PlaybackClock::new();
        let mut rx = clock.observe();
        clock.set_position(1.0);
        clock.set_position(2.0);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().position, 2.0);
    }

    #[test]
    fn wanted_position_applies_offset() {
        let tick = PlaybackTick {
            position: 10.0,
            wanted_offset: 20.0,
        };
        assert_eq!(tick.wanted_position(), 30.0);
    }
}
