pub const DEFAULT_OFFER_COUNTDOWN_SECS: u32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// The timer is not running; the tick is ignored.
    Inactive,
    Remaining(u32),
    /// Reported once, on the tick that reaches zero.
    Expired,
}

/// One-second countdown for a pending ride offer. It is driven by the caller's
/// ticker and only counts while started.
#[derive(Clone, Debug)]
pub struct CountdownTimer {
    initial: u32,
    remaining: u32,
    active: bool,
}

impl CountdownTimer {
    pub fn new(initial: u32) -> Self {
        Self {
            initial,
            remaining: initial,
            active: false,
        }
    }

    pub fn start(&mut self) {
        self.remaining = self.initial;
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn remaining(&self) -> Option<u32> {
        self.active.then_some(self.remaining)
    }

    pub fn tick(&mut self) -> Tick {
        if !self.active {
            return Tick::Inactive;
        }

        self.remaining = self.remaining.saturating_sub(1);

        if self.remaining == 0 {
            self.active = false;
            return Tick::Expired;
        }

        Tick::Remaining(self.remaining)
    }
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new(DEFAULT_OFFER_COUNTDOWN_SECS)
    }
}

#[test]
fn expires_exactly_once() {
    let mut timer = CountdownTimer::default();
    timer.start();

    let ticks: Vec<Tick> = (0..20).map(|_| timer.tick()).collect();

    assert_eq!(ticks[0], Tick::Remaining(14));
    assert_eq!(ticks[13], Tick::Remaining(1));
    assert_eq!(ticks[14], Tick::Expired);
    assert!(ticks[15..].iter().all(|t| *t == Tick::Inactive));
    assert_eq!(ticks.iter().filter(|t| **t == Tick::Expired).count(), 1);
}

#[test]
fn stopped_timer_ignores_ticks() {
    let mut timer = CountdownTimer::new(3);
    timer.start();
    timer.tick();
    timer.stop();

    assert_eq!(timer.tick(), Tick::Inactive);
    assert_eq!(timer.tick(), Tick::Inactive);
    assert_eq!(timer.remaining(), None);
}

#[test]
fn restart_resets_counter() {
    let mut timer = CountdownTimer::new(3);
    timer.start();
    timer.tick();
    timer.tick();
    timer.start();

    assert_eq!(timer.remaining(), Some(3));
}
