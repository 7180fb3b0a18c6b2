//! Debounced physical link watcher

use super::hal::LinkStatus;

/// Two-state link tracker that only asks the PHY once per check interval.
///
/// While frames keep arriving the link is evidently up, so the check is
/// postponed by a full up-interval instead of spending an MDIO transaction.
pub struct LinkWatcher {
    state: LinkStatus,
    last_check: u32,
    interval_ms: u32,
    up_interval_ms: u32,
    down_interval_ms: u32,
}

impl LinkWatcher {
    /// Start tracking from a known state at time `now`
    pub fn new(initial: LinkStatus, now: u32, up_interval_ms: u32, down_interval_ms: u32) -> Self {
        let mut watcher = LinkWatcher {
            state: initial,
            last_check: now,
            interval_ms: 0,
            up_interval_ms,
            down_interval_ms,
        };
        watcher.interval_ms = watcher.interval_for(initial);
        watcher
    }

    /// Last observed state
    pub fn state(&self) -> LinkStatus {
        self.state
    }

    /// Run one watcher cycle.
    ///
    /// `read_phy` is only called when the interval has run out. Returns the
    /// new state if the PHY reported a change.
    pub fn check(
        &mut self,
        has_received: bool,
        now: u32,
        read_phy: impl FnOnce() -> LinkStatus,
    ) -> Option<LinkStatus> {
        if has_received {
            self.last_check = now;
            self.interval_ms = self.up_interval_ms;
            return None;
        }

        if now.wrapping_sub(self.last_check) < self.interval_ms {
            return None;
        }

        let observed = read_phy();
        let changed = observed != self.state;
        self.state = observed;
        self.last_check = now;
        self.interval_ms = self.interval_for(observed);

        changed.then_some(observed)
    }

    fn interval_for(&self, state: LinkStatus) -> u32 {
        match state {
            LinkStatus::Up => self.up_interval_ms,
            LinkStatus::Down => self.down_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phy_is_not_read_before_the_interval() {
        let mut w = LinkWatcher::new(LinkStatus::Up, 0, 2000, 1000);
        let read = || -> LinkStatus { panic!("PHY read inside the debounce window") };
        assert_eq!(w.check(false, 1999, read), None);
    }

    #[test]
    fn flicker_inside_the_window_is_ignored() {
        let mut w = LinkWatcher::new(LinkStatus::Up, 0, 2000, 1000);
        assert_eq!(w.check(false, 500, || LinkStatus::Down), None);
        assert_eq!(w.check(false, 1500, || LinkStatus::Down), None);
        assert_eq!(w.check(false, 2000, || LinkStatus::Up), None);
        assert_eq!(w.state(), LinkStatus::Up);
    }

    #[test]
    fn sustained_change_is_reported_once() {
        let mut w = LinkWatcher::new(LinkStatus::Up, 0, 2000, 1000);
        assert_eq!(w.check(false, 2000, || LinkStatus::Down), Some(LinkStatus::Down));
        // Down state rechecks on its own interval
        let read = || -> LinkStatus { panic!("PHY read before the down interval") };
        assert_eq!(w.check(false, 2999, read), None);
        assert_eq!(w.check(false, 3000, || LinkStatus::Down), None);
        assert_eq!(w.check(false, 4000, || LinkStatus::Up), Some(LinkStatus::Up));
    }

    #[test]
    fn traffic_postpones_the_check() {
        let mut w = LinkWatcher::new(LinkStatus::Up, 0, 2000, 1000);
        assert_eq!(w.check(true, 1900, || unreachable!()), None);
        assert_eq!(w.check(false, 3000, || unreachable!()), None);
        assert_eq!(w.check(false, 3900, || LinkStatus::Down), Some(LinkStatus::Down));
    }

    #[test]
    fn tick_wraparound() {
        let mut w = LinkWatcher::new(LinkStatus::Up, u32::MAX - 100, 2000, 1000);
        assert_eq!(w.check(false, 1000, || unreachable!()), None);
        assert_eq!(w.check(false, 1900, || LinkStatus::Down), Some(LinkStatus::Down));
    }
}
