//! Timers owned by the widget: the poll scheduler and the resolution
//! countdown.
//!
//! Polling uses chained timeouts. The next poll is armed only when the
//! current reconcile has finished, so at most one request is ever in flight
//! and a slow network stretches the cadence instead of stacking requests.
//! Both timers are plain owned values; dropping or cancelling one disarms it.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// View open: poll on open, then every foreground interval.
    Foreground,
    /// View closed: poll every background interval for unread tracking.
    Background,
}

pub struct PollScheduler {
    foreground: Duration,
    background: Duration,
    cadence: Cadence,
    timer: Option<Pin<Box<Sleep>>>,
    in_flight: bool,
    rerun_when_done: bool,
}

impl PollScheduler {
    pub fn new(foreground: Duration, background: Duration) -> Self {
        Self {
            foreground,
            background,
            cadence: Cadence::Background,
            timer: None,
            in_flight: false,
            rerun_when_done: false,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    fn interval(&self) -> Duration {
        match self.cadence {
            Cadence::Foreground => self.foreground,
            Cadence::Background => self.background,
        }
    }

    fn arm(&mut self, delay: Duration) {
        trace!(?delay, cadence = ?self.cadence, "Arming poll timer");
        self.timer = Some(Box::pin(sleep(delay)));
    }

    /// Switch to the foreground cadence and poll right away.
    pub fn on_view_opened(&mut self, can_poll: bool) {
        self.cadence = Cadence::Foreground;
        self.timer = None;
        if self.in_flight {
            self.rerun_when_done = true;
        } else if can_poll {
            self.arm(Duration::ZERO);
        }
    }

    /// Switch to the background cadence.
    pub fn on_view_closed(&mut self, can_poll: bool) {
        self.cadence = Cadence::Background;
        self.timer = None;
        self.rerun_when_done = false;
        if !self.in_flight && can_poll {
            let delay = self.background;
            self.arm(delay);
        }
    }

    /// The identity changed; restart the chain under the current cadence.
    pub fn restart(&mut self, can_poll: bool) {
        self.timer = None;
        if self.in_flight || !can_poll {
            return;
        }
        let delay = match self.cadence {
            Cadence::Foreground => Duration::ZERO,
            Cadence::Background => self.background,
        };
        self.arm(delay);
    }

    /// A reconcile was started.
    pub fn begin(&mut self) {
        self.timer = None;
        self.in_flight = true;
    }

    /// The in-flight reconcile finished (successfully or not). Chains the
    /// next poll from now.
    pub fn finish(&mut self, can_poll: bool) {
        self.in_flight = false;
        let rerun = std::mem::take(&mut self.rerun_when_done);
        if can_poll {
            let delay = if rerun { Duration::ZERO } else { self.interval() };
            self.arm(delay);
        }
    }

    pub fn cancel(&mut self) {
        self.timer = None;
        self.rerun_when_done = false;
    }

    /// Resolves when the armed timer fires; pending forever when disarmed.
    pub async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// One-second ticker for the resolution countdown.
pub struct CountdownTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl CountdownTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start ticking. A running countdown is cancelled first, never stacked.
    pub fn start(&mut self) {
        self.cancel();
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn cancel(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }
}

/// Every timer the widget owns, torn down together.
pub struct Timers {
    pub poll: PollScheduler,
    pub countdown: CountdownTimer,
}

impl Timers {
    pub fn new(foreground: Duration, background: Duration, tick: Duration) -> Self {
        Self {
            poll: PollScheduler::new(foreground, background),
            countdown: CountdownTimer::new(tick),
        }
    }

    pub fn teardown(&mut self) {
        self.poll.cancel();
        self.countdown.cancel();
    }
}
