//! Wall-clock time and clocks.
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since Epoch, as found in `addr` messages and block headers.
pub type BlockTime = u32;

/// Local time.
///
/// This clock is monotonic.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Default, Hash)]
pub struct LocalTime {
    /// Milliseconds since Epoch.
    millis: u128,
}

impl std::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

impl LocalTime {
    /// Construct a local time from the current system time.
    pub fn now() -> Self {
        static LAST: atomic::AtomicU64 = atomic::AtomicU64::new(0);

        let now = Self::from(SystemTime::now()).as_secs();
        let last = LAST.fetch_max(now, atomic::Ordering::SeqCst);

        // Never go backwards, even if the system clock does.
        Self::from_secs(now.max(last))
    }

    /// Construct a local time from whole seconds since Epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs as u128 * 1000,
        }
    }

    /// Construct a local time from a block time.
    pub const fn from_block_time(t: BlockTime) -> Self {
        Self::from_secs(t as u64)
    }

    /// Return whole seconds since Epoch.
    pub const fn as_secs(&self) -> u64 {
        (self.millis / 1000) as u64
    }

    /// Return the time as a block time, saturating at the largest representable value.
    pub fn as_block_time(&self) -> BlockTime {
        self.as_secs().min(BlockTime::MAX as u64) as BlockTime
    }

    /// Get the duration since the given time, or zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: LocalTime) -> LocalDuration {
        LocalDuration::from_millis(self.millis.saturating_sub(earlier.millis))
    }

    /// Subtract a duration, stopping at Epoch.
    pub fn saturating_sub(&self, duration: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis.saturating_sub(duration.0),
        }
    }

    /// Elapse time.
    ///
    /// Adds the given duration to the time.
    pub fn elapse(&mut self, duration: LocalDuration) {
        self.millis += duration.as_millis()
    }
}

/// Convert a `SystemTime` into a local time.
impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self { millis }
    }
}

/// Substract two local times. Yields a duration.
impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        self.duration_since(other)
    }
}

/// Substract a duration from a local time. Yields a local time.
impl std::ops::Sub<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn sub(self, other: LocalDuration) -> LocalTime {
        self.saturating_sub(other)
    }
}

/// Add a duration to a local time. Yields a local time.
impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis + other.0,
        }
    }
}

/// Time duration as measured locally.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Default, Hash)]
pub struct LocalDuration(u128);

impl LocalDuration {
    /// Zero duration.
    pub const ZERO: LocalDuration = LocalDuration(0);

    /// Create a new duration from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs as u128 * 1000)
    }

    /// Create a new duration from whole minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    /// Create a new duration from whole hours.
    pub const fn from_hours(hours: u64) -> Self {
        Self::from_mins(hours * 60)
    }

    /// Create a new duration from whole days.
    pub const fn from_days(days: u64) -> Self {
        Self::from_hours(days * 24)
    }

    /// Construct a new duration from milliseconds.
    pub const fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    /// Return the number of seconds in this duration.
    pub const fn as_secs(&self) -> u64 {
        (self.0 / 1000) as u64
    }

    /// Return the number of milliseconds in this duration.
    pub const fn as_millis(&self) -> u128 {
        self.0
    }
}

/// Clock that tells the time.
pub trait Clock {
    /// Tell the time in local time.
    fn local_time(&self) -> LocalTime;

    /// Return the local time as seconds since Epoch.
    fn block_time(&self) -> BlockTime {
        self.local_time().as_block_time()
    }
}

/// A fixed point in time is a clock that never moves.
impl Clock for LocalTime {
    fn local_time(&self) -> LocalTime {
        *self
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> LocalTime {
        LocalTime::now()
    }
}

/// Clock with interior mutability. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct RefClock<T: Clock> {
    inner: Rc<RefCell<T>>,
}

impl RefClock<LocalTime> {
    /// Elapse time.
    pub fn elapse(&self, duration: LocalDuration) {
        self.inner.borrow_mut().elapse(duration)
    }
}

impl<T: Clock> From<T> for RefClock<T> {
    fn from(other: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(other)),
        }
    }
}

impl<T: Clock> Clock for RefClock<T> {
    fn local_time(&self) -> LocalTime {
        self.inner.borrow().local_time()
    }
}
