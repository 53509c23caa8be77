//! Fiber identity.
//!
//! A [`FiberId`] names the logical task that caused or witnessed an event.
//! The failure algebra uses it to attribute interruptions; the scheduler uses
//! it for addressing. Identity is structural: two ids constructed from the
//! same components compare equal.

use core::fmt;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static FIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one physical fiber: a monotone id plus the second it started.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeFiberId {
    /// Monotonically increasing fiber number.
    pub id: u64,
    /// Seconds since the epoch at which the fiber started.
    pub start_time_seconds: u64,
}

impl RuntimeFiberId {
    /// Creates a fiber id from its components.
    #[must_use]
    pub const fn new(id: u64, start_time_seconds: u64) -> Self {
        Self {
            id,
            start_time_seconds,
        }
    }

    /// Allocates a fresh fiber id from the process-wide counter.
    #[must_use]
    pub fn next() -> Self {
        let id = FIBER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let start_time_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self::new(id, start_time_seconds)
    }
}

impl fmt::Debug for RuntimeFiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeFiberId({}@{})", self.id, self.start_time_seconds)
    }
}

impl fmt::Display for RuntimeFiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.id)
    }
}

/// Identity of the fiber(s) an event is attributed to.
///
/// `Composite` arises when two fibers are merged (for example a joined race):
/// the interruption is attributed to every participant.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum FiberId {
    /// No identity (events raised outside any fiber).
    None,
    /// A single physical fiber.
    Runtime(RuntimeFiberId),
    /// Attribution to several fibers at once.
    Composite(BTreeSet<RuntimeFiberId>),
}

impl FiberId {
    /// A fresh single-fiber identity.
    #[must_use]
    pub fn fresh() -> Self {
        Self::Runtime(RuntimeFiberId::next())
    }

    /// Flattens this identity to the set of numeric fiber ids, for
    /// diagnostics.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<u64> {
        match self {
            Self::None => BTreeSet::new(),
            Self::Runtime(r) => core::iter::once(r.id).collect(),
            Self::Composite(rs) => rs.iter().map(|r| r.id).collect(),
        }
    }

    /// Returns true if this identity names no fiber.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Merges two identities into one attribution.
    ///
    /// `None` is the identity element; merging two concrete identities
    /// produces a `Composite` covering both.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        let mut set = BTreeSet::new();
        for id in [self, other] {
            match id {
                Self::None => {}
                Self::Runtime(r) => {
                    set.insert(r);
                }
                Self::Composite(rs) => set.extend(rs),
            }
        }
        match set.len() {
            0 => Self::None,
            1 => Self::Runtime(set.into_iter().next().unwrap_or(RuntimeFiberId::new(0, 0))),
            _ => Self::Composite(set),
        }
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "FiberId::None"),
            Self::Runtime(r) => write!(f, "FiberId::Runtime({r:?})"),
            Self::Composite(rs) => f.debug_tuple("FiberId::Composite").field(rs).finish(),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "F?"),
            Self::Runtime(r) => write!(f, "{r}"),
            Self::Composite(rs) => {
                write!(f, "F{{")?;
                for (i, r) in rs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", r.id)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<RuntimeFiberId> for FiberId {
    fn from(id: RuntimeFiberId) -> Self {
        Self::Runtime(id)
    }
}
