//! Producer readiness fronts.

use crate::temporal::Timestamp;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Something that can report how far its data currently reaches.
///
/// The virtual clock never advances past the smallest front reported by
/// its registered producers, so a slow producer holds replay back instead
/// of being asked for data that it does not have yet.
pub trait StreamFront: Send + Sync {
    /// Latest timestamp up to which data is ready to be delivered.
    fn desired_time_front(&self) -> Timestamp;

    /// Name used in logs.
    fn name(&self) -> &str {
        "stream"
    }
}

impl<F> StreamFront for F
where
    F: Fn() -> Timestamp + Send + Sync,
{
    fn desired_time_front(&self) -> Timestamp {
        self()
    }
}

/// A settable front shared between a producer and the virtual clock.
///
/// Cloning yields another handle to the same front.
///
/// # Example
///
/// ```rust
/// use timefront::temporal::Timestamp;
/// use timefront::virtual_time::{SharedFront, StreamFront};
///
/// let front = SharedFront::new("trades", Timestamp::from_millis(1_000));
/// let handle = front.clone();
/// handle.advance_to(Timestamp::from_millis(2_000));
/// assert_eq!(front.desired_time_front(), Timestamp::from_millis(2_000));
/// ```
#[derive(Debug, Clone)]
pub struct SharedFront {
    name: Arc<str>,
    millis: Arc<AtomicI64>,
}

impl SharedFront {
    /// Create a front positioned at `initial`.
    pub fn new(name: impl Into<Arc<str>>, initial: Timestamp) -> Self {
        Self {
            name: name.into(),
            millis: Arc::new(AtomicI64::new(initial.as_millis())),
        }
    }

    /// Overwrite the front, allowing it to move backwards (e.g. on loop-back).
    pub fn set(&self, ts: Timestamp) {
        self.millis.store(ts.as_millis(), Ordering::Release);
    }

    /// Move the front forward; earlier values are ignored.
    pub fn advance_to(&self, ts: Timestamp) {
        self.millis.fetch_max(ts.as_millis(), Ordering::AcqRel);
    }

    /// Current front.
    pub fn get(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }
}

impl StreamFront for SharedFront {
    fn desired_time_front(&self) -> Timestamp {
        self.get()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Smallest front across `fronts`, or `None` when there are none.
pub(crate) fn consensus_front<'a, I>(fronts: I) -> Option<Timestamp>
where
    I: IntoIterator<Item = &'a Arc<dyn StreamFront>>,
{
    fronts.into_iter().map(|f| f.desired_time_front()).min()
}
