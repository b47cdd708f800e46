//! Frame Synchronizer
//!
//! Coordinates the simulation thread (which mutates nodes and packs values) and
//! the render thread (which reads packed buffers) through three physical buffer
//! slots and two moving indices:
//!
//! - **write index**: the buffer the simulation side may write this frame
//! - **present index**: the buffer the render side may read
//!
//! Rotation moves the freshly written buffer to `present` and advances `write`
//! to the buffer that was presented two frames ago. The buffer presented in the
//! previous frame is left alone for a full frame, so a reader that is still
//! holding it never overlaps with the writer.
//!
//! Everything else hangs off phased callbacks:
//!
//! ```rust,ignore
//! let sync = FrameSynchronizer::new();
//! let _sub = sync.connect(SyncEvent::Rotate, SyncPhase::Before, 0, || {
//!     // runs on the simulation thread right before indices rotate
//! });
//! sync.advance_frame();
//! ```

mod subscription;

pub use subscription::Subscription;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Number of physical buffers managed per packed resource.
pub const BUFFER_COUNT: usize = 3;

static NEXT_SYNC_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle points a callback can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// Simulation side: the buffer-index rotation at the end of a frame.
    Rotate,
    /// Render side: reading the presentable buffer.
    Present,
}

/// Which side of a [`SyncEvent`] a callback runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Before,
    After,
}

/// Thread a scheduled action must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    Simulation,
    Render,
}

pub(crate) type Callback = Box<dyn FnMut() + Send>;
type Action = Box<dyn FnOnce() + Send>;

struct Subscriber {
    id: u64,
    event: SyncEvent,
    phase: SyncPhase,
    order: i32,
    callback: Arc<Mutex<Callback>>,
}

pub(crate) struct SyncShared {
    id: u64,
    write_index: AtomicUsize,
    present_index: AtomicUsize,
    frame: AtomicU64,
    next_subscriber: AtomicU64,
    /// Kept sorted by `(order, id)`.
    subscribers: Mutex<Vec<Subscriber>>,
    actions: Mutex<Vec<(ThreadRole, Action)>>,
}

impl SyncShared {
    pub(crate) fn disconnect(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
            subscribers.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Triple-buffer coordinator with phased callbacks.
///
/// Cloning is cheap and every clone refers to the same synchronizer; identity
/// is exposed through [`id`](Self::id).
#[derive(Clone)]
pub struct FrameSynchronizer {
    shared: Arc<SyncShared>,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SyncShared {
                id: NEXT_SYNC_ID.fetch_add(1, Ordering::Relaxed),
                write_index: AtomicUsize::new(0),
                present_index: AtomicUsize::new(BUFFER_COUNT - 1),
                frame: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                actions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-unique identity of this synchronizer.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &FrameSynchronizer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Index of the buffer the simulation side may write.
    #[inline]
    #[must_use]
    pub fn current_write_index(&self) -> usize {
        self.shared.write_index.load(Ordering::Acquire)
    }

    /// Index of the buffer the render side may read.
    #[inline]
    #[must_use]
    pub fn present_read_index(&self) -> usize {
        self.shared.present_index.load(Ordering::Acquire)
    }

    /// Number of completed rotations.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Registers `callback` at `(event, phase)`.
    ///
    /// Callbacks with a lower `order` run first; equal orders run in
    /// registration order. The callback stays registered until the returned
    /// [`Subscription`] is dropped or disconnected.
    pub fn connect<F>(&self, event: SyncEvent, phase: SyncPhase, order: i32, callback: F) -> Subscription
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            id,
            event,
            phase,
            order,
            callback: Arc::new(Mutex::new(Box::new(callback))),
        };

        let mut subscribers = self.shared.subscribers.lock();
        let pos = subscribers.partition_point(|s| (s.order, s.id) < (order, id));
        subscribers.insert(pos, subscriber);
        drop(subscribers);

        log::trace!("sync #{}: subscriber {id} connected at {event:?}/{phase:?} (order {order})", self.shared.id);
        Subscription::new(Arc::downgrade(&self.shared), id)
    }

    /// Number of live subscriptions, across all events and phases.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Queues a one-shot action for the given thread.
    ///
    /// Simulation actions run at the end of [`advance_frame`](Self::advance_frame),
    /// render actions at the end of [`end_present`](Self::end_present).
    pub fn schedule_action<F>(&self, thread: ThreadRole, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.actions.lock().push((thread, Box::new(action)));
    }

    /// Ends the current simulation frame.
    ///
    /// Fires `(Rotate, Before)`, rotates the buffer indices, fires
    /// `(Rotate, After)` and runs queued simulation actions. Returns the new
    /// frame number.
    ///
    /// Must not be called while holding a lock that a `Rotate` callback takes.
    pub fn advance_frame(&self) -> u64 {
        self.fire(SyncEvent::Rotate, SyncPhase::Before);

        let written = self.shared.write_index.load(Ordering::Acquire);
        self.shared.present_index.store(written, Ordering::Release);
        self.shared.write_index.store((written + 1) % BUFFER_COUNT, Ordering::Release);
        let frame = self.shared.frame.fetch_add(1, Ordering::AcqRel) + 1;

        log::trace!(
            "sync #{}: frame {frame} rotated (present {written}, write {})",
            self.shared.id,
            (written + 1) % BUFFER_COUNT
        );

        self.fire(SyncEvent::Rotate, SyncPhase::After);
        self.run_actions(ThreadRole::Simulation);
        frame
    }

    /// Render side: fires `(Present, Before)` and returns the present index.
    pub fn begin_present(&self) -> usize {
        self.fire(SyncEvent::Present, SyncPhase::Before);
        self.present_read_index()
    }

    /// Render side: fires `(Present, After)` and runs queued render actions.
    pub fn end_present(&self) {
        self.fire(SyncEvent::Present, SyncPhase::After);
        self.run_actions(ThreadRole::Render);
    }

    fn fire(&self, event: SyncEvent, phase: SyncPhase) {
        // Snapshot so callbacks can connect or disconnect while we iterate.
        let callbacks: Vec<Arc<Mutex<Callback>>> = self
            .shared
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.event == event && s.phase == phase)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in callbacks {
            (callback.lock())();
        }
    }

    fn run_actions(&self, thread: ThreadRole) {
        let pending: Vec<Action> = {
            let mut actions = self.shared.actions.lock();
            let (ready, rest): (Vec<_>, Vec<_>) = actions.drain(..).partition(|(t, _)| *t == thread);
            *actions = rest;
            ready.into_iter().map(|(_, action)| action).collect()
        };

        for action in pending {
            action();
        }
    }
}

impl fmt::Debug for FrameSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSynchronizer")
            .field("id", &self.shared.id)
            .field("write_index", &self.current_write_index())
            .field("present_index", &self.present_read_index())
            .field("frame", &self.frame())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_rotation_cycles_all_three_buffers() {
        let sync = FrameSynchronizer::new();
        assert_eq!(sync.current_write_index(), 0);
        assert_eq!(sync.present_read_index(), 2);

        let mut seen = Vec::new();
        for _ in 0..BUFFER_COUNT {
            let write = sync.current_write_index();
            sync.advance_frame();
            assert_eq!(sync.present_read_index(), write);
            assert_ne!(sync.current_write_index(), sync.present_read_index());
            seen.push(write);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_callbacks_run_in_order() {
        let sync = FrameSynchronizer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let _late = sync.connect(SyncEvent::Rotate, SyncPhase::Before, 10, move || l1.lock().push("late"));
        let l2 = Arc::clone(&log);
        let _early = sync.connect(SyncEvent::Rotate, SyncPhase::Before, -10, move || l2.lock().push("early"));
        let l3 = Arc::clone(&log);
        let _after = sync.connect(SyncEvent::Rotate, SyncPhase::After, -100, move || l3.lock().push("after"));

        sync.advance_frame();
        assert_eq!(*log.lock(), vec!["early", "late", "after"]);
    }

    #[test]
    fn test_dropped_subscription_stops_firing() {
        let sync = FrameSynchronizer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = sync.connect(SyncEvent::Rotate, SyncPhase::Before, 0, move || {
            c.fetch_add(1, Ordering::Relaxed);
        });

        sync.advance_frame();
        drop(sub);
        sync.advance_frame();

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(sync.subscriber_count(), 0);
    }
}
