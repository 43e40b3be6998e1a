use crate::domain::event::SubscriptionEvent;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Raw event as routed to a handle, before payload decoding.
pub(crate) type RouteEvent = SubscriptionEvent<Arc<[u8]>>;
pub(crate) type Callback = Box<dyn FnMut(RouteEvent) + Send>;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Id of the handle whose callback is running on this thread, if any.
    static DISPATCHING: Cell<Option<u64>> = const { Cell::new(None) };
}

const UNSUBSCRIBED: u8 = 0;
const SUBSCRIBING: u8 = 1;
const ACTIVE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

impl SubscriptionState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            SUBSCRIBING => Self::Subscribing,
            ACTIVE => Self::Active,
            _ => Self::Unsubscribed,
        }
    }
}

pub(crate) struct HandleShared {
    id: u64,
    channel: String,
    state: AtomicU8,
    callback: Mutex<Option<Callback>>,
    stop: watch::Sender<bool>,
}

impl fmt::Debug for HandleShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleShared")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter(id: u64) -> Self {
        DISPATCHING.with(|d| d.set(Some(id)));
        Self
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(None));
    }
}

impl HandleShared {
    pub(crate) fn new(channel: String, callback: Callback) -> (Arc<Self>, watch::Receiver<bool>) {
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            channel,
            state: AtomicU8::new(SUBSCRIBING),
            callback: Mutex::new(Some(callback)),
            stop,
        });
        (shared, stop_rx)
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_active(&self) {
        let _ = self.state.compare_exchange(SUBSCRIBING, ACTIVE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// The route under the handle is gone; no further events will arrive.
    pub(crate) fn mark_unsubscribed(&self) {
        self.state.store(UNSUBSCRIBED, Ordering::Release);
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<Callback>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the callback for one event. Returns `false` once the handle no longer accepts events.
    pub(crate) fn deliver(&self, event: RouteEvent) -> bool {
        let mut slot = self.lock_callback();
        if self.state.load(Ordering::Acquire) != ACTIVE {
            return false;
        }
        let Some(callback) = slot.as_mut() else {
            return false;
        };

        let guard = DispatchGuard::enter(self.id);
        callback(event);
        drop(guard);

        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub(crate) fn unsubscribe(&self) {
        self.state.store(UNSUBSCRIBED, Ordering::Release);
        self.stop.send_replace(true);

        // From inside our own callback the lock is already held by this thread; the delivery
        // loop sees the state change as soon as the callback returns.
        if DISPATCHING.with(Cell::get) == Some(self.id) {
            return;
        }

        // Waits for an in-flight callback, then guarantees no further invocation.
        let callback = self.lock_callback().take();
        drop(callback);
    }
}

/// Caller-owned subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    shared: Arc<HandleShared>,
}

impl SubscriptionHandle {
    pub(crate) const fn new(shared: Arc<HandleShared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        self.shared.channel()
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Stops delivery. Idempotent and never fails.
    ///
    /// Once this returns the callback will not be invoked again. If the callback is running on
    /// another thread, this waits for it to finish. Calling it from inside the callback is allowed.
    pub fn unsubscribe(&self) {
        self.shared.unsubscribe();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shared.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handle() -> (SubscriptionHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (shared, _stop) = HandleShared::new(
            "test".into(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        shared.mark_active();
        (SubscriptionHandle::new(shared), calls)
    }

    #[test]
    fn test_state_machine() {
        let (shared, _stop) = HandleShared::new("test".into(), Box::new(|_| {}));
        assert_eq!(shared.state(), SubscriptionState::Subscribing);
        shared.mark_active();
        assert_eq!(shared.state(), SubscriptionState::Active);
        shared.unsubscribe();
        assert_eq!(shared.state(), SubscriptionState::Unsubscribed);

        // A late activation must not resurrect the handle.
        shared.mark_active();
        assert_eq!(shared.state(), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn test_double_unsubscribe_stops_delivery() {
        let (handle, calls) = counting_handle();
        assert!(handle.shared.deliver(SubscriptionEvent::Activated));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.unsubscribe();
        handle.unsubscribe();

        assert!(!handle.shared.deliver(SubscriptionEvent::Activated));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let slot: Arc<Mutex<Option<Arc<HandleShared>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let (shared, _stop) = HandleShared::new(
            "test".into(),
            Box::new(move |_| {
                if let Some(me) = inner.lock().expect("lock").take() {
                    me.unsubscribe();
                }
            }),
        );
        shared.mark_active();
        *slot.lock().expect("lock") = Some(Arc::clone(&shared));

        assert!(!shared.deliver(SubscriptionEvent::Activated));
        assert_eq!(shared.state(), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight_callback() {
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (shared, _stop) = HandleShared::new(
            "test".into(),
            Box::new(move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(std::time::Duration::from_millis(100));
                flag.store(1, Ordering::SeqCst);
            }),
        );
        shared.mark_active();

        let deliverer = Arc::clone(&shared);
        let worker = std::thread::spawn(move || deliverer.deliver(SubscriptionEvent::Activated));

        started_rx.recv().expect("callback started");
        shared.unsubscribe();
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        assert!(!worker.join().expect("join"));
    }
}
