use core_types::TriggerEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A bounded, drop-oldest queue feeding one subscriber.
///
/// Pushes are synchronous and never block: when the queue is at capacity
/// the oldest undelivered event is evicted and counted. Only the receive
/// side suspends.
pub struct Mailbox {
    queue: Mutex<VecDeque<TriggerEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues an event, evicting the queue head when full.
    pub fn push(&self, event: TriggerEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.queue.lock().expect("mailbox mutex");
            if queue.len() == self.capacity {
                queue.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped_events = total, "subscriber mailbox full, dropping oldest event");
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TriggerEvent> {
        self.queue.lock().expect("mailbox mutex").pop_front()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Marks the mailbox closed and wakes any waiting receiver.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// The receive half handed to a subscriber.
pub struct EventReceiver {
    mailbox: Arc<Mailbox>,
}

impl EventReceiver {
    pub(crate) fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }

    /// Waits for the next event. Returns `None` once the subscription is
    /// removed and the queue has drained.
    pub async fn recv(&self) -> Option<TriggerEvent> {
        loop {
            if let Some(event) = self.mailbox.pop() {
                return Some(event);
            }
            if self.mailbox.is_closed() {
                return None;
            }
            self.mailbox.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<TriggerEvent> {
        self.mailbox.pop()
    }

    pub fn dropped_events(&self) -> u64 {
        self.mailbox.dropped()
    }
}
