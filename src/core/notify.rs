//! Fire-and-forget event delivery on a dedicated thread.
//!
//! Producers call [`EventDispatcher::dispatch`] from inside state transitions.
//! Delivery goes through a bounded channel with `try_send`, so a slow or
//! blocked subscriber can never stall the producer; when the channel is full
//! the event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, error, warn};

/// Default channel capacity for notification dispatchers.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Cloneable handle that delivers events to one subscriber thread.
///
/// The subscriber thread exits once every handle is dropped.
pub struct EventDispatcher<E> {
    tx: Sender<E>,
    dropped: Arc<AtomicU64>,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<E> std::fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("pending", &self.tx.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<E: Send + 'static> EventDispatcher<E> {
    /// Spawn a named subscriber thread invoking `handler` for every event.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to spawn the thread.
    pub fn spawn<F>(name: &str, capacity: usize, handler: F) -> std::io::Result<Self>
    where
        F: Fn(E) + Send + 'static,
    {
        let (tx, rx) = bounded::<E>(capacity.max(1));
        let thread_name = format!("ta-notify-{name}");
        thread::Builder::new().name(thread_name).spawn(move || {
            // recv() fails once every sender is gone
            while let Ok(event) = rx.recv() {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)))
                    .is_err()
                {
                    error!("notification handler panicked");
                }
            }
            debug!("notification channel closed, dispatcher exiting");
        })?;
        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue an event without blocking.
    pub fn dispatch(&self, event: E) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("notification channel full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("notification subscriber gone, event dropped");
            }
        }
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
