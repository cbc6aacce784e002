//! Set-once, many-waiters latch.
//!
//! The first [`Latch::fire`] stores a value and wakes every waiter; later
//! calls are no-ops that report `false`. Built on `tokio::sync::watch`, so
//! firing is atomic and never panics on repetition.

use tokio::sync::watch;

/// A single-assignment cell that waiters can suspend on.
#[derive(Debug)]
pub struct Latch<V> {
    tx: watch::Sender<Option<V>>,
}

impl<V: Clone + Send + Sync> Latch<V> {
    /// Create an unfired latch.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Fire with `value`. Returns `true` if this call fired the latch.
    pub fn fire(&self, value: V) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    /// Whether the latch has fired.
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the latch fires and return its value.
    pub async fn wait(&self) -> V {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().as_ref() {
                return value.clone();
            }
            // the sender lives in `self`, so `changed` cannot fail while we borrow it
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<V: Clone + Send + Sync> Default for Latch<V> {
    fn default() -> Self {
        Self::new()
    }
}
