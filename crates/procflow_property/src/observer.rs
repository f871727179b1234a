use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<E>)>,
}

/// A list of callbacks interested in events of type `E`.
///
/// Registration hands back a [`Subscription`]; dropping it removes the
/// callback, so an observer can never outlive the thing it observes and a
/// dropped observable never calls into freed state.
pub struct Observers<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Observers<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().callbacks.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Calls every registered callback with `event`.
    ///
    /// The callback list is snapshotted first; callbacks may subscribe or
    /// drop subscriptions without deadlocking.
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .registry
            .lock()
            .callbacks
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.registry.lock().callbacks.len())
            .finish()
    }
}

/// Keeps a callback registered for as long as it is alive.
#[must_use = "dropping a Subscription immediately unsubscribes the callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Leaves the callback registered for the remaining lifetime of the observable.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
