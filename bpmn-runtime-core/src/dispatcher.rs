use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EngineEventType, EventListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn EventListener>,
    /// `None` = every event type.
    types: Option<Vec<EngineEventType>>,
}

impl Registration {
    fn accepts(&self, event_type: EngineEventType) -> bool {
        match &self.types {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }
}

/// Process-wide listener registry and synchronous event bus.
///
/// Listeners are notified in registration order. Each dispatch works on a
/// snapshot of the registry taken when it begins, so listeners added or
/// removed mid-dispatch only see the change from the next dispatch on.
pub struct EventDispatcher {
    listeners: RwLock<Vec<Registration>>,
    enabled: AtomicBool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Register for every event type. Returns `false` if the same handle is
    /// already registered; the registry is left unchanged in that case.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        self.register(listener, None)
    }

    /// Register for the given event types only.
    pub fn add_typed_listener(
        &self,
        listener: Arc<dyn EventListener>,
        types: &[EngineEventType],
    ) -> bool {
        self.register(listener, Some(types.to_vec()))
    }

    fn register(
        &self,
        listener: Arc<dyn EventListener>,
        types: Option<Vec<EngineEventType>>,
    ) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners
            .iter()
            .any(|r| same_listener(&r.listener, &listener))
        {
            debug!("listener already registered, ignoring");
            return false;
        }
        listeners.push(Registration { listener, types });
        true
    }

    /// Returns `false` if the handle was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|r| !same_listener(&r.listener, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// A disabled dispatcher drops every event.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Deliver `event` to every interested listener before returning.
    ///
    /// The first failing listener with `fail_on_error() == true` stops the
    /// dispatch and its error is returned as `ListenerNotification`.
    pub fn dispatch(&self, event: &EngineEvent) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let event_type = event.event_type();
        let snapshot: Vec<Registration> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!(
            event_type = %event_type,
            execution_id = %event.execution_id(),
            activity_id = event.activity_id(),
            listeners = snapshot.len(),
            "dispatching event"
        );

        for registration in snapshot.iter().filter(|r| r.accepts(event_type)) {
            if let Err(e) = registration.listener.on_event(event) {
                if registration.listener.fail_on_error() {
                    warn!(
                        event_type = %event_type,
                        execution_id = %event.execution_id(),
                        error = %e,
                        "event listener failed, aborting dispatch"
                    );
                    return Err(EngineError::ListenerNotification {
                        event_type,
                        source: e,
                    });
                }
                warn!(
                    event_type = %event_type,
                    execution_id = %event.execution_id(),
                    error = %e,
                    "event listener failed, continuing"
                );
            }
        }
        Ok(())
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle identity: two `Arc`s name the same listener when they point at the
/// same allocation. Vtable pointers are ignored.
fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
