//! Routing of dispatch events to application handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::GatewayError;

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered dispatch handler.
pub type Handler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Outcome of delivering one event.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Handlers that completed.
    pub succeeded: usize,
    /// One entry per failed or panicking handler.
    pub failures: Vec<GatewayError>,
}

/// Maps event names to handlers, preserving registration order.
#[derive(Default)]
pub struct DispatchRouter {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut counts: Vec<_> = handlers.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        counts.sort();
        f.debug_struct("DispatchRouter")
            .field("handlers", &counts)
            .finish()
    }
}

impl DispatchRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`.
    pub fn register<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler for `event` in registration order.
    ///
    /// Handlers run without the registry lock held, so a handler may
    /// register further handlers. A failing or panicking handler does not
    /// stop the ones after it.
    pub fn deliver(&self, event: &str, payload: &Value) -> Delivery {
        let handlers = match self.handlers.read().get(event) {
            Some(handlers) => handlers.clone(),
            None => return Delivery::default(),
        };

        let mut delivery = Delivery::default();
        for handler in handlers {
            let message = match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {
                    delivery.succeeded += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            delivery.failures.push(GatewayError::Handler {
                event: event.to_string(),
                message,
            });
        }
        delivery
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = DispatchRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            router.register("MESSAGE_CREATE", move |_| {
                seen.lock().push(i);
                Ok(())
            });
        }

        let delivery = router.deliver("MESSAGE_CREATE", &json!({}));
        assert_eq!(delivery.succeeded, 3);
        assert!(delivery.failures.is_empty());
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unregistered_event_is_noop() {
        let router = DispatchRouter::new();
        let delivery = router.deliver("TYPING_START", &Value::Null);
        assert_eq!(delivery.succeeded, 0);
        assert!(delivery.failures.is_empty());
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let router = DispatchRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        router.register("READY", |_| Err("bad payload".into()));
        router.register("READY", |_| panic!("handler exploded"));
        let seen_clone = Arc::clone(&seen);
        router.register("READY", move |payload| {
            seen_clone.lock().push(payload["v"].clone());
            Ok(())
        });

        let delivery = router.deliver("READY", &json!({"v": 9}));
        assert_eq!(delivery.succeeded, 1);
        assert_eq!(delivery.failures.len(), 2);
        assert_eq!(
            delivery.failures[0].to_string(),
            "handler for READY failed: bad payload"
        );
        assert!(delivery.failures[1].to_string().contains("handler exploded"));
        assert_eq!(*seen.lock(), vec![json!(9)]);
    }

    #[test]
    fn test_handler_can_register_during_delivery() {
        let router = Arc::new(DispatchRouter::new());
        let inner = Arc::clone(&router);
        router.register("READY", move |_| {
            inner.register("RESUMED", |_| Ok(()));
            Ok(())
        });

        router.deliver("READY", &Value::Null);
        assert_eq!(router.handler_count("RESUMED"), 1);
    }
}
