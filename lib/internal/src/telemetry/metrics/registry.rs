use std::sync::{Mutex, MutexGuard, PoisonError};

use prometheus::{core::Collector, Encoder, Registry, TextEncoder};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("The metrics registry handle was disposed")]
    Disposed,
    #[error("The metrics registry handle is already bound to a registry")]
    AlreadyBound,
    #[error("The metrics registry handle is not bound to a registry yet")]
    NotBound,
    #[error("Failed to encode metrics: {0}")]
    Encode(String),
}

/// A collector kept twice: one copy is handed to the registry, the other one
/// is kept to unregister it later.
struct TrackedCollector {
    registered: Box<dyn Collector>,
    retained: Box<dyn Collector>,
}

impl TrackedCollector {
    fn new<C: Collector + Clone + 'static>(collector: &C) -> Self {
        Self {
            registered: Box::new(collector.clone()),
            retained: Box::new(collector.clone()),
        }
    }
}

enum HandleState {
    Pending(Vec<TrackedCollector>),
    Bound {
        registry: Registry,
        registered: Vec<Box<dyn Collector>>,
    },
    Disposed,
}

/// Explicit two-phase handle over a Prometheus [`Registry`].
///
/// The handle starts `Pending`: collectors registered in this state are buffered.
/// Once [`RegistryHandle::bind`] hands over the real registry, the buffered
/// collectors are registered and later registrations go straight through.
/// [`RegistryHandle::dispose`] unregisters everything and refuses further use.
pub struct RegistryHandle {
    state: Mutex<HandleState>,
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::pending()
    }
}

impl RegistryHandle {
    pub fn pending() -> Self {
        Self {
            state: Mutex::new(HandleState::Pending(Vec::new())),
        }
    }

    pub fn bound(registry: Registry) -> Self {
        Self {
            state: Mutex::new(HandleState::Bound {
                registry,
                registered: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register<C: Collector + Clone + 'static>(&self, collector: &C) -> Result<(), MetricsError> {
        let mut state = self.lock();
        match &mut *state {
            HandleState::Pending(buffer) => {
                buffer.push(TrackedCollector::new(collector));
                Ok(())
            }
            HandleState::Bound {
                registry,
                registered,
            } => {
                let tracked = TrackedCollector::new(collector);
                registry.register(tracked.registered)?;
                registered.push(tracked.retained);
                Ok(())
            }
            HandleState::Disposed => Err(MetricsError::Disposed),
        }
    }

    /// Binds the handle to `registry` and registers every buffered collector.
    ///
    /// The handle is bound even when one of the buffered collectors is rejected,
    /// the first rejection is returned.
    pub fn bind(&self, registry: Registry) -> Result<(), MetricsError> {
        let mut state = self.lock();
        let buffer = match &mut *state {
            HandleState::Pending(buffer) => std::mem::take(buffer),
            HandleState::Bound { .. } => return Err(MetricsError::AlreadyBound),
            HandleState::Disposed => return Err(MetricsError::Disposed),
        };

        debug!(collectors = buffer.len(), "binding metrics registry handle");

        let mut registered = Vec::with_capacity(buffer.len());
        let mut first_error = None;
        for tracked in buffer {
            match registry.register(tracked.registered) {
                Ok(()) => registered.push(tracked.retained),
                Err(err) => {
                    warn!(error = %err, "failed to register a buffered collector");
                    first_error.get_or_insert(MetricsError::Prometheus(err));
                }
            }
        }

        *state = HandleState::Bound {
            registry,
            registered,
        };

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn registry(&self) -> Option<Registry> {
        match &*self.lock() {
            HandleState::Bound { registry, .. } => Some(registry.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.lock(), HandleState::Pending(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(&*self.lock(), HandleState::Disposed)
    }

    /// Renders the bound registry in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let registry = match &*self.lock() {
            HandleState::Bound { registry, .. } => registry.clone(),
            HandleState::Pending(_) => return Err(MetricsError::NotBound),
            HandleState::Disposed => return Err(MetricsError::Disposed),
        };

        let families = registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|err| MetricsError::Encode(err.to_string()))?;
        String::from_utf8(buffer).map_err(|err| MetricsError::Encode(err.to_string()))
    }

    /// Unregisters every collector registered through this handle and clears it.
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut *state, HandleState::Disposed);
        if let HandleState::Bound {
            registry,
            registered,
        } = previous
        {
            for collector in registered {
                if let Err(err) = registry.unregister(collector) {
                    warn!(error = %err, "failed to unregister a collector");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{IntCounter, Registry};

    use super::{MetricsError, RegistryHandle};

    fn counter(name: &str) -> IntCounter {
        IntCounter::new(name, "test counter").expect("valid counter")
    }

    #[test]
    fn buffers_until_bound() {
        let handle = RegistryHandle::pending();
        let requests = counter("requests_total");
        handle.register(&requests).expect("buffered");
        requests.inc();

        assert!(handle.is_pending());
        assert!(handle.registry().is_none());
        assert!(matches!(handle.encode_text(), Err(MetricsError::NotBound)));

        let registry = Registry::new();
        handle.bind(registry.clone()).expect("bound");

        assert_eq!(registry.gather().len(), 1);
        let text = handle.encode_text().expect("encoded");
        assert!(text.contains("requests_total 1"));
    }

    #[test]
    fn registers_directly_once_bound() {
        let registry = Registry::new();
        let handle = RegistryHandle::bound(registry.clone());
        handle.register(&counter("late_total")).expect("registered");

        assert_eq!(registry.gather().len(), 1);
        let text = handle.encode_text().expect("encoded");
        assert!(text.contains("late_total 0"));
    }

    #[test]
    fn binding_twice_is_rejected() {
        let handle = RegistryHandle::pending();
        handle.bind(Registry::new()).expect("bound");
        assert!(matches!(
            handle.bind(Registry::new()),
            Err(MetricsError::AlreadyBound)
        ));
    }

    #[test]
    fn duplicates_are_reported_on_bind() {
        let handle = RegistryHandle::pending();
        handle.register(&counter("dup_total")).expect("buffered");
        handle.register(&counter("dup_total")).expect("buffered");

        let registry = Registry::new();
        assert!(matches!(
            handle.bind(registry.clone()),
            Err(MetricsError::Prometheus(_))
        ));
        assert!(handle.registry().is_some());
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn dispose_unregisters_and_clears() {
        let registry = Registry::new();
        let handle = RegistryHandle::pending();
        handle.register(&counter("disposed_total")).expect("buffered");
        handle.bind(registry.clone()).expect("bound");
        assert_eq!(registry.gather().len(), 1);

        handle.dispose();
        assert!(handle.is_disposed());
        assert!(registry.gather().is_empty());
        assert!(matches!(
            handle.register(&counter("after_total")),
            Err(MetricsError::Disposed)
        ));
        assert!(matches!(
            handle.bind(Registry::new()),
            Err(MetricsError::Disposed)
        ));

        handle.dispose();
    }
}
