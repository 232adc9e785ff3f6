//! Shared eventing and scheduling fabric for all controllers: a
//! deduplicating rate-limited work queue, an event-source registration
//! surface for informer glue, and the controller builder/run loop.

mod controller;
mod queue;

pub use controller::*;
pub use queue::*;

use owo_colors::OwoColorize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::colors::{FG1, FG2};

/// Key identifying the object a change notification refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// Controllers driving a single operator instance reconcile the world at
    /// once; informer handlers collapse every change onto this key.
    Singleton,
    Named { namespace: String, name: String },
}

impl QueueKey {
    pub fn named(namespace: &str, name: &str) -> Self {
        QueueKey::Named {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKey::Singleton => write!(f, "(singleton)"),
            QueueKey::Named { namespace, name } => write!(f, "{namespace}/{name}"),
        }
    }
}

/// Sink for operator lifecycle events.
pub trait EventRecorder: Send + Sync {
    fn eventf(&self, reason: &str, message: String);
    fn warningf(&self, reason: &str, message: String);
}

/// Recorder that writes colored lines to the process output.
pub struct PrintingRecorder {
    component: String,
}

impl PrintingRecorder {
    pub fn new(component: &str) -> Arc<Self> {
        Arc::new(PrintingRecorder {
            component: component.to_string(),
        })
    }
}

impl EventRecorder for PrintingRecorder {
    fn eventf(&self, reason: &str, message: String) {
        println!(
            "📣 {}{}{}{}{}",
            self.component.color(FG2),
            " EVENT ".color(FG1),
            reason.color(FG2),
            ": ".color(FG1),
            message.color(FG2),
        );
    }

    fn warningf(&self, reason: &str, message: String) {
        eprintln!(
            "⚠️ {}{}{}{}{}",
            self.component.color(FG2),
            " WARNING ".color(FG1),
            reason.color(FG2),
            ": ".color(FG1),
            message.color(FG2),
        );
    }
}

pub trait EventHandler: Send + Sync {
    fn on_change(&self, key: QueueKey);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration(u64);

/// Something that can notify controllers about cluster changes, e.g. an
/// informer. Handlers are fanned out to in registration order.
pub trait EventSource: Send + Sync {
    fn add_event_handler(&self, handler: Arc<dyn EventHandler>) -> Registration;
    fn remove_event_handler(&self, registration: Registration);
}

/// In-process fan-out event source, used to bridge informer callbacks (or
/// tests) into controller queues.
#[derive(Default)]
pub struct SharedEventSource {
    handlers: Mutex<Vec<(u64, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl SharedEventSource {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedEventSource::default())
    }

    pub fn notify(&self, key: QueueKey) {
        let handlers = self.handlers.lock().expect("event source lock");
        for (_, handler) in handlers.iter() {
            handler.on_change(key.clone());
        }
    }
}

impl EventSource for SharedEventSource {
    fn add_event_handler(&self, handler: Arc<dyn EventHandler>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .expect("event source lock")
            .push((id, handler));
        Registration(id)
    }

    fn remove_event_handler(&self, registration: Registration) {
        self.handlers
            .lock()
            .expect("event source lock")
            .retain(|(id, _)| *id != registration.0);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Collector {
        seen: Mutex<Vec<QueueKey>>,
    }

    impl EventHandler for Collector {
        fn on_change(&self, key: QueueKey) {
            self.seen.lock().unwrap().push(key);
        }
    }

    #[test]
    fn shared_source_fans_out_and_honors_removal() {
        let source = SharedEventSource::new();
        let a = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });
        let reg_a = source.add_event_handler(a.clone());
        let _reg_b = source.add_event_handler(b.clone());

        source.notify(QueueKey::Singleton);
        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap().len(), 1);

        source.remove_event_handler(reg_a);
        source.notify(QueueKey::named("ns", "obj"));
        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap().len(), 2);
    }
}
