//! Event System - typed listener registry
//!
//! Every task owns one [`ListenerRegistry`]; the event enum implements
//! [`Event`] so listeners can filter by kind.
//!
//! ```ignore
//! let registry = ListenerRegistry::<MyEvent>::new();
//! let id = registry.subscribe(EventFilter::kinds([MyKind::Done]), Arc::new(|e| println!("{:?}", e)));
//! registry.emit(&MyEvent::Done);
//! registry.unsubscribe(id);
//! ```

pub mod registry;

pub use registry::{Event, EventFilter, Listener, ListenerId, ListenerRegistry};
