//! Domain event contracts and pub/sub mechanics.
//!
//! Business modules define typed events implementing [`Event`]; infrastructure
//! wraps them in [`EventEnvelope`]s for persistence and distributes them over
//! an [`EventBus`] to projections.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
