//! Event-driven coordination between engine components.
//!
//! No component calls another directly — all coordination travels over the
//! bus as typed [`SessionEvent`]s, plus explicit request/grant messages to
//! the coordinator.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    spawn_handler, EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter,
    FilteredReceiver, SharedEventBus,
};
pub use types::{EventId, ModeratorPurpose, SessionEvent};
