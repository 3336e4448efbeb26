mod base;
mod iggy_bus;

pub use base::{EventBus, EventEmitter, FlowEvent, IterationNotice, RunNotice, RunNotifier, StepEvent};
pub use iggy_bus::{IggyEventBus, IggyEventBusConfig, IggyEventBusError, IggyNoticeSubscription};
