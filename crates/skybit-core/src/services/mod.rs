pub mod lifecycle;

pub use lifecycle::{RestoreReport, RunTicket, ScheduledDispatch, TaskLifecycle};
