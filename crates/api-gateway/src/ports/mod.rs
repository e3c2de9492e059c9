//! Ports to the outside world.

pub mod outbound;

pub use outbound::{HostError, HostFacade, HostRequest, ManualClock, SystemTimeSource, TimeSource};
