//! Delivery channel: worker-to-transport queue and acknowledged sending.

pub mod queue;
pub mod sender;

pub use queue::{channel, Outbox, OutputQueue};
pub use sender::{deliver, Acknowledgements, DeliveryPolicy, FrameSink};
