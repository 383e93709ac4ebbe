//! Core Runtime Module

pub mod channel;
pub mod flow;
pub mod metrics;
pub mod runtime;

pub use channel::{Channel, ChannelError, ChannelRegistry, Token};
pub use flow::{Delivery, Flow};
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot, FlowMetrics, FlowMetricsSnapshot};
pub use runtime::Runtime;
