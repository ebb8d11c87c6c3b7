// Delayed-message scheduling core

pub mod handler;
pub mod trigger;

pub use handler::{TimerConfig, TimerMessageHandler};
pub use trigger::{ReleaseTrigger, ReleaserConfig};
