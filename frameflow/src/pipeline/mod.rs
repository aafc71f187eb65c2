//! Frame loop orchestration

pub mod events;
pub mod fps;
pub mod frame_loop;

pub use events::PipelineEvent;
pub use fps::FpsCounter;
pub use frame_loop::{FrameLoop, TickOutcome, TickReport, EVENT_CHANNEL_CAPACITY};
