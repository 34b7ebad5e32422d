pub mod buffers;
pub mod registry;
pub mod thread_state;

pub use buffers::{RecentEventsBuffer, ThreadEventsBuffer};
pub use registry::ActiveThreadsRegistry;
pub use thread_state::{RunState, ThreadState, ThreadStateManager};
