//! Frame pacing: the frame ring, deferred deletion and immediate submission

mod deletion_queue;
mod frame_slot;
mod immediate;

pub use deletion_queue::{DeletionQueue, Disposal};
pub use frame_slot::{FrameRing, FrameSlot, FRAME_OVERLAP};
pub use immediate::ImmediateSubmitter;
