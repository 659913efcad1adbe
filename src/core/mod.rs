//! # Core Infrastructure Module
//!
//! The synchronization pieces between the pipeline's producer thread and the
//! capture thread: the frame slot ring and the wake signal.

pub mod ring_buffer;
pub mod wait_event;

pub use ring_buffer::{AllocMode, AllocSpec, FrameInfo, RingBuffer, RingStats, SlotRef, WriteSlot};
pub use wait_event::WaitEvent;
