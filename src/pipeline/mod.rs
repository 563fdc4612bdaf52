//! Acquisition and fan-out: slot pool, capture loop and consumer hand-off

mod capture;
mod engine;
mod rendezvous;
mod slots;
mod state;

pub use capture::{CaptureLoop, CaptureStep, CaptureTiming};
pub use engine::{Pipeline, PipelineConfig, PipelineHandle, PipelineState};
pub use rendezvous::{Rendezvous, Wake};
pub use slots::{SlotPool, BUF_SIZE, SLOT_COUNT};
pub use state::{ConnectionState, Shared};
