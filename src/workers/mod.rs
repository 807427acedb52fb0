//! Background workers
//!
//! Long-running helpers that sit next to the playback threads: the audio
//! device pump and the interactive playback controls.

pub mod controls;

/// Trait for workers that need graceful shutdown.
pub trait WorkerClose {
    /// Close and clean up worker resources.
    fn close(&mut self);
}
