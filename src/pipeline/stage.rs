//! Pipeline stage trait
//!
//! Every playback thread body implements [`PlaybackStage`]; [`spawn_stage`]
//! runs it on a named OS thread and logs how it ended.

use std::thread::JoinHandle;

use anyhow::Result;

/// A unit of work that runs on its own thread until the session ends
pub trait PlaybackStage: Send + 'static {
    /// Run the stage until its input closes or quit is requested
    fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

/// Start `stage` on a dedicated thread named after it
pub fn spawn_stage<S: PlaybackStage>(mut stage: S) -> std::io::Result<JoinHandle<()>> {
    let name = stage.name();
    std::thread::Builder::new()
        .name(name.to_lowercase())
        .spawn(move || match stage.run() {
            Ok(()) => log::debug!("{}: finished", name),
            Err(e) => log::error!("{} error: {:#}", name, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(Arc<AtomicBool>);

    impl PlaybackStage for Flag {
        fn run(&mut self) -> Result<()> {
            assert_eq!(std::thread::current().name(), Some("flagstage"));
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "FlagStage"
        }
    }

    #[test]
    fn test_spawn_stage_runs_on_named_thread() {
        let ran = Arc::new(AtomicBool::new(false));
        spawn_stage(Flag(Arc::clone(&ran))).unwrap().join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
