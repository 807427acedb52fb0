//! Presenter without a window
//!
//! Used when no display backend is available and by the end-to-end tests:
//! every presented picture is logged and recorded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::{SurfaceHandle, VideoPresenter};
use crate::error::{PlayerError, Result};
use crate::pipeline::picture_queue::DecodedVideoFrame;

/// What was shown, and when
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub pts: f64,
    pub width: u32,
    pub height: u32,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct HeadlessPresenter {
    surfaces: u32,
    current: Option<(SurfaceHandle, u32, u32)>,
    presented: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared log of presented frames, readable while playback runs
    pub fn presented(&self) -> Arc<Mutex<Vec<PresentedFrame>>> {
        Arc::clone(&self.presented)
    }
}

impl VideoPresenter for HeadlessPresenter {
    fn create_output_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle> {
        if width == 0 || height == 0 {
            return Err(PlayerError::Device(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }
        self.surfaces += 1;
        let handle = SurfaceHandle(self.surfaces);
        self.current = Some((handle, width, height));
        log::info!("HeadlessPresenter: surface {} is {}x{}", handle.0, width, height);
        Ok(handle)
    }

    fn present_video_frame(
        &mut self,
        surface: SurfaceHandle,
        frame: &DecodedVideoFrame,
    ) -> Result<()> {
        match self.current {
            Some((handle, w, h)) if handle == surface && w == frame.width && h == frame.height => {}
            _ => {
                return Err(PlayerError::Device(format!(
                    "surface {} can't show a {}x{} picture",
                    surface.0, frame.width, frame.height
                )));
            }
        }

        log::trace!("HeadlessPresenter: pts {:.3}", frame.pts);
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PresentedFrame {
                pts: frame.pts,
                width: frame.width,
                height: frame.height,
                at: Instant::now(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, pts: f64) -> DecodedVideoFrame {
        DecodedVideoFrame {
            width,
            height,
            pts,
            ..Default::default()
        }
    }

    #[test]
    fn test_records_presented_frames() {
        let mut presenter = HeadlessPresenter::new();
        let log = presenter.presented();
        let surface = presenter.create_output_surface(64, 36).unwrap();

        presenter.present_video_frame(surface, &frame(64, 36, 0.0)).unwrap();
        presenter.present_video_frame(surface, &frame(64, 36, 0.04)).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].pts, 0.04);
    }

    #[test]
    fn test_rejects_mismatched_surface() {
        let mut presenter = HeadlessPresenter::new();
        assert!(presenter.create_output_surface(0, 10).is_err());

        let old = presenter.create_output_surface(64, 36).unwrap();
        let new = presenter.create_output_surface(32, 18).unwrap();
        assert_ne!(old, new);
        assert!(presenter.present_video_frame(old, &frame(32, 18, 0.0)).is_err());
        assert!(presenter.present_video_frame(new, &frame(64, 36, 0.0)).is_err());
        assert!(presenter.present_video_frame(new, &frame(32, 18, 0.0)).is_ok());
    }
}
