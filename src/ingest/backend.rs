use anyhow::Result;

use crate::frame::Frame;

/// Capture backend trait.
///
/// A backend owns one opened device or stream. `read_frame` may block until the
/// next frame is available; it is only ever called from the capture thread.
pub trait CaptureBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream has ended. `Err` is a read failure; the capture
    /// loop retries it unless the backend is finite.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Finite backends (files) terminate the capture loop on failure.
    fn is_finite(&self) -> bool {
        false
    }

    /// Device-level health, independent of the capture loop.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Actual negotiated dimensions and rate.
    fn negotiated(&self) -> Negotiated;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}
