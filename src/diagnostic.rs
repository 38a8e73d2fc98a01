//! Best-effort failure screenshots for the server log

use crate::{CaptureTarget, Error, PageHandle, ScreenshotOptions};
use base64::Engine as Base64Engine;
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};

/// JPEG quality used for diagnostic frames
pub const DIAGNOSTIC_QUALITY: u32 = 10;

/// Output pixels per CSS pixel for diagnostic frames, whatever the device
/// scale factor of the session
pub const DIAGNOSTIC_SCALE: f64 = 0.5;

/// Captures one small, low-quality frame of whatever the page currently
/// shows when a session fails.
///
/// Nothing here can fail the request: errors from the capture itself are
/// logged and dropped, and the original error is only ever borrowed.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticCapture {
    quality: u32,
}

impl Default for DiagnosticCapture {
    fn default() -> Self {
        Self {
            quality: DIAGNOSTIC_QUALITY,
        }
    }
}

impl DiagnosticCapture {
    pub fn new(quality: u32) -> Self {
        Self {
            quality: quality.min(100),
        }
    }

    /// Capture the page state for `cause`. Returns the frame when one was
    /// taken so callers and tests can inspect it.
    pub fn capture(&self, page: &mut dyn PageHandle, cause: &Error) -> Option<Vec<u8>> {
        let options = ScreenshotOptions::jpeg(self.quality).with_scale(DIAGNOSTIC_SCALE);
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            page.screenshot(&CaptureTarget::Viewport, &options)
        }));
        match attempt {
            Ok(Ok(frame)) => {
                warn!(
                    "Session failed ({}); diagnostic frame captured ({} bytes)",
                    cause,
                    frame.len()
                );
                debug!(
                    "Diagnostic frame: data:image/jpeg;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(&frame)
                );
                Some(frame)
            }
            Ok(Err(e)) => {
                warn!("Session failed ({}); diagnostic capture also failed: {}", cause, e);
                None
            }
            Err(_) => {
                warn!("Session failed ({}); diagnostic capture panicked", cause);
                None
            }
        }
    }
}
