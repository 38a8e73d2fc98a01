//! Webshot
//!
//! A capability-gated service that turns literal markup or a live URL into a
//! raster image. Every request presents a Biscuit bearer token which is
//! verified against a pinned public key and evaluated against a per-endpoint
//! policy before any browser work happens.
//!
//! # Features
//!
//! - **CDP Backend** (default): a single shared headless Chrome driven over the
//!   Chrome DevTools Protocol, with one isolated browser context per request
//! - **Scoped sessions**: context and page are released exactly once on every
//!   exit path, including panics
//! - **Bounded policy evaluation**: fact, iteration and wall-time limits apply
//!   to every token evaluation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webshot::{EngineConfig, RenderSpec, ViewportSpec};
//! use webshot::session::{SessionJob, SessionOrchestrator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(webshot::cdp::CdpEngine::launch(EngineConfig::default())?);
//! let orchestrator = SessionOrchestrator::new(engine, EngineConfig::default().load_timeout());
//!
//! let spec = RenderSpec {
//!     viewport: ViewportSpec::new(1200, 600).with_scale(2.0),
//!     markup: "<h1>Hello</h1>".to_string(),
//! };
//! let png = orchestrator.run(&SessionJob::from(spec))?;
//! assert!(!png.is_empty());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod auth;
pub mod config;
pub mod diagnostic;
pub mod request;
pub mod server;
pub mod session;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async facade that moves blocking session work off the reactor
pub mod async_api;

/// Largest accepted viewport edge, in CSS pixels
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest accepted device scale factor
pub const MAX_SCALE: f64 = 8.0;

/// Configuration for the shared browser engine
///
/// The defaults match what the service needs in a container: sandbox off,
/// `/dev/shm` avoided, and a 30 second load budget per request.
///
/// # Examples
///
/// ```
/// let cfg = webshot::EngineConfig::default();
/// assert_eq!(cfg.load_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit Chrome binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Default window size handed to the browser process
    pub window: (u32, u32),
    /// Budget for content-load plus network quiescence, in milliseconds.
    /// Navigation and the quiescence wait draw from the same budget.
    pub load_timeout_ms: u64,
    /// Whether the Chrome sandbox is enabled
    pub sandbox: bool,
    /// Extra command-line switches for the browser process
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            window: (1280, 720),
            load_timeout_ms: 30_000,
            sandbox: false,
            extra_args: vec!["--disable-dev-shm-usage".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Device emulation requested for one session
///
/// `scale` is the device scale factor; `extra_headers` are sent with every
/// outbound request the page makes.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub extra_headers: BTreeMap<String, String>,
}

impl ViewportSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scale: 1.0,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Reject dimensions and scale factors the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Validation(format!(
                "viewport must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::Validation(format!(
                "viewport exceeds {MAX_DIMENSION}px, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > MAX_SCALE {
            return Err(Error::Validation(format!("invalid scale factor {}", self.scale)));
        }
        for name in self.extra_headers.keys() {
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(Error::Validation(format!("invalid header name {name:?}")));
            }
        }
        Ok(())
    }
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// Render literal markup at a viewport
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSpec {
    pub viewport: ViewportSpec,
    pub markup: String,
}

/// What a capture loads into the page
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureInput {
    Url(String),
    Markup(String),
}

impl CaptureInput {
    /// Hostname of a URL input, used as an authorization fact.
    pub fn host(&self) -> Option<String> {
        match self {
            CaptureInput::Url(raw) => url::Url::parse(raw)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase())),
            CaptureInput::Markup(_) => None,
        }
    }
}

/// Which region of the page ends up in the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// The visible viewport
    Viewport,
    /// The full scrollable page
    FullPage,
    /// The bounding box of the first element matching a CSS selector
    Element(String),
}

/// Capture a URL or markup
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub viewport: ViewportSpec,
    pub input: CaptureInput,
    pub target: CaptureTarget,
}

/// Encoded image formats the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Encoding parameters for a single screenshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenshotOptions {
    pub format: ImageFormat,
    /// JPEG quality 0-100; ignored for PNG
    pub quality: Option<u32>,
    /// Output pixels per CSS pixel. `None` keeps the device scale factor.
    pub scale: Option<f64>,
}

impl ScreenshotOptions {
    pub fn png() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: None,
            scale: None,
        }
    }

    pub fn jpeg(quality: u32) -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: Some(quality.min(100)),
            scale: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }
}

/// Shared, process-wide browser engine
///
/// Implementations are read-only after initialization. Every call to
/// `new_context` must return a context that shares no cookies or storage with
/// any other context.
pub trait BrowserEngine: Send + Sync {
    /// Derive an isolated browsing context configured for `viewport`.
    fn new_context(&self, viewport: &ViewportSpec) -> Result<Box<dyn BrowsingContext>>;
}

/// An isolated, cookie/storage-scoped browsing context
pub trait BrowsingContext: Send {
    /// Backend-specific identifier, used in logs
    fn id(&self) -> &str;

    /// Open a page inside this context with the context's viewport applied.
    fn new_page(&mut self) -> Result<Box<dyn PageHandle>>;

    /// Dispose of the context and everything in it.
    fn dispose(&mut self) -> Result<()>;
}

/// A single page inside a browsing context
pub trait PageHandle: Send {
    /// Load literal markup as the page document.
    fn set_content(&mut self, markup: &str) -> Result<()>;

    /// Navigate to an absolute URL.
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Block until the page has had no in-flight network activity for the
    /// engine's idle window. `timeout` counts from the start of the most
    /// recent load, so loading and waiting share one budget; past it this
    /// fails with `Error::Timeout`.
    fn wait_for_quiescence(&mut self, timeout: Duration) -> Result<()>;

    /// Encode the requested region of the current page.
    fn screenshot(&mut self, target: &CaptureTarget, options: &ScreenshotOptions) -> Result<Vec<u8>>;

    /// Close the page.
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.window, (1280, 720));
        assert!(!config.sandbox);
        assert_eq!(config.load_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_viewport_validation() {
        assert!(ViewportSpec::new(1200, 630).with_scale(2.0).validate().is_ok());
        assert!(ViewportSpec::new(0, 630).validate().is_err());
        assert!(ViewportSpec::new(1200, MAX_DIMENSION + 1).validate().is_err());
        assert!(ViewportSpec::new(1200, 630).with_scale(0.0).validate().is_err());
        assert!(ViewportSpec::new(1200, 630).with_scale(f64::NAN).validate().is_err());
        assert!(ViewportSpec::new(1200, 630)
            .with_header("Bad Header", "x")
            .validate()
            .is_err());
    }

    #[test]
    fn test_capture_input_host() {
        let input = CaptureInput::Url("https://Example.com/path?q=1".into());
        assert_eq!(input.host().as_deref(), Some("example.com"));
        assert_eq!(CaptureInput::Markup("<p>".into()).host(), None);
    }

    #[test]
    fn test_jpeg_quality_is_clamped() {
        assert_eq!(ScreenshotOptions::jpeg(250).quality, Some(100));
        assert_eq!(ImageFormat::Jpeg.content_type(), "image/jpeg");
    }
}
