//! In-process browser engine that records every acquire and release.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biscuit_auth::macros::biscuit;
use biscuit_auth::{Biscuit, KeyPair};
use webshot::diagnostic::DIAGNOSTIC_QUALITY;
use webshot::{
    BrowserEngine, BrowsingContext, CaptureTarget, Error, ImageFormat, PageHandle, Result,
    ScreenshotOptions, ViewportSpec,
};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Everything the fake engine observed
#[derive(Default)]
pub struct Ledger {
    pub acquired: Mutex<Vec<String>>,
    pub released: Mutex<Vec<String>>,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub diagnostics: AtomicUsize,
    /// Pixel size of every diagnostic frame taken
    pub diagnostic_sizes: Mutex<Vec<(u32, u32)>>,
    next_id: AtomicUsize,
}

impl Ledger {
    pub fn acquired_count(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn released_count(&self) -> usize {
        self.released.lock().unwrap().len()
    }

    /// Every acquired context was released exactly once, and every opened
    /// page closed exactly once.
    pub fn assert_balanced(&self) {
        let acquired = self.acquired.lock().unwrap().clone();
        let released = self.released.lock().unwrap().clone();
        let unique: HashSet<_> = released.iter().collect();
        assert_eq!(unique.len(), released.len(), "a context was released twice");
        assert_eq!(
            acquired.iter().collect::<HashSet<_>>(),
            unique,
            "acquired and released contexts differ"
        );
        assert_eq!(
            self.pages_opened.load(Ordering::SeqCst),
            self.pages_closed.load(Ordering::SeqCst),
            "pages opened and closed differ"
        );
    }
}

/// Failure injection for the fake engine
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_context: bool,
    pub fail_page: bool,
    pub fail_diagnostic: bool,
}

/// A `BrowserEngine` whose pages "render" into a tiny PNG-shaped header.
///
/// Content drives behaviour: a URL containing `stall` never goes quiet, and
/// markup containing `PANIC` panics while capturing. `#id` selectors match
/// when the loaded markup contains `id="id"`.
pub struct FakeEngine {
    pub ledger: Arc<Ledger>,
    faults: Faults,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            ledger: Arc::new(Ledger::default()),
            faults,
        }
    }
}

impl BrowserEngine for FakeEngine {
    fn new_context(&self, viewport: &ViewportSpec) -> Result<Box<dyn BrowsingContext>> {
        if self.faults.fail_context {
            return Err(Error::Other("context creation refused".into()));
        }
        let id = format!("ctx-{}", self.ledger.next_id.fetch_add(1, Ordering::SeqCst));
        self.ledger.acquired.lock().unwrap().push(id.clone());
        Ok(Box::new(FakeContext {
            id,
            viewport: viewport.clone(),
            ledger: self.ledger.clone(),
            faults: self.faults.clone(),
        }))
    }
}

struct FakeContext {
    id: String,
    viewport: ViewportSpec,
    ledger: Arc<Ledger>,
    faults: Faults,
}

impl BrowsingContext for FakeContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn new_page(&mut self) -> Result<Box<dyn PageHandle>> {
        if self.faults.fail_page {
            return Err(Error::Other("tab creation refused".into()));
        }
        self.ledger.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            viewport: self.viewport.clone(),
            ledger: self.ledger.clone(),
            faults: self.faults.clone(),
            content: String::new(),
            stalled: false,
        }))
    }

    fn dispose(&mut self) -> Result<()> {
        self.ledger.released.lock().unwrap().push(self.id.clone());
        Ok(())
    }
}

struct FakePage {
    viewport: ViewportSpec,
    ledger: Arc<Ledger>,
    faults: Faults,
    content: String,
    stalled: bool,
}

impl PageHandle for FakePage {
    fn set_content(&mut self, markup: &str) -> Result<()> {
        self.content = markup.to_string();
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.stalled = url.contains("stall");
        self.content = format!("<html data-url=\"{}\"></html>", url);
        Ok(())
    }

    fn wait_for_quiescence(&mut self, timeout: Duration) -> Result<()> {
        if self.stalled {
            return Err(Error::Timeout(timeout.as_millis() as u64));
        }
        Ok(())
    }

    fn screenshot(
        &mut self,
        target: &CaptureTarget,
        options: &ScreenshotOptions,
    ) -> Result<Vec<u8>> {
        let diagnostic =
            options.format == ImageFormat::Jpeg && options.quality == Some(DIAGNOSTIC_QUALITY);
        if diagnostic {
            self.ledger.diagnostics.fetch_add(1, Ordering::SeqCst);
            if self.faults.fail_diagnostic {
                return Err(Error::RenderError("diagnostic refused".into()));
            }
        }
        if self.content.contains("PANIC") {
            panic!("renderer crashed");
        }

        let scale = options.scale.unwrap_or(self.viewport.scale);
        let (width, height) = match target {
            CaptureTarget::Viewport => (self.viewport.width, self.viewport.height),
            CaptureTarget::FullPage => (self.viewport.width, self.viewport.height * 3),
            CaptureTarget::Element(selector) => {
                let id = selector.trim_start_matches('#');
                let needle = format!("id=\"{}\"", id);
                if !selector.starts_with('#') || !self.content.contains(&needle) {
                    return Err(Error::ElementNotFound(selector.clone()));
                }
                (100, 50)
            }
        };
        let size = ((width as f64 * scale) as u32, (height as f64 * scale) as u32);
        if diagnostic {
            self.ledger.diagnostic_sizes.lock().unwrap().push(size);
        }
        Ok(fake_image(options.format, size.0, size.1))
    }

    fn close(&mut self) -> Result<()> {
        self.ledger.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// PNG signature followed by an IHDR-shaped width/height pair.
pub fn fake_image(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
    let mut out = match format {
        ImageFormat::Png => PNG_SIGNATURE.to_vec(),
        ImageFormat::Jpeg => vec![0xff, 0xd8, 0xff, 0xe0, 0, 0, 0, 0],
    };
    out.extend_from_slice(&13u32.to_be_bytes());
    out.extend_from_slice(b"IHDR");
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out
}

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

pub fn bearer(token: &Biscuit) -> String {
    format!("Bearer {}", token.to_base64().unwrap())
}

/// Token carrying only an identity
pub fn identity_token(keypair: &KeyPair, user: &str) -> Biscuit {
    biscuit!(r#"user({user});"#, user = user).build(keypair).unwrap()
}

/// Token carrying an identity and the `capture` right
pub fn capture_token(keypair: &KeyPair, user: &str) -> Biscuit {
    biscuit!(r#"user({user}); right("capture");"#, user = user)
        .build(keypair)
        .unwrap()
}
