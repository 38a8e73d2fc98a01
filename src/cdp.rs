//! Chrome DevTools Protocol adapter implementation

use crate::{
    BrowserEngine, BrowsingContext, CaptureTarget, EngineConfig, Error, ImageFormat, PageHandle,
    Result, ScreenshotOptions, ViewportSpec, MAX_DIMENSION,
};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Emulation, Page, Target};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the readiness flag is polled while waiting for quiescence
const QUIESCENCE_POLL: Duration = Duration::from_millis(50);

/// Chrome keeps the DevTools connection alive this long without traffic.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// The process-wide headless Chrome instance.
///
/// Launched once at startup and shared read-only by every request. Each
/// request gets its own browser context, so cookies and storage never leak
/// between callers.
pub struct CdpEngine {
    browser: Browser,
    config: EngineConfig,
}

impl CdpEngine {
    /// Launch headless Chrome. Failure here must abort startup.
    pub fn launch(config: EngineConfig) -> Result<Self> {
        let args: Vec<&OsStr> = config.extra_args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some(config.window))
            .path(config.chrome_path.clone())
            .args(args)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let version = browser
            .get_version()
            .map(|v| v.product)
            .unwrap_or_else(|_| "unknown".to_string());
        info!("Headless browser ready ({})", version);

        Ok(Self { browser, config })
    }

    /// Terminate the browser process.
    pub fn shutdown(self) -> Result<()> {
        drop(self.browser);
        Ok(())
    }
}

impl BrowserEngine for CdpEngine {
    fn new_context(&self, viewport: &ViewportSpec) -> Result<Box<dyn BrowsingContext>> {
        let context = self
            .browser
            .new_context()
            .map_err(|e| Error::CdpError(format!("Failed to create browser context: {}", e)))?;
        let id = context.get_id().to_string();

        Ok(Box::new(CdpContext {
            browser: self.browser.clone(),
            id,
            viewport: viewport.clone(),
            load_timeout: self.config.load_timeout(),
        }))
    }
}

/// A `Target.createBrowserContext` context, disposed on release.
struct CdpContext {
    browser: Browser,
    id: String,
    viewport: ViewportSpec,
    load_timeout: Duration,
}

impl BrowsingContext for CdpContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn new_page(&mut self) -> Result<Box<dyn PageHandle>> {
        let target: Target::CreateTarget = serde_json::from_value(serde_json::json!({
            "url": "about:blank",
            "browserContextId": self.id,
        }))
        .map_err(|e| Error::Other(format!("Failed to build target params: {}", e)))?;
        let tab = self
            .browser
            .new_tab_with_options(target)
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        // Hand the tab to the page first so it is closed even if setup fails.
        let mut page = CdpPage {
            tab,
            viewport: self.viewport.clone(),
            load_timeout: self.load_timeout,
            load_started: None,
            network_idle: Arc::new(AtomicBool::new(false)),
            closed: false,
        };
        page.configure()?;
        Ok(Box::new(page))
    }

    fn dispose(&mut self) -> Result<()> {
        self.browser
            .call_method(Target::DisposeBrowserContext {
                browser_context_id: self.id.clone(),
            })
            .map_err(|e| Error::CdpError(format!("Failed to dispose context: {}", e)))?;
        Ok(())
    }
}

struct CdpPage {
    tab: Arc<Tab>,
    viewport: ViewportSpec,
    load_timeout: Duration,
    load_started: Option<Instant>,
    network_idle: Arc<AtomicBool>,
    closed: bool,
}

impl CdpPage {
    fn configure(&mut self) -> Result<()> {
        // Navigation waits give up with the rest of the load budget.
        self.tab.set_default_timeout(self.load_timeout);
        set_device_metrics(&self.tab, self.viewport.width, self.viewport.height, self.viewport.scale)?;

        if !self.viewport.extra_headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: std::collections::HashMap<&str, &str> = self
                .viewport
                .extra_headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            self.tab
                .set_extra_http_headers(headers)
                .map_err(|e| Error::CdpError(format!("Failed to set headers: {}", e)))?;
        }

        // Readiness comes from Chrome's own `networkIdle` lifecycle event,
        // which fires after 500ms without in-flight requests. Only the main
        // frame counts; its frame id is the page's target id.
        self.tab
            .call_method(Page::SetLifecycleEventsEnabled { enabled: true })
            .map_err(|e| Error::CdpError(format!("Failed to enable lifecycle events: {}", e)))?;

        let idle = self.network_idle.clone();
        let main_frame = self.tab.get_target_id().clone();
        self.tab
            .add_event_listener(Arc::new(move |event: &Event| {
                if let Event::PageLifecycleEvent(lifecycle) = event {
                    let params = &lifecycle.params;
                    let ready = lifecycle_readiness(&main_frame, &params.frame_id, &params.name);
                    if let Some(ready) = ready {
                        idle.store(ready, Ordering::SeqCst);
                    }
                }
            }))
            .map_err(|e| Error::CdpError(format!("Failed to register lifecycle listener: {}", e)))?;

        Ok(())
    }

    fn load(&mut self, url: &str) -> Result<()> {
        self.load_started = Some(Instant::now());
        self.network_idle.store(false, Ordering::SeqCst);
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn capture(&self, options: &ScreenshotOptions, width: u32, height: u32) -> Result<Vec<u8>> {
        // Chrome multiplies the clip scale by the device scale factor.
        let clip = options.scale.map(|scale| Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f64,
            height: height as f64,
            scale: scale / self.viewport.scale,
        });
        self.tab
            .capture_screenshot(capture_format(options.format), options.quality, clip, true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn capture_full_page(&self, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let metrics = self
            .tab
            .call_method(Page::GetLayoutMetrics(None))
            .map_err(|e| Error::RenderError(format!("Failed to read layout metrics: {}", e)))?;
        let content = metrics.css_content_size;
        let (width, height) = full_page_size(content.width, content.height, &self.viewport);

        set_device_metrics(&self.tab, width, height, self.viewport.scale)?;
        let shot = self.capture(options, width, height);
        // Restore even when the capture failed; the page may still be used
        // for the diagnostic frame.
        let restored = set_device_metrics(
            &self.tab,
            self.viewport.width,
            self.viewport.height,
            self.viewport.scale,
        );
        let data = shot?;
        restored?;
        Ok(data)
    }

    fn capture_element(&self, selector: &str, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let element = self.tab.find_element(selector).map_err(|e| {
            debug!("Selector {:?} matched nothing: {}", selector, e);
            Error::ElementNotFound(selector.to_string())
        })?;
        element
            .capture_screenshot(capture_format(options.format))
            .map_err(|e| Error::RenderError(format!("Element screenshot failed: {}", e)))
    }
}

impl PageHandle for CdpPage {
    fn set_content(&mut self, markup: &str) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(markup.as_bytes());
        self.load(&format!("data:text/html;charset=utf-8;base64,{}", encoded))
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.load(url)
    }

    fn wait_for_quiescence(&mut self, timeout: Duration) -> Result<()> {
        let deadline = load_deadline(self.load_started, Instant::now(), timeout);
        while !self.network_idle.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            std::thread::sleep(QUIESCENCE_POLL);
        }
        debug!("Network quiet with {}ms of budget left", remaining_ms(deadline));
        Ok(())
    }

    fn screenshot(&mut self, target: &CaptureTarget, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        match target {
            CaptureTarget::Viewport => {
                self.capture(options, self.viewport.width, self.viewport.height)
            }
            CaptureTarget::FullPage => self.capture_full_page(options),
            CaptureTarget::Element(selector) => self.capture_element(selector, options),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tab
            .close(false)
            .map_err(|e| Error::CdpError(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }
}

/// Loading and the quiescence wait share one budget from the load start.
fn load_deadline(load_started: Option<Instant>, now: Instant, timeout: Duration) -> Instant {
    load_started.unwrap_or(now) + timeout
}

fn remaining_ms(deadline: Instant) -> u128 {
    deadline.saturating_duration_since(Instant::now()).as_millis()
}

/// New readiness for a lifecycle event, or `None` when it does not concern
/// the main frame's network state.
fn lifecycle_readiness(main_frame: &str, frame_id: &str, name: &str) -> Option<bool> {
    if frame_id != main_frame {
        return None;
    }
    match name {
        "init" => Some(false),
        "networkIdle" => Some(true),
        _ => None,
    }
}

/// Layout size for a full-page capture: at least the viewport width, and
/// never beyond the largest accepted viewport edge.
fn full_page_size(content_width: f64, content_height: f64, viewport: &ViewportSpec) -> (u32, u32) {
    let clamp = |v: f64| v.ceil().clamp(1.0, MAX_DIMENSION as f64) as u32;
    (clamp(content_width).max(viewport.width), clamp(content_height))
}

fn capture_format(format: ImageFormat) -> Page::CaptureScreenshotFormatOption {
    match format {
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
    }
}

fn set_device_metrics(tab: &Tab, width: u32, height: u32, scale: f64) -> Result<()> {
    // Built from protocol JSON so optional fields added by newer protocol
    // revisions default to absent.
    let command: Emulation::SetDeviceMetricsOverride = serde_json::from_value(serde_json::json!({
        "width": width,
        "height": height,
        "deviceScaleFactor": scale,
        "mobile": false,
    }))
    .map_err(|e| Error::Other(format!("Failed to build metrics override: {}", e)))?;

    tab.call_method(command)
        .map_err(|e| Error::CdpError(format!("Failed to set device metrics: {}", e)))?;
    Ok(())
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Tab close on drop failed: {}", e);
            }
        }
    }
}
