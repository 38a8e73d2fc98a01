//! Per-request browsing session orchestration
//!
//! A session walks `Idle → ContextAcquired → PageCreated → ContentLoading →
//! CaptureReady → Closed`, or drops to `Failed` from any non-terminal state.
//! The context and page are held by guards so they are released exactly once
//! whichever way the session ends, unwinding included.

use crate::diagnostic::DiagnosticCapture;
use crate::{
    BrowserEngine, BrowsingContext, CaptureInput, CaptureSpec, CaptureTarget, Error, PageHandle,
    RenderSpec, Result, ScreenshotOptions, ViewportSpec,
};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle states of a browsing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ContextAcquired,
    PageCreated,
    ContentLoading,
    CaptureReady,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, ContextAcquired)
            | (ContextAcquired, PageCreated)
            | (PageCreated, ContentLoading)
            | (ContentLoading, CaptureReady)
            | (CaptureReady, Closed) => true,
            _ => false,
        }
    }
}

/// Everything a session needs to produce one image
#[derive(Debug, Clone, PartialEq)]
pub struct SessionJob {
    pub viewport: ViewportSpec,
    pub content: CaptureInput,
    pub target: CaptureTarget,
    pub options: ScreenshotOptions,
}

impl SessionJob {
    pub fn capture(spec: CaptureSpec, options: ScreenshotOptions) -> Self {
        Self {
            viewport: spec.viewport,
            content: spec.input,
            target: spec.target,
            options,
        }
    }
}

impl From<RenderSpec> for SessionJob {
    /// Renders always capture the viewport as PNG.
    fn from(spec: RenderSpec) -> Self {
        Self {
            viewport: spec.viewport,
            content: CaptureInput::Markup(spec.markup),
            target: CaptureTarget::Viewport,
            options: ScreenshotOptions::png(),
        }
    }
}

/// Tracks and logs the state of one session.
struct Session {
    id: u64,
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: SessionState::Idle,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Owns a browsing context until it is released.
struct ContextGuard {
    session: u64,
    inner: Option<Box<dyn BrowsingContext>>,
}

impl ContextGuard {
    fn acquire(session: u64, engine: &dyn BrowserEngine, viewport: &ViewportSpec) -> Result<Self> {
        let context = engine.new_context(viewport)?;
        debug!("session {}: acquired context {}", session, context.id());
        Ok(Self {
            session,
            inner: Some(context),
        })
    }

    fn open_page(&mut self) -> Result<PageGuard> {
        let context = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::Internal("context used after release".into()))?;
        Ok(PageGuard {
            session: self.session,
            inner: Some(context.new_page()?),
        })
    }

    fn release(&mut self) {
        if let Some(mut context) = self.inner.take() {
            if let Err(e) = context.dispose() {
                warn!("session {}: failed to dispose context {}: {}", self.session, context.id(), e);
            }
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns a page until it is released.
struct PageGuard {
    session: u64,
    inner: Option<Box<dyn PageHandle>>,
}

impl PageGuard {
    fn get_mut(&mut self) -> Result<&mut dyn PageHandle> {
        match self.inner.as_mut() {
            Some(page) => Ok(page.as_mut()),
            None => Err(Error::Internal("page used after release".into())),
        }
    }

    fn release(&mut self) {
        if let Some(mut page) = self.inner.take() {
            if let Err(e) = page.close() {
                warn!("session {}: failed to close page: {}", self.session, e);
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drives one isolated browsing session per authorized request.
#[derive(Clone)]
pub struct SessionOrchestrator {
    engine: Arc<dyn BrowserEngine>,
    load_timeout: Duration,
    diagnostic: DiagnosticCapture,
}

impl SessionOrchestrator {
    pub fn new(engine: Arc<dyn BrowserEngine>, load_timeout: Duration) -> Self {
        Self {
            engine,
            load_timeout,
            diagnostic: DiagnosticCapture::default(),
        }
    }

    /// Run a job to completion and return the encoded image.
    ///
    /// Blocks the calling thread. On failure the diagnostic frame is taken
    /// first, then page and context are released, then the original error
    /// is returned.
    pub fn run(&self, job: &SessionJob) -> Result<Vec<u8>> {
        job.viewport.validate()?;
        let mut session = Session::new();

        let mut context = match ContextGuard::acquire(session.id, self.engine.as_ref(), &job.viewport)
        {
            Ok(context) => context,
            Err(e) => {
                session.advance(SessionState::Failed);
                error!("session {}: could not acquire context: {}", session.id, e);
                return Err(e);
            }
        };
        session.advance(SessionState::ContextAcquired);

        let mut page = match context.open_page() {
            Ok(page) => page,
            Err(e) => {
                session.advance(SessionState::Failed);
                error!("session {}: could not open page: {}", session.id, e);
                context.release();
                return Err(e);
            }
        };
        session.advance(SessionState::PageCreated);

        let result = page
            .get_mut()
            .and_then(|handle| self.drive(&mut session, handle, job));

        match &result {
            Ok(image) => {
                session.advance(SessionState::Closed);
                debug!("session {}: captured {} bytes", session.id, image.len());
            }
            Err(e) => {
                session.advance(SessionState::Failed);
                error!("session {}: {}", session.id, e);
                if let Ok(handle) = page.get_mut() {
                    self.diagnostic.capture(handle, e);
                }
            }
        }

        page.release();
        context.release();
        result
    }

    fn drive(
        &self,
        session: &mut Session,
        page: &mut dyn PageHandle,
        job: &SessionJob,
    ) -> Result<Vec<u8>> {
        session.advance(SessionState::ContentLoading);
        match &job.content {
            CaptureInput::Url(url) => page.navigate(url)?,
            CaptureInput::Markup(markup) => page.set_content(markup)?,
        }
        page.wait_for_quiescence(self.load_timeout)?;

        session.advance(SessionState::CaptureReady);
        page.screenshot(&job.target, &job.options)
    }
}
