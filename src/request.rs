//! Wire formats for request bodies and their validation into specs

use crate::{
    CaptureInput, CaptureSpec, CaptureTarget, Error, RenderSpec, Result, ViewportSpec,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Viewport used by the legacy `/og/{url}` route
pub const OG_VIEWPORT: (u32, u32) = (1200, 630);
/// Device scale factor used by the legacy `/og/{url}` route
pub const OG_SCALE: f64 = 2.0;

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportBody {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceBody {
    pub viewport: ViewportBody,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default, rename = "extraHTTPHeaders")]
    pub extra_http_headers: BTreeMap<String, String>,
}

impl DeviceBody {
    fn into_viewport(self) -> Result<ViewportSpec> {
        let viewport = ViewportSpec {
            width: self.viewport.width,
            height: self.viewport.height,
            scale: self.scale.unwrap_or(1.0),
            extra_headers: self.extra_http_headers,
        };
        viewport.validate()?;
        Ok(viewport)
    }
}

/// `POST /v1/render`
#[derive(Debug, Clone, Deserialize)]
pub struct RenderRequest {
    pub device: DeviceBody,
    pub input: String,
}

impl RenderRequest {
    pub fn into_spec(self) -> Result<RenderSpec> {
        Ok(RenderSpec {
            viewport: self.device.into_viewport()?,
            markup: self.input,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaggedInput {
    Url { value: String },
    Contents { value: String },
}

/// Capture input: a bare URL string or a tagged object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputBody {
    Url(String),
    Tagged(TaggedInput),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetBody {
    Viewport,
    Page,
    Element { locator: String },
}

/// `POST /v1/capture` and `POST /webshot.WebShot/Capture`
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureRequest {
    pub device: DeviceBody,
    pub input: InputBody,
    #[serde(default)]
    pub target: Option<TargetBody>,
}

impl CaptureRequest {
    pub fn into_spec(self) -> Result<CaptureSpec> {
        let input = match self.input {
            InputBody::Url(value) | InputBody::Tagged(TaggedInput::Url { value }) => {
                CaptureInput::Url(validate_url(&value)?)
            }
            InputBody::Tagged(TaggedInput::Contents { value }) => CaptureInput::Markup(value),
        };
        let target = match self.target {
            None | Some(TargetBody::Viewport) => CaptureTarget::Viewport,
            Some(TargetBody::Page) => CaptureTarget::FullPage,
            Some(TargetBody::Element { locator }) => {
                if locator.trim().is_empty() {
                    return Err(Error::Validation("element locator is empty".into()));
                }
                CaptureTarget::Element(locator)
            }
        };

        Ok(CaptureSpec {
            viewport: self.device.into_viewport()?,
            input,
            target,
        })
    }
}

/// Parse and validate a render body.
pub fn parse_render(body: &[u8]) -> Result<RenderSpec> {
    serde_json::from_slice::<RenderRequest>(body)
        .map_err(|e| Error::Validation(format!("malformed render body: {}", e)))?
        .into_spec()
}

/// Parse and validate a capture body.
pub fn parse_capture(body: &[u8]) -> Result<CaptureSpec> {
    serde_json::from_slice::<CaptureRequest>(body)
        .map_err(|e| Error::Validation(format!("malformed capture body: {}", e)))?
        .into_spec()
}

/// Build the capture for the legacy `/og/{url}` route, where the target
/// host and path are embedded in the request path without a scheme.
pub fn og_capture_spec(path: &str, query: Option<&str>) -> Result<CaptureSpec> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Err(Error::MissingPathSegment("url"));
    }
    let mut target = format!("https://{}", path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    Ok(CaptureSpec {
        viewport: ViewportSpec::new(OG_VIEWPORT.0, OG_VIEWPORT.1).with_scale(OG_SCALE),
        input: CaptureInput::Url(validate_url(&target)?),
        target: CaptureTarget::FullPage,
    })
}

fn validate_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Validation(format!("invalid url {:?}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        scheme => Err(Error::Validation(format!("unsupported url scheme {:?}", scheme))),
    }
}
