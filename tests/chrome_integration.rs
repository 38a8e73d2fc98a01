//! End-to-end sessions against a real headless Chrome

#![cfg(feature = "cdp")]

mod common;

use std::sync::{Arc, Once};
use std::time::Duration;

use common::png_dimensions;
use tiny_http::{Response, Server};
use webshot::cdp::CdpEngine;
use webshot::session::{SessionJob, SessionOrchestrator};
use webshot::{
    CaptureInput, CaptureSpec, CaptureTarget, EngineConfig, Error, RenderSpec, ScreenshotOptions,
    ViewportSpec,
};

static INIT: Once = Once::new();

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18090").unwrap();
            for request in server.incoming_requests() {
                let response = match request.url() {
                    "/" => Response::from_string(
                        r#"<!DOCTYPE html>
<html>
<head><title>Card</title></head>
<body style="margin:0">
<div id="card" style="width:300px;height:150px;background:#336">card</div>
<div style="height:3000px"></div>
</body>
</html>"#,
                    )
                    .with_header(
                        "Content-Type: text/html; charset=utf-8"
                            .parse::<tiny_http::Header>()
                            .unwrap(),
                    ),
                    _ => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(Duration::from_millis(100));
    });

    "http://127.0.0.1:18090/".to_string()
}

fn orchestrator() -> SessionOrchestrator {
    let config = EngineConfig::default();
    let timeout = config.load_timeout();
    let engine = CdpEngine::launch(config).expect("Failed to launch Chrome");
    SessionOrchestrator::new(Arc::new(engine), timeout)
}

fn url_capture(url: String, target: CaptureTarget) -> SessionJob {
    SessionJob::capture(
        CaptureSpec {
            viewport: ViewportSpec::new(800, 600),
            input: CaptureInput::Url(url),
            target,
        },
        ScreenshotOptions::png(),
    )
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_render_markup_at_device_scale() {
    let sessions = orchestrator();
    let job = SessionJob::from(RenderSpec {
        viewport: ViewportSpec::new(1200, 600).with_scale(2.0),
        markup: "<h1>Hello</h1>".to_string(),
    });

    let png = sessions.run(&job).unwrap();
    assert_eq!(png_dimensions(&png), Some((2400, 1200)));

    // A second render must not see state from the first.
    let again = sessions.run(&job).unwrap();
    assert_eq!(png_dimensions(&again), Some((2400, 1200)));
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_capture_url_full_page_and_element() {
    let base_url = start_test_server();
    let sessions = orchestrator();

    let page = sessions
        .run(&url_capture(base_url.clone(), CaptureTarget::FullPage))
        .unwrap();
    let (width, height) = png_dimensions(&page).unwrap();
    assert_eq!(width, 800);
    assert!(height > 600, "full page should exceed the viewport, got {}", height);

    let card = sessions
        .run(&url_capture(base_url, CaptureTarget::Element("#card".into())))
        .unwrap();
    assert_eq!(png_dimensions(&card), Some((300, 150)));
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_missing_element_reports_not_found() {
    let base_url = start_test_server();
    let sessions = orchestrator();

    let err = sessions
        .run(&url_capture(base_url, CaptureTarget::Element("#nope".into())))
        .unwrap_err();
    assert!(matches!(err, Error::ElementNotFound(_)), "got {:?}", err);
}
