use marq_common::protocol::Locator;
use marq_engine::backend::PageBackend;
use marq_h::{HeadlessBackend, LaunchOptions};
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_headless_lifecycle_collect_and_click() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();

    let mut backend = HeadlessBackend::new(LaunchOptions::default());
    match backend.launch().await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Failed to launch browser (is Chromium installed?): {}", e);
            return;
        }
    }

    let html = "<html><head><title>Test Page</title></head><body>\
                <h1>Hello</h1>\
                <button id='btn' onclick=\"document.title='Clicked'\">Click Me</button>\
                <input id='field' type='text' aria-label='Name'/>\
                </body></html>";
    let url = format!("data:text/html,{}", html);

    let nav = backend.navigate(&url).await.expect("Navigation failed");
    assert_eq!(nav.title, "Test Page");

    // Collection sees the button and the input, with usable boxes.
    let elements = backend.collect_elements().await.expect("collect failed");
    assert!(elements.iter().any(|e| e.text == "Click Me"));
    assert!(elements
        .iter()
        .any(|e| e.aria_label == "Name" && e.role == "input"));
    assert!(elements.iter().all(|e| !e.bounding_box.is_degenerate()));

    // Exact-text query finds exactly one candidate and clicking it runs
    // the handler.
    let candidates = backend
        .query(&Locator::Text {
            text: "Click Me".into(),
        })
        .await
        .expect("query failed");
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].visible && candidates[0].enabled);

    backend
        .click(&candidates[0], Duration::from_secs(5))
        .await
        .expect("click failed");
    let state = backend.page_state().await.expect("page_state failed");
    assert_eq!(state.title, "Clicked");

    // Fill round-trips through the native value setter.
    let fields = backend
        .query(&Locator::AriaLabel {
            label: "Name".into(),
        })
        .await
        .expect("aria query failed");
    assert_eq!(fields.len(), 1);
    backend
        .fill(&fields[0], "Ada", Duration::from_secs(5))
        .await
        .expect("fill failed");
    let value = backend.read_value(&fields[0]).await.expect("read failed");
    assert_eq!(value, "Ada");

    let png = backend.screenshot().await.expect("screenshot failed");
    assert!(!png.is_empty());

    backend.close().await.expect("close failed");
}

#[tokio::test]
#[serial]
async fn test_collect_excludes_offscreen_and_covered_elements() {
    let mut backend = HeadlessBackend::new(LaunchOptions::default());
    match backend.launch().await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Failed to launch browser (is Chromium installed?): {}", e);
            return;
        }
    }

    // One reachable button, one far below the fold, one fully under a
    // fixed overlay.
    let html = "<html><head><title>Vis</title></head><body>\
                <button id='ok'>Reachable</button>\
                <button id='far' style='position:absolute;top:5000px'>Below Fold</button>\
                <button id='under' style='position:fixed;top:100px;left:10px'>Hidden Under</button>\
                <div style='position:fixed;top:80px;left:0;width:400px;height:80px;background:white;z-index:99'></div>\
                </body></html>";
    let url = format!("data:text/html,{}", html);
    backend.navigate(&url).await.expect("Navigation failed");

    let elements = backend.collect_elements().await.expect("collect failed");
    assert!(elements.iter().any(|e| e.text == "Reachable"));
    assert!(!elements.iter().any(|e| e.text == "Below Fold"));
    assert!(!elements.iter().any(|e| e.text == "Hidden Under"));

    backend.close().await.expect("close failed");
}
