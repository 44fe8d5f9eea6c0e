//! Session management example - creating tabs and attaching flat sessions

use browser::{Browser, DirectoryConfig};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let browser = Browser::new(DirectoryConfig::default())?;

    // Waits until Chrome's debugging port answers
    let browser_target = browser.connect().await?;
    println!("Connected to browser target {}", browser_target);

    let version = browser.version().await?;
    println!("Browser: {} (protocol {})", version.browser, version.protocol_version);

    // One page through the HTTP endpoint
    let tab = browser.new_target(Some("https://www.rust-lang.org")).await?;
    println!("Created tab: {}", tab.id());

    // And one attached over the browser socket as a flat session
    let root = browser.session()?;
    let created = root
        .call("Target.createTarget", json!({ "url": "https://github.com" }))
        .await?;
    let target_id = created["targetId"].as_str().unwrap_or_default().to_string();

    let attached = root
        .call(
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
        )
        .await?;
    let session_id = attached["sessionId"].as_str().unwrap_or_default();

    let page_session = browser_target.get_or_create_session(Some(session_id));
    page_session.domain("Page").on("frameNavigated", |params| {
        println!("Navigated: {}", params["frame"]["url"]);
    });
    page_session.call("Page.enable", serde_json::Value::Null).await?;
    page_session
        .call("Page.navigate", json!({ "url": "https://crates.io" }))
        .await?;

    tokio::time::sleep(Duration::from_secs(3)).await;

    for target in browser.list_targets().await? {
        println!("Page {}: {}", target.id(), target.descriptor().url);
    }

    println!("{}", browser.close_target(tab.id()).await?);
    browser.shutdown().await?;
    println!("Browser session stopped");

    Ok(())
}
