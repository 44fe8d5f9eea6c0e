//! Basic CDP example - connecting to a page target and listening for events

use browser::{ConnectionConfig, Target, TargetDescriptor};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Page socket URL as listed by http://localhost:9222/json
    let ws_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/page/DAB7FB6187B554E10B0BD18821265734".into());
    let descriptor = TargetDescriptor::new("example", "page", Some(ws_url));

    let target = Target::with_config(descriptor, ConnectionConfig::from_env());
    target.connect().await?;
    println!("Connected to {}", target);

    let session = target.session()?;
    session.on("Page.loadEventFired", |params| {
        println!("Page loaded at {}", params["timestamp"]);
    });

    let page = session.domain("Page");
    page.call("enable", serde_json::Value::Null).await?;
    page.call_with_timeout(
        "navigate",
        json!({ "url": "https://www.rust-lang.org" }),
        Duration::from_secs(10),
    )
    .await?;

    // Keep alive for a bit to see events
    tokio::time::sleep(Duration::from_secs(2)).await;

    let title = session
        .call(
            "Runtime.evaluate",
            json!({ "expression": "document.title", "returnByValue": true }),
        )
        .await?;
    println!("Title: {}", title["result"]["value"]);

    // Clean shutdown
    target.stop().await?;
    println!("Disconnected");

    Ok(())
}
