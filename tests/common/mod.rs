#![allow(dead_code)]

use axum::Router;
use osintwatch::config::TransportConfig;
use osintwatch::transport::Transport;
use std::time::Duration;

/// Serve `router` on an ephemeral loopback port and return its base URL.
pub async fn spawn_fixture(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Transport with no pacing and instant retries.
pub fn fast_transport(total_retries: u32) -> Transport {
    let cfg = TransportConfig {
        min_delay_secs: 0.0,
        max_delay_secs: 0.0,
        total_retries,
        backoff_factor_secs: 0.0,
    };
    Transport::new(&cfg, Duration::from_secs(5))
}

pub const FEED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Advisories</title>
  <link>https://advisories.example/</link>
  <description>fixture</description>
  <item>
    <title>URGENT: ransomware campaign</title>
    <link>https://advisories.example/post-1</link>
    <description>Operators use 203.0.113.7 for staging</description>
  </item>
  <item>
    <title>URGENT: ransomware campaign</title>
    <link>https://advisories.example/post-1</link>
    <description>Operators use 203.0.113.7 for staging</description>
  </item>
  <item>
    <title>Routine maintenance</title>
    <link>https://advisories.example/post-2</link>
    <description>Nothing to report</description>
  </item>
</channel></rss>"#;
