//! Allowlisted page fetched through an anonymizing SOCKS proxy.
//!
//! Before each fetch the source may ask the local Tor daemon for a fresh
//! circuit over its control port. Renewal problems never fail the fetch:
//! they are logged and the request goes out on the existing circuit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::models::Item;
use crate::source_page::page_item;
use crate::sources::Source;
use crate::transport::{RequestOptions, Transport};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal Tor control-port client: authenticate, then `SIGNAL NEWNYM`.
#[derive(Debug, Clone)]
pub struct TorControl {
    host: String,
    port: u16,
    password: Option<String>,
    settle: Duration,
}

impl TorControl {
    pub fn new(addr: (&str, u16), password: Option<String>, settle: Duration) -> Self {
        Self {
            host: addr.0.to_string(),
            port: addr.1,
            password,
            settle,
        }
    }

    /// Request a new circuit and wait for it to settle.
    pub async fn renew(&self) -> Result<()> {
        tokio::time::timeout(CONTROL_TIMEOUT, self.signal_newnym())
            .await
            .context("tor control port timed out")??;
        debug!(settle_secs = self.settle.as_secs(), "new circuit requested");
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn signal_newnym(&self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("connect to tor control {}:{}", self.host, self.port))?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(authenticate_command(self.password.as_deref()).as_bytes())
            .await?;
        expect_ok(&mut lines, "AUTHENTICATE").await?;

        write.write_all(b"SIGNAL NEWNYM\r\n").await?;
        expect_ok(&mut lines, "SIGNAL NEWNYM").await?;

        // Best effort; tor closes the connection either way.
        let _ = write.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

fn authenticate_command(password: Option<&str>) -> String {
    match password {
        Some(pw) if !pw.is_empty() => {
            let escaped = pw.replace('\\', "\\\\").replace('"', "\\\"");
            format!("AUTHENTICATE \"{}\"\r\n", escaped)
        }
        _ => "AUTHENTICATE\r\n".to_string(),
    }
}

async fn expect_ok<R>(lines: &mut tokio::io::Lines<R>, command: &str) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines.next_line().await? {
        Some(line) if line.starts_with("250") => Ok(()),
        Some(line) => bail!("{} rejected: {}", command, line.trim()),
        None => bail!("{}: control connection closed", command),
    }
}

pub struct OnionSource {
    name: String,
    url: String,
    proxy: String,
    control: Option<TorControl>,
    transport: Transport,
}

impl OnionSource {
    pub fn new(
        name: &str,
        url: &str,
        tor_socks5: &str,
        control: Option<TorControl>,
        transport: Transport,
    ) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            proxy: tor_socks5.to_string(),
            control,
            transport,
        }
    }
}

#[async_trait]
impl Source for OnionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "onion"
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        if let Some(control) = &self.control {
            if let Err(e) = control.renew().await {
                warn!(source = %self.name, error = %e, "circuit renewal failed; using existing circuit");
            }
        }

        let opts = RequestOptions {
            proxy: Some(self.proxy.clone()),
            ..RequestOptions::default()
        };
        let response = self
            .transport
            .get(&self.url, opts)
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("onion '{}': fetch failed", self.name))?;

        let mut extra = Map::new();
        extra.insert("type".to_string(), json!("onion"));
        extra.insert("proxy".to_string(), json!(self.proxy));
        Ok(vec![page_item(&self.url, &response.text(), extra)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_authenticate_command_quotes_password() {
        assert_eq!(authenticate_command(None), "AUTHENTICATE\r\n");
        assert_eq!(authenticate_command(Some("")), "AUTHENTICATE\r\n");
        assert_eq!(
            authenticate_command(Some(r#"pa"ss\w"#)),
            "AUTHENTICATE \"pa\\\"ss\\\\w\"\r\n"
        );
    }

    async fn fake_control(replies: &'static [&'static str]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            for reply in replies {
                if lines.next_line().await.unwrap().is_none() {
                    return;
                }
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_renew_accepts_250_replies() {
        let port = fake_control(&["250 OK\r\n", "250 OK\r\n"]).await;
        let control = TorControl::new(("127.0.0.1", port), Some("pw".into()), Duration::ZERO);
        control.renew().await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_reports_bad_auth() {
        let port = fake_control(&["515 Authentication failed\r\n"]).await;
        let control = TorControl::new(("127.0.0.1", port), None, Duration::ZERO);
        let err = control.renew().await.unwrap_err();
        assert!(err.to_string().contains("AUTHENTICATE rejected"));
    }
}
