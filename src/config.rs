//! TOML configuration parsing and validation.
//!
//! The configuration file drives everything the daemon does: which sources
//! are polled and how often, the watchlist used for matching, transport
//! politeness, enrichment, and alert delivery.
//!
//! String values of the form `${VAR}` are replaced with the value of the
//! environment variable `VAR` (or an empty string when unset) before the
//! file is deserialized, so secrets such as SMTP passwords can stay out of
//! the file itself.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("evidence.sqlite")
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            regex: Vec::new(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_max_snippet_chars() -> usize {
    280
}

/// Politeness and retry settings shared by every source's transport.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    #[serde(default = "default_total_retries")]
    pub total_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor_secs: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            total_retries: default_total_retries(),
            backoff_factor_secs: default_backoff_factor(),
        }
    }
}

fn default_min_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    3.0
}
fn default_total_retries() -> u32 {
    3
}
fn default_backoff_factor() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_enrich_timeout")]
    pub timeout_secs: u64,
    /// RDAP bootstrap service; lookups go to `{rdap_url}/domain/{name}`.
    #[serde(default = "default_rdap_url")]
    pub rdap_url: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_enrich_timeout(),
            rdap_url: default_rdap_url(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_enrich_timeout() -> u64 {
    10
}
fn default_rdap_url() -> String {
    "https://rdap.org".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub rss: Vec<SourceEntry>,
    #[serde(default)]
    pub http: Vec<SourceEntry>,
    #[serde(default)]
    pub onion_allowlist: OnionAllowlistConfig,
}

/// One configured origin: a feed URL, a page URL, or an allowlisted onion URL.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OnionAllowlistConfig {
    #[serde(default = "default_tor_socks5")]
    pub tor_socks5: String,
    #[serde(default = "default_tor_control_port")]
    pub tor_control_port: u16,
    #[serde(default)]
    pub tor_control_password: Option<String>,
    #[serde(default)]
    pub renew_circuit: bool,
    #[serde(default = "default_circuit_settle")]
    pub circuit_settle_secs: u64,
    #[serde(default)]
    pub targets: Vec<SourceEntry>,
}

impl Default for OnionAllowlistConfig {
    fn default() -> Self {
        Self {
            tor_socks5: default_tor_socks5(),
            tor_control_port: default_tor_control_port(),
            tor_control_password: None,
            renew_circuit: false,
            circuit_settle_secs: default_circuit_settle(),
            targets: Vec::new(),
        }
    }
}

fn default_tor_socks5() -> String {
    "socks5h://127.0.0.1:9050".to_string()
}
fn default_tor_control_port() -> u16 {
    9051
}
fn default_circuit_settle() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub to_addrs: Vec<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: default_smtp_port(),
            username: None,
            password: None,
            from_addr: None,
            to_addrs: Vec::new(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse, resolve `${VAR}` placeholders, apply environment overrides and validate.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut raw: toml::Value = toml::from_str(content).context("Failed to parse config file")?;
    resolve_env(&mut raw);

    let mut config: Config = raw
        .try_into()
        .context("Config file does not match the expected schema")?;

    if let Some(v) = env_f64("OSINT_MIN_DELAY") {
        config.transport.min_delay_secs = v;
    }
    if let Some(v) = env_f64("OSINT_MAX_DELAY") {
        config.transport.max_delay_secs = v;
    }

    validate(&config)?;
    Ok(config)
}

fn resolve_env(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(var) = env_placeholder(s) {
                *s = std::env::var(var).unwrap_or_default();
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(resolve_env),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| resolve_env(v)),
        _ => {}
    }
}

/// Returns the variable name of a `${NAME}` placeholder (upper-case, digits, `_`).
fn env_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("${")?.strip_suffix('}')?;
    let valid = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    valid.then_some(inner)
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn validate(config: &Config) -> Result<()> {
    if config.matching.max_snippet_chars == 0 {
        bail!("matching.max_snippet_chars must be > 0");
    }

    let t = &config.transport;
    for (field, value) in [
        ("min_delay_secs", t.min_delay_secs),
        ("max_delay_secs", t.max_delay_secs),
        ("backoff_factor_secs", t.backoff_factor_secs),
    ] {
        if !value.is_finite() {
            bail!("transport.{} must be a finite number, got {}", field, value);
        }
    }
    if t.min_delay_secs < 0.0 || t.min_delay_secs > t.max_delay_secs {
        bail!(
            "transport delays must satisfy 0 <= min_delay_secs ({}) <= max_delay_secs ({})",
            t.min_delay_secs,
            t.max_delay_secs
        );
    }
    if t.backoff_factor_secs < 0.0 {
        bail!("transport.backoff_factor_secs must be >= 0");
    }

    if config.enrichment.enabled {
        url::Url::parse(&config.enrichment.rdap_url).with_context(|| {
            format!(
                "enrichment.rdap_url is not a valid URL: {}",
                config.enrichment.rdap_url
            )
        })?;
    }

    validate_entries("sources.rss", &config.sources.rss)?;
    validate_entries("sources.http", &config.sources.http)?;
    validate_entries(
        "sources.onion_allowlist.targets",
        &config.sources.onion_allowlist.targets,
    )?;
    if !config.sources.onion_allowlist.targets.is_empty() {
        url::Url::parse(&config.sources.onion_allowlist.tor_socks5).with_context(|| {
            format!(
                "sources.onion_allowlist.tor_socks5 is not a valid URL: {}",
                config.sources.onion_allowlist.tor_socks5
            )
        })?;
    }

    let webhook = &config.alerts.webhook;
    if webhook.enabled && webhook.url.as_deref().unwrap_or("").is_empty() {
        bail!("alerts.webhook.url must be set when the webhook is enabled");
    }

    let smtp = &config.alerts.smtp;
    if smtp.enabled {
        for (field, value) in [
            ("host", &smtp.host),
            ("username", &smtp.username),
            ("password", &smtp.password),
            ("from_addr", &smtp.from_addr),
        ] {
            if value.as_deref().unwrap_or("").is_empty() {
                bail!("alerts.smtp.{} must be set when SMTP is enabled", field);
            }
        }
        if smtp.to_addrs.is_empty() {
            bail!("alerts.smtp.to_addrs must list at least one recipient");
        }
    }

    Ok(())
}

fn validate_entries(section: &str, entries: &[SourceEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.name.trim().is_empty() {
            bail!("{}: every entry needs a non-empty name", section);
        }
        if !seen.insert(entry.name.as_str()) {
            bail!("{}: duplicate source name '{}'", section, entry.name);
        }
        url::Url::parse(&entry.url)
            .with_context(|| format!("{}.{}: invalid url '{}'", section, entry.name, entry.url))?;
        if entry.interval_seconds == Some(0) {
            bail!("{}.{}: interval_seconds must be > 0", section, entry.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[app]
db_path = "data/evidence.sqlite"
log_level = "debug"

[matching]
keywords = ["ransomware", "exploit"]
regex = ["CVE-\\d{4}-\\d+"]
max_snippet_chars = 200

[[sources.rss]]
name = "advisories"
url = "https://example.com/feed.xml"
interval_seconds = 900

[[sources.http]]
name = "status"
url = "https://example.com/status"

[sources.onion_allowlist]
renew_circuit = true

[[sources.onion_allowlist.targets]]
name = "leaksite"
url = "http://exampleonionaddress.onion/"

[alerts.webhook]
enabled = true
url = "https://hooks.example.com/x"
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = parse_config(FULL).unwrap();
        assert_eq!(cfg.app.db_path, PathBuf::from("data/evidence.sqlite"));
        assert_eq!(cfg.matching.keywords, vec!["ransomware", "exploit"]);
        assert_eq!(cfg.matching.max_snippet_chars, 200);
        assert_eq!(cfg.sources.rss[0].interval_seconds, Some(900));
        assert_eq!(cfg.sources.http[0].interval_seconds, None);
        assert!(cfg.sources.onion_allowlist.renew_circuit);
        assert_eq!(
            cfg.sources.onion_allowlist.tor_socks5,
            "socks5h://127.0.0.1:9050"
        );
        assert_eq!(cfg.sources.onion_allowlist.targets.len(), 1);
        assert!(cfg.alerts.webhook.enabled);
        assert!(!cfg.alerts.smtp.enabled);
        assert_eq!(cfg.alerts.smtp.port, 587);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.app.db_path, PathBuf::from("evidence.sqlite"));
        assert_eq!(cfg.matching.max_snippet_chars, 280);
        assert_eq!(cfg.transport.total_retries, 3);
        assert!(cfg.enrichment.enabled);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_env_placeholder_resolution() {
        std::env::set_var("OSINTWATCH_TEST_SMTP_PASSWORD", "hunter22");
        let cfg = parse_config(
            r#"
[alerts.smtp]
enabled = true
host = "smtp.example.com"
username = "bot"
password = "${OSINTWATCH_TEST_SMTP_PASSWORD}"
from_addr = "bot@example.com"
to_addrs = ["soc@example.com"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.alerts.smtp.password.as_deref(), Some("hunter22"));
    }

    #[test]
    fn test_placeholder_syntax() {
        assert_eq!(env_placeholder("${FOO_1}"), Some("FOO_1"));
        assert_eq!(env_placeholder("  ${FOO}  "), Some("FOO"));
        assert_eq!(env_placeholder("${foo}"), None);
        assert_eq!(env_placeholder("prefix ${FOO}"), None);
        assert_eq!(env_placeholder("${}"), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = parse_config(
            r#"
[[sources.rss]]
name = "a"
url = "https://example.com/1"

[[sources.rss]]
name = "a"
url = "https://example.com/2"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = parse_config(
            r#"
[[sources.http]]
name = "a"
url = "https://example.com/"
interval_seconds = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));
    }

    #[test]
    fn test_enabled_webhook_requires_url() {
        let err = parse_config("[alerts.webhook]\nenabled = true\n").unwrap_err();
        assert!(err.to_string().contains("alerts.webhook.url"));
    }

    #[test]
    fn test_inverted_delays_rejected() {
        let err = parse_config("[transport]\nmin_delay_secs = 5.0\nmax_delay_secs = 1.0\n")
            .unwrap_err();
        assert!(err.to_string().contains("min_delay_secs"));
    }

    #[test]
    fn test_non_finite_transport_values_rejected() {
        let err = parse_config(
            "[transport]\nmin_delay_secs = inf\nmax_delay_secs = inf\n\n\
             [[sources.http]]\nname = \"p\"\nurl = \"https://example.com/\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("min_delay_secs"));

        let err = parse_config("[transport]\nbackoff_factor_secs = inf\n").unwrap_err();
        assert!(err.to_string().contains("backoff_factor_secs"));

        let err = parse_config("[transport]\nmax_delay_secs = nan\n").unwrap_err();
        assert!(err.to_string().contains("max_delay_secs"));
    }
}
