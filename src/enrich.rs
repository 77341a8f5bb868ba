//! Best-effort domain enrichment: DNS records and RDAP registration data.
//!
//! Nothing in this module returns an error to the pipeline. Lookup
//! failures become empty record lists or an `{"error": "whois_failed"}`
//! placeholder.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use crate::config::EnrichmentConfig;

const MAX_FIELD_CHARS: usize = 2000;

/// Adds domain-derived metadata to an item's `extra`.
///
/// Results depend only on the host of the origin, so callers may reuse
/// them for other origins on the same host.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Entries to merge into `extra` for the given origin.
    async fn enrich(&self, origin: &str) -> Map<String, Value>;
}

/// Enricher that adds nothing.
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _origin: &str) -> Map<String, Value> {
        Map::new()
    }
}

/// Resolver + RDAP enricher.
pub struct NetworkEnricher {
    timeout: Duration,
    rdap_url: String,
    client: reqwest::Client,
    resolver: TokioAsyncResolver,
}

impl NetworkEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("osintwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build RDAP client")?;

        let (resolver_config, mut opts) = hickory_resolver::system_conf::read_system_conf()
            .unwrap_or_else(|e| {
                debug!(error = %e, "no system resolver config; using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            });
        opts.timeout = timeout;
        opts.attempts = 1;

        Ok(Self {
            timeout,
            rdap_url: config.rdap_url.trim_end_matches('/').to_string(),
            client,
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
        })
    }

    async fn dns(&self, domain: &str) -> Value {
        let (a, aaaa, mx) = tokio::join!(
            self.bounded(self.resolver.ipv4_lookup(domain)),
            self.bounded(self.resolver.ipv6_lookup(domain)),
            self.bounded(self.resolver.mx_lookup(domain)),
        );

        let a: BTreeSet<String> = a
            .map(|l| l.iter().map(|r| r.to_string()).collect())
            .unwrap_or_default();
        let aaaa: BTreeSet<String> = aaaa
            .map(|l| l.iter().map(|r| r.to_string()).collect())
            .unwrap_or_default();
        let mx: BTreeSet<String> = mx
            .map(|l| {
                l.iter()
                    .map(|r| r.exchange().to_string().trim_end_matches('.').to_string())
                    .collect()
            })
            .unwrap_or_default();

        json!({ "domain": domain, "a": a, "aaaa": aaaa, "mx": mx })
    }

    async fn bounded<T, E, F>(&self, lookup: F) -> Option<T>
    where
        F: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(found)) => Some(found),
            Ok(Err(e)) => {
                debug!(error = %e, "dns lookup failed");
                None
            }
            Err(_) => {
                debug!("dns lookup timed out");
                None
            }
        }
    }

    async fn whois(&self, domain: &str) -> Value {
        match self.rdap(domain).await {
            Ok(fields) if !fields.is_empty() => Value::Object(fields),
            Ok(_) => json!({ "error": "whois_failed" }),
            Err(e) => {
                debug!(domain, error = %format!("{:#}", e), "rdap lookup failed");
                json!({ "error": "whois_failed" })
            }
        }
    }

    async fn rdap(&self, domain: &str) -> Result<Map<String, Value>> {
        let url = format!("{}/domain/{}", self.rdap_url, domain);
        let doc: RdapDomain = self
            .client
            .get(&url)
            .header("Accept", "application/rdap+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("unreadable RDAP response from {}", url))?;
        Ok(rdap_fields(&doc))
    }
}

#[async_trait]
impl Enricher for NetworkEnricher {
    async fn enrich(&self, origin: &str) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(domain) = extract_domain(origin) else {
            return out;
        };
        if domain.ends_with(".onion") {
            return out;
        }
        let (dns, whois) = tokio::join!(self.dns(&domain), self.whois(&domain));
        out.insert("dns".to_string(), dns);
        out.insert("whois".to_string(), whois);
        out
    }
}

/// Lower-cased host of a URL, if it has one.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
}

#[derive(Debug, Default, Deserialize)]
struct RdapDomain {
    #[serde(rename = "ldhName")]
    ldh_name: Option<String>,
    #[serde(default)]
    status: Vec<String>,
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
    #[serde(default)]
    nameservers: Vec<RdapNameserver>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    event_action: String,
    #[serde(rename = "eventDate")]
    event_date: String,
}

#[derive(Debug, Deserialize)]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(rename = "publicIds", default)]
    public_ids: Vec<RdapPublicId>,
    handle: Option<String>,
    #[serde(rename = "vcardArray")]
    vcard_array: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RdapPublicId {
    identifier: String,
}

#[derive(Debug, Deserialize)]
struct RdapNameserver {
    #[serde(rename = "ldhName")]
    ldh_name: Option<String>,
}

impl RdapEntity {
    /// The `fn` (formatted name) property of the entity's jCard.
    fn formatted_name(&self) -> Option<String> {
        self.vcard_array
            .as_ref()?
            .get(1)?
            .as_array()?
            .iter()
            .find(|prop| prop.get(0).and_then(Value::as_str) == Some("fn"))?
            .get(3)?
            .as_str()
            .map(str::to_string)
    }
}

/// Flatten an RDAP domain object into WHOIS-style string fields.
fn rdap_fields(doc: &RdapDomain) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            let truncated: String = v.chars().take(MAX_FIELD_CHARS).collect();
            fields.insert(key.to_string(), Value::String(truncated));
        }
    };

    let event = |action: &str| {
        doc.events
            .iter()
            .find(|e| e.event_action == action)
            .map(|e| e.event_date.clone())
    };
    let registered = event("registration");

    let registrar = doc
        .entities
        .iter()
        .find(|e| e.roles.iter().any(|r| r == "registrar"));

    put("domain_name", doc.ldh_name.as_ref().map(|n| n.to_ascii_lowercase()));
    put(
        "registrar",
        registrar.and_then(|e| e.formatted_name().or_else(|| e.handle.clone())),
    );
    put(
        "registrar_iana_id",
        registrar.and_then(|e| e.public_ids.first().map(|id| id.identifier.clone())),
    );
    put("creation_date", registered.clone());
    put("expiration_date", event("expiration"));
    put("updated_date", event("last changed"));
    put("status", Some(doc.status.join(", ")));
    put(
        "name_servers",
        Some(
            doc.nameservers
                .iter()
                .filter_map(|ns| ns.ldh_name.as_ref().map(|n| n.to_ascii_lowercase()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
    );
    put(
        "domain_age_days",
        registered
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(&d).ok())
            .map(|dt| (chrono::Utc::now() - dt.with_timezone(&chrono::Utc)).num_days().to_string()),
    );
    fields
}
