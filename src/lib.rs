//! # osintwatch
//!
//! Unattended monitoring of explicitly configured sources (syndication
//! feeds, static pages, allowlisted onion services) with keyword, pattern
//! and indicator-of-compromise matching, a deduplicated hash-chained
//! evidence ledger, and alerting.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ JobRunner  │──▶│  Sources  │──▶│     Pipeline     │──▶│  Evidence    │
//! │ (interval) │   │ rss/http/ │   │ match, IOCs,     │   │  SQLite,     │
//! └────────────┘   │ onion     │   │ enrich, alert    │   │  hash chain  │
//!                  └─────┬─────┘   └────────┬─────────┘   └──────┬───────┘
//!                        ▼                  ▼                    ▼
//!                  ┌───────────┐      ┌───────────┐       ┌─────────────┐
//!                  │ Transport │      │  Alerts   │       │ Report/API  │
//!                  │ paced,    │      │ webhook,  │       │ CLI + HTTP  │
//!                  │ retrying  │      │ smtp      │       └─────────────┘
//!                  └───────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! osintwatch init            # create database
//! osintwatch sources         # list configured sources
//! osintwatch once            # run every source once
//! osintwatch daemon          # run on schedule until Ctrl-C
//! osintwatch recent          # newest evidence
//! osintwatch verify          # check the hash chain
//! osintwatch serve           # reporting API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Items, evidence rows, alert events |
//! | [`transport`] | Paced, retrying HTTP client |
//! | [`sources`] | `Source` trait and construction from config |
//! | [`source_feed`] | RSS/Atom/JSON Feed source |
//! | [`source_page`] | Single static page source |
//! | [`source_onion`] | Allowlisted onion page via SOCKS, Tor circuit renewal |
//! | [`extract`] | HTML to title + flattened text |
//! | [`matcher`] | Keyword/pattern matching, snippets, hashing, redaction |
//! | [`ioc`] | Indicator-of-compromise extraction |
//! | [`evidence`] | Deduplicating hash-chained store |
//! | [`enrich`] | DNS and WHOIS enrichment |
//! | [`alerts`] | Webhook and SMTP alert delivery |
//! | [`ingest`] | Per-source pipeline, `once` and `daemon` runs |
//! | [`scheduler`] | Interval job runner |
//! | [`report`] | Read-only ledger queries and CLI output |
//! | [`diff`] | Line diffs between content versions |
//! | [`server`] | Reporting HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | `tracing` subscriber setup |

pub mod alerts;
pub mod config;
pub mod db;
pub mod diff;
pub mod enrich;
pub mod evidence;
pub mod extract;
pub mod ingest;
pub mod ioc;
pub mod logging;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod source_feed;
pub mod source_onion;
pub mod source_page;
pub mod sources;
pub mod transport;
