//! Cluster endpoint naming.
//!
//! Ingestion traffic goes to a sibling host of the query endpoint, named by
//! prefixing the first host label with `ingest-`. [`ingestion_endpoint`] and
//! [`query_endpoint`] convert between the two forms and are idempotent, so
//! callers can normalize a URL without checking which form they hold.

use once_cell::sync::Lazy;
use std::collections::HashSet;

const INGEST_PREFIX: &str = "ingest-";

/// Hosts that never get an `ingest-` sibling.
static PASSTHROUGH_HOSTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut hosts = HashSet::new();
    hosts.insert("localhost");
    hosts.insert("127.0.0.1");
    hosts.insert("::1");
    hosts
});

/// Returns the ingestion form of a cluster URL.
///
/// `https://cluster.region.example.net` becomes
/// `https://ingest-cluster.region.example.net`. URLs already in ingestion
/// form, unparseable URLs, localhost, and IP hosts pass through unchanged.
pub fn ingestion_endpoint(cluster_url: &str) -> String {
    map_host(cluster_url, |host| {
        if host.starts_with(INGEST_PREFIX) {
            None
        } else {
            Some(format!("{INGEST_PREFIX}{host}"))
        }
    })
}

/// Returns the query form of a cluster URL, stripping an `ingest-` prefix
/// from the first host label if present.
pub fn query_endpoint(cluster_url: &str) -> String {
    map_host(cluster_url, |host| {
        host.strip_prefix(INGEST_PREFIX).map(str::to_string)
    })
}

fn map_host(cluster_url: &str, transform: impl Fn(&str) -> Option<String>) -> String {
    let mut url = match url::Url::parse(cluster_url) {
        Ok(url) => url,
        Err(_) => return cluster_url.to_string(),
    };
    let host = match url.host_str() {
        Some(host) => host.to_string(),
        None => return cluster_url.to_string(),
    };
    if PASSTHROUGH_HOSTS.contains(host.as_str()) || host.parse::<std::net::IpAddr>().is_ok() {
        return cluster_url.to_string();
    }
    match transform(&host) {
        Some(new_host) if url.set_host(Some(&new_host)).is_ok() => {
            url.to_string().trim_end_matches('/').to_string()
        }
        _ => cluster_url.to_string(),
    }
}
