//! Endpoint Resolution
//!
//! Works out which WebSocket address the link connects to. An explicit
//! override wins, then the page-embedded `app-ws_url` meta value, then an
//! address derived from the configured host, port and path.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::config::EndpointConfig;
use crate::link::{LinkError, LinkResult};

/// Query parameter carrying the session credential
pub const TOKEN_PARAM: &str = "token";

/// Deployment environment, detected from the host name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn detect(host: &str) -> Self {
        let host = host.trim().to_ascii_lowercase();
        if host == "localhost" || host == "127.0.0.1" {
            Environment::Development
        } else if host.contains("staging") || host.contains("test") {
            Environment::Staging
        } else {
            Environment::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page meta value, coerced the way the page script reads it
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetaValue {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => MetaValue::Bool(true),
            "false" => MetaValue::Bool(false),
            _ => match raw.trim().parse::<f64>() {
                Ok(n) if !raw.trim().is_empty() => MetaValue::Number(n),
                _ => MetaValue::Text(raw.to_string()),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Page-embedded configuration, keyed like `app-ws_url`
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    entries: HashMap<String, String>,
}

impl PageMeta {
    pub fn new(entries: HashMap<String, String>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { entries }
    }

    /// Look up a setting by its config key, e.g. `WS_URL`
    pub fn get(&self, key: &str) -> Option<MetaValue> {
        self.entries
            .get(&format!("app-{}", key.to_ascii_lowercase()))
            .map(|raw| MetaValue::parse(raw))
    }
}

/// Where a resolved address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    Override,
    PageMeta,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: String,
    pub source: EndpointSource,
}

impl ResolvedEndpoint {
    /// The address with the credential attached as a query parameter
    pub fn with_credential(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => with_credential(&self.url, token),
            None => self.url.clone(),
        }
    }
}

/// Resolves the notification endpoint
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    override_url: Option<String>,
    meta: PageMeta,
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

impl EndpointResolver {
    pub fn from_config(config: &EndpointConfig) -> Self {
        Self {
            override_url: config.url.clone(),
            meta: PageMeta::new(config.meta.clone()),
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            secure: config.secure,
        }
    }

    pub fn with_override(mut self, url: impl Into<String>) -> Self {
        self.override_url = Some(url.into());
        self
    }

    pub fn environment(&self) -> Environment {
        Environment::detect(&self.host)
    }

    pub fn resolve(&self) -> LinkResult<ResolvedEndpoint> {
        let (url, source) = if let Some(url) = self.override_url.as_deref() {
            (url.trim().to_string(), EndpointSource::Override)
        } else if let Some(value) = self.meta.get("WS_URL") {
            let url = value.as_text().ok_or_else(|| {
                LinkError::InvalidAddress(format!("app-ws_url is not an address: {:?}", value))
            })?;
            (url.trim().to_string(), EndpointSource::PageMeta)
        } else {
            (self.derived_url(), EndpointSource::Environment)
        };

        validate(&url)?;
        tracing::debug!(%url, ?source, environment = %self.environment(), "Resolved notification endpoint");
        Ok(ResolvedEndpoint { url, source })
    }

    fn derived_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') || self.path.is_empty() {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", scheme, self.host.trim(), self.port, path)
    }
}

/// Accept only `ws://` and `wss://` addresses with a host
fn validate(url: &str) -> LinkResult<()> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| LinkError::InvalidAddress(format!("unsupported scheme in {:?}", url)))?;

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    let (host, port) = if host_port.starts_with('[') {
        match host_port.find(']') {
            Some(end) => (&host_port[..=end], host_port[end + 1..].strip_prefix(':')),
            None => {
                return Err(LinkError::InvalidAddress(format!("unterminated IPv6 host in {:?}", url)))
            }
        }
    } else {
        match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    if host.is_empty() {
        return Err(LinkError::InvalidAddress(format!("missing host in {:?}", url)));
    }
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(LinkError::InvalidAddress(format!("invalid port in {:?}", url)));
        }
    }
    Ok(())
}

/// Append `token=<credential>` to `url`
pub fn with_credential(url: &str, token: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut out = format!(
        "{}{}{}={}",
        base,
        separator,
        TOKEN_PARAM,
        urlencoding::encode(token)
    );
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> EndpointResolver {
        EndpointResolver::from_config(&EndpointConfig::default())
    }

    #[test]
    fn test_environment_detection() {
        assert_eq!(Environment::detect("localhost"), Environment::Development);
        assert_eq!(Environment::detect("127.0.0.1"), Environment::Development);
        assert_eq!(Environment::detect("staging-api.example.com"), Environment::Staging);
        assert_eq!(Environment::detect("test.example.com"), Environment::Staging);
        assert_eq!(Environment::detect("api.example.com"), Environment::Production);
    }

    #[test]
    fn test_default_address() {
        let endpoint = resolver().resolve().unwrap();
        assert_eq!(endpoint.url, "ws://localhost:8081/ws/notifications");
        assert_eq!(endpoint.source, EndpointSource::Environment);
    }

    #[test]
    fn test_secure_address() {
        let config = EndpointConfig {
            host: "api.example.com".to_string(),
            port: 443,
            path: "ws/notifications".to_string(),
            secure: true,
            ..EndpointConfig::default()
        };
        let endpoint = EndpointResolver::from_config(&config).resolve().unwrap();
        assert_eq!(endpoint.url, "wss://api.example.com:443/ws/notifications");
    }

    #[test]
    fn test_resolution_order() {
        let mut config = EndpointConfig::default();
        config
            .meta
            .insert("APP-WS_URL".to_string(), "wss://meta.example.com/ws".to_string());

        let endpoint = EndpointResolver::from_config(&config).resolve().unwrap();
        assert_eq!(endpoint.url, "wss://meta.example.com/ws");
        assert_eq!(endpoint.source, EndpointSource::PageMeta);

        let endpoint = EndpointResolver::from_config(&config)
            .with_override("ws://override:9000/ws")
            .resolve()
            .unwrap();
        assert_eq!(endpoint.url, "ws://override:9000/ws");
        assert_eq!(endpoint.source, EndpointSource::Override);
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["http://x/ws", "ws://", "ws:///path", "wss://host:notaport/ws", ""] {
            let err = resolver().with_override(bad).resolve().unwrap_err();
            assert!(matches!(err, LinkError::InvalidAddress(_)), "{}", bad);
        }

        let mut config = EndpointConfig::default();
        config.meta.insert("app-ws_url".to_string(), "8081".to_string());
        let err = EndpointResolver::from_config(&config).resolve().unwrap_err();
        assert!(matches!(err, LinkError::InvalidAddress(_)));
    }

    #[test]
    fn test_meta_value_coercion() {
        assert_eq!(MetaValue::parse("true"), MetaValue::Bool(true));
        assert_eq!(MetaValue::parse("5"), MetaValue::Number(5.0));
        assert_eq!(MetaValue::parse(""), MetaValue::Text(String::new()));
        assert_eq!(
            MetaValue::parse("wss://x/ws").as_text(),
            Some("wss://x/ws")
        );
    }

    #[test]
    fn test_credential_is_encoded() {
        assert_eq!(
            with_credential("ws://h:1/ws", "a b+c"),
            "ws://h:1/ws?token=a%20b%2Bc"
        );
        assert_eq!(
            with_credential("ws://h:1/ws?v=2#top", "t"),
            "ws://h:1/ws?v=2&token=t#top"
        );

        let endpoint = resolver().resolve().unwrap();
        assert_eq!(endpoint.with_credential(None), endpoint.url);
    }
}
