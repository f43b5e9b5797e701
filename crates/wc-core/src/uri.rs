use std::fmt;

/// Reasons a connection string is not a WalletConnect URI.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("expected a wc: URI, got {0:?}")]
    MissingScheme(String),
    #[error("URI has an empty topic")]
    EmptyTopic,
    #[error("invalid protocol version {0:?}")]
    InvalidVersion(String),
}

/// Parsed `wc:<topic>[@<version>][?bridge=<url>&key=<hex>]` connection string.
///
/// Only the scheme and topic are required; pairing URIs copied from a dapp
/// always carry the rest, but resume URIs stored by older wallets may not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConnectUri {
    raw: String,
    pub topic: String,
    pub version: Option<u32>,
    pub bridge: Option<String>,
    pub key: Option<String>,
}

impl WalletConnectUri {
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix("wc:")
            .ok_or_else(|| UriError::MissingScheme(trimmed.to_string()))?;

        let (path, query) = match body.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (body, None),
        };
        let (topic, version) = match path.split_once('@') {
            Some((topic, version)) => {
                let parsed = version
                    .parse::<u32>()
                    .map_err(|_| UriError::InvalidVersion(version.to_string()))?;
                (topic, Some(parsed))
            }
            None => (path, None),
        };
        if topic.is_empty() {
            return Err(UriError::EmptyTopic);
        }

        let mut bridge = None;
        let mut key = None;
        if let Some(query) = query {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match name.as_ref() {
                    "bridge" => bridge = Some(value.into_owned()),
                    "key" => key = Some(value.into_owned()),
                    _ => {}
                }
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            topic: topic.to_string(),
            version,
            bridge,
            key,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for WalletConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for WalletConnectUri {
    type Err = UriError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
