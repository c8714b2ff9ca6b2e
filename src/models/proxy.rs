use serde::{Deserialize, Serialize};

use crate::error::{Result, RotaError};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks5)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            ProxyProtocol::Http => Some(80),
            ProxyProtocol::Https => Some(443),
            ProxyProtocol::Socks5 => Some(1080),
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single upstream proxy
///
/// `address` is always `host:port`. Credentials are kept in plain form and only
/// percent-encoded when the proxy URL is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub address: String,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    #[serde(skip_serializing, default)]
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Parse `[scheme://][user:pass@]host:port`
    ///
    /// The scheme defaults to `http`. A port is required unless the scheme has a
    /// well-known one.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RotaError::InvalidProxyAddress("empty proxy address".into()));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        let url = url::Url::parse(&with_scheme).map_err(|e| {
            RotaError::InvalidProxyAddress(format!("Invalid address '{}': {}", raw, e))
        })?;

        let protocol = ProxyProtocol::from_str(url.scheme()).ok_or_else(|| {
            RotaError::InvalidProxyAddress(format!(
                "Invalid address '{}': unsupported scheme {}",
                raw,
                url.scheme()
            ))
        })?;

        if !(url.path().is_empty() || url.path() == "/") || url.query().is_some() {
            return Err(RotaError::InvalidProxyAddress(format!(
                "Invalid address '{}': must not include a path or query",
                raw
            )));
        }

        let host = url.host_str().ok_or_else(|| {
            RotaError::InvalidProxyAddress(format!("Invalid address '{}': missing host", raw))
        })?;

        let port = url
            .port()
            .or_else(|| protocol.default_port())
            .ok_or_else(|| {
                RotaError::InvalidProxyAddress(format!("Invalid address '{}': missing port", raw))
            })?;

        let username = decode_component(url.username())?;
        let password = url.password().map(decode_component).transpose()?.flatten();

        Ok(Self {
            address: format!("{}:{}", host, port),
            protocol,
            username,
            password,
        })
    }

    /// Whether both username and password are present and non-empty
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.password),
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty()
        )
    }

    /// Render the proxy for a client option, or just `host:port` when `address_only`
    pub fn url(&self, address_only: bool) -> String {
        if address_only {
            return self.address.clone();
        }

        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if self.has_credentials() => format!(
                "{}://{}:{}@{}",
                self.protocol,
                urlencoding::encode(user),
                urlencoding::encode(pass),
                self.address
            ),
            _ => format!("{}://{}", self.protocol, self.address),
        }
    }

    /// Split `address` into host and port
    pub fn host_port(&self) -> Result<(String, u16)> {
        let (host, port) = self.address.rsplit_once(':').ok_or_else(|| {
            RotaError::InvalidProxyAddress(format!("Invalid address '{}': missing port", self.address))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            RotaError::InvalidProxyAddress(format!("Invalid address '{}': bad port", self.address))
        })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        Ok((host.to_string(), port))
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

fn decode_component(raw: &str) -> Result<Option<String>> {
    if raw.is_empty() {
        return Ok(None);
    }
    urlencoding::decode(raw)
        .map(|s| Some(s.into_owned()))
        .map_err(|e| RotaError::InvalidProxyAddress(format!("Invalid credentials: {}", e)))
}
