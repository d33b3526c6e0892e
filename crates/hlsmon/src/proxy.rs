use std::str::FromStr;

use reqwest::Proxy;

use crate::error::HlsError;

/// Proxy configuration types
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// HTTP proxy
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// Proxy authentication type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    /// Type of proxy (HTTP, HTTPS, SOCKS5)
    pub proxy_type: ProxyType,
    /// Authentication for the proxy (optional)
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy_type: ProxyType::Http,
            auth: None,
        }
    }
}

/// Parses `[scheme://][user:pass@]host:port`; the scheme selects the proxy type
/// and defaults to HTTP.
impl FromStr for ProxyConfig {
    type Err = HlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HlsError::proxy_configuration("empty proxy address"));
        }

        let (proxy_type, scheme, rest) = if let Some(rest) = s.strip_prefix("socks5h://") {
            (ProxyType::Socks5, "socks5h", rest)
        } else if let Some(rest) = s.strip_prefix("socks5://") {
            (ProxyType::Socks5, "socks5", rest)
        } else if let Some(rest) = s.strip_prefix("https://") {
            (ProxyType::Https, "https", rest)
        } else if let Some(rest) = s.strip_prefix("http://") {
            (ProxyType::Http, "http", rest)
        } else if s.contains("://") {
            return Err(HlsError::proxy_configuration(format!(
                "unsupported proxy scheme in `{s}`"
            )));
        } else {
            (ProxyType::Http, "http", s)
        };

        let (auth, host) = match rest.rsplit_once('@') {
            Some((credentials, host)) => {
                let (username, password) = credentials.split_once(':').unwrap_or((credentials, ""));
                (
                    Some(ProxyAuth {
                        username: username.to_string(),
                        password: password.to_string(),
                    }),
                    host,
                )
            }
            None => (None, rest),
        };

        if host.is_empty() {
            return Err(HlsError::proxy_configuration(format!(
                "missing proxy host in `{s}`"
            )));
        }

        Ok(Self {
            url: format!("{scheme}://{host}"),
            proxy_type,
            auth,
        })
    }
}

/// Build a reqwest Proxy object from our proxy configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, HlsError> {
    let proxy_url = &config.url;

    let mut proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(proxy_url)
            .map_err(|e| HlsError::proxy_configuration(format!("invalid HTTP proxy URL: {e}")))?,
        ProxyType::Https => Proxy::https(proxy_url)
            .map_err(|e| HlsError::proxy_configuration(format!("invalid HTTPS proxy URL: {e}")))?,
        ProxyType::Socks5 => {
            let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://") {
                proxy_url.to_string()
            } else {
                format!("socks5://{proxy_url}")
            };

            Proxy::all(&url).map_err(|e| {
                HlsError::proxy_configuration(format!("invalid SOCKS5 proxy URL: {e}"))
            })?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}
