//! Remote endpoint descriptor and URI resolution

use crate::TransportError;
use std::fmt;
use std::str::FromStr;

/// Default port for plain endpoints
pub const DEFAULT_PORT: u16 = 80;

/// Default port for secure endpoints
pub const DEFAULT_SECURE_PORT: u16 = 443;

/// User credentials embedded in the endpoint URI
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password, empty when the URI carried none
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A validated connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Lowercased scheme, `ws` or `wss`
    pub scheme: String,
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    /// Port, defaulted from the scheme when absent
    pub port: u16,
    /// Path plus query string, at least `/`
    pub resource_path: String,
    /// Whether the transport must be secured before the handshake
    pub secure: bool,
    /// Credentials from the userinfo part of the URI
    pub credentials: Option<Credentials>,
}

impl RemoteEndpoint {
    /// Resolve a URI such as `ws://user:pass@example.com:8080/chat?room=1`.
    ///
    /// The fragment, if any, is dropped.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid(format!("missing scheme in {:?}", uri)))?;

        let scheme = scheme.to_ascii_lowercase();
        let secure = match scheme.as_str() {
            "ws" => false,
            "wss" => true,
            other => return Err(invalid(format!("unrecognized scheme {:?}", other))),
        };

        let rest = match rest.split_once('#') {
            Some((before, _fragment)) => before,
            None => rest,
        };

        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let resource_path = if tail.is_empty() {
            "/".to_string()
        } else if tail.starts_with('?') {
            format!("/{}", tail)
        } else {
            tail.to_string()
        };

        let (credentials, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => {
                let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                let credentials = Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                };
                (Some(credentials), host_port)
            }
            None => (None, authority),
        };

        let (host, port) = split_host_port(host_port)?;
        if host.is_empty() {
            return Err(invalid(format!("empty host in {:?}", uri)));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port: port.unwrap_or(if secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT }),
            resource_path,
            secure,
            credentials,
        })
    }

    /// Default port for this endpoint's scheme
    pub fn default_port(&self) -> u16 {
        if self.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_PORT
        }
    }

    /// Value for the `Host` request header; the port is omitted when it is the default
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl FromStr for RemoteEndpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host_header(), self.resource_path)
    }
}

fn split_host_port(host_port: &str) -> Result<(&str, Option<u16>), TransportError> {
    if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        let port = match after {
            "" => None,
            _ => {
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| invalid(format!("unexpected {:?} after IPv6 literal", after)))?;
                parse_port(port)?
            }
        };
        return Ok((host, port));
    }

    match host_port.split_once(':') {
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((host_port, None)),
    }
}

fn parse_port(port: &str) -> Result<Option<u16>, TransportError> {
    if port.is_empty() {
        return Ok(None);
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid(format!("invalid port {:?}", port))),
        Ok(port) => Ok(Some(port)),
    }
}

fn invalid(reason: impl Into<String>) -> TransportError {
    TransportError::InvalidEndpoint(reason.into())
}
