use batchid::{Error, Result};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// How long a lazily connected channel waits for a TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A validated `host:port` pair naming an allocator or generator process.
///
/// IPv6 literals are written in brackets: `[::1]:50051`. An optional
/// `http://` prefix is accepted and dropped.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostAddr {
    host: String,
    port: u16,
}

impl HostAddr {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The URI a channel uses to reach this host.
    pub fn uri(&self) -> String {
        format!("http://{self}")
    }

    /// Builds a client endpoint for this host.
    ///
    /// `request_timeout` bounds every call made through the endpoint; `None`
    /// leaves calls unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the host does not form a valid URI.
    pub fn endpoint(&self, request_timeout: Option<Duration>) -> Result<Endpoint> {
        let endpoint = Endpoint::from_shared(self.uri())
            .map_err(|e| invalid_host(&self.to_string(), &e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_nodelay(true);
        Ok(match request_timeout {
            Some(timeout) => endpoint.timeout(timeout),
            None => endpoint,
        })
    }

    /// Parses a comma separated host list, skipping blank entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid entry.
    pub fn parse_list(hosts: &str) -> Result<Vec<Self>> {
        hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for HostAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let addr = raw.strip_prefix("http://").unwrap_or(raw);

        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid_host(raw, "expected `[ipv6]:port`"))?;
            (host, port)
        } else {
            addr.rsplit_once(':')
                .ok_or_else(|| invalid_host(raw, "expected `host:port`"))?
        };

        if host.is_empty() {
            return Err(invalid_host(raw, "missing host"));
        }
        if host.contains(['/', ' ']) || (!addr.starts_with('[') && host.contains(':')) {
            return Err(invalid_host(raw, "malformed host"));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid_host(raw, "port must be a number in 1..=65535"))?;

        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Opens a lazily connected channel balanced across `hosts`.
///
/// A single host gets a plain channel. `request_timeout` is applied to every
/// endpoint. Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if `hosts` is empty or an entry cannot be
/// turned into an endpoint.
pub fn balanced_channel(
    hosts: &[HostAddr],
    request_timeout: Option<Duration>,
) -> Result<Channel> {
    if hosts.is_empty() {
        return Err(Error::Configuration {
            reason: "no hosts to connect to".into(),
        });
    }
    let mut endpoints = hosts
        .iter()
        .map(|host| host.endpoint(request_timeout))
        .collect::<Result<Vec<_>>>()?;
    if let [endpoint] = endpoints.as_mut_slice() {
        return Ok(endpoint.connect_lazy());
    }
    Ok(Channel::balance_list(endpoints.into_iter()))
}

fn invalid_host(host: &str, reason: &str) -> Error {
    Error::Configuration {
        reason: format!("invalid host `{host}`: {reason}"),
    }
}
