//! Endpoint values — opaque candidate broker addresses.
//!
//! An `Endpoint` is a value type, freely copied. Parsing is
//! delegated to the `url` crate rather than the ad hoc
//! `admin_url.split("//")` seen in `conductor/admin_client.rs` — that
//! approach is exactly the kind of fragile scheme extraction this type
//! exists to avoid.

use crate::error::FailoverError;
use std::fmt;
use url::Url;

/// An addressable broker location, e.g. `tcp://broker-a:61616?wireFormat=openwire`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    uri: String,
    scheme: String,
}

impl Endpoint {
    /// Parse a URI string into an `Endpoint`, deriving its scheme.
    pub fn parse(uri: impl Into<String>) -> Result<Self, FailoverError> {
        let uri = uri.into();
        let parsed = Url::parse(&uri)
            .map_err(|e| FailoverError::InvalidEndpoint(format!("{uri}: {e}")))?;
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            uri,
        })
    }

    /// The scheme used to look up a `TransportFactory`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The endpoint's raw URI string.
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme() {
        let e = Endpoint::parse("tcp://broker-a:61616").unwrap();
        assert_eq!(e.scheme(), "tcp");
        assert_eq!(e.as_str(), "tcp://broker-a:61616");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Endpoint::parse("not a uri").is_err());
    }

    #[test]
    fn equality_is_by_value() {
        let a = Endpoint::parse("tcp://a:61616").unwrap();
        let b = Endpoint::parse("tcp://a:61616").unwrap();
        assert_eq!(a, b);
    }
}
