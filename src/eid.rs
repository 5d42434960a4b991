//! Endpoint identifiers and endpoint patterns
//!
//! An [`EndpointId`] names exactly one DTN endpoint. An [`EidPattern`]
//! matches a set of them: exact, trailing-wildcard, or the designated
//! null endpoint. The two are distinct types so a route table entry
//! can never be mistaken for a bundle field.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Scheme and SSP of the null endpoint, `dtn:none`.
pub const NULL_EID: &str = "dtn:none";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EidError {
    #[error("endpoint id has no scheme separator: {0}")]
    MissingScheme(String),
    #[error("endpoint id has empty scheme or ssp: {0}")]
    EmptyComponent(String),
    #[error("endpoint id contains embedded NUL")]
    EmbeddedNul,
}

/// A URI naming a single DTN endpoint, split at the first colon into
/// scheme and scheme-specific part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    scheme: String,
    ssp: String,
}

impl EndpointId {
    pub fn parse(uri: &str) -> Result<Self, EidError> {
        let (scheme, ssp) = uri
            .split_once(':')
            .ok_or_else(|| EidError::MissingScheme(uri.to_string()))?;
        if scheme.is_empty() || ssp.is_empty() {
            return Err(EidError::EmptyComponent(uri.to_string()));
        }
        if scheme.contains('\0') || ssp.contains('\0') {
            return Err(EidError::EmbeddedNul);
        }
        Ok(Self {
            scheme: scheme.to_string(),
            ssp: ssp.to_string(),
        })
    }

    /// Build from already-split components, as the primary block
    /// parser does after dictionary extraction.
    pub fn from_parts(scheme: &str, ssp: &str) -> Result<Self, EidError> {
        if scheme.is_empty() || ssp.is_empty() {
            return Err(EidError::EmptyComponent(format!("{}:{}", scheme, ssp)));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            ssp: ssp.to_string(),
        })
    }

    /// The null endpoint, `dtn:none`.
    pub fn null() -> Self {
        Self {
            scheme: "dtn".to_string(),
            ssp: "none".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.scheme == "dtn" && self.ssp == "none"
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn ssp(&self) -> &str {
        &self.ssp
    }

    pub fn uri(&self) -> String {
        format!("{}:{}", self.scheme, self.ssp)
    }

    /// Append a service tag to a node EID, e.g. `dtn://a.dtn` +
    /// `lsa` → `dtn://a.dtn/lsa`.
    pub fn with_service(&self, service: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            ssp: format!("{}/{}", self.ssp.trim_end_matches('/'), service),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.ssp)
    }
}

impl std::str::FromStr for EndpointId {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A pattern over endpoint ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EidPattern {
    /// Matches exactly one endpoint.
    Exact(EndpointId),
    /// URI prefix match: everything before the trailing `*`.
    Prefix(String),
    /// Matches only the null endpoint.
    Null,
}

impl EidPattern {
    pub fn parse(pattern: &str) -> Result<Self, EidError> {
        if pattern == NULL_EID {
            return Ok(EidPattern::Null);
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if !prefix.contains(':') {
                return Err(EidError::MissingScheme(pattern.to_string()));
            }
            return Ok(EidPattern::Prefix(prefix.to_string()));
        }
        Ok(EidPattern::Exact(EndpointId::parse(pattern)?))
    }

    pub fn matches(&self, eid: &EndpointId) -> bool {
        match self {
            EidPattern::Exact(e) => e == eid,
            EidPattern::Prefix(prefix) => eid.uri().starts_with(prefix.as_str()),
            EidPattern::Null => eid.is_null(),
        }
    }
}

impl fmt::Display for EidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EidPattern::Exact(e) => write!(f, "{}", e),
            EidPattern::Prefix(p) => write!(f, "{}*", p),
            EidPattern::Null => write!(f, "{}", NULL_EID),
        }
    }
}

impl std::str::FromStr for EidPattern {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_split() {
        let eid = EndpointId::parse("dtn://a.dtn/app").unwrap();
        assert_eq!(eid.scheme(), "dtn");
        assert_eq!(eid.ssp(), "//a.dtn/app");
        assert_eq!(eid.uri(), "dtn://a.dtn/app");
    }

    #[test]
    fn rejects_malformed() {
        assert!(EndpointId::parse("no-colon-here").is_err());
        assert!(EndpointId::parse(":empty-scheme").is_err());
        assert!(EndpointId::parse("dtn:").is_err());
    }

    #[test]
    fn null_endpoint() {
        let null = EndpointId::null();
        assert!(null.is_null());
        assert_eq!(null.uri(), NULL_EID);
        assert!(EidPattern::Null.matches(&null));
        assert!(!EidPattern::Null.matches(&EndpointId::parse("dtn://x/y").unwrap()));
    }

    #[test]
    fn wildcard_matching() {
        let pat = EidPattern::parse("dtn://a.dtn/*").unwrap();
        assert!(pat.matches(&EndpointId::parse("dtn://a.dtn/app").unwrap()));
        assert!(pat.matches(&EndpointId::parse("dtn://a.dtn/other").unwrap()));
        assert!(!pat.matches(&EndpointId::parse("dtn://b.dtn/app").unwrap()));

        let all = EidPattern::parse("dtn:*").unwrap();
        assert!(all.matches(&EndpointId::parse("dtn://anything").unwrap()));
    }

    #[test]
    fn exact_matching() {
        let pat = EidPattern::parse("dtn://a.dtn/app").unwrap();
        assert!(pat.matches(&EndpointId::parse("dtn://a.dtn/app").unwrap()));
        assert!(!pat.matches(&EndpointId::parse("dtn://a.dtn/app2").unwrap()));
    }

    #[test]
    fn service_tag() {
        let node = EndpointId::parse("dtn://relay.dtn").unwrap();
        assert_eq!(node.with_service("lsa").uri(), "dtn://relay.dtn/lsa");
    }
}
