//! `scheme://<node id>/<path>` locators for shared data.
//!
//! A locator with a node id names the item one node wrote under a path.
//! Leaving the authority empty (`wear:///battery`) addresses the path on
//! every node at once.
//!
//! Paths are stored percent-encoded inside the URL, but [`Locator::path`]
//! always hands back the raw path the record was written under.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::config::DEFAULT_URI_SCHEME;
use crate::error::{Result, ShareError};

/// Bytes escaped in a path segment. `%` is included so a literal percent
/// sign survives decoding.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    url: Url,
    path: String,
}

impl Locator {
    /// Build a locator. `node_id = None` addresses all nodes.
    ///
    /// Fails with [`ShareError::InvalidLocator`] when the path would not
    /// come back unchanged, e.g. `.` or `..` segments.
    pub fn new(scheme: &str, node_id: Option<&str>, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(ShareError::EmptyPath);
        }
        let authority = node_id.unwrap_or_default();
        let slash = if path.starts_with('/') { "" } else { "/" };
        let encoded = utf8_percent_encode(path, PATH_ESCAPE);
        let locator: Self = format!("{scheme}://{authority}{slash}{encoded}").parse()?;

        let expected = format!("{slash}{path}");
        if locator.path != expected {
            return Err(ShareError::InvalidLocator(format!(
                "path {path:?} is not stable (reads back as {:?})",
                locator.path
            )));
        }
        Ok(locator)
    }

    /// Locator for the item `node_id` holds under `path`.
    pub fn for_node(node_id: &str, path: &str) -> Result<Self> {
        Self::new(DEFAULT_URI_SCHEME, Some(node_id), path)
    }

    /// Locator for `path` on every node.
    pub fn for_all_nodes(path: &str) -> Result<Self> {
        Self::new(DEFAULT_URI_SCHEME, None, path)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The node the locator is scoped to, `None` when it addresses all nodes.
    pub fn node_id(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    /// Decoded path, exactly as records are stored under it.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_global(&self) -> bool {
        self.node_id().is_none()
    }

    /// The same path scoped to another node.
    pub fn with_node(&self, node_id: &str) -> Result<Self> {
        Self::new(self.scheme(), Some(node_id), self.path())
    }

    /// The same path addressed to every node.
    pub fn to_global(&self) -> Result<Self> {
        Self::new(self.scheme(), None, self.path())
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for Locator {
    type Err = ShareError;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| ShareError::InvalidLocator(format!("{s}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ShareError::InvalidLocator(format!("{s}: no authority")));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(ShareError::InvalidLocator(format!(
                "{s}: query or fragment in locator"
            )));
        }
        let path = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|e| ShareError::InvalidLocator(format!("{s}: {e}")))?
            .into_owned();
        Ok(Self { url, path })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_scoped_locator() {
        let loc = Locator::for_node("a1b2c3", "/battery/status").unwrap();
        assert_eq!(loc.as_str(), "wear://a1b2c3/battery/status");
        assert_eq!(loc.node_id(), Some("a1b2c3"));
        assert_eq!(loc.path(), "/battery/status");
        assert!(!loc.is_global());
    }

    #[test]
    fn test_global_locator_omits_node() {
        let loc = Locator::for_all_nodes("battery").unwrap();
        assert_eq!(loc.to_string(), "wear:///battery");
        assert_eq!(loc.node_id(), None);
        assert_eq!(loc.path(), "/battery");
        assert!(loc.is_global());
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(Locator::for_all_nodes(""), Err(ShareError::EmptyPath)));
    }

    #[test]
    fn test_parse_and_rescope() {
        let loc: Locator = "wear://watch-1/settings/theme".parse().unwrap();
        assert_eq!(loc.node_id(), Some("watch-1"));

        let phone = loc.with_node("phone-9").unwrap();
        assert_eq!(phone.as_str(), "wear://phone-9/settings/theme");

        let global = loc.to_global().unwrap();
        assert!(global.is_global());
        assert_eq!(global.path(), "/settings/theme");
    }

    #[test]
    fn test_custom_scheme() {
        let loc = Locator::new("peer", Some("n1"), "x").unwrap();
        assert_eq!(loc.scheme(), "peer");
        assert_eq!(loc.as_str(), "peer://n1/x");
    }

    #[test]
    fn test_invalid_locator() {
        assert!(matches!(
            "not a locator".parse::<Locator>(),
            Err(ShareError::InvalidLocator(_))
        ));
        assert!(matches!(
            "mailto:someone".parse::<Locator>(),
            Err(ShareError::InvalidLocator(_))
        ));
    }

    #[test]
    fn test_path_with_space_and_unicode_reads_back_raw() {
        let loc = Locator::for_node("n1", "/my notes/café").unwrap();
        assert_eq!(loc.path(), "/my notes/café");
        assert_eq!(loc.as_str(), "wear://n1/my%20notes/caf%C3%A9");

        let parsed: Locator = loc.as_str().parse().unwrap();
        assert_eq!(parsed.path(), "/my notes/café");
        assert_eq!(loc.to_global().unwrap().path(), "/my notes/café");
    }

    #[test]
    fn test_reserved_characters_are_escaped() {
        let loc = Locator::for_all_nodes("/q?a=1#frag/100%").unwrap();
        assert_eq!(loc.path(), "/q?a=1#frag/100%");
        assert_eq!(loc.as_str(), "wear:///q%3Fa=1%23frag/100%25");
    }

    #[test]
    fn test_dot_segments_rejected() {
        assert!(matches!(
            Locator::for_all_nodes("/a/../b"),
            Err(ShareError::InvalidLocator(_))
        ));
        assert!(matches!(
            "wear://n1/a?x=1".parse::<Locator>(),
            Err(ShareError::InvalidLocator(_))
        ));
    }
}
