//! Document locations and relative-link resolution.
//!
//! A [`Location`] is an opaque absolute reference to a document: either a
//! local filesystem path or a remote URL, represented uniformly. Resolution of
//! a link string against a base location is purely lexical; no filesystem or
//! network access happens here.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::{PackError, PackResult};

/// An absolute reference to a document, local or remote.
///
/// Two locations are equal iff their canonical string forms match; local
/// paths are normalized lexically when the location is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A path on the local filesystem.
    Local(PathBuf),
    /// A URL served over the network.
    Remote(Url),
}

impl Location {
    /// Interpret a user-supplied string as a location.
    ///
    /// Anything that parses as an absolute URL is remote (with `file://`
    /// mapped back to a local path); everything else is a local path.
    pub fn parse(s: &str) -> Location {
        match Url::parse(s) {
            Ok(url) if url.scheme() == "file" => {
                Location::Local(normalize_path(Path::new(url.path())))
            }
            Ok(url) => Location::Remote(url),
            Err(_) => Location::Local(normalize_path(Path::new(s))),
        }
    }

    /// Resolve a link string found in this document to the location of the
    /// linked document.
    ///
    /// - an empty link is this location itself;
    /// - a link with a scheme is absolute and taken as-is;
    /// - a schemeless link against a local base joins `dirname(base)` with
    ///   the link and collapses `.`/`..` segments lexically;
    /// - a schemeless link against a remote base uses RFC 3986 relative
    ///   reference joining.
    pub fn resolve(&self, link: &str) -> PackResult<Location> {
        if link.is_empty() {
            return Ok(self.clone());
        }

        match Url::parse(link) {
            Ok(url) if url.scheme() == "file" => {
                return Ok(Location::Local(normalize_path(Path::new(url.path()))));
            }
            Ok(url) => return Ok(Location::Remote(url)),
            Err(_) => {}
        }

        match self {
            Location::Local(base) => {
                let link_path = Path::new(link);
                let joined = if link_path.is_absolute() {
                    link_path.to_path_buf()
                } else {
                    base.parent().unwrap_or_else(|| Path::new("")).join(link_path)
                };
                Ok(Location::Local(normalize_path(&joined)))
            }
            Location::Remote(base) => base
                .join(link)
                .map(Location::Remote)
                .map_err(|_| PackError::InvalidLink {
                    base: self.to_string(),
                    link: link.to_string(),
                }),
        }
    }

    /// Whether this location names a remote document.
    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }

    /// The final path segment, used when synthesizing process ids.
    pub fn basename(&self) -> String {
        match self {
            Location::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Location::Remote(url) => url
                .path_segments()
                .and_then(|segments| segments.last())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Collapse `.` and `..` segments without touching the filesystem.
///
/// `..` pops a preceding normal segment, stays put at the root, and is kept
/// verbatim at the head of a relative path.
fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(s: &str) -> Location {
        Location::Local(PathBuf::from(s))
    }

    #[test]
    fn test_parse_local_and_remote() {
        assert_eq!(Location::parse("/a/b/c.cwl"), local("/a/b/c.cwl"));
        assert_eq!(Location::parse("b/./c.cwl"), local("b/c.cwl"));
        assert!(Location::parse("https://example.com/x.cwl").is_remote());
        assert_eq!(Location::parse("file:///a/b.cwl"), local("/a/b.cwl"));
    }

    #[test]
    fn test_empty_link_is_identity() {
        let base = Location::parse("/a/b/c.cwl");
        assert_eq!(base.resolve("").unwrap(), base);

        let base = Location::parse("https://x/y/z.cwl");
        assert_eq!(base.resolve("").unwrap(), base);
    }

    #[test]
    fn test_local_relative_resolution() {
        let base = Location::parse("/a/b/c.cwl");
        assert_eq!(base.resolve("d.cwl").unwrap(), local("/a/b/d.cwl"));
        assert_eq!(base.resolve("../d.cwl").unwrap(), local("/a/d.cwl"));
        assert_eq!(base.resolve("../../d.cwl").unwrap(), local("/d.cwl"));
        assert_eq!(base.resolve("./e/f.cwl").unwrap(), local("/a/b/e/f.cwl"));
    }

    #[test]
    fn test_local_parent_does_not_climb_past_root() {
        let base = Location::parse("/a/b/c.cwl");
        assert_eq!(base.resolve("../../../../d.cwl").unwrap(), local("/d.cwl"));
    }

    #[test]
    fn test_absolute_local_link() {
        let base = Location::parse("/a/b/c.cwl");
        assert_eq!(base.resolve("/x/y.cwl").unwrap(), local("/x/y.cwl"));
    }

    #[test]
    fn test_remote_relative_resolution() {
        let base = Location::parse("https://x/y/z.cwl");
        assert_eq!(
            base.resolve("w.cwl").unwrap().to_string(),
            "https://x/y/w.cwl"
        );
        assert_eq!(
            base.resolve("../w.cwl").unwrap().to_string(),
            "https://x/w.cwl"
        );

        let base = Location::parse("https://example.com/a/b/wf.cwl");
        assert_eq!(
            base.resolve("../../tools/t.cwl").unwrap().to_string(),
            "https://example.com/tools/t.cwl"
        );
    }

    #[test]
    fn test_absolute_link_ignores_base() {
        let base = Location::parse("/a/b/c.cwl");
        assert_eq!(
            base.resolve("https://x/y.cwl").unwrap().to_string(),
            "https://x/y.cwl"
        );

        let base = Location::parse("https://x/y/z.cwl");
        assert_eq!(base.resolve("file:///p/q.cwl").unwrap(), local("/p/q.cwl"));
    }

    #[test]
    fn test_relative_base_resolution() {
        let base = Location::parse("tests/wf.cwl");
        assert_eq!(base.resolve("tool.cwl").unwrap(), local("tests/tool.cwl"));
        assert_eq!(base.resolve("../tool.cwl").unwrap(), local("tool.cwl"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(Location::parse("/a/b/c.cwl").basename(), "c.cwl");
        assert_eq!(Location::parse("https://x/y/z.cwl").basename(), "z.cwl");
    }
}
