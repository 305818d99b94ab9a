//! Retrieval of linked documents.
//!
//! Fetching sits behind the [`Fetcher`] trait so the packing pipeline can be
//! exercised against an in-memory document store in tests. The default
//! implementation reads local files and performs blocking HTTP GETs.
//!
//! Some hosting backends cannot represent directory symlinks and instead
//! store a text file whose whole content is the real relative path. Remote
//! fetches therefore run a symbolic-link heuristic: a single-line body
//! containing a `.` is followed as a link relative to the fetched location.

use std::collections::HashSet;
use std::fs;

use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde_yaml::Value;

use crate::error::{PackError, PackResult};
use crate::location::Location;

const CLIENT_IDENT: &str = concat!("cwlpack/", env!("CARGO_PKG_VERSION"));

/// Capability to retrieve the raw text of a resolved location.
pub trait Fetcher {
    fn fetch_text(&self, location: &Location) -> PackResult<String>;
}

/// Default fetcher: local file reads and blocking HTTP GETs.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_text(&self, location: &Location) -> PackResult<String> {
        match location {
            Location::Local(path) => {
                fs::read_to_string(path).map_err(|e| PackError::link_not_found(location, e))
            }
            Location::Remote(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .header(USER_AGENT, CLIENT_IDENT)
                    .send()
                    .map_err(|e| PackError::link_not_found(location, e))?;
                if !response.status().is_success() {
                    return Err(PackError::LinkNotFound {
                        location: location.to_string(),
                        cause: None,
                    });
                }
                response
                    .text()
                    .map_err(|e| PackError::link_not_found(location, e))
            }
        }
    }
}

/// Resolve `link` against `base`, fetch it, and parse the content as a
/// YAML/JSON document. Returns the parsed document together with the
/// location it was actually loaded from (after following any symbolic-link
/// chain).
pub fn load_linked_document(
    fetcher: &dyn Fetcher,
    base: &Location,
    link: &str,
) -> PackResult<(Value, Location)> {
    let (contents, location) = load_linked_text(fetcher, base, link)?;
    let node: Value = serde_yaml::from_str(&contents)
        .map_err(|e| PackError::malformed_document(&location, e))?;
    Ok((node, location))
}

/// Resolve `link` against `base` and fetch it as raw text (the `$include`
/// form). Follows symbolic-link chains the same way as document loading.
pub fn load_linked_text(
    fetcher: &dyn Fetcher,
    base: &Location,
    link: &str,
) -> PackResult<(String, Location)> {
    let mut location = base.resolve(link)?;
    let mut contents = fetcher.fetch_text(&location)?;

    let mut visited: HashSet<Location> = HashSet::new();
    visited.insert(location.clone());
    while is_symbolic_link(&location, &contents) {
        tracing::info!(
            "{location}: found file-like string in contents, following symbolic link to {contents}"
        );
        let next = location.resolve(contents.trim())?;
        if !visited.insert(next.clone()) {
            return Err(PackError::cyclic_reference(&next));
        }
        contents = fetcher.fetch_text(&next)?;
        location = next;
    }

    Ok((contents, location))
}

/// A remote document whose entire content is a single line containing a `.`
/// is taken to be a symbolic link to the named file, not a document.
fn is_symbolic_link(location: &Location, contents: &str) -> bool {
    location.is_remote() && !contents.contains('\n') && contents.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticFetcher {
        files: HashMap<String, String>,
    }

    impl StaticFetcher {
        fn new(entries: &[(&str, &str)]) -> Self {
            StaticFetcher {
                files: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl Fetcher for StaticFetcher {
        fn fetch_text(&self, location: &Location) -> PackResult<String> {
            self.files
                .get(&location.to_string())
                .cloned()
                .ok_or_else(|| PackError::LinkNotFound {
                    location: location.to_string(),
                    cause: None,
                })
        }
    }

    #[test]
    fn test_symbolic_link_heuristic() {
        let remote = Location::parse("https://x/y/z.cwl");
        let local = Location::parse("/a/b/c.cwl");

        assert!(is_symbolic_link(&remote, "real_tool.cwl"));
        // Local files are never treated as symbolic links.
        assert!(!is_symbolic_link(&local, "real_tool.cwl"));
        // Multi-line content is a document.
        assert!(!is_symbolic_link(&remote, "class: CommandLineTool\n"));
        // A single line with no dot is not file-like.
        assert!(!is_symbolic_link(&remote, "some words"));
    }

    #[test]
    fn test_follows_symbolic_link_chain() {
        let fetcher = StaticFetcher::new(&[
            ("https://x/cwl/step.cwl", "real/tool1.cwl"),
            ("https://x/cwl/real/tool1.cwl", "class: CommandLineTool\nid: t1\n"),
        ]);
        let base = Location::parse("https://x/cwl/wf.cwl");

        let (doc, location) = load_linked_document(&fetcher, &base, "step.cwl").unwrap();
        assert_eq!(location.to_string(), "https://x/cwl/real/tool1.cwl");
        assert_eq!(
            doc.get("class").and_then(Value::as_str),
            Some("CommandLineTool")
        );
    }

    #[test]
    fn test_cyclic_symbolic_link_chain_fails() {
        let fetcher = StaticFetcher::new(&[
            ("https://x/a.cwl", "b.cwl"),
            ("https://x/b.cwl", "a.cwl"),
        ]);
        let base = Location::parse("https://x/root.cwl");

        let err = load_linked_text(&fetcher, &base, "a.cwl").unwrap_err();
        assert!(matches!(err, PackError::CyclicReference { .. }));
    }

    #[test]
    fn test_missing_remote_file_is_link_not_found() {
        let fetcher = StaticFetcher::new(&[]);
        let base = Location::parse("https://x/wf.cwl");
        let err = load_linked_document(&fetcher, &base, "gone.cwl").unwrap_err();
        assert!(matches!(err, PackError::LinkNotFound { .. }));
    }

    #[test]
    fn test_malformed_document_reports_location() {
        let fetcher = StaticFetcher::new(&[("https://x/bad.cwl", "a: [unclosed\nb: }{")]);
        let base = Location::parse("https://x/wf.cwl");
        let err = load_linked_document(&fetcher, &base, "bad.cwl").unwrap_err();
        match err {
            PackError::MalformedDocument { location, .. } => {
                assert_eq!(location, "https://x/bad.cwl");
            }
            other => panic!("expected MalformedDocument, got {other:?}"),
        }
    }
}
