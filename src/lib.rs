//! # cwlpack
//!
//! Pack multi-file Common Workflow Language (CWL) documents into a single
//! self-contained document: `$import`/`$include` directives are substituted,
//! user-defined types (`SchemaDefRequirement`) are inlined, shorthand forms
//! are normalized, and workflow steps referencing external processes are
//! recursively resolved and embedded. The inverse operation splits a packed
//! workflow back into one file per process.

pub mod error;
pub mod fetch;
pub mod location;
pub mod normalize;
pub mod pack;
pub mod schemadef;
pub mod unpack;

pub use error::{PackError, PackResult};
pub use fetch::{Fetcher, HttpFetcher};
pub use location::Location;
pub use pack::{pack, PackOptions, Packer};
pub use unpack::{explode, sanitize_id, ExplodedProcess};
