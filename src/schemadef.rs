//! User-defined type resolution (`SchemaDefRequirement`).
//!
//! A process may declare custom record/array/enum types, inline or via
//! `$import`, and reference them from its ports as `path#name`. Packing
//! builds a table of every definition keyed by `(defining location, name)`,
//! so same-named types from different files stay apart, and then inlines
//! each reference into the port declaration, minting a fresh
//! synthetic name per use site so the packed document never has two type
//! declarations with the same name.
//!
//! Valid forms of user-defined types stored in an external file: a single
//! map, or a list of maps. Types may refer to other types in the same file.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_yaml::{Mapping, Sequence, Value};

use crate::error::{PackError, PackResult};
use crate::fetch::{load_linked_document, Fetcher};
use crate::location::Location;
use crate::normalize::{expecting_map, normalize_to_list, value_kind};

/// Type names CWL defines; they resolve to themselves.
static BUILT_IN_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "null",
        "boolean",
        "int",
        "long",
        "float",
        "double",
        "string",
        "File",
        "Directory",
        "stdin",
        "stdout",
        "stderr",
        "Any",
    ]
    .into_iter()
    .collect()
});

pub fn is_built_in(name: &str) -> bool {
    BUILT_IN_TYPES.contains(name)
}

/// Lookup key for a user-defined type: the document that defines it plus its
/// short name. Two types with the same short name defined in different
/// documents never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey {
    pub location: Location,
    pub name: String,
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.location, self.name)
    }
}

/// The user-defined type table for one process, in declaration order.
pub type TypeTable = IndexMap<TypeKey, Value>;

/// Source of synthetic type names, owned by one packing session.
///
/// Every inlined use site gets a fresh name so repeated inlining of the same
/// external type never produces duplicate declarations.
#[derive(Debug, Default)]
pub struct TypeNameSequence {
    next_id: u64,
}

impl TypeNameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> String {
        self.next_id += 1;
        format!("user_type_{}", self.next_id)
    }
}

/// Scan a process's (already list-normalized) requirements for a
/// `SchemaDefRequirement` and build the type table for it.
pub fn build_user_defined_types(
    fetcher: &dyn Fetcher,
    cwl: &Mapping,
    base: &Location,
) -> PackResult<TypeTable> {
    let mut types = TypeTable::new();

    let schemadef = cwl
        .get("requirements")
        .and_then(Value::as_sequence)
        .and_then(|reqs| {
            reqs.iter().find(|req| {
                req.get("class").and_then(Value::as_str) == Some("SchemaDefRequirement")
            })
        });
    let Some(schemadef) = schemadef else {
        return Ok(types);
    };

    let schema_list = match schemadef.get("types") {
        None => return Ok(types),
        Some(Value::Sequence(list)) => list,
        Some(other) => {
            return Err(PackError::malformed_document(
                base,
                format!(
                    "SchemaDefRequirement types must be a list, got {}",
                    value_kind(other)
                ),
            ));
        }
    };

    for schema in schema_list {
        let Some(schema) = schema.as_mapping() else {
            return Err(expecting_map(schema));
        };

        if let Some(link) = import_link(schema) {
            let (imported, import_location) = load_linked_document(fetcher, base, link)?;
            tracing::debug!("parsing schema definitions from {import_location}");
            // A type file holds either one definition or a list of them.
            let definitions = match imported {
                Value::Sequence(list) => list,
                single => Sequence::from([single]),
            };
            for definition in definitions {
                let name = definition
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PackError::MissingTypeName {
                        location: import_location.to_string(),
                    })?;
                types.insert(
                    TypeKey {
                        location: import_location.clone(),
                        name: name.to_string(),
                    },
                    definition,
                );
            }
        } else {
            let name = schema
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| PackError::MissingTypeName {
                    location: base.to_string(),
                })?;
            types.insert(
                TypeKey {
                    location: base.clone(),
                    name: name.to_string(),
                },
                Value::Mapping(schema.clone()),
            );
        }
    }

    Ok(types)
}

fn import_link(schema: &Mapping) -> Option<&str> {
    if schema.len() != 1 {
        return None;
    }
    schema.get("$import").and_then(Value::as_str)
}

/// Recursive type inliner for one process node.
///
/// Holds the type table, the fetcher (a port type may itself be an
/// `{$import: ...}` directive), the synthetic-name source, and the set of
/// type files currently being imported (the cycle guard).
pub struct TypeInliner<'a> {
    fetcher: &'a dyn Fetcher,
    types: &'a TypeTable,
    names: &'a mut TypeNameSequence,
    active_imports: HashSet<Location>,
}

impl<'a> TypeInliner<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        types: &'a TypeTable,
        names: &'a mut TypeNameSequence,
    ) -> Self {
        TypeInliner {
            fetcher,
            types,
            names,
            active_imports: HashSet::new(),
        }
    }

    /// Inline every user-defined type referenced from the given port list
    /// (`inputs` or `outputs`) of a process.
    pub fn inline_ports(
        &mut self,
        cwl: &mut Mapping,
        port_field: &str,
        base: &Location,
    ) -> PackResult<()> {
        let Some(slot) = cwl.get_mut(port_field) else {
            return Ok(());
        };
        let Value::Sequence(ports) = std::mem::replace(slot, Value::Null) else {
            return Err(PackError::ExpectingMap {
                found: format!("non-list '{port_field}'"),
            });
        };
        let mut inlined = Sequence::with_capacity(ports.len());
        for port in ports {
            inlined.push(self.inline_type(port, base)?);
        }
        *slot = Value::Sequence(inlined);
        Ok(())
    }

    /// Recursively replace type references in a port or type value with the
    /// full definitions from the type table.
    ///
    /// Strings handle CWL's shorthand: `T[]` is an array of `T`, `T?` is
    /// `[null, T]`, built-ins resolve to themselves, and anything else is a
    /// `path#name` (or bare `name`) reference looked up in the table. A found
    /// definition is deep-copied, renamed to a fresh synthetic name, and
    /// resolved again with the *defining* document's location as the base so
    /// references inside it land where they were declared.
    pub fn inline_type(&mut self, value: Value, base: &Location) -> PackResult<Value> {
        match value {
            Value::String(type_name) => self.inline_reference(type_name, base),
            Value::Sequence(list) => {
                let mut out = Sequence::with_capacity(list.len());
                for item in list {
                    out.push(self.inline_type(item, base)?);
                }
                Ok(Value::Sequence(out))
            }
            Value::Mapping(mut map) => {
                if let Some(link) = import_link(&map) {
                    let link = link.to_string();
                    return self.inline_imported(&link, base);
                }

                let Some(declared) = map.get("type").cloned() else {
                    return Err(PackError::MissingCwlType {
                        location: base.to_string(),
                    });
                };
                match declared.as_str() {
                    Some("enum") => Ok(Value::Mapping(map)),
                    Some("array") => {
                        let Some(items) = map.get_mut("items") else {
                            return Err(PackError::ArrayMissingItems {
                                location: base.to_string(),
                            });
                        };
                        let owned = std::mem::replace(items, Value::Null);
                        *items = self.inline_type(owned, base)?;
                        Ok(Value::Mapping(map))
                    }
                    Some("record") => {
                        let Some(fields) = map.get_mut("fields") else {
                            return Err(PackError::RecordMissingFields {
                                location: base.to_string(),
                            });
                        };
                        let owned = std::mem::replace(fields, Value::Null);
                        let normalized = normalize_to_list(owned, "name", Some("type"))?;
                        *fields = self.inline_type(normalized, base)?;
                        Ok(Value::Mapping(map))
                    }
                    Some(name) if is_built_in(name) => Ok(Value::Mapping(map)),
                    _ => {
                        // The type itself needs resolution; other keys stay put.
                        let resolved = self.inline_type(declared, base)?;
                        map.insert(Value::from("type"), resolved);
                        Ok(Value::Mapping(map))
                    }
                }
            }
            other => Err(PackError::MissingCwlType {
                location: format!("{} ({})", base, value_kind(&other)),
            }),
        }
    }

    /// A type written directly as `{$import: link}`: load the target and
    /// inline it relative to where it was defined.
    fn inline_imported(&mut self, link: &str, base: &Location) -> PackResult<Value> {
        let (imported, import_location) = load_linked_document(self.fetcher, base, link)?;
        if !self.active_imports.insert(import_location.clone()) {
            return Err(PackError::cyclic_reference(&import_location));
        }
        let resolved = self.inline_type(imported, &import_location);
        self.active_imports.remove(&import_location);
        resolved
    }

    fn inline_reference(&mut self, type_name: String, base: &Location) -> PackResult<Value> {
        if let Some(element) = type_name.strip_suffix("[]") {
            let mut array = Mapping::new();
            array.insert(Value::from("type"), Value::from("array"));
            let items = self.inline_type(Value::from(element), base)?;
            array.insert(Value::from("items"), items);
            return Ok(Value::Mapping(array));
        }

        if let Some(required) = type_name.strip_suffix('?') {
            return Ok(Value::Sequence(Sequence::from([
                Value::from("null"),
                self.inline_type(Value::from(required), base)?,
            ])));
        }

        if is_built_in(&type_name) {
            return Ok(Value::String(type_name));
        }

        let key = match type_name.split_once('#') {
            Some((path, fragment)) => TypeKey {
                location: base.resolve(path)?,
                name: fragment.to_string(),
            },
            None => TypeKey {
                location: base.clone(),
                name: type_name,
            },
        };

        let Some(definition) = self.types.get(&key) else {
            return Err(PackError::UndefinedType {
                reference: key.to_string(),
            });
        };
        let mut definition = definition.clone();
        if let Value::Mapping(ref mut map) = definition {
            map.insert(Value::from("name"), Value::from(self.names.fresh()));
        }
        self.inline_type(definition, &key.location)
    }
}
