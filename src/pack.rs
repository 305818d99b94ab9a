//! The packing walker.
//!
//! Link resolution works with two components: the base and the link. If the
//! link is a URL or an absolute path it is used as-is to fetch data; a
//! relative link is combined with the base first. Each process node goes
//! through a fixed stage order (shape normalization, source normalization,
//! type-table build, port inlining, `$import`/`$include` substitution, step
//! recursion, requirement injection) and workflow steps recurse back into
//! the same pipeline.

use std::collections::HashSet;

use serde_yaml::{Mapping, Sequence, Value};

use crate::error::{PackError, PackResult};
use crate::fetch::{load_linked_document, load_linked_text, Fetcher, HttpFetcher};
use crate::location::Location;
use crate::normalize::{normalize_to_list, strip_reference_sigil, value_kind};
use crate::schemadef::{build_user_defined_types, TypeInliner, TypeNameSequence, TypeTable};

/// Options controlling a packing session.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Insert synthetic `id` fields on processes that lack one.
    pub add_ids: bool,
}

/// One packing session: owns the fetcher, the synthetic type-name counter,
/// and the set of imports currently being expanded (the cycle guard).
pub struct Packer<F: Fetcher> {
    fetcher: F,
    options: PackOptions,
    type_names: TypeNameSequence,
    active_imports: HashSet<Location>,
}

/// Pack the document at `cwl_path` with the default HTTP/file fetcher.
pub fn pack(cwl_path: &str) -> PackResult<Value> {
    Packer::new(HttpFetcher::new(), PackOptions::default()).pack(cwl_path)
}

impl<F: Fetcher> Packer<F> {
    pub fn new(fetcher: F, options: PackOptions) -> Self {
        Packer {
            fetcher,
            options,
            type_names: TypeNameSequence::new(),
            active_imports: HashSet::new(),
        }
    }

    /// Flatten the document graph rooted at `cwl_path` into one
    /// self-contained document.
    pub fn pack(&mut self, cwl_path: &str) -> PackResult<Value> {
        tracing::info!("packing {cwl_path}");
        let base = Location::parse(cwl_path);
        let (cwl, full_location) = load_linked_document(&self.fetcher, &base, "")?;

        if cwl.get("$graph").is_some() {
            // Already packed.
            return Ok(cwl);
        }

        let version = cwl
            .get("cwlVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut packed = self.pack_process(cwl, &full_location, &version, None)?;
        if self.options.add_ids {
            if let Value::Mapping(ref mut map) = packed {
                if !map.contains_key("id") {
                    map.insert(Value::from("id"), Value::from(base.basename()));
                }
            }
        }
        Ok(packed)
    }

    /// Run one process node through the packing stages and recurse into its
    /// steps.
    fn pack_process(
        &mut self,
        cwl: Value,
        base: &Location,
        cwl_version: &str,
        parent_types: Option<&TypeTable>,
    ) -> PackResult<Value> {
        let cwl = match cwl {
            Value::Mapping(map) => map,
            other => {
                return Err(PackError::ExpectedProcess {
                    location: base.to_string(),
                    found: value_kind(&other).to_string(),
                });
            }
        };

        let mut cwl = listify_everything(cwl)?;
        normalize_sources(&mut cwl);
        let types = self.load_schemadefs(&mut cwl, base, parent_types)?;
        self.resolve_schemadefs(&mut cwl, base, &types)?;

        let mut cwl = match self.resolve_imports(Value::Mapping(cwl), base)? {
            Value::Mapping(map) => map,
            other => {
                return Err(PackError::ExpectedProcess {
                    location: base.to_string(),
                    found: value_kind(&other).to_string(),
                });
            }
        };

        self.resolve_steps(&mut cwl, base, cwl_version, &types)?;
        add_missing_requirements(&mut cwl);
        Ok(Value::Mapping(cwl))
    }

    /// Build this node's type table, fold in the table inherited from an
    /// enclosing workflow, and drop the consumed `SchemaDefRequirement`.
    fn load_schemadefs(
        &mut self,
        cwl: &mut Mapping,
        base: &Location,
        parent_types: Option<&TypeTable>,
    ) -> PackResult<TypeTable> {
        let mut types = build_user_defined_types(&self.fetcher, cwl, base)?;
        if let Some(parent) = parent_types {
            for (key, definition) in parent {
                types.insert(key.clone(), definition.clone());
            }
        }

        if let Some(Value::Sequence(requirements)) = cwl.get_mut("requirements") {
            requirements.retain(|req| {
                req.get("class").and_then(Value::as_str) != Some("SchemaDefRequirement")
            });
        }

        Ok(types)
    }

    fn resolve_schemadefs(
        &mut self,
        cwl: &mut Mapping,
        base: &Location,
        types: &TypeTable,
    ) -> PackResult<()> {
        let mut inliner = TypeInliner::new(&self.fetcher, types, &mut self.type_names);
        inliner.inline_ports(cwl, "inputs", base)?;
        inliner.inline_ports(cwl, "outputs", base)?;
        Ok(())
    }

    /// Depth-first substitution of `$import` and `$include` directives.
    ///
    /// Substituted content is walked again with the same base, so directives
    /// nested inside imported content are resolved too. An import of a
    /// location already being expanded is a cycle.
    fn resolve_imports(&mut self, value: Value, base: &Location) -> PackResult<Value> {
        if let Some((link, parse)) = directive_link(&value) {
            let link = link.to_string();
            return if parse {
                let (imported, import_location) =
                    load_linked_document(&self.fetcher, base, &link)?;
                if !self.active_imports.insert(import_location.clone()) {
                    return Err(PackError::cyclic_reference(&import_location));
                }
                let resolved = self.resolve_imports(imported, base);
                self.active_imports.remove(&import_location);
                resolved
            } else {
                let (text, _) = load_linked_text(&self.fetcher, base, &link)?;
                Ok(Value::String(text))
            };
        }

        match value {
            Value::Mapping(map) => {
                let mut out = Mapping::new();
                for (key, child) in map {
                    out.insert(key, self.resolve_imports(child, base)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(list) => {
                let mut out = Sequence::with_capacity(list.len());
                for child in list {
                    out.push(self.resolve_imports(child, base)?);
                }
                Ok(Value::Sequence(out))
            }
            other => Ok(other),
        }
    }

    /// Resolve every step's `run` into an inline packed process.
    fn resolve_steps(
        &mut self,
        cwl: &mut Mapping,
        base: &Location,
        cwl_version: &str,
        types: &TypeTable,
    ) -> PackResult<()> {
        if cwl.get("class").and_then(Value::as_str) != Some("Workflow") {
            return Ok(());
        }

        let workflow_id = cwl
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| base.basename());

        let mut current_version = cwl
            .get("cwlVersion")
            .and_then(Value::as_str)
            .unwrap_or(cwl_version)
            .to_string();
        let mut version_bumped = false;

        if let Some(Value::Sequence(steps)) = cwl.get_mut("steps") {
            for step in steps {
                let Value::Mapping(step) = step else { continue };
                let step_id = step
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                tracing::debug!("recursing into step {base}:{step_id}");

                let Some(run_slot) = step.get_mut("run") else {
                    return Err(PackError::ExpectedProcess {
                        location: format!("{base}:{step_id}"),
                        found: "a step with no 'run'".to_string(),
                    });
                };
                let run = std::mem::replace(run_slot, Value::Null);

                let packed_run = match run {
                    Value::String(link) => {
                        let (run_doc, run_base) = self.load_run_document(base, &link)?;
                        let mut packed =
                            self.pack_process(run_doc, &run_base, &current_version, None)?;
                        if self.options.add_ids {
                            let run_name = link.rsplit('/').next().unwrap_or(&link);
                            ensure_id(
                                &mut packed,
                                format!("{workflow_id}@step_{step_id}@{run_name}"),
                            );
                        }
                        packed
                    }
                    inline => {
                        let mut packed =
                            self.pack_process(inline, base, &current_version, Some(types))?;
                        if self.options.add_ids {
                            ensure_id(&mut packed, format!("{workflow_id}@step_{step_id}@run"));
                        }
                        packed
                    }
                };

                // A sub-process declaring a newer cwlVersion wins, best-effort.
                if let Some(run_version) = packed_run.get("cwlVersion").and_then(Value::as_str) {
                    if cwl_version_key(run_version) > cwl_version_key(&current_version) {
                        current_version = run_version.to_string();
                        version_bumped = true;
                    }
                }

                if let Some(run_slot) = step.get_mut("run") {
                    *run_slot = packed_run;
                }
            }
        }

        if version_bumped {
            cwl.insert(Value::from("cwlVersion"), Value::from(current_version));
        }
        Ok(())
    }

    /// Load a step's external `run` document, following chains where the
    /// fetched document is itself just another filename.
    fn load_run_document(&self, base: &Location, link: &str) -> PackResult<(Value, Location)> {
        let (mut doc, mut location) = load_linked_document(&self.fetcher, base, link)?;
        let mut visited: HashSet<Location> = HashSet::new();
        visited.insert(location.clone());
        while let Value::String(ref next) = doc {
            let (next_doc, next_location) = load_linked_document(&self.fetcher, &location, next)?;
            if !visited.insert(next_location.clone()) {
                return Err(PackError::cyclic_reference(&next_location));
            }
            doc = next_doc;
            location = next_location;
        }
        Ok((doc, location))
    }
}

/// Canonicalize ports, requirements, steps, and step `in` bindings to the
/// list-of-maps form.
fn listify_everything(mut cwl: Mapping) -> PackResult<Mapping> {
    normalize_field(&mut cwl, "inputs", "id", Some("type"))?;
    normalize_field(&mut cwl, "outputs", "id", Some("type"))?;
    normalize_field(&mut cwl, "requirements", "class", None)?;

    if cwl.get("class").and_then(Value::as_str) != Some("Workflow") {
        return Ok(cwl);
    }

    normalize_field(&mut cwl, "steps", "id", None)?;
    if let Some(Value::Sequence(steps)) = cwl.get_mut("steps") {
        for step in steps {
            if let Value::Mapping(step) = step {
                normalize_field(step, "in", "id", Some("source"))?;
            }
        }
    }

    Ok(cwl)
}

/// Normalize one field of a map to the list form, in place; an absent field
/// becomes an empty list.
fn normalize_field(
    cwl: &mut Mapping,
    field: &str,
    key_field: &str,
    value_field: Option<&str>,
) -> PackResult<()> {
    match cwl.get_mut(field) {
        Some(slot) => {
            let owned = std::mem::replace(slot, Value::Null);
            *slot = normalize_to_list(owned, key_field, value_field)?;
        }
        None => {
            cwl.insert(Value::from(field), Value::Sequence(Sequence::new()));
        }
    }
    Ok(())
}

/// Strip the `#` sigil from workflow source references: step `in` bindings
/// and workflow `outputSource` fields.
fn normalize_sources(cwl: &mut Mapping) {
    if cwl.get("class").and_then(Value::as_str) != Some("Workflow") {
        return;
    }

    if let Some(Value::Sequence(steps)) = cwl.get_mut("steps") {
        for step in steps {
            let Some(Value::Sequence(bindings)) = step.get_mut("in") else {
                continue;
            };
            for binding in bindings {
                match binding {
                    Value::String(reference) => {
                        *binding = Value::from(strip_reference_sigil(reference));
                    }
                    Value::Mapping(binding) => {
                        strip_sigil_at(binding, "source");
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(Value::Sequence(outputs)) = cwl.get_mut("outputs") {
        for output in outputs {
            match output {
                Value::String(reference) => {
                    *output = Value::from(strip_reference_sigil(reference));
                }
                Value::Mapping(output) => {
                    strip_sigil_at(output, "outputSource");
                }
                _ => {}
            }
        }
    }
}

fn strip_sigil_at(map: &mut Mapping, field: &str) {
    let stripped = match map.get(field) {
        Some(Value::String(reference)) if reference.starts_with('#') => {
            strip_reference_sigil(reference).to_string()
        }
        _ => return,
    };
    map.insert(Value::from(field), Value::from(stripped));
}

/// Inject capability requirements the packed structure needs: a workflow
/// that now contains an inline sub-workflow must declare the sub-workflow
/// feature. Injection is idempotent.
fn add_missing_requirements(cwl: &mut Mapping) {
    if cwl.get("class").and_then(Value::as_str) != Some("Workflow") {
        return;
    }

    let has_subworkflow = cwl
        .get("steps")
        .and_then(Value::as_sequence)
        .is_some_and(|steps| {
            steps.iter().any(|step| {
                step.get("run")
                    .and_then(|run| run.get("class"))
                    .and_then(Value::as_str)
                    == Some("Workflow")
            })
        });
    if !has_subworkflow {
        return;
    }

    let Some(Value::Sequence(requirements)) = cwl.get_mut("requirements") else {
        return;
    };
    let already_declared = requirements.iter().any(|req| {
        req.get("class").and_then(Value::as_str) == Some("SubworkflowFeatureRequirement")
    });
    if !already_declared {
        let mut requirement = Mapping::new();
        requirement.insert(
            Value::from("class"),
            Value::from("SubworkflowFeatureRequirement"),
        );
        requirements.push(Value::Mapping(requirement));
    }
}

fn directive_link(value: &Value) -> Option<(&str, bool)> {
    let map = value.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    if let Some(link) = map.get("$import").and_then(Value::as_str) {
        return Some((link, true));
    }
    if let Some(link) = map.get("$include").and_then(Value::as_str) {
        return Some((link, false));
    }
    None
}

fn ensure_id(process: &mut Value, id: String) {
    if let Value::Mapping(map) = process {
        if !map.contains_key("id") {
            map.insert(Value::from("id"), Value::from(id));
        }
    }
}

/// Lenient ordering key for CWL version strings.
///
/// Strips a leading `v`, compares dotted numeric components (padded, so
/// `1.0` equals `1.0.0`), and sorts a pre-release suffix before its release.
/// This backs advisory version propagation only, not a compatibility check.
fn cwl_version_key(version: &str) -> (Vec<u64>, bool, String) {
    let version = version.trim().trim_start_matches('v');
    let (numbers, pre) = match version.split_once('-') {
        Some((numbers, pre)) => (numbers, pre),
        None => (version, ""),
    };
    let mut components: Vec<u64> = numbers
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    while components.len() < 3 {
        components.push(0);
    }
    (components, pre.is_empty(), pre.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn mapping(text: &str) -> Mapping {
        match yaml(text) {
            Value::Mapping(map) => map,
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    #[test]
    fn test_version_ordering() {
        assert!(cwl_version_key("v1.1") > cwl_version_key("v1.0"));
        assert!(cwl_version_key("v1.2") > cwl_version_key("v1.1"));
        assert_eq!(cwl_version_key("1.0"), cwl_version_key("v1.0.0"));
        assert!(cwl_version_key("v1.2") > cwl_version_key("v1.2.0-dev2"));
        assert!(cwl_version_key("v1.0") > cwl_version_key(""));
    }

    #[test]
    fn test_listify_everything() {
        let cwl = mapping(
            "class: Workflow\n\
             inputs:\n  in1: File\n\
             outputs:\n  out1:\n    type: File\n    outputSource: s1/out1\n\
             steps:\n  s1:\n    run: tool.cwl\n    in:\n      in1: '#in1'\n    out: [out1]\n",
        );
        let cwl = listify_everything(cwl).unwrap();

        let inputs = cwl.get("inputs").and_then(Value::as_sequence).unwrap();
        assert_eq!(inputs[0].get("id").and_then(Value::as_str), Some("in1"));
        assert_eq!(inputs[0].get("type").and_then(Value::as_str), Some("File"));

        let steps = cwl.get("steps").and_then(Value::as_sequence).unwrap();
        assert_eq!(steps[0].get("id").and_then(Value::as_str), Some("s1"));
        let bindings = steps[0].get("in").and_then(Value::as_sequence).unwrap();
        assert_eq!(bindings[0].get("id").and_then(Value::as_str), Some("in1"));
        assert_eq!(
            bindings[0].get("source").and_then(Value::as_str),
            Some("#in1")
        );

        // Requirements are always canonicalized, even when absent.
        assert!(cwl.get("requirements").and_then(Value::as_sequence).is_some());
    }

    #[test]
    fn test_normalize_sources_strips_sigils() {
        let mut cwl = mapping(
            "class: Workflow\n\
             inputs: []\n\
             outputs:\n  - id: out1\n    type: File\n    outputSource: '#s2/out1'\n\
             steps:\n  - id: s1\n    in:\n      - id: in1\n        source: '#in1'\n    out: [out1]\n",
        );
        normalize_sources(&mut cwl);

        let outputs = cwl.get("outputs").and_then(Value::as_sequence).unwrap();
        assert_eq!(
            outputs[0].get("outputSource").and_then(Value::as_str),
            Some("s2/out1")
        );
        let steps = cwl.get("steps").and_then(Value::as_sequence).unwrap();
        let bindings = steps[0].get("in").and_then(Value::as_sequence).unwrap();
        assert_eq!(
            bindings[0].get("source").and_then(Value::as_str),
            Some("in1")
        );
    }

    #[test]
    fn test_add_missing_requirements_is_idempotent() {
        let mut cwl = mapping(
            "class: Workflow\n\
             requirements: []\n\
             steps:\n  - id: s1\n    run:\n      class: Workflow\n",
        );
        add_missing_requirements(&mut cwl);
        add_missing_requirements(&mut cwl);

        let requirements = cwl.get("requirements").and_then(Value::as_sequence).unwrap();
        let declared: Vec<_> = requirements
            .iter()
            .filter(|req| {
                req.get("class").and_then(Value::as_str)
                    == Some("SubworkflowFeatureRequirement")
            })
            .collect();
        assert_eq!(declared.len(), 1);
    }

    #[test]
    fn test_add_missing_requirements_skips_tool_only_workflows() {
        let mut cwl = mapping(
            "class: Workflow\n\
             requirements: []\n\
             steps:\n  - id: s1\n    run:\n      class: CommandLineTool\n",
        );
        add_missing_requirements(&mut cwl);
        let requirements = cwl.get("requirements").and_then(Value::as_sequence).unwrap();
        assert!(requirements.is_empty());
    }

    #[test]
    fn test_directive_detection() {
        assert_eq!(
            directive_link(&yaml("$import: types.yml")),
            Some(("types.yml", true))
        );
        assert_eq!(
            directive_link(&yaml("$include: lib.js")),
            Some(("lib.js", false))
        );
        // Multi-key maps and plain keys are not directives.
        assert_eq!(directive_link(&yaml("$import: a\nother: b")), None);
        assert_eq!(directive_link(&yaml("import: a")), None);
        assert_eq!(directive_link(&yaml("just a string")), None);
    }
}
