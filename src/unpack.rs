//! The inverse of packing: explode a packed workflow into separate files.
//!
//! Every inline `run` process of a workflow is split out into its own file
//! under `<file>.steps/<step-id>.cwl`, with the step's `run` rewritten to the
//! relative path, recursively for nested workflows.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

/// One process produced by exploding a packed document, with the file path
/// it should be written to.
#[derive(Debug)]
pub struct ExplodedProcess {
    pub file_path: PathBuf,
    pub cwl: Value,
}

/// Split the inline step processes of `cwl` (rooted at `file_path`) into
/// separate documents. The first element of the result is the root document
/// itself, with its `run` fields rewritten to relative paths.
pub fn explode(mut cwl: Value, file_path: &Path) -> Vec<ExplodedProcess> {
    let mut children = Vec::new();

    if let Value::Mapping(ref mut map) = cwl {
        if map.get("class").and_then(Value::as_str) == Some("Workflow") {
            sanitize_id(map);
            let steps_dir = format!(
                "{}.steps",
                file_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );
            let parent = file_path.parent().unwrap_or_else(|| Path::new(""));

            match map.get_mut("steps") {
                Some(Value::Sequence(steps)) => {
                    for step in steps {
                        if let Value::Mapping(step) = step {
                            let step_id = step
                                .get("id")
                                .and_then(Value::as_str)
                                .map(str::to_string);
                            if let Some(step_id) = step_id {
                                explode_step(step, &step_id, parent, &steps_dir, &mut children);
                            }
                        }
                    }
                }
                Some(Value::Mapping(steps)) => {
                    for (key, step) in steps {
                        let step_id = key.as_str().map(str::to_string);
                        if let (Some(step_id), Value::Mapping(step)) = (step_id, step) {
                            explode_step(step, &step_id, parent, &steps_dir, &mut children);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut processes = vec![ExplodedProcess {
        file_path: file_path.to_path_buf(),
        cwl,
    }];
    processes.extend(children);
    processes
}

fn explode_step(
    step: &mut Mapping,
    step_id: &str,
    parent: &Path,
    steps_dir: &str,
    children: &mut Vec<ExplodedProcess>,
) {
    if !step.get("run").is_some_and(Value::is_mapping) {
        return;
    }
    let relative = format!("{steps_dir}/{step_id}.cwl");
    let step_path = parent.join(&relative);
    if let Some(run) = step.insert(Value::from("run"), Value::from(relative)) {
        children.extend(explode(run, &step_path));
    }
}

/// Rename a preexisting `id` to provenance metadata; some runners mishandle
/// documents whose sub-processes carry ids from a previous life.
pub fn sanitize_id(cwl: &mut Mapping) {
    if let Some(id) = cwl.remove("id") {
        cwl.insert(Value::from("original_source"), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_tool_explodes_to_itself() {
        let tool = yaml("class: CommandLineTool\nbaseCommand: echo");
        let exploded = explode(tool.clone(), Path::new("/out/tool.cwl"));
        assert_eq!(exploded.len(), 1);
        assert_eq!(exploded[0].file_path, Path::new("/out/tool.cwl"));
        assert_eq!(exploded[0].cwl, tool);
    }

    #[test]
    fn test_workflow_steps_are_split_out() {
        let wf = yaml(
            "class: Workflow\n\
             steps:\n\
             - id: s1\n  run:\n    class: CommandLineTool\n    baseCommand: echo\n\
             - id: s2\n  run: already/external.cwl\n",
        );
        let exploded = explode(wf, Path::new("/out/wf.cwl"));
        assert_eq!(exploded.len(), 2);

        let root = &exploded[0].cwl;
        let steps = root.get("steps").and_then(Value::as_sequence).unwrap();
        assert_eq!(
            steps[0].get("run").and_then(Value::as_str),
            Some("wf.cwl.steps/s1.cwl")
        );
        // External references are left alone.
        assert_eq!(
            steps[1].get("run").and_then(Value::as_str),
            Some("already/external.cwl")
        );

        assert_eq!(
            exploded[1].file_path,
            Path::new("/out/wf.cwl.steps/s1.cwl")
        );
        assert_eq!(
            exploded[1].cwl.get("class").and_then(Value::as_str),
            Some("CommandLineTool")
        );
    }

    #[test]
    fn test_nested_workflows_explode_recursively() {
        let wf = yaml(concat!(
            "class: Workflow\n",
            "steps:\n",
            "- id: outer\n",
            "  run:\n",
            "    class: Workflow\n",
            "    steps:\n",
            "    - id: inner\n",
            "      run:\n",
            "        class: CommandLineTool\n",
        ));
        let exploded = explode(wf, Path::new("/out/wf.cwl"));
        let paths: Vec<_> = exploded.iter().map(|p| p.file_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/out/wf.cwl"),
                PathBuf::from("/out/wf.cwl.steps/outer.cwl"),
                PathBuf::from("/out/wf.cwl.steps/outer.cwl.steps/inner.cwl"),
            ]
        );
    }

    #[test]
    fn test_map_form_steps() {
        let wf = yaml(
            "class: Workflow\n\
             steps:\n\
             \x20 s1:\n    run:\n      class: CommandLineTool\n",
        );
        let exploded = explode(wf, Path::new("/out/wf.cwl"));
        assert_eq!(exploded.len(), 2);
        assert_eq!(
            exploded[1].file_path,
            Path::new("/out/wf.cwl.steps/s1.cwl")
        );
    }

    #[test]
    fn test_sanitize_id() {
        let Value::Mapping(mut wf) = yaml("class: Workflow\nid: old-id\nsteps: []") else {
            panic!("expected mapping");
        };
        sanitize_id(&mut wf);
        assert!(!wf.contains_key("id"));
        assert_eq!(
            wf.get("original_source").and_then(Value::as_str),
            Some("old-id")
        );
    }
}
