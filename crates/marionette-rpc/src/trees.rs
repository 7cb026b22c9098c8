//! Rendering per-aspect runtime trees into message payloads.

use marionette_core::{ExperimentId, SharedSubtree, SubtreeMap, TreeSerializer};
use serde::Serialize;
use serde_json::{Map, Value};

/// One aspect's serialized subtree, tagged with its instance path.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AspectTreeEntry {
    /// Aspect the subtree belongs to.
    #[serde(rename = "aspectInstancePath")]
    pub instance_path: String,
    /// Serialized subtree.
    #[serde(flatten)]
    pub tree: Map<String, Value>,
}

/// JSON array of [`AspectTreeEntry`] in the map's insertion order.
pub fn format_subtrees(
    serializer: &dyn TreeSerializer,
    subtrees: &SubtreeMap,
) -> Result<String, serde_json::Error> {
    let entries: Vec<AspectTreeEntry> = subtrees
        .iter()
        .map(|(instance_path, subtree)| AspectTreeEntry {
            instance_path: instance_path.clone(),
            tree: serializer.serialize(&subtree.read()),
        })
        .collect();
    serde_json::to_string(&entries)
}

/// Clear transient flags on every subtree after it was sent.
pub fn reset_subtrees(serializer: &dyn TreeSerializer, subtrees: &SubtreeMap) {
    for subtree in subtrees.values() {
        serializer.reset_exit_flags(&mut subtree.write());
    }
}

/// Runtime tree of a loaded experiment: `{"experimentId": id, ...tree}`.
pub fn format_runtime_tree(
    serializer: &dyn TreeSerializer,
    experiment_id: ExperimentId,
    subtree: &SharedSubtree,
) -> Result<String, serde_json::Error> {
    let mut object = Map::new();
    let _ = object.insert("experimentId".into(), Value::from(experiment_id.get()));
    object.extend(serializer.serialize(&subtree.read()));
    serde_json::to_string(&object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::{AspectSubtree, JsonTreeSerializer, TreeNode};
    use proptest::prelude::*;
    use serde_json::json;

    fn subtree(path: &str, value: f64) -> SharedSubtree {
        AspectSubtree::new(
            path,
            TreeNode::branch("ModelTree", vec![TreeNode::leaf("v", value).touched()]),
        )
        .shared()
    }

    #[test]
    fn entries_keep_manager_order() {
        let mut map = SubtreeMap::new();
        let _ = map.insert("z.cell".into(), subtree("z.cell", 1.0));
        let _ = map.insert("a.cell".into(), subtree("a.cell", 2.0));

        let json: Value = serde_json::from_str(&format_subtrees(&JsonTreeSerializer, &map).unwrap())
            .unwrap();
        assert_eq!(json[0]["aspectInstancePath"], "z.cell");
        assert_eq!(json[1]["aspectInstancePath"], "a.cell");
        assert_eq!(json[1]["ModelTree"]["v"]["value"], 2.0);
    }

    #[test]
    fn reset_clears_flags_on_the_shared_subtree() {
        let shared = subtree("hh", 0.0);
        let mut map = SubtreeMap::new();
        let _ = map.insert("hh".into(), shared.clone());

        reset_subtrees(&JsonTreeSerializer, &map);
        assert!(!shared.read().root.any_modified());
    }

    #[test]
    fn runtime_tree_leads_with_experiment_id() {
        let json = format_runtime_tree(&JsonTreeSerializer, ExperimentId::new(12), &subtree("hh", 3.0))
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            json!({"experimentId": 12, "ModelTree": {"v": {"value": 3.0, "modified": true}}})
        );
    }

    proptest! {
        #[test]
        fn collections_are_well_formed_for_any_size(count in 0usize..6) {
            let mut map = SubtreeMap::new();
            for i in 0..count {
                let path = format!("cell{i}");
                let _ = map.insert(path.clone(), subtree(&path, 0.5));
            }
            let json = format_subtrees(&JsonTreeSerializer, &map).unwrap();
            let parsed: Value = serde_json::from_str(&json).unwrap();
            let entries = parsed.as_array().unwrap();
            prop_assert_eq!(entries.len(), count);
            for (i, entry) in entries.iter().enumerate() {
                let expected = format!("cell{i}");
                prop_assert_eq!(entry["aspectInstancePath"].as_str(), Some(expected.as_str()));
            }
        }
    }
}
