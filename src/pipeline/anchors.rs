//! Anchor traceability over a step's parsed output.
//!
//! Generated JSON is lifted into [`AnnotatedValue`], a closed recursive type
//! in which every object knows whether it carries an `anchor`. Walking it is
//! an exhaustive `match`, so every anchored sub-object is found exactly once.
//!
//! Paths use `key`, `key[i]` and `key[i].child` segments; the root object
//! itself has the empty path. An `"anchor": null` attribute counts as absent.

use crate::model::StepAnchor;
use serde_json::Value;

/// Name of the attribute that ties a derived claim back to its source.
pub const ANCHOR_KEY: &str = "anchor";

/// Parsed output with anchors made explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotatedValue {
    /// `null`, booleans, numbers and strings.
    Leaf(Value),
    List(Vec<AnnotatedValue>),
    Object {
        anchor: Option<Value>,
        fields: Vec<(String, AnnotatedValue)>,
    },
}

impl From<&Value> for AnnotatedValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Array(items) => AnnotatedValue::List(items.iter().map(AnnotatedValue::from).collect()),
            Value::Object(map) => {
                let anchor = map.get(ANCHOR_KEY).filter(|a| !a.is_null()).cloned();
                let fields = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != ANCHOR_KEY)
                    .map(|(k, v)| (k.clone(), AnnotatedValue::from(v)))
                    .collect();
                AnnotatedValue::Object { anchor, fields }
            }
            leaf => AnnotatedValue::Leaf(leaf.clone()),
        }
    }
}

impl AnnotatedValue {
    /// Every anchored object in document order, with its path.
    pub fn collect_anchors(&self) -> Vec<StepAnchor> {
        let mut out = Vec::new();
        self.walk(String::new(), &mut out);
        out
    }

    fn walk(&self, path: String, out: &mut Vec<StepAnchor>) {
        match self {
            AnnotatedValue::Leaf(_) => {}
            AnnotatedValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.walk(format!("{path}[{i}]"), out);
                }
            }
            AnnotatedValue::Object { anchor, fields } => {
                if let Some(anchor) = anchor {
                    out.push(StepAnchor {
                        path: path.clone(),
                        anchor: anchor.clone(),
                    });
                }
                for (key, child) in fields {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    child.walk(child_path, out);
                }
            }
        }
    }
}

/// Collect the anchors of a parsed step result.
pub fn extract_anchors(value: &Value) -> Vec<StepAnchor> {
    AnnotatedValue::from(value).collect_anchors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_nested_anchors_with_paths() {
        let v = json!({
            "facts": [
                {"statement": "Lease signed", "anchor": {"page": 1, "paragraph": 2}},
                {"statement": "Rent unpaid"},
                {"statement": "Notice served", "anchor": "p2-para5",
                 "details": [{"note": "by post", "anchor": {"page": 2, "paragraph": 6}}]}
            ],
            "court": "High Court"
        });
        let anchors = extract_anchors(&v);
        let paths: Vec<&str> = anchors.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["facts[0]", "facts[2]", "facts[2].details[0]"]);
        assert_eq!(anchors[1].anchor, json!("p2-para5"));
    }

    #[test]
    fn root_anchor_has_empty_path() {
        let anchors = extract_anchors(&json!({"summary": "x", "anchor": {"page": 1}}));
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].path, "");
    }

    #[test]
    fn null_anchor_is_ignored_and_anchor_value_not_walked() {
        let v = json!({
            "a": {"anchor": null},
            "b": {"anchor": {"anchor": {"page": 9}}}
        });
        let anchors = extract_anchors(&v);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].path, "b");
    }

    #[test]
    fn nested_lists() {
        let v = json!([[{"anchor": 1}], [{"x": [{"anchor": 2}]}]]);
        let paths: Vec<String> = extract_anchors(&v).into_iter().map(|a| a.path).collect();
        assert_eq!(paths, vec!["[0][0]", "[1][0].x[0]"]);
    }

    #[test]
    fn every_anchored_object_appears_once() {
        let v = json!({
            "issues": (0..25).map(|i| json!({"question": format!("q{i}"), "anchor": {"paragraph": i}})).collect::<Vec<_>>()
        });
        let anchors = extract_anchors(&v);
        assert_eq!(anchors.len(), 25);
        for (i, a) in anchors.iter().enumerate() {
            assert_eq!(a.path, format!("issues[{i}]"));
            assert_eq!(a.anchor, json!({"paragraph": i}));
        }
    }
}
