// Gradient-boosted regression trees, loaded from the training toolchain's
// JSON model dump and evaluated in-process.
//
// Only the fields needed for prediction are read: the learner parameters
// (base score, feature count), the objective name (which fixes the link
// function), and per tree the parallel node arrays. Everything else in the
// dump is ignored.

use crate::ArtifactError;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("feature shape mismatch, expected: {expected}, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("model produced a non-finite value ({0})")]
    NonFinite(f64),
}

// ---------------------------------------------------------------------------
// Raw JSON structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawModel {
    learner: RawLearner,
}

#[derive(Debug, Deserialize)]
struct RawLearner {
    learner_model_param: RawLearnerParam,
    gradient_booster: RawBooster,
    objective: RawObjective,
}

/// The dump stores scalar parameters as strings.
#[derive(Debug, Deserialize)]
struct RawLearnerParam {
    base_score: String,
    num_feature: String,
    #[serde(default)]
    num_target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBooster {
    name: String,
    #[serde(default)]
    model: Option<RawForest>,
}

#[derive(Debug, Deserialize)]
struct RawForest {
    trees: Vec<RawTree>,
}

#[derive(Debug, Deserialize)]
struct RawObjective {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTreeParam {
    num_nodes: String,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    tree_param: RawTreeParam,
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<i64>,
}

/// Older dumps write `default_left` as booleans, newer ones as 0/1.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Objective link functions
// ---------------------------------------------------------------------------

/// Maps between the additive margin space the trees sum in and the
/// prediction space the objective reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Identity,
    Log,
    Logistic,
}

impl Link {
    fn for_objective(name: &str) -> Option<Self> {
        match name {
            "reg:squarederror" | "reg:squaredlogerror" | "reg:pseudohubererror"
            | "reg:absoluteerror" | "reg:quantileerror" => Some(Link::Identity),
            "reg:gamma" | "reg:tweedie" | "count:poisson" => Some(Link::Log),
            "reg:logistic" | "binary:logistic" => Some(Link::Logistic),
            _ => None,
        }
    }

    /// Prediction-space base score -> margin.
    fn to_margin(self, score: f32) -> Option<f32> {
        let margin = match self {
            Link::Identity => score,
            Link::Log if score > 0.0 => score.ln(),
            Link::Logistic if score > 0.0 && score < 1.0 => (score / (1.0 - score)).ln(),
            _ => return None,
        };
        margin.is_finite().then_some(margin)
    }

    /// Margin -> prediction space.
    fn apply(self, margin: f32) -> f32 {
        match self {
            Link::Identity => margin,
            Link::Log => margin.exp(),
            Link::Logistic => 1.0 / (1.0 + (-margin).exp()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    },
    Leaf(f32),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_raw(raw: RawTree, index: usize, num_feature: usize) -> Result<Self, ArtifactError> {
        let fail = |message: String| ArtifactError::Invalid(format!("tree {index}: {message}"));

        let n: usize = raw
            .tree_param
            .num_nodes
            .trim()
            .parse()
            .map_err(|_| fail(format!("bad num_nodes '{}'", raw.tree_param.num_nodes)))?;
        if n == 0 {
            return Err(fail("has no nodes".into()));
        }

        let lengths = [
            ("left_children", raw.left_children.len()),
            ("right_children", raw.right_children.len()),
            ("split_indices", raw.split_indices.len()),
            ("split_conditions", raw.split_conditions.len()),
            ("default_left", raw.default_left.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(fail(format!("{name} has {len} entries, expected {n}")));
            }
        }
        if raw.split_type.iter().any(|&t| t != 0) {
            return Err(fail("categorical splits are not supported".into()));
        }

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let (left, right) = (raw.left_children[i], raw.right_children[i]);
            let condition = raw.split_conditions[i];
            if !condition.is_finite() {
                return Err(fail(format!("node {i} has non-finite value {condition}")));
            }

            if left == -1 {
                if right != -1 {
                    return Err(fail(format!("node {i} has only a right child")));
                }
                nodes.push(Node::Leaf(condition));
                continue;
            }

            // Children always follow their parent, which rules out cycles.
            let child = |c: i64| -> Result<usize, ArtifactError> {
                usize::try_from(c)
                    .ok()
                    .filter(|&c| c > i && c < n)
                    .ok_or_else(|| fail(format!("node {i} has out-of-order child {c}")))
            };
            let feature = usize::try_from(raw.split_indices[i])
                .ok()
                .filter(|&f| f < num_feature)
                .ok_or_else(|| {
                    fail(format!(
                        "node {i} splits on feature {} but the model has {num_feature}",
                        raw.split_indices[i]
                    ))
                })?;

            nodes.push(Node::Split {
                feature,
                threshold: condition,
                left: child(left)?,
                right: child(right)?,
                default_left: raw.default_left[i].is_set(),
            });
        }

        Ok(Self { nodes })
    }

    /// Walk from the root to a leaf. Values below the threshold go left;
    /// missing values follow the node's default direction.
    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let x = row[feature];
                    index = if x.is_nan() {
                        if default_left {
                            left
                        } else {
                            right
                        }
                    } else if x < threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BoostedTrees
// ---------------------------------------------------------------------------

/// A fitted tree ensemble, loaded once and shared read-only.
#[derive(Debug, Clone)]
pub struct BoostedTrees {
    trees: Vec<Tree>,
    num_feature: usize,
    base_margin: f32,
    link: Link,
    objective: String,
}

impl BoostedTrees {
    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let raw: RawModel = crate::read_json(path)?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ArtifactError> {
        let raw: RawModel = serde_json::from_str(json).map_err(|source| ArtifactError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawModel) -> Result<Self, ArtifactError> {
        let learner = raw.learner;
        let param = learner.learner_model_param;

        let objective = learner.objective.name;
        let link = Link::for_objective(&objective)
            .ok_or_else(|| ArtifactError::Invalid(format!("unsupported objective '{objective}'")))?;

        if let Some(targets) = param.num_target.as_deref() {
            if targets.trim() != "1" {
                return Err(ArtifactError::Invalid(format!(
                    "only single-target models are supported, got num_target={targets}"
                )));
            }
        }

        let num_feature: usize = param
            .num_feature
            .trim()
            .parse()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                ArtifactError::Invalid(format!("bad num_feature '{}'", param.num_feature))
            })?;

        let base_score = parse_base_score(&param.base_score).ok_or_else(|| {
            ArtifactError::Invalid(format!("bad base_score '{}'", param.base_score))
        })?;
        let base_margin = link.to_margin(base_score).ok_or_else(|| {
            ArtifactError::Invalid(format!(
                "base_score {base_score} is outside the domain of objective '{objective}'"
            ))
        })?;

        let booster = learner.gradient_booster;
        if booster.name != "gbtree" {
            return Err(ArtifactError::Invalid(format!(
                "unsupported booster '{}'",
                booster.name
            )));
        }
        let forest = booster
            .model
            .ok_or_else(|| ArtifactError::Invalid("gbtree booster has no model".into()))?;

        let trees = forest
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, raw)| Tree::from_raw(raw, i, num_feature))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            trees,
            num_feature,
            base_margin,
            link,
            objective,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_feature
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn link(&self) -> Link {
        self.link
    }

    /// Predict one row. Features are evaluated in single precision, matching
    /// the precision the trees were trained and dumped in.
    pub fn predict(&self, features: &[f64]) -> Result<f32, InferenceError> {
        if features.len() != self.num_feature {
            return Err(InferenceError::FeatureCount {
                expected: self.num_feature,
                got: features.len(),
            });
        }

        let row: Vec<f32> = features.iter().map(|&x| x as f32).collect();
        let margin = self
            .trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.leaf_value(&row));

        let value = self.link.apply(margin);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(InferenceError::NonFinite(f64::from(value)))
        }
    }
}

/// Newer dumps wrap the base score in brackets (`"[1.35E1]"`), older ones
/// write the bare number (`"1.35E1"`).
fn parse_base_score(raw: &str) -> Option<f32> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let first = trimmed.split(',').next()?.trim();
    first.parse::<f32>().ok().filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-feature model: one stump on feature 0 and one on feature 1.
    fn model_json(objective: &str, base_score: &str) -> String {
        format!(
            r#"{{
  "learner": {{
    "learner_model_param": {{"base_score": "{base_score}", "num_feature": "2", "num_target": "1"}},
    "objective": {{"name": "{objective}"}},
    "gradient_booster": {{
      "name": "gbtree",
      "model": {{
        "gbtree_model_param": {{"num_trees": "2"}},
        "tree_info": [0, 0],
        "trees": [
          {{
            "id": 0,
            "tree_param": {{"num_nodes": "3", "num_feature": "2"}},
            "left_children": [1, -1, -1],
            "right_children": [2, -1, -1],
            "split_indices": [0, 0, 0],
            "split_conditions": [0.5, -0.25, 0.5],
            "default_left": [1, 0, 0],
            "split_type": [0, 0, 0]
          }},
          {{
            "id": 1,
            "tree_param": {{"num_nodes": "3", "num_feature": "2"}},
            "left_children": [1, -1, -1],
            "right_children": [2, -1, -1],
            "split_indices": [1, 0, 0],
            "split_conditions": [10.0, 0.125, 1.0],
            "default_left": [false, false, false]
          }}
        ]
      }}
    }}
  }},
  "version": [2, 0, 3]
}}"#
        )
    }

    fn squared_error() -> BoostedTrees {
        BoostedTrees::from_json_str(&model_json("reg:squarederror", "[2E0]")).unwrap()
    }

    #[test]
    fn loads_summary_fields() {
        let model = squared_error();
        assert_eq!(model.num_trees(), 2);
        assert_eq!(model.num_features(), 2);
        assert_eq!(model.objective(), "reg:squarederror");
        assert_eq!(model.link(), Link::Identity);
    }

    #[test]
    fn sums_leaves_onto_base_score() {
        let model = squared_error();
        // 2 + (-0.25) + 0.125
        assert_eq!(model.predict(&[0.0, 0.0]).unwrap(), 1.875);
        // 2 + 0.5 + 1.0
        assert_eq!(model.predict(&[3.0, 50.0]).unwrap(), 3.5);
    }

    #[test]
    fn threshold_is_strictly_less_than() {
        let model = squared_error();
        // x0 == 0.5 goes right.
        assert_eq!(model.predict(&[0.5, 0.0]).unwrap(), 2.625);
    }

    #[test]
    fn missing_values_follow_default_direction() {
        let model = squared_error();
        // Tree 0 defaults left, tree 1 defaults right.
        assert_eq!(model.predict(&[f64::NAN, f64::NAN]).unwrap(), 2.75);
    }

    #[test]
    fn bare_base_score_is_accepted() {
        let model = BoostedTrees::from_json_str(&model_json("reg:squarederror", "2E0")).unwrap();
        assert_eq!(model.predict(&[0.0, 0.0]).unwrap(), 1.875);
    }

    #[test]
    fn log_link_exponentiates_margin() {
        let model = BoostedTrees::from_json_str(&model_json("reg:gamma", "1E0")).unwrap();
        // ln(1) + 0.5 + 1.0
        let value = model.predict(&[3.0, 50.0]).unwrap();
        assert!((value - 1.5f32.exp()).abs() < 1e-5);
    }

    #[test]
    fn overflowing_log_link_is_non_finite() {
        // ln(1e38) + 1.5 is past the largest f32 exponent.
        let model = BoostedTrees::from_json_str(&model_json("reg:gamma", "1E38")).unwrap();
        let err = model.predict(&[3.0, 50.0]).unwrap_err();
        assert!(matches!(err, InferenceError::NonFinite(v) if v.is_infinite()));
    }

    #[test]
    fn logistic_link_squashes_margin() {
        let model = BoostedTrees::from_json_str(&model_json("binary:logistic", "5E-1")).unwrap();
        // logit(0.5) = 0; margin = -0.25 + 0.125
        let value = model.predict(&[0.0, 0.0]).unwrap();
        let expected = 1.0 / (1.0 + 0.125f32.exp());
        assert!((value - expected).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let err = squared_error().predict(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            InferenceError::FeatureCount {
                expected: 2,
                got: 3
            }
        );
        assert_eq!(err.to_string(), "feature shape mismatch, expected: 2, got 3");
    }

    #[test]
    fn rejects_unsupported_objective() {
        let err = BoostedTrees::from_json_str(&model_json("multi:softprob", "5E-1")).unwrap_err();
        assert!(err.to_string().contains("unsupported objective"));
    }

    #[test]
    fn rejects_base_score_outside_link_domain() {
        let err = BoostedTrees::from_json_str(&model_json("reg:gamma", "0E0")).unwrap_err();
        assert!(err.to_string().contains("outside the domain"));
    }

    #[test]
    fn rejects_non_gbtree_booster() {
        let json = model_json("reg:squarederror", "0E0").replace("\"gbtree\"", "\"dart\"");
        let err = BoostedTrees::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported booster 'dart'"));
    }

    #[test]
    fn rejects_split_on_unknown_feature() {
        let json = model_json("reg:squarederror", "0E0")
            .replace("\"split_indices\": [1, 0, 0]", "\"split_indices\": [7, 0, 0]");
        let err = BoostedTrees::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("tree 1"));
        assert!(err.to_string().contains("feature 7"));
    }

    #[test]
    fn rejects_backward_child_reference() {
        let json = model_json("reg:squarederror", "0E0")
            .replace("\"left_children\": [1, -1, -1]", "\"left_children\": [0, -1, -1]");
        let err = BoostedTrees::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("out-of-order child 0"));
    }

    #[test]
    fn rejects_array_length_mismatch() {
        let json = model_json("reg:squarederror", "0E0")
            .replace("\"default_left\": [1, 0, 0]", "\"default_left\": [1, 0]");
        let err = BoostedTrees::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("default_left has 2 entries"));
    }

    #[test]
    fn rejects_categorical_splits() {
        let json = model_json("reg:squarederror", "0E0")
            .replace("\"split_type\": [0, 0, 0]", "\"split_type\": [1, 0, 0]");
        let err = BoostedTrees::from_json_str(&json).unwrap_err();
        assert!(err.to_string().contains("categorical"));
    }

    #[test]
    fn parses_base_score_variants() {
        assert_eq!(parse_base_score("[1.35E1]"), Some(13.5));
        assert_eq!(parse_base_score("1.35E1"), Some(13.5));
        assert_eq!(parse_base_score(" 0.5 "), Some(0.5));
        assert_eq!(parse_base_score("nan"), None);
        assert_eq!(parse_base_score("abc"), None);
    }
}
