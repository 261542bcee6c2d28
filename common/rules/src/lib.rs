//! Safe boolean rule evaluator.
//!
//! Rules are small expression trees — comparison, logical AND/OR with
//! short-circuit, field-path lookup, literal — never strings evaluated as
//! code. [`compile`] enforces the structural limits a rule must satisfy
//! before it is trusted; [`evaluate`] interprets a compiled rule against a
//! read-only JSON context, counting operations so a pathological tree still
//! cannot run away.

use common_money::parse_decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_DEPTH: usize = 10;
pub const MAX_NODES: usize = 100;
pub const MAX_FIELD_PATHS: usize = 20;
pub const MAX_OPERATIONS: u32 = 1000;

/// Path prefixes a field lookup is allowed to address.
pub const ALLOWED_PATH_PREFIXES: &[&str] = &[
    "proposal",
    "computed",
    "customer",
    "project",
    "running",
    "evaluationContext",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule expression exceeds max depth {MAX_DEPTH}")]
    TooDeep,
    #[error("rule expression exceeds max node count {MAX_NODES}")]
    TooManyNodes,
    #[error("rule expression references more than {MAX_FIELD_PATHS} distinct field paths")]
    TooManyFieldPaths,
    #[error("field path '{0}' is not on the allow-list")]
    PathNotAllowed(String),
    #[error("field path is empty")]
    EmptyPath,
    #[error("comparison operand type mismatch at path '{0}'")]
    TypeMismatch(String),
    #[error("rule evaluation exceeded the operation budget")]
    OperationBudgetExceeded,
}

pub type RuleResult<T> = Result<T, RuleError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(String),
    Text(String),
    Null,
}

/// A dotted field path, kept as segments rather than re-split on every
/// lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn parse(dotted: &str) -> Self {
        FieldPath(dotted.split('.').map(|s| s.to_string()).collect())
    }

    pub fn root(&self) -> Option<&str> {
        self.0.first().map(|s| s.as_str())
    }

    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

/// The rule expression tree as received from a caller — untrusted until
/// [`compile`] validates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    Literal { value: bool },
    Comparison {
        path: String,
        op: ComparisonOp,
        value: Literal,
    },
    And { nodes: Vec<RuleNode> },
    Or { nodes: Vec<RuleNode> },
}

/// A rule that has passed structural validation and is safe to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    root: RuleNode,
}

impl CompiledRule {
    pub fn node(&self) -> &RuleNode {
        &self.root
    }
}

/// Validate a rule expression against the depth/node/path limits and the
/// field-path allow-list. Returns a [`CompiledRule`] ready for repeated
/// evaluation.
pub fn compile(expr: &RuleNode) -> RuleResult<CompiledRule> {
    let mut node_count = 0usize;
    let mut field_paths: Vec<String> = Vec::new();
    validate(expr, 1, &mut node_count, &mut field_paths)?;
    Ok(CompiledRule { root: expr.clone() })
}

fn validate(
    node: &RuleNode,
    depth: usize,
    node_count: &mut usize,
    field_paths: &mut Vec<String>,
) -> RuleResult<()> {
    if depth > MAX_DEPTH {
        return Err(RuleError::TooDeep);
    }
    *node_count += 1;
    if *node_count > MAX_NODES {
        return Err(RuleError::TooManyNodes);
    }
    match node {
        RuleNode::Literal { .. } => Ok(()),
        RuleNode::Comparison { path, .. } => {
            if path.is_empty() {
                return Err(RuleError::EmptyPath);
            }
            let allowed = ALLOWED_PATH_PREFIXES
                .iter()
                .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}.")));
            if !allowed {
                return Err(RuleError::PathNotAllowed(path.clone()));
            }
            if !field_paths.contains(path) {
                field_paths.push(path.clone());
                if field_paths.len() > MAX_FIELD_PATHS {
                    return Err(RuleError::TooManyFieldPaths);
                }
            }
            Ok(())
        }
        RuleNode::And { nodes } | RuleNode::Or { nodes } => {
            for child in nodes {
                validate(child, depth + 1, node_count, field_paths)?;
            }
            Ok(())
        }
    }
}

/// Look up a dotted path in a JSON context. Missing paths resolve to
/// `Value::Null` rather than erroring.
fn resolve<'a>(context: &'a Value, path: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    let mut current = context;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &NULL,
        }
    }
    current
}

fn compare(op: ComparisonOp, actual: &Value, expected: &Literal, path: &str) -> RuleResult<bool> {
    match expected {
        Literal::Bool(b) => {
            let actual_bool = actual
                .as_bool()
                .ok_or_else(|| RuleError::TypeMismatch(path.to_string()))?;
            Ok(match op {
                ComparisonOp::Eq => actual_bool == *b,
                ComparisonOp::Ne => actual_bool != *b,
                _ => return Err(RuleError::TypeMismatch(path.to_string())),
            })
        }
        Literal::Number(n) => {
            let expected_dec = parse_decimal(n).map_err(|_| RuleError::TypeMismatch(path.to_string()))?;
            let actual_text = match actual {
                Value::String(s) => s.clone(),
                Value::Number(num) => num.to_string(),
                _ => return Err(RuleError::TypeMismatch(path.to_string())),
            };
            let actual_dec =
                parse_decimal(&actual_text).map_err(|_| RuleError::TypeMismatch(path.to_string()))?;
            Ok(match op {
                ComparisonOp::Eq => actual_dec == expected_dec,
                ComparisonOp::Ne => actual_dec != expected_dec,
                ComparisonOp::Lt => actual_dec < expected_dec,
                ComparisonOp::Lte => actual_dec <= expected_dec,
                ComparisonOp::Gt => actual_dec > expected_dec,
                ComparisonOp::Gte => actual_dec >= expected_dec,
            })
        }
        Literal::Text(t) => {
            let actual_str = actual
                .as_str()
                .ok_or_else(|| RuleError::TypeMismatch(path.to_string()))?;
            Ok(match op {
                ComparisonOp::Eq => actual_str == t,
                ComparisonOp::Ne => actual_str != t,
                _ => return Err(RuleError::TypeMismatch(path.to_string())),
            })
        }
        Literal::Null => Ok(match op {
            ComparisonOp::Eq => actual.is_null(),
            ComparisonOp::Ne => !actual.is_null(),
            _ => return Err(RuleError::TypeMismatch(path.to_string())),
        }),
    }
}

/// Evaluate a compiled rule against a read-only JSON context, short-circuiting
/// AND/OR and counting every node visited against [`MAX_OPERATIONS`].
pub fn evaluate(rule: &CompiledRule, context: &Value) -> RuleResult<bool> {
    let mut ops = 0u32;
    eval_node(&rule.root, context, &mut ops)
}

fn eval_node(node: &RuleNode, context: &Value, ops: &mut u32) -> RuleResult<bool> {
    *ops += 1;
    if *ops > MAX_OPERATIONS {
        return Err(RuleError::OperationBudgetExceeded);
    }
    match node {
        RuleNode::Literal { value } => Ok(*value),
        RuleNode::Comparison { path, op, value } => {
            let actual = resolve(context, path);
            compare(*op, actual, value, path)
        }
        RuleNode::And { nodes } => {
            for child in nodes {
                if !eval_node(child, context, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleNode::Or { nodes } => {
            for child in nodes {
                if eval_node(child, context, ops)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmp(path: &str, op: ComparisonOp, value: Literal) -> RuleNode {
        RuleNode::Comparison {
            path: path.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn rejects_path_outside_allow_list() {
        let rule = cmp("secrets.apiKey", ComparisonOp::Eq, Literal::Text("x".into()));
        assert_eq!(compile(&rule), Err(RuleError::PathNotAllowed("secrets.apiKey".into())));
    }

    #[test]
    fn rejects_too_many_distinct_paths() {
        let nodes: Vec<RuleNode> = (0..=MAX_FIELD_PATHS)
            .map(|i| cmp(&format!("proposal.field{i}"), ComparisonOp::Eq, Literal::Bool(true)))
            .collect();
        let rule = RuleNode::And { nodes };
        assert_eq!(compile(&rule), Err(RuleError::TooManyFieldPaths));
    }

    #[test]
    fn rejects_too_deep() {
        let mut node = RuleNode::Literal { value: true };
        for _ in 0..(MAX_DEPTH + 1) {
            node = RuleNode::And { nodes: vec![node] };
        }
        assert_eq!(compile(&node), Err(RuleError::TooDeep));
    }

    #[test]
    fn missing_path_resolves_to_null_not_error() {
        let rule = compile(&cmp("proposal.nonexistent", ComparisonOp::Eq, Literal::Null)).unwrap();
        let ctx = json!({"proposal": {}});
        assert!(evaluate(&rule, &ctx).unwrap());
    }

    #[test]
    fn and_short_circuits() {
        let rule = compile(&RuleNode::And {
            nodes: vec![
                cmp("proposal.active", ComparisonOp::Eq, Literal::Bool(false)),
                cmp("proposal.amount", ComparisonOp::Gt, Literal::Number("100".into())),
            ],
        })
        .unwrap();
        let ctx = json!({"proposal": {"active": false}});
        // amount path is missing; if AND evaluated the second branch this
        // would type-mismatch on a null. Short-circuit means it never does.
        assert!(!evaluate(&rule, &ctx).unwrap());
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let rule = compile(&RuleNode::Or {
            nodes: vec![
                cmp("proposal.vip", ComparisonOp::Eq, Literal::Bool(true)),
                cmp("proposal.amount", ComparisonOp::Gt, Literal::Number("100".into())),
            ],
        })
        .unwrap();
        let ctx = json!({"proposal": {"vip": true}});
        assert!(evaluate(&rule, &ctx).unwrap());
    }

    #[test]
    fn numeric_comparison_uses_arbitrary_precision_decimal() {
        let rule = compile(&cmp(
            "computed.subtotal",
            ComparisonOp::Gte,
            Literal::Number("199.9999999".into()),
        ))
        .unwrap();
        let ctx = json!({"computed": {"subtotal": "200.0000000"}});
        assert!(evaluate(&rule, &ctx).unwrap());
    }

    #[test]
    fn type_mismatch_is_a_rule_error_not_a_panic() {
        let rule = compile(&cmp("proposal.name", ComparisonOp::Gt, Literal::Number("1".into()))).unwrap();
        let ctx = json!({"proposal": {"name": "not a number"}});
        assert!(evaluate(&rule, &ctx).is_err());
    }
}
