use serde::{Deserialize, Serialize};

use crate::rules::ast::Location;

/// Result of [`RuleEngine::eval_query`](crate::rules::RuleEngine::eval_query),
/// one entry per solution. An empty `result` means undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub result: Vec<QueryResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub expressions: Vec<Expression>,
    #[serde(default)]
    pub bindings: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub value: serde_json::Value,
    pub text: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub row: usize,
    pub col: usize,
}

impl From<Location> for SourceLocation {
    fn from(loc: Location) -> Self {
        SourceLocation {
            row: loc.row,
            col: loc.col,
        }
    }
}

impl QueryResults {
    pub fn is_undefined(&self) -> bool {
        self.result.is_empty()
    }

    /// Value of the last expression of the first solution.
    pub fn first_value(&self) -> Option<&serde_json::Value> {
        self.result
            .first()
            .and_then(|r| r.expressions.last())
            .map(|e| &e.value)
    }
}
