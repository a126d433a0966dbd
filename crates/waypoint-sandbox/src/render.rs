//! Render operations.
//!
//! Scripts build widget output by appending render operations; the order of
//! `render.*` calls is preserved exactly.

use serde::{Deserialize, Serialize};

/// Plot flavors supported by `render.plot.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    Bar,
    Line,
    Pie,
    Multi,
}

/// Table payload for `render.table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// One ordered output operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RenderOp {
    /// Markdown text block
    Markdown { content: String },
    /// Tabular data
    Table { table: TableSpec },
    /// Raw JSON payload
    Json { value: serde_json::Value },
    /// Plot specification, passed through to the client untouched
    Plot {
        kind: PlotKind,
        spec: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_op_wire_shape() {
        let op = RenderOp::Markdown {
            content: "# Weekly".into(),
        };
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["type"], "markdown");
        assert_eq!(json["content"], "# Weekly");

        let op = RenderOp::Plot {
            kind: PlotKind::Bar,
            spec: json!({"x": [1, 2], "y": [3, 4]}),
        };
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["type"], "plot");
        assert_eq!(json["kind"], "bar");
    }
}
