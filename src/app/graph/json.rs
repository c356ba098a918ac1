//! JSON export of the discovery graph.

use serde::Serialize;

use super::{Graph, NodeKind};

#[derive(Serialize)]
struct JsonNode<'a> {
    id: &'a str,
    kind: NodeKind,
}

#[derive(Serialize)]
struct JsonGraph<'a> {
    seed: &'a str,
    nodes: Vec<JsonNode<'a>>,
    edges: Vec<&'a super::Edge>,
}

pub fn render(graph: &Graph) -> String {
    let doc = JsonGraph {
        seed: graph.seed(),
        nodes: graph
            .nodes()
            .iter()
            .map(|(id, kind)| JsonNode { id, kind: *kind })
            .collect(),
        edges: graph.edges().iter().collect(),
    };

    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
}
