//! Graphviz DOT export.

use std::fmt::Write;

use super::{Graph, NodeKind};

pub fn render(graph: &Graph) -> String {
    let mut out = String::new();

    out.push_str("digraph deepdig {\n");
    out.push_str("    graph [rankdir=LR, bgcolor=\"#1E1E2E\", pad=0.5, ranksep=1.2, nodesep=0.4, splines=true];\n");
    out.push_str("    node [style=filled, fontname=\"Helvetica\", fontcolor=\"#1E1E2E\"];\n");
    out.push_str("    edge [fontname=\"Helvetica\", fontsize=10];\n");

    for (id, kind) in graph.nodes() {
        let (shape, color) = node_style(*kind);
        let _ = writeln!(out, "    {} [shape={}, fillcolor=\"{}\"];", quote(id), shape, color);
    }
    for edge in graph.edges() {
        let color = edge_color(&edge.label);
        let _ = writeln!(
            out,
            "    {} -> {} [label={}, color=\"{}\", fontcolor=\"{}\"];",
            quote(&edge.from),
            quote(&edge.to),
            quote(&edge.label),
            color,
            color
        );
    }
    out.push_str("}\n");

    out
}

fn node_style(kind: NodeKind) -> (&'static str, &'static str) {
    match kind {
        NodeKind::Domain => ("box", "#89B4FA"),
        NodeKind::Ip => ("ellipse", "#FAB387"),
        NodeKind::Asn => ("hexagon", "#A6E3A1"),
        NodeKind::Country => ("circle", "#CBA6F7"),
        NodeKind::Whois => ("note", "#9399B2"),
    }
}

fn edge_color(label: &str) -> &'static str {
    if label.starts_with("DNS/") {
        "#89B4FA"
    } else if label.starts_with("TLS/") {
        "#94E2D5"
    } else if label == "CT" {
        "#FAB387"
    } else if label.starts_with("HTTP/") {
        "#74C7EC"
    } else if label.starts_with("BGP") {
        "#A6E3A1"
    } else if label == "GEO" {
        "#CBA6F7"
    } else {
        "#6C7086"
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    use spectral::prelude::*;

    #[test]
    fn quotes_are_escaped() {
        assert_that(&quote("a\"b")).is_equal_to("\"a\\\"b\"".to_string());
    }
}
