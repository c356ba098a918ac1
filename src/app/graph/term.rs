//! Terminal tree export: a breadth-first walk of the graph rooted at the seed.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use super::Graph;

pub fn render(graph: &Graph) -> String {
    let mut children: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for edge in graph.edges() {
        children
            .entry(edge.from.as_str())
            .or_default()
            .push((edge.to.as_str(), edge.label.as_str()));
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", graph.seed());
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(graph.seed());
    render_children(graph.seed(), &children, &mut visited, "", &mut out);

    // Nodes unreachable from the seed (e.g. PTR hostnames of shared IPs)
    // still show up, each under its own root.
    let reachable = visited.clone();
    for &from in children.keys() {
        if !reachable.contains(from) && visited.insert(from) {
            let _ = writeln!(out, "{}", from);
            render_children(from, &children, &mut visited, "", &mut out);
        }
    }

    out
}

fn render_children<'a>(
    node: &str,
    children: &BTreeMap<&'a str, Vec<(&'a str, &'a str)>>,
    visited: &mut HashSet<&'a str>,
    prefix: &str,
    out: &mut String,
) {
    let edges = match children.get(node) {
        Some(edges) => edges,
        None => return,
    };

    for (index, &(to, label)) in edges.iter().enumerate() {
        let last = index == edges.len() - 1;
        let branch = if last { "└── " } else { "├── " };
        let _ = writeln!(out, "{}{}{} [{}]", prefix, branch, to, label);

        if visited.insert(to) {
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            render_children(to, children, visited, &child_prefix, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::app::graph::Graph;
    use crate::probe::dns::{DnsResolution, RData, Record, RecordType};
    use crate::probe::Resolution;

    use spectral::prelude::*;

    #[test]
    fn renders_a_tree_rooted_at_the_seed() {
        let mut graph = Graph::new("example.com");
        let mut dns = DnsResolution::new("example.com", "local resolver");
        dns.add_record(
            RecordType::NS,
            Record::new("example.com", RecordType::NS, 300, RData::NS("ns1.example.com".to_string())),
        );
        graph.record(&Resolution::Dns(dns));

        let rendered = render(&graph);

        assert_that(&rendered.starts_with("example.com\n")).is_true();
        assert_that(&rendered.contains("└── ns1.example.com [DNS/NS]")).is_true();
    }
}
