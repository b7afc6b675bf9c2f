//! Topic co-occurrence graph and community detection.
//!
//! [`TopicGraph::build`] turns the topic sets of every stored repository
//! into a weighted undirected graph: a node per topic weighted by the
//! number of repositories carrying it, an edge per pair of topics weighted
//! by how many repositories carry both.
//!
//! Community detection is a capability ([`CommunityDetector`]) with two
//! implementations, [`Louvain`] and [`LabelPropagation`]. The algorithm is
//! chosen once from configuration via [`CommunityAlgorithm::detector`].
//! Both are deterministic: nodes are visited in index order and ties are
//! broken towards the smallest community index.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::Topics;

/// A topic and the number of repositories that carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicNode {
    pub name: String,
    pub weight: u64,
}

/// Undirected edge between two node indices, `source < target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicEdge {
    pub source: usize,
    pub target: usize,
    pub weight: u64,
}

/// Filtered co-occurrence graph. Nodes are ordered by weight (descending)
/// then name; edges by `(source, target)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicGraph {
    pub nodes: Vec<TopicNode>,
    pub edges: Vec<TopicEdge>,
}

impl TopicGraph {
    /// Build the graph from per-repository topic sets.
    ///
    /// Keeps nodes with weight `>= min_node`, then the `max_nodes`
    /// heaviest of those; keeps edges with weight `>= min_edge` whose
    /// endpoints both survived.
    pub fn build<'a, I>(topic_sets: I, min_node: u64, min_edge: u64, max_nodes: usize) -> Self
    where
        I: IntoIterator<Item = &'a Topics>,
    {
        let mut node_weights: HashMap<&'a str, u64> = HashMap::new();
        let mut edge_weights: HashMap<(&'a str, &'a str), u64> = HashMap::new();

        for topics in topic_sets {
            let tags: Vec<&'a str> = topics.iter().collect();
            for (i, &a) in tags.iter().enumerate() {
                *node_weights.entry(a).or_insert(0) += 1;
                for &b in &tags[i + 1..] {
                    let key = if a < b { (a, b) } else { (b, a) };
                    *edge_weights.entry(key).or_insert(0) += 1;
                }
            }
        }

        let mut nodes: Vec<TopicNode> = node_weights
            .into_iter()
            .filter(|(_, w)| *w >= min_node)
            .map(|(name, weight)| TopicNode {
                name: name.to_string(),
                weight,
            })
            .collect();
        nodes.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
        nodes.truncate(max_nodes);

        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();

        let mut edges: Vec<TopicEdge> = edge_weights
            .into_iter()
            .filter(|(_, w)| *w >= min_edge)
            .filter_map(|((a, b), weight)| {
                let (ia, ib) = (*index.get(a)?, *index.get(b)?);
                Some(TopicEdge {
                    source: ia.min(ib),
                    target: ia.max(ib),
                    weight,
                })
            })
            .collect();
        edges.sort_by_key(|e| (e.source, e.target));

        TopicGraph { nodes, edges }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for e in &self.edges {
            if e.source == e.target {
                continue;
            }
            adj[e.source].push((e.target, e.weight as f64));
            adj[e.target].push((e.source, e.weight as f64));
        }
        adj
    }
}

/// Community index per node, dense and numbered in order of first
/// appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Communities {
    pub membership: Vec<usize>,
    pub count: usize,
}

impl Communities {
    fn from_labels(labels: &[usize]) -> Self {
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let membership: Vec<usize> = labels
            .iter()
            .map(|l| {
                let next = remap.len();
                *remap.entry(*l).or_insert(next)
            })
            .collect();
        Communities {
            membership,
            count: remap.len(),
        }
    }
}

pub trait CommunityDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, graph: &TopicGraph) -> Communities;
}

/// Which [`CommunityDetector`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunityAlgorithm {
    #[default]
    Louvain,
    LabelPropagation,
}

impl CommunityAlgorithm {
    pub fn detector(self) -> Box<dyn CommunityDetector> {
        match self {
            CommunityAlgorithm::Louvain => Box::new(Louvain),
            CommunityAlgorithm::LabelPropagation => Box::new(LabelPropagation::default()),
        }
    }
}

impl FromStr for CommunityAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "louvain" => Ok(CommunityAlgorithm::Louvain),
            "label_propagation" => Ok(CommunityAlgorithm::LabelPropagation),
            other => bail!(
                "unknown community algorithm '{}': expected louvain or label_propagation",
                other
            ),
        }
    }
}

impl fmt::Display for CommunityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunityAlgorithm::Louvain => f.write_str("louvain"),
            CommunityAlgorithm::LabelPropagation => f.write_str("label_propagation"),
        }
    }
}

// ============ Louvain ============

const MAX_LOCAL_PASSES: usize = 100;
const MIN_GAIN: f64 = 1e-12;

/// Multi-level weighted modularity optimization.
///
/// Each level moves nodes one at a time into the neighboring community
/// with the largest modularity gain until no move improves it, then
/// collapses communities into super-nodes and repeats.
#[derive(Debug, Clone, Copy, Default)]
pub struct Louvain;

struct Level {
    adj: Vec<Vec<(usize, f64)>>,
    /// Internal weight folded into each super-node.
    loops: Vec<f64>,
}

impl Level {
    fn degree(&self, i: usize) -> f64 {
        self.adj[i].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.loops[i]
    }

    /// Local moving phase. Returns the community of each node and whether
    /// any node moved.
    fn local_moves(&self) -> (Vec<usize>, bool) {
        let n = self.adj.len();
        let mut comm: Vec<usize> = (0..n).collect();
        let k: Vec<f64> = (0..n).map(|i| self.degree(i)).collect();
        let m2: f64 = k.iter().sum();
        if m2 <= 0.0 {
            return (comm, false);
        }
        let mut tot = k.clone();
        let mut improved = false;

        for _ in 0..MAX_LOCAL_PASSES {
            let mut moved = false;
            for i in 0..n {
                let current = comm[i];
                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(j, w) in &self.adj[i] {
                    *links.entry(comm[j]).or_insert(0.0) += w;
                }

                tot[current] -= k[i];
                let mut best = current;
                let mut best_gain =
                    links.get(&current).copied().unwrap_or(0.0) - tot[current] * k[i] / m2;
                for (&c, &w) in &links {
                    if c == current {
                        continue;
                    }
                    let gain = w - tot[c] * k[i] / m2;
                    if gain > best_gain + MIN_GAIN {
                        best = c;
                        best_gain = gain;
                    }
                }
                tot[best] += k[i];
                comm[i] = best;
                if best != current {
                    moved = true;
                    improved = true;
                }
            }
            if !moved {
                break;
            }
        }

        (comm, improved)
    }

    /// Collapse each community into one node.
    fn aggregate(&self, membership: &[usize], count: usize) -> Level {
        let mut loops = vec![0.0; count];
        let mut between: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (i, neighbors) in self.adj.iter().enumerate() {
            let ci = membership[i];
            loops[ci] += self.loops[i];
            for &(j, w) in neighbors {
                if i >= j {
                    continue;
                }
                let cj = membership[j];
                if ci == cj {
                    loops[ci] += w;
                } else {
                    *between.entry((ci.min(cj), ci.max(cj))).or_insert(0.0) += w;
                }
            }
        }
        let mut adj = vec![Vec::new(); count];
        for ((a, b), w) in between {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        Level { adj, loops }
    }
}

impl CommunityDetector for Louvain {
    fn name(&self) -> &'static str {
        "louvain"
    }

    fn detect(&self, graph: &TopicGraph) -> Communities {
        let n = graph.node_count();
        let mut level = Level {
            adj: graph.adjacency(),
            loops: vec![0.0; n],
        };
        let mut assignment: Vec<usize> = (0..n).collect();

        loop {
            let (comm, improved) = level.local_moves();
            if !improved {
                break;
            }
            let dense = Communities::from_labels(&comm);
            for a in assignment.iter_mut() {
                *a = dense.membership[*a];
            }
            level = level.aggregate(&dense.membership, dense.count);
        }

        Communities::from_labels(&assignment)
    }
}

// ============ Label propagation ============

/// Asynchronous weighted label propagation.
///
/// Each node adopts the label with the largest total edge weight among
/// its neighbors. A node keeps its current label when it is among the
/// heaviest; otherwise the smallest heaviest label wins.
#[derive(Debug, Clone, Copy)]
pub struct LabelPropagation {
    pub max_iterations: usize,
}

impl Default for LabelPropagation {
    fn default() -> Self {
        Self {
            max_iterations: 100,
        }
    }
}

impl CommunityDetector for LabelPropagation {
    fn name(&self) -> &'static str {
        "label_propagation"
    }

    fn detect(&self, graph: &TopicGraph) -> Communities {
        let adj = graph.adjacency();
        let mut labels: Vec<usize> = (0..adj.len()).collect();

        for _ in 0..self.max_iterations {
            let mut changed = false;
            for i in 0..adj.len() {
                if adj[i].is_empty() {
                    continue;
                }
                let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
                for &(j, w) in &adj[i] {
                    *weights.entry(labels[j]).or_insert(0.0) += w;
                }
                let max = weights.values().cloned().fold(f64::MIN, f64::max);
                let current_weight = weights.get(&labels[i]).copied().unwrap_or(0.0);
                if current_weight >= max {
                    continue;
                }
                if let Some((&label, _)) = weights.iter().find(|(_, w)| **w >= max) {
                    labels[i] = label;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Communities::from_labels(&labels)
    }
}

// ============ Chart data contract ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityNode {
    pub name: String,
    pub value: u64,
    #[serde(rename = "symbolSize")]
    pub symbol_size: f64,
    pub category: usize,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityLink {
    pub source: String,
    pub target: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityCategory {
    pub name: String,
}

/// Force-layout graph payload: nodes tagged with their community.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityGraph {
    pub algorithm: String,
    pub nodes: Vec<CommunityNode>,
    pub links: Vec<CommunityLink>,
    pub categories: Vec<CommunityCategory>,
}

impl CommunityGraph {
    pub fn detect(graph: &TopicGraph, detector: &dyn CommunityDetector) -> Self {
        let communities = detector.detect(graph);
        let colors = palette(communities.count);

        let nodes = graph
            .nodes
            .iter()
            .zip(&communities.membership)
            .map(|(node, &category)| CommunityNode {
                name: node.name.clone(),
                value: node.weight,
                symbol_size: symbol_size(node.weight),
                category,
                color: colors[category].clone(),
            })
            .collect();

        let links = graph
            .edges
            .iter()
            .map(|e| CommunityLink {
                source: graph.nodes[e.source].name.clone(),
                target: graph.nodes[e.target].name.clone(),
                value: e.weight,
            })
            .collect();

        let categories = (0..communities.count)
            .map(|i| CommunityCategory {
                name: format!("community {}", i),
            })
            .collect();

        CommunityGraph {
            algorithm: detector.name().to_string(),
            nodes,
            links,
            categories,
        }
    }
}

/// Marker size for a node of the given weight, capped at 50.
pub fn symbol_size(weight: u64) -> f64 {
    (weight as f64 / 100.0 + 10.0).min(50.0)
}

/// `n` hex colors spread evenly around the hue circle.
pub fn palette(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let (r, g, b) = hsv_to_rgb(i as f64 / n as f64, 0.7, 0.9);
            format!(
                "#{:02x}{:02x}{:02x}",
                (r * 255.0) as u8,
                (g * 255.0) as u8,
                (b * 255.0) as u8
            )
        })
        .collect()
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(tags: &[&str]) -> Topics {
        tags.iter().copied().collect()
    }

    /// Two triangles {a,b,c} and {x,y,z} with no edge between them.
    fn two_cliques() -> TopicGraph {
        let node = |name: &str| TopicNode {
            name: name.to_string(),
            weight: 10,
        };
        let edge = |source, target| TopicEdge {
            source,
            target,
            weight: 1,
        };
        TopicGraph {
            nodes: ["a", "b", "c", "x", "y", "z"].into_iter().map(node).collect(),
            edges: vec![
                edge(0, 1),
                edge(0, 2),
                edge(1, 2),
                edge(3, 4),
                edge(3, 5),
                edge(4, 5),
            ],
        }
    }

    #[test]
    fn build_counts_nodes_and_cooccurrence() {
        let sets = vec![
            topics(&["rust", "cli"]),
            topics(&["rust", "cli", "async"]),
            topics(&["rust", "web"]),
            topics(&[]),
        ];
        let graph = TopicGraph::build(&sets, 1, 1, 10);

        assert_eq!(graph.nodes[0], TopicNode { name: "rust".into(), weight: 3 });
        assert_eq!(graph.nodes[1], TopicNode { name: "cli".into(), weight: 2 });
        let rust_cli = graph
            .edges
            .iter()
            .find(|e| e.source == 0 && e.target == 1)
            .unwrap();
        assert_eq!(rust_cli.weight, 2);
    }

    #[test]
    fn build_applies_thresholds_and_node_cap() {
        let sets = vec![
            topics(&["rust", "cli"]),
            topics(&["rust", "cli", "async"]),
            topics(&["rust", "web"]),
        ];
        let graph = TopicGraph::build(&sets, 2, 2, 10);
        let names: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["rust", "cli"]);
        assert_eq!(graph.edges.len(), 1);

        let capped = TopicGraph::build(&sets, 1, 1, 1);
        assert_eq!(capped.nodes.len(), 1);
        assert!(capped.edges.is_empty());
    }

    #[test]
    fn louvain_separates_disjoint_cliques() {
        let communities = Louvain.detect(&two_cliques());
        assert_eq!(communities.membership, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(communities.count, 2);
    }

    #[test]
    fn label_propagation_separates_disjoint_cliques() {
        let communities = LabelPropagation::default().detect(&two_cliques());
        assert_eq!(communities.membership, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(communities.count, 2);
    }

    #[test]
    fn louvain_merges_levels_on_bridged_cliques() {
        // Two 4-cliques joined by a single light edge.
        let mut graph = TopicGraph::default();
        for i in 0..8 {
            graph.nodes.push(TopicNode { name: format!("t{}", i), weight: 1 });
        }
        for block in [0usize, 4] {
            for i in block..block + 4 {
                for j in i + 1..block + 4 {
                    graph.edges.push(TopicEdge { source: i, target: j, weight: 5 });
                }
            }
        }
        graph.edges.push(TopicEdge { source: 3, target: 4, weight: 1 });

        let communities = Louvain.detect(&graph);
        assert_eq!(communities.count, 2);
        assert_eq!(communities.membership, vec![0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn isolated_nodes_get_their_own_community() {
        let graph = TopicGraph {
            nodes: (0..3)
                .map(|i| TopicNode { name: format!("t{}", i), weight: 1 })
                .collect(),
            edges: vec![],
        };
        assert_eq!(Louvain.detect(&graph).count, 3);
        assert_eq!(LabelPropagation::default().detect(&graph).count, 3);
    }

    #[test]
    fn community_graph_contract() {
        let graph = two_cliques();
        let chart = CommunityGraph::detect(&graph, &Louvain);
        assert_eq!(chart.algorithm, "louvain");
        assert_eq!(chart.categories.len(), 2);
        assert_eq!(chart.categories[1].name, "community 1");
        assert_eq!(chart.links[0].source, "a");
        assert_eq!(chart.links[0].target, "b");
        assert_eq!(chart.nodes[3].category, 1);
        assert!(chart.nodes[0].color.starts_with('#'));

        let json = serde_json::to_value(&chart).unwrap();
        assert_eq!(json["nodes"][0]["symbolSize"], 10.1);
    }

    #[test]
    fn symbol_size_is_capped() {
        assert_eq!(symbol_size(0), 10.0);
        assert_eq!(symbol_size(1500), 25.0);
        assert_eq!(symbol_size(100_000), 50.0);
    }

    #[test]
    fn algorithm_names_round_trip() {
        for alg in [CommunityAlgorithm::Louvain, CommunityAlgorithm::LabelPropagation] {
            assert_eq!(alg.to_string().parse::<CommunityAlgorithm>().unwrap(), alg);
            assert_eq!(alg.detector().name(), alg.to_string());
        }
        assert!("fast_greedy".parse::<CommunityAlgorithm>().is_err());
    }
}
