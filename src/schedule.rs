use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::Graph;

/// A dependency cycle was found among the graph's nodes.
///
/// ONNX graphs are required to be acyclic, so this is a defensive check
/// rather than an expected path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CyclicGraphError {
    /// Names of the nodes that could not be ordered.
    pub nodes: Vec<String>,
}

impl fmt::Display for CyclicGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dependency cycle involving nodes: {}",
            self.nodes.join(", ")
        )
    }
}

impl Error for CyclicGraphError {}

/// Compute an execution order for the graph's nodes.
///
/// Returns indices into `graph.nodes` such that every node appears after all
/// nodes producing its inputs (Kahn's algorithm over the dependency edges
/// induced by tensor names). Ties among ready nodes are broken by declaration
/// order, so the result is deterministic.
///
/// Inputs that are graph inputs or initializers impose no ordering edge.
/// Unknown input names are ignored here; [`Graph::validate`] reports them.
pub fn execution_order(graph: &Graph) -> Result<Vec<usize>, CyclicGraphError> {
    // Map of tensor name -> producing node index.
    let mut producer: FxHashMap<&str, usize> = FxHashMap::default();
    for (index, node) in graph.nodes.iter().enumerate() {
        for output in &node.outputs {
            producer.insert(output, index);
        }
    }

    let mut in_degree = vec![0usize; graph.nodes.len()];
    let mut consumers: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (index, node) in graph.nodes.iter().enumerate() {
        for input in &node.inputs {
            if let Some(&dep) = producer.get(input.as_str()) {
                in_degree[index] += 1;
                consumers.entry(dep).or_default().push(index);
            }
        }
    }

    // Min-heap on node index: among ready nodes, the earliest-declared runs
    // first.
    let mut ready: BinaryHeap<Reverse<usize>> = (0..graph.nodes.len())
        .filter(|&index| in_degree[index] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        if let Some(next) = consumers.get(&index) {
            for &consumer in next {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    ready.push(Reverse(consumer));
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        let mut scheduled = vec![false; graph.nodes.len()];
        for &index in &order {
            scheduled[index] = true;
        }
        let nodes = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| !scheduled[*index])
            .map(|(_, node)| node.name.clone())
            .collect();
        return Err(CyclicGraphError { nodes });
    }

    Ok(order)
}
