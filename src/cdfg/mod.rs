//! The target-agnostic control/data-flow graph.
//!
//! Output of the front end: operation-tagged nodes with fixed-arity operand
//! slots, pure ordering dependencies, controller/decision pairs, the
//! projected loop forest and the alias-candidate map. The external spatial
//! scheduler consumes this graph; nothing here knows fabric geometry.

mod node;
pub(crate) mod project;

pub use node::{CdfgNode, NodeId, Operator};
pub use project::project;

use std::collections::HashMap;
use std::fmt::Write as _;

/// One loop of the projected forest.
#[derive(Debug, Clone)]
pub struct CdfgLoop {
    /// First body address.
    pub start: i32,
    /// Address of the closing backward jump.
    pub stop: i32,
    /// Decision node controlling the exit.
    pub controller: Option<NodeId>,
    /// Enclosing loop index.
    pub parent: Option<usize>,
    /// Contained loop indices.
    pub children: Vec<usize>,
}

/// The projected loop forest.
#[derive(Debug, Clone, Default)]
pub struct CdfgLoopForest {
    /// Loops, outermost first.
    pub loops: Vec<CdfgLoop>,
}

impl CdfgLoopForest {
    /// DOT rendering of the nesting forest.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph loops {\n");
        for (i, lp) in self.loops.iter().enumerate() {
            let label = format!("loop {} [{}, {})", i, lp.start, lp.stop);
            match lp.parent {
                Some(p) => {
                    let parent = &self.loops[p];
                    let _ = writeln!(
                        dot,
                        "    \"loop {} [{}, {})\" -> \"{label}\";",
                        p, parent.start, parent.stop
                    );
                }
                None => {
                    let _ = writeln!(dot, "    \"{label}\";");
                }
            }
        }
        dot.push_str("}\n");
        dot
    }
}

/// The projected graph.
#[derive(Debug, Default)]
pub struct Cdfg {
    nodes: Vec<CdfgNode>,
    control_deps: HashMap<NodeId, Vec<NodeId>>,
}

impl Cdfg {
    /// Adds a node.
    pub fn add_node(&mut self, node: CdfgNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Shared access to a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &CdfgNode {
        &self.nodes[id.index()]
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut CdfgNode {
        &mut self.nodes[id.index()]
    }

    /// All node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wires `producer` into operand slot `slot` of `consumer`.
    pub fn set_data_dependency(&mut self, producer: NodeId, consumer: NodeId, slot: usize) {
        let preds = &mut self.nodes[consumer.index()].predecessors;
        if slot >= preds.len() {
            preds.resize(slot + 1, None);
        }
        preds[slot] = Some(producer);
    }

    /// Records a pure ordering dependency.
    pub fn set_control_dependency(&mut self, before: NodeId, after: NodeId) {
        let deps = self.control_deps.entry(before).or_default();
        if !deps.contains(&after) {
            deps.push(after);
        }
    }

    /// Ordering successors of a node.
    #[must_use]
    pub fn control_deps(&self, id: NodeId) -> &[NodeId] {
        self.control_deps.get(&id).map_or(&[], Vec::as_slice)
    }

    /// DOT rendering; ordering edges dashed.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph cdfg {\n    node [fontname=\"Courier\"];\n");
        let label = |id: NodeId| {
            let n = self.node(id);
            match n.value {
                Some(v) => format!("n{} {}:{} [{}]", id.index(), n.addr, n.op, v),
                None => format!("n{} {}:{}", id.index(), n.addr, n.op),
            }
        };
        for id in self.node_ids() {
            for (slot, pred) in self.node(id).predecessors.iter().enumerate() {
                if let Some(pred) = pred {
                    let _ = writeln!(
                        dot,
                        "    \"{}\" -> \"{}\" [label=\"{slot}\"];",
                        label(*pred),
                        label(id)
                    );
                }
            }
            for dep in self.control_deps(id) {
                let _ = writeln!(
                    dot,
                    "    \"{}\" -> \"{}\" [style=dashed];",
                    label(id),
                    label(*dep)
                );
            }
        }
        dot.push_str("}\n");
        dot
    }
}
