//! Detection of activations that can be folded into the layer producing
//! their input.

use crate::graph::{GraphInfo, Node};
use crate::model::FuseCode;

/// Activation node selected for fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusedActivation {
    pub node_index: usize,
    pub fuse: FuseCode,
}

pub fn fuse_code(activation: Option<FusedActivation>) -> FuseCode {
    activation.map_or(FuseCode::None, |a| a.fuse)
}

/// Fuse code an activation op maps to, if it can be fused at all.
pub fn activation_fuse_code(node: &Node) -> Option<FuseCode> {
    match node.op_type.as_str() {
        "Relu" => Some(FuseCode::Relu),
        _ => None,
    }
}

/// Find the activation that consumes `producer`'s first output.
///
/// Fusion requires exactly one activation consumer and no other reader of
/// the producer's output, graph outputs included. With two or more
/// activation consumers each of them stays a standalone layer.
pub fn find_activation(graph: &GraphInfo, producer: &Node) -> Option<FusedActivation> {
    let output = producer.outputs.first()?;
    if output.is_empty() || graph.is_graph_output(output) {
        return None;
    }

    let mut found = None;
    for (index, consumer) in graph.consumers(output) {
        let fuse = match activation_fuse_code(consumer) {
            Some(fuse) if consumer.inputs.first() == Some(output) => fuse,
            _ => {
                log::debug!(
                    "`{}` also feeds `{}`, activation not fused",
                    output,
                    consumer.display_name()
                );
                return None;
            }
        };
        if found.is_some() {
            log::debug!(
                "`{}` feeds several activations, keeping them as separate layers",
                output
            );
            return None;
        }
        found = Some(FusedActivation {
            node_index: index,
            fuse,
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, ValueInfo};

    fn graph(nodes: Vec<Node>) -> GraphInfo {
        GraphInfo {
            nodes,
            ..Default::default()
        }
    }

    #[test]
    fn single_relu_is_fused() {
        let g = graph(vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("Relu", &["c"], &["r"]),
        ]);
        let found = find_activation(&g, &g.nodes[0]);
        assert_eq!(
            found,
            Some(FusedActivation {
                node_index: 1,
                fuse: FuseCode::Relu
            })
        );
    }

    #[test]
    fn no_consumer_means_no_fusion() {
        let g = graph(vec![Node::new("Conv", &["x", "w"], &["c"])]);
        assert_eq!(fuse_code(find_activation(&g, &g.nodes[0])), FuseCode::None);
    }

    #[test]
    fn two_relu_branches_are_not_fused() {
        let g = graph(vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("Relu", &["c"], &["r1"]),
            Node::new("Relu", &["c"], &["r2"]),
        ]);
        assert_eq!(find_activation(&g, &g.nodes[0]), None);
    }

    #[test]
    fn extra_non_activation_consumer_blocks_fusion() {
        let g = graph(vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("Relu", &["c"], &["r"]),
            Node::new("Add", &["r", "c"], &["s"]),
        ]);
        assert_eq!(find_activation(&g, &g.nodes[0]), None);
    }

    #[test]
    fn graph_output_blocks_fusion() {
        let mut g = graph(vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("Relu", &["c"], &["r"]),
        ]);
        g.outputs.push(ValueInfo::new("c", &[1, 8, 8, 8]));
        assert_eq!(find_activation(&g, &g.nodes[0]), None);
    }

    #[test]
    fn non_activation_ops_have_no_fuse_code() {
        assert_eq!(activation_fuse_code(&Node::new("Softmax", &["x"], &["y"])), None);
        assert_eq!(
            activation_fuse_code(&Node::new("Relu", &["x"], &["y"])),
            Some(FuseCode::Relu)
        );
    }
}
