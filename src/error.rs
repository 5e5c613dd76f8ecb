use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::graph::Node;

/// Node an error was raised for. Left empty by code below the dispatch
/// level and filled in by [`GraphError::at_node`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContext {
    pub op_type: String,
    pub node: String,
}

impl NodeContext {
    pub fn is_empty(&self) -> bool {
        self.op_type.is_empty() && self.node.is_empty()
    }
}

impl fmt::Display for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(f, " in `{}` node `{}`", self.op_type, self.node)
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unsupported operator `{op_type}` (node `{node}`)")]
    UnsupportedOperator { op_type: String, node: String },
    #[error("unsupported configuration for `{op_type}` (node `{node}`): {reason}")]
    UnsupportedConfiguration {
        op_type: String,
        node: String,
        reason: String,
    },
    #[error("operand `{name}` is not available{context}")]
    MissingOperand { name: String, context: NodeContext },
    #[error("malformed input `{name}`{context}: {reason}")]
    MalformedInput {
        name: String,
        reason: String,
        context: NodeContext,
    },
    #[error("shape mismatch for `{name}`{context}: {reason}")]
    ShapeMismatch {
        name: String,
        reason: String,
        context: NodeContext,
    },
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to parse graph description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported graph file format `{extension}`")]
    UnsupportedGraphFormat { extension: String },
    #[error("no converter registered for format `{format}`")]
    UnsupportedFormat { format: String },
    #[error("conversion to `{format}` failed: {reason}")]
    ConversionFailed { format: String, reason: String },
}

impl GraphError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Export {
            path: path.into(),
            source,
        }
    }

    /// Attach the node being lowered to errors raised below the dispatch
    /// level, which do not know which node they serve.
    pub fn at_node(self, node: &Node) -> Self {
        let attach = |context: NodeContext| {
            if context.is_empty() {
                NodeContext {
                    op_type: node.op_type.clone(),
                    node: node.display_name(),
                }
            } else {
                context
            }
        };
        match self {
            GraphError::MissingOperand { name, context } => GraphError::MissingOperand {
                name,
                context: attach(context),
            },
            GraphError::MalformedInput {
                name,
                reason,
                context,
            } => GraphError::MalformedInput {
                name,
                reason,
                context: attach(context),
            },
            GraphError::ShapeMismatch {
                name,
                reason,
                context,
            } => GraphError::ShapeMismatch {
                name,
                reason,
                context: attach(context),
            },
            other => other,
        }
    }

    pub fn missing_operand(name: impl Into<String>) -> Self {
        GraphError::MissingOperand {
            name: name.into(),
            context: NodeContext::default(),
        }
    }

    /// Node context of a lowering error, when one was attached.
    pub fn node_context(&self) -> Option<&NodeContext> {
        match self {
            GraphError::MissingOperand { context, .. }
            | GraphError::MalformedInput { context, .. }
            | GraphError::ShapeMismatch { context, .. } if !context.is_empty() => Some(context),
            _ => None,
        }
    }

    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::MalformedInput {
            name: name.into(),
            reason: reason.into(),
            context: NodeContext::default(),
        }
    }

    pub fn shape_mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::ShapeMismatch {
            name: name.into(),
            reason: reason.into(),
            context: NodeContext::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_node_names_operator_and_node() {
        let node = Node::new("Conv", &["x", "w"], &["y"]).named("conv_bad");
        let err = GraphError::shape_mismatch("y", "input has 3 channels but weight expects 5")
            .at_node(&node);
        assert_eq!(
            err.to_string(),
            "shape mismatch for `y` in `Conv` node `conv_bad`: \
             input has 3 channels but weight expects 5"
        );
        let context = err.node_context().unwrap();
        assert_eq!(context.op_type, "Conv");
        assert_eq!(context.node, "conv_bad");
    }

    #[test]
    fn test_at_node_keeps_existing_context() {
        let inner = Node::new("Conv", &["x"], &["y"]).named("inner");
        let outer = Node::new("Relu", &["y"], &["z"]).named("outer");
        let err = GraphError::missing_operand("w").at_node(&inner).at_node(&outer);
        assert_eq!(err.node_context().unwrap().node, "inner");
    }

    #[test]
    fn test_errors_without_node_render_plainly() {
        let err = GraphError::malformed("x", "dimension 1 is symbolic");
        assert!(err.node_context().is_none());
        assert_eq!(err.to_string(), "malformed input `x`: dimension 1 is symbolic");
    }
}
