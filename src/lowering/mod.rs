//! Lowering of a source graph into target layers and tensors.
//!
//! A single forward pass over the node list. Every handler reads operand
//! names through the [`NameResolver`], registers output shapes with the
//! [`Shaper`] and appends to the [`LoweredModel`] held by the
//! [`ConversionContext`].

pub mod conv;
pub mod fusion;
pub mod ingest;
pub mod names;
pub mod ops;

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::error::GraphError;
use crate::graph::{GraphInfo, Node};
use crate::model::{FuseCode, LoweredLayer, LoweredModel};
use crate::optimizer;
use crate::shape_inference::Shaper;
use crate::tensor::{LoweredTensor, RawTensor};

pub use names::NameResolver;

/// Knobs for [`compile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Run the graph optimizer (BatchNormalization folding) before lowering.
    pub optimize: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions { optimize: true }
    }
}

/// Result of a successful lowering pass.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub model: LoweredModel,
    pub shapes: Shaper,
}

/// Mutable state threaded through one conversion.
#[derive(Debug)]
pub struct ConversionContext<'g> {
    graph: &'g GraphInfo,
    pub(crate) names: NameResolver,
    pub(crate) shaper: Shaper,
    raw_tensors: HashMap<String, RawTensor>,
    initializer_names: HashSet<String>,
    materialized: HashSet<String>,
    fused_activations: HashSet<usize>,
    pub(crate) reshape_seen: bool,
    model: LoweredModel,
}

impl<'g> ConversionContext<'g> {
    pub fn new(graph: &'g GraphInfo) -> Self {
        ConversionContext {
            graph,
            names: NameResolver::new(),
            shaper: Shaper::new(),
            raw_tensors: HashMap::new(),
            initializer_names: HashSet::new(),
            materialized: HashSet::new(),
            fused_activations: HashSet::new(),
            reshape_seen: false,
            model: LoweredModel::default(),
        }
    }

    pub fn graph(&self) -> &'g GraphInfo {
        self.graph
    }

    pub fn resolve(&self, name: &str) -> String {
        self.names.resolve(name).to_string()
    }

    pub(crate) fn register_initializer(&mut self, name: &str, raw: Option<RawTensor>) {
        self.initializer_names.insert(name.to_string());
        if let Some(raw) = raw {
            self.raw_tensors.insert(name.to_string(), raw);
        }
    }

    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializer_names.contains(name)
    }

    /// Float initializer `name`, as read from the source graph.
    pub fn raw(&self, name: &str) -> Result<&RawTensor, GraphError> {
        self.raw_tensors
            .get(name)
            .ok_or_else(|| GraphError::missing_operand(name))
    }

    /// Append a tensor to the model and record its shape. A tensor whose
    /// name is already materialized is left as is.
    pub fn materialize(&mut self, tensor: LoweredTensor) {
        if !self.materialized.insert(tensor.name.clone()) {
            debug!("Tensor `{}` already materialized", tensor.name);
            return;
        }
        debug!("Materialized `{}` {:?}", tensor.name, tensor.shape);
        self.shaper.add_shape(&tensor.name, tensor.shape.clone());
        self.model.tensors.push(tensor);
    }

    pub(crate) fn add_input(&mut self, name: &str, shape: Vec<u32>) {
        self.shaper.add_shape(name, shape.clone());
        self.model.inputs.push(crate::model::GraphInput {
            name: name.to_string(),
            shape,
        });
    }

    /// Append a layer. Every operand it reads must already be known.
    pub fn push_layer(&mut self, layer: LoweredLayer) -> Result<(), GraphError> {
        for operand in layer.operands() {
            self.shaper.require(operand)?;
        }
        debug!(
            "{} -> `{}` {:?}",
            layer.layer_type(),
            layer.output(),
            self.shaper.get(layer.output())
        );
        self.model.layers.push(layer);
        Ok(())
    }

    /// Fuse code for `producer`, marking the fused activation node so the
    /// dispatch skips it later.
    ///
    /// When an activation is fused, the producer's output is aliased to the
    /// activation's output, so callers must resolve the producer's output
    /// name after this call for the layer to carry the activation's name.
    pub fn take_activation(&mut self, producer: &Node) -> FuseCode {
        let graph = self.graph;
        let Some(activation) = fusion::find_activation(graph, producer) else {
            return FuseCode::None;
        };
        let activation_node = &graph.nodes[activation.node_index];
        debug!(
            "Fusing `{}` into `{}`",
            activation_node.display_name(),
            producer.display_name()
        );
        if let (Some(from), Some(to)) = (producer.outputs.first(), activation_node.outputs.first()) {
            self.names.alias(from, to);
        }
        self.fused_activations.insert(activation.node_index);
        activation.fuse
    }

    pub fn is_fused(&self, node_index: usize) -> bool {
        self.fused_activations.contains(&node_index)
    }

    pub fn model(&self) -> &LoweredModel {
        &self.model
    }

    pub fn finish(self) -> Lowered {
        Lowered {
            model: self.model,
            shapes: self.shaper,
        }
    }
}

/// Lower `graph` as given, without running the optimizer.
pub fn lower_graph(graph: &GraphInfo) -> Result<Lowered, GraphError> {
    let mut ctx = ConversionContext::new(graph);
    ingest::ingest_graph(&mut ctx)?;

    for (index, node) in graph.nodes.iter().enumerate() {
        info!("Lowering {} `{}`", node.op_type, node.display_name());
        ops::lower_node(&mut ctx, index, node).map_err(|err| err.at_node(node))?;
    }

    let lowered = ctx.finish();
    info!(
        "Lowered `{}`: {} inputs, {} tensors, {} layers",
        graph.name,
        lowered.model.inputs.len(),
        lowered.model.tensors.len(),
        lowered.model.layers.len()
    );
    debug!("Operand shapes:\n{}", lowered.shapes);
    Ok(lowered)
}

/// Optimize (when enabled) and lower `graph`.
pub fn compile(graph: &GraphInfo, options: &ConvertOptions) -> Result<Lowered, GraphError> {
    if options.optimize {
        let optimized = optimizer::fuse_bn_into_conv(graph)?;
        lower_graph(&optimized)
    } else {
        lower_graph(graph)
    }
}
