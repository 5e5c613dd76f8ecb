//! Graph-level rewrites applied before lowering.

use std::collections::HashSet;

use log::{debug, info};

use crate::error::GraphError;
use crate::graph::{GraphInfo, Initializer, Node};
use crate::tensor::RawTensor;

/// Parameters of a BatchNormalization folded into the preceding Conv.
struct FoldedConv {
    conv_index: usize,
    bn_index: usize,
    node: Node,
    weight: Initializer,
    bias: Initializer,
}

fn float_initializer(graph: &GraphInfo, name: &str) -> Result<Option<RawTensor>, GraphError> {
    match graph.initializer(name) {
        Some(init) => init.to_raw_tensor(),
        None => Ok(None),
    }
}

/// Fold every `Conv -> BatchNormalization` pair whose parameters are all
/// constant into a single Conv with rescaled weight and bias.
///
/// The input graph is left untouched; a rewritten copy is returned.
pub fn fuse_bn_into_conv(graph: &GraphInfo) -> Result<GraphInfo, GraphError> {
    let mut folded = Vec::new();
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.op_type != "Conv" {
            continue;
        }
        if let Some(fold) = fold_batch_norm(graph, index, node)? {
            folded.push(fold);
        }
    }

    let mut optimized = graph.clone();
    if folded.is_empty() {
        return Ok(optimized);
    }

    let mut removed = HashSet::new();
    for fold in folded {
        info!(
            "Fused `{}` into Conv `{}`",
            graph.nodes[fold.bn_index].display_name(),
            fold.node.display_name()
        );
        optimized.nodes[fold.conv_index] = fold.node;
        optimized.initializers.push(fold.weight);
        optimized.initializers.push(fold.bias);
        removed.insert(fold.bn_index);
    }
    optimized.nodes = optimized
        .nodes
        .into_iter()
        .enumerate()
        .filter(|(index, _)| !removed.contains(index))
        .map(|(_, node)| node)
        .collect();
    Ok(optimized)
}

fn fold_batch_norm(
    graph: &GraphInfo,
    conv_index: usize,
    conv: &Node,
) -> Result<Option<FoldedConv>, GraphError> {
    let Some(conv_output) = conv.outputs.first() else {
        return Ok(None);
    };
    if graph.is_graph_output(conv_output) {
        return Ok(None);
    }
    let consumers: Vec<_> = graph.consumers(conv_output).collect();
    let &[(bn_index, bn)] = consumers.as_slice() else {
        return Ok(None);
    };
    if bn.op_type != "BatchNormalization" || bn.inputs.first() != Some(conv_output) {
        return Ok(None);
    }
    if bn.outputs.iter().skip(1).any(|name| !name.is_empty()) {
        debug!("`{}` exposes training outputs, not fused", bn.display_name());
        return Ok(None);
    }

    let Some(weight) = float_initializer(graph, conv.input(1)?)? else {
        return Ok(None);
    };
    let bias = match conv.optional_input(2) {
        Some(name) => match float_initializer(graph, name)? {
            Some(bias) => Some(bias),
            None => return Ok(None),
        },
        None => None,
    };
    let mut params = Vec::with_capacity(4);
    for index in 1..=4 {
        match float_initializer(graph, bn.input(index)?)? {
            Some(tensor) => params.push(tensor),
            None => return Ok(None),
        }
    }
    let [scale, shift, mean, var] = [&params[0], &params[1], &params[2], &params[3]];

    let out_channels = weight.shape().first().copied().unwrap_or(0) as usize;
    let per_channel = [scale, shift, mean, var]
        .iter()
        .chain(bias.as_ref().iter())
        .all(|t| t.data().len() == out_channels);
    if out_channels == 0 || !per_channel {
        debug!(
            "`{}` parameters do not match {} output channels, not fused",
            bn.display_name(),
            out_channels
        );
        return Ok(None);
    }

    let epsilon = bn.get_float("epsilon", 1e-5)?;
    let factors: Vec<f32> = scale
        .data()
        .iter()
        .zip(var.data())
        .map(|(s, v)| s / (v + epsilon).sqrt())
        .collect();

    let per_output = weight.data().len() / out_channels;
    let weight_data: Vec<f32> = weight
        .data()
        .iter()
        .enumerate()
        .map(|(i, w)| w * factors[i / per_output])
        .collect();
    let bias_data: Vec<f32> = (0..out_channels)
        .map(|o| {
            let b = bias.as_ref().map_or(0.0, |b| b.data()[o]);
            (b - mean.data()[o]) * factors[o] + shift.data()[o]
        })
        .collect();

    let bn_output = bn.output(0)?;
    let weight_name = format!("{}_bn_fused_w", bn_output);
    let bias_name = format!("{}_bn_fused_b", bn_output);

    let mut node = conv.clone();
    node.inputs = vec![conv.input(0)?.to_string(), weight_name.clone(), bias_name.clone()];
    node.outputs = vec![bn_output.to_string()];

    Ok(Some(FoldedConv {
        conv_index,
        bn_index,
        node,
        weight: Initializer::float32(&weight_name, weight.shape(), weight_data),
        bias: Initializer::float32(&bias_name, &[out_channels as u32], bias_data),
    }))
}
