//! Per-operator lowering handlers.

use std::str::FromStr;

use log::{debug, warn};
use strum::{Display, EnumString};

use super::ConversionContext;
use super::conv::{ConvOperands, ConvParams, lower_conv};
use crate::error::GraphError;
use crate::graph::Node;
use crate::model::LoweredLayer;
use crate::tensor::LoweredTensor;

/// Source operators the lowering understands.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, EnumString, Display)]
pub enum OpType {
    Conv,
    AveragePool,
    MaxPool,
    GlobalAveragePool,
    GlobalMaxPool,
    Relu,
    Add,
    Gemm,
    Softmax,
    Concat,
    Dropout,
    Reshape,
}

/// ONNX NCHW axis to its NHWC position.
const NCHW_TO_NHWC_AXIS: [usize; 4] = [0, 3, 1, 2];

fn unsupported(node: &Node, reason: impl Into<String>) -> GraphError {
    GraphError::UnsupportedConfiguration {
        op_type: node.op_type.clone(),
        node: node.display_name(),
        reason: reason.into(),
    }
}

/// Read an integer list attribute of exactly `N` entries as `i32`s.
fn int_array<const N: usize>(
    node: &Node,
    name: &str,
    default: [i64; N],
) -> Result<[i32; N], GraphError> {
    let values = node.get_ints(name, &default)?;
    if values.len() != N {
        return Err(GraphError::malformed(
            node.display_name(),
            format!(
                "attribute `{}` needs {} values, got {:?}",
                name, N, values
            ),
        ));
    }
    let mut out = [0i32; N];
    for (slot, value) in out.iter_mut().zip(&values) {
        *slot = i32::try_from(*value).map_err(|_| {
            GraphError::malformed(
                node.display_name(),
                format!("attribute `{}` value {} does not fit in 32 bits", name, value),
            )
        })?;
    }
    Ok(out)
}

fn reject_attr(node: &Node, name: &str, rejected: i64, default: i64) -> Result<(), GraphError> {
    if node.get_int(name, default)? == rejected {
        return Err(unsupported(
            node,
            format!("`{}` = {} is not supported", name, rejected),
        ));
    }
    Ok(())
}

/// Dispatch a single node.
pub fn lower_node(
    ctx: &mut ConversionContext<'_>,
    index: usize,
    node: &Node,
) -> Result<(), GraphError> {
    if ctx.reshape_seen {
        return Err(unsupported(
            node,
            "Reshape is only supported as the last node of the graph",
        ));
    }
    let op = OpType::from_str(&node.op_type).map_err(|_| GraphError::UnsupportedOperator {
        op_type: node.op_type.clone(),
        node: node.display_name(),
    })?;

    match op {
        OpType::Conv => lower_conv_node(ctx, node),
        OpType::AveragePool | OpType::MaxPool => lower_pool(ctx, node, op),
        OpType::GlobalAveragePool | OpType::GlobalMaxPool => lower_global_pool(ctx, node, op),
        OpType::Relu => lower_relu(ctx, index, node),
        OpType::Add => lower_add(ctx, node),
        OpType::Gemm => lower_gemm(ctx, node),
        OpType::Softmax => lower_softmax(ctx, node),
        OpType::Concat => lower_concat(ctx, node),
        OpType::Dropout => {
            let input = ctx.resolve(node.input(0)?);
            ctx.names.alias(node.output(0)?, &input);
            debug!("Dropout `{}` forwards `{}`", node.display_name(), input);
            Ok(())
        }
        OpType::Reshape => {
            ctx.reshape_seen = true;
            debug!("Reshape `{}` ends the graph", node.display_name());
            Ok(())
        }
    }
}

fn lower_conv_node(ctx: &mut ConversionContext<'_>, node: &Node) -> Result<(), GraphError> {
    if let Some(auto_pad) = node.get_string("auto_pad")? {
        if auto_pad != "NOTSET" {
            return Err(unsupported(
                node,
                format!("auto_pad `{}` is not supported", auto_pad),
            ));
        }
    }
    let params = ConvParams {
        strides: int_array(node, "strides", [1, 1])?,
        pads: int_array(node, "pads", [0, 0, 0, 0])?,
        dilations: int_array(node, "dilations", [1, 1])?,
        group: node.get_int("group", 1)?,
    };

    let input = ctx.resolve(node.input(0)?);
    let weight = ctx.resolve(node.input(1)?);
    let fuse = ctx.take_activation(node);
    let output = ctx.resolve(node.output(0)?);

    let bias = match node.optional_input(2) {
        Some(source) => {
            let source = ctx.resolve(source);
            let name = format!("{}_conv_b", source);
            let tensor = LoweredTensor::copy_of(ctx.raw(&source)?, name.clone());
            ctx.materialize(tensor);
            Some(name)
        }
        None => None,
    };

    lower_conv(
        ctx,
        node,
        &params,
        fuse,
        ConvOperands {
            input: &input,
            weight: &weight,
            bias: bias.as_deref(),
            output: &output,
        },
    )
}

fn lower_pool(ctx: &mut ConversionContext<'_>, node: &Node, op: OpType) -> Result<(), GraphError> {
    reject_attr(node, "count_include_pad", 1, 0)?;
    reject_attr(node, "storage_order", 1, 0)?;
    reject_attr(node, "ceil_mode", 1, 0)?;
    if node.has_attr("auto_pad") {
        return Err(unsupported(node, "auto_pad is not supported"));
    }
    if !node.has_attr("kernel_shape") {
        return Err(GraphError::malformed(
            node.display_name(),
            "kernel_shape is required",
        ));
    }
    let kernel_shape = int_array(node, "kernel_shape", [0, 0])?;
    let strides = int_array(node, "strides", [1, 1])?;
    let pads = int_array(node, "pads", [0, 0, 0, 0])?;

    emit_pool(
        ctx,
        node,
        op == OpType::AveragePool,
        kernel_shape.to_vec(),
        strides.to_vec(),
        pads.to_vec(),
    )
}

fn lower_global_pool(
    ctx: &mut ConversionContext<'_>,
    node: &Node,
    op: OpType,
) -> Result<(), GraphError> {
    emit_pool(
        ctx,
        node,
        op == OpType::GlobalAveragePool,
        vec![-1, -1],
        vec![0, 0],
        vec![0, 0, 0, 0],
    )
}

fn emit_pool(
    ctx: &mut ConversionContext<'_>,
    node: &Node,
    average: bool,
    kernel_shape: Vec<i32>,
    strides: Vec<i32>,
    padding: Vec<i32>,
) -> Result<(), GraphError> {
    let input = ctx.resolve(node.input(0)?);
    let fuse = ctx.take_activation(node);
    let output = ctx.resolve(node.output(0)?);
    ctx.shaper
        .pool(&input, &kernel_shape, &strides, &padding, &output)?;
    let layer = if average {
        LoweredLayer::AvePool {
            input,
            kernel_shape,
            padding,
            strides,
            fuse,
            output,
        }
    } else {
        LoweredLayer::MaxPool {
            input,
            kernel_shape,
            padding,
            strides,
            fuse,
            output,
        }
    };
    ctx.push_layer(layer)
}

fn lower_relu(ctx: &mut ConversionContext<'_>, index: usize, node: &Node) -> Result<(), GraphError> {
    if ctx.is_fused(index) {
        debug!(
            "Relu `{}` already fused into the layer producing `{}`",
            node.display_name(),
            node.output(0)?
        );
        return Ok(());
    }
    let input = ctx.resolve(node.input(0)?);
    let output = ctx.resolve(node.output(0)?);
    ctx.shaper.identity(&input, &output)?;
    ctx.push_layer(LoweredLayer::Relu { input, output })
}

fn lower_add(ctx: &mut ConversionContext<'_>, node: &Node) -> Result<(), GraphError> {
    let input1 = ctx.resolve(node.input(0)?);
    let input2 = ctx.resolve(node.input(1)?);
    let fuse = ctx.take_activation(node);
    let output = ctx.resolve(node.output(0)?);
    ctx.shaper.eltwise(&input1, &input2, &output)?;
    ctx.push_layer(LoweredLayer::Add {
        input1,
        input2,
        fuse,
        output,
    })
}

fn lower_gemm(ctx: &mut ConversionContext<'_>, node: &Node) -> Result<(), GraphError> {
    let trans_a = node.get_int("transA", 0)?;
    let trans_b = node.get_int("transB", 0)?;
    let alpha = node.get_float("alpha", 1.0)?;
    let beta = node.get_float("beta", 1.0)?;
    if trans_a != 0 || trans_b != 1 || alpha != 1.0 || beta != 1.0 {
        return Err(unsupported(
            node,
            format!(
                "only transA=0, transB=1, alpha=1, beta=1 are supported \
                 (got transA={}, transB={}, alpha={}, beta={})",
                trans_a, trans_b, alpha, beta
            ),
        ));
    }

    let input = ctx.resolve(node.input(0)?);
    let weight = ctx.resolve(node.input(1)?);

    let tensor = LoweredTensor::copy_of(ctx.raw(&weight)?, weight.clone());
    ctx.materialize(tensor);
    let units = ctx.shaper.require(&weight)?.first().copied().unwrap_or(0);

    let bias = match node.optional_input(2) {
        Some(source) => {
            let source = ctx.resolve(source);
            let raw = ctx.raw(&source)?;
            if raw.data().len() != units as usize {
                return Err(GraphError::shape_mismatch(
                    &source,
                    format!(
                        "bias holds {} values but the layer has {} units",
                        raw.data().len(),
                        units
                    ),
                ));
            }
            let tensor = LoweredTensor::float32(source.clone(), vec![units], raw.data().to_vec());
            ctx.materialize(tensor);
            Some(source)
        }
        None => None,
    };

    let fuse = ctx.take_activation(node);
    let output = ctx.resolve(node.output(0)?);
    ctx.shaper.fc(&input, &weight, &output)?;
    ctx.push_layer(LoweredLayer::FullyConnected {
        input,
        weight,
        bias,
        fuse,
        output,
    })
}

fn lower_softmax(ctx: &mut ConversionContext<'_>, node: &Node) -> Result<(), GraphError> {
    if node.has_attr("axis") {
        warn!(
            "Softmax `{}`: axis attribute ignored, the runtime normalizes the last axis",
            node.display_name()
        );
    }
    let input = ctx.resolve(node.input(0)?);
    let output = ctx.resolve(node.output(0)?);
    ctx.shaper.identity(&input, &output)?;
    ctx.push_layer(LoweredLayer::Softmax { input, output })
}

fn lower_concat(ctx: &mut ConversionContext<'_>, node: &Node) -> Result<(), GraphError> {
    let inputs: Vec<String> = node.inputs.iter().map(|name| ctx.resolve(name)).collect();
    let output = ctx.resolve(node.output(0)?);
    let first = inputs.first().ok_or_else(|| {
        GraphError::malformed(node.display_name(), "Concat needs at least one input")
    })?;
    let rank = ctx.shaper.require(first)?.len() as i64;

    let axis = node.get_int("axis", 1)?;
    let normalized = if axis < 0 { axis + rank } else { axis };
    if normalized < 0 || normalized >= rank {
        return Err(GraphError::malformed(
            node.display_name(),
            format!("axis {} out of range for rank {}", axis, rank),
        ));
    }
    let axis = if rank == 4 {
        NCHW_TO_NHWC_AXIS[normalized as usize]
    } else {
        normalized as usize
    };

    ctx.shaper.concat(&inputs, axis, &output)?;
    ctx.push_layer(LoweredLayer::Concat {
        inputs,
        axis: axis as u32,
        output,
    })
}
