//! Convolution lowering.
//!
//! The target has no dilated convolution, so a dilated Conv is rewritten as
//! SpaceToBatch, an undilated Conv, BatchToSpace and a StridedSlice that
//! trims the rows and columns added to make the padded extent divisible by
//! the dilation.

use log::debug;

use super::ConversionContext;
use crate::error::GraphError;
use crate::graph::Node;
use crate::layout::{to_depthwise_layout, to_vanilla_layout};
use crate::model::{FuseCode, LoweredLayer};

/// Convolution attributes after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    /// `[h, w]`
    pub strides: [i32; 2],
    /// `[top, left, bottom, right]`
    pub pads: [i32; 4],
    /// `[h, w]`
    pub dilations: [i32; 2],
    pub group: i64,
}

impl Default for ConvParams {
    fn default() -> Self {
        ConvParams {
            strides: [1, 1],
            pads: [0; 4],
            dilations: [1, 1],
            group: 1,
        }
    }
}

/// Operand names of one convolution, already resolved. `weight` names the
/// source initializer; `bias` names an already materialized tensor.
#[derive(Debug, Clone, Copy)]
pub struct ConvOperands<'a> {
    pub input: &'a str,
    pub weight: &'a str,
    pub bias: Option<&'a str>,
    pub output: &'a str,
}

fn unsupported(node: &Node, reason: impl Into<String>) -> GraphError {
    GraphError::UnsupportedConfiguration {
        op_type: node.op_type.clone(),
        node: node.display_name(),
        reason: reason.into(),
    }
}

/// Smallest multiple of `multiple` that is `>= value`.
fn ceil_to_multiple(value: i64, multiple: i64) -> i64 {
    (value + multiple - 1) / multiple * multiple
}

/// High-side padding that makes the padded extent divisible by `dilation`.
///
/// `pad_low` already extends the axis, so only the high side grows.
pub fn adjusted_high_pad(input_dim: u32, pad_low: i32, pad_high: i32, dilation: i32) -> i32 {
    let extent = input_dim as i64 + pad_low as i64;
    (ceil_to_multiple(extent + pad_high as i64, dilation as i64) - extent) as i32
}

pub fn lower_conv(
    ctx: &mut ConversionContext<'_>,
    node: &Node,
    params: &ConvParams,
    fuse: FuseCode,
    operands: ConvOperands<'_>,
) -> Result<(), GraphError> {
    if params.dilations != [1, 1] {
        lower_dilated(ctx, node, params, fuse, operands)
    } else {
        lower_grouped(ctx, node, params, fuse, operands)
    }
}

fn lower_dilated(
    ctx: &mut ConversionContext<'_>,
    node: &Node,
    params: &ConvParams,
    fuse: FuseCode,
    operands: ConvOperands<'_>,
) -> Result<(), GraphError> {
    if params.strides != [1, 1] {
        return Err(unsupported(
            node,
            format!(
                "dilations {:?} combined with strides {:?}",
                params.dilations, params.strides
            ),
        ));
    }
    let [dh, dw] = params.dilations;
    if dh <= 0 || dw <= 0 {
        return Err(GraphError::malformed(
            node.display_name(),
            format!("dilations must be positive, got {:?}", params.dilations),
        ));
    }

    let input_shape = ctx.shaper.require(operands.input)?.clone();
    let (in_h, in_w) = match input_shape.as_slice() {
        &[_, h, w, _] => (h, w),
        other => {
            return Err(GraphError::shape_mismatch(
                operands.input,
                format!("dilated convolution needs a 4-D input, got {:?}", other),
            ));
        }
    };
    let [top, left, bottom, right] = params.pads;
    let adj_bottom = adjusted_high_pad(in_h, top, bottom, dh);
    let adj_right = adjusted_high_pad(in_w, left, right, dw);

    let output = operands.output;
    let s2b = format!("{}_s2b", output);
    let conv_imm = format!("{}_conv_imm", output);
    let b2s = format!("{}_b2s", output);
    let block = vec![dh, dw];
    let pads = vec![top, adj_bottom, left, adj_right];
    debug!(
        "Decomposing dilated conv `{}`: block {:?}, pads {:?}",
        node.display_name(),
        block,
        pads
    );

    ctx.shaper
        .space_to_batch(operands.input, &block, &pads, &s2b)?;
    ctx.push_layer(LoweredLayer::SpaceToBatch {
        input: operands.input.to_string(),
        block_sizes: block.clone(),
        pads,
        output: s2b.clone(),
    })?;

    let inner = ConvParams {
        pads: [0; 4],
        dilations: [1, 1],
        ..*params
    };
    lower_conv(
        ctx,
        node,
        &inner,
        fuse,
        ConvOperands {
            input: &s2b,
            output: &conv_imm,
            ..operands
        },
    )?;

    ctx.shaper.batch_to_space(&conv_imm, &block, &b2s)?;
    ctx.push_layer(LoweredLayer::BatchToSpace {
        input: conv_imm,
        block_sizes: block,
        output: b2s.clone(),
    })?;

    let b2s_shape = ctx.shaper.require(&b2s)?.clone();
    let end = |axis: usize, trim: i32| {
        i32::try_from(b2s_shape[axis] as i64 - trim as i64).map_err(|_| {
            GraphError::shape_mismatch(
                &b2s,
                format!("slice end for axis {} of {:?} overflows", axis, b2s_shape),
            )
        })
    };
    let ends = vec![
        end(0, 0)?,
        end(1, adj_bottom - bottom)?,
        end(2, adj_right - right)?,
        end(3, 0)?,
    ];
    let starts = vec![0; 4];
    let strides = vec![1; 4];
    ctx.shaper
        .strided_slice(&b2s, &starts, &ends, &strides, 0, 0, 0, output)?;
    ctx.push_layer(LoweredLayer::StridedSlice {
        input: b2s,
        starts,
        ends,
        strides,
        begin_mask: 0,
        end_mask: 0,
        shrink_axis_mask: 0,
        output: output.to_string(),
    })
}

fn lower_grouped(
    ctx: &mut ConversionContext<'_>,
    node: &Node,
    params: &ConvParams,
    fuse: FuseCode,
    operands: ConvOperands<'_>,
) -> Result<(), GraphError> {
    let padding = params.pads.to_vec();
    let strides = params.strides.to_vec();
    let weight_shape = ctx.raw(operands.weight)?.shape().to_vec();

    if params.group == 1 {
        let name = format!("{}_conv_w", operands.weight);
        let weight = to_vanilla_layout(ctx.raw(operands.weight)?, &name)?;
        ctx.materialize(weight);
        ctx.shaper
            .conv(operands.input, &name, &strides, &padding, operands.output)?;
        return ctx.push_layer(LoweredLayer::Conv2D {
            input: operands.input.to_string(),
            weight: name,
            bias: operands.bias.map(str::to_string),
            padding,
            strides,
            fuse,
            output: operands.output.to_string(),
        });
    }

    if params.group > 1 && weight_shape.get(1) == Some(&1) {
        let name = format!("{}_dwconv_w", operands.weight);
        let weight = to_depthwise_layout(ctx.raw(operands.weight)?, &name)?;
        let out_channels = weight.shape[3] as i64;
        if out_channels % params.group != 0 {
            return Err(unsupported(
                node,
                format!(
                    "{} output channels cannot be split into {} groups",
                    out_channels, params.group
                ),
            ));
        }
        let depth_multiplier = (out_channels / params.group) as i32;
        ctx.materialize(weight);
        ctx.shaper
            .depthwise_conv(operands.input, &name, &strides, &padding, operands.output)?;
        return ctx.push_layer(LoweredLayer::DepthwiseConv2D {
            input: operands.input.to_string(),
            weight: name,
            bias: operands.bias.map(str::to_string),
            padding,
            strides,
            depth_multiplier,
            fuse,
            output: operands.output.to_string(),
        });
    }

    Err(unsupported(
        node,
        format!(
            "group {} with weight shape {:?} is neither plain nor depthwise",
            params.group, weight_shape
        ),
    ))
}
