//! Shape bookkeeping for lowered operands. Every shape stored here is in the
//! target's channel-last convention, `[N, H, W, C]` for 4-D tensors.

use std::collections::HashMap;
use std::fmt;

use crate::error::GraphError;

pub type Shape = Vec<u32>;

#[derive(Debug, Default, Clone)]
pub struct Shaper {
    order: Vec<String>,
    shapes: HashMap<String, Shape>,
}

fn nhwc(name: &str, shape: &[u32]) -> Result<[u32; 4], GraphError> {
    match shape {
        &[n, h, w, c] => Ok([n, h, w, c]),
        other => Err(GraphError::shape_mismatch(
            name,
            format!("expected a 4-D NHWC tensor, got {:?}", other),
        )),
    }
}

/// Output extent of a sliding window over `input` padded by `pad_low` and
/// `pad_high`.
fn window_extent(
    name: &str,
    input: u32,
    kernel: u32,
    stride: i32,
    pad_low: i32,
    pad_high: i32,
) -> Result<u32, GraphError> {
    if stride <= 0 {
        return Err(GraphError::shape_mismatch(
            name,
            format!("stride must be positive, got {}", stride),
        ));
    }
    let padded = input as i64 + pad_low as i64 + pad_high as i64;
    if padded < kernel as i64 || kernel == 0 {
        return Err(GraphError::shape_mismatch(
            name,
            format!(
                "window of {} does not fit padded extent {} (input {}, pads {}/{})",
                kernel, padded, input, pad_low, pad_high
            ),
        ));
    }
    Ok(((padded - kernel as i64) / stride as i64 + 1) as u32)
}

/// `dim * factor`, failing when the product leaves the `u32` range.
fn scaled_dim(name: &str, dim: u32, factor: i64) -> Result<u32, GraphError> {
    (dim as i64)
        .checked_mul(factor)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            GraphError::shape_mismatch(
                name,
                format!("dimension {} scaled by {} overflows", dim, factor),
            )
        })
}

impl Shaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shape(&mut self, name: &str, shape: Shape) {
        if self.shapes.insert(name.to_string(), shape).is_none() {
            self.order.push(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Shape> {
        self.shapes.get(name)
    }

    /// Shape of `name`, failing when nothing has produced it yet.
    pub fn require(&self, name: &str) -> Result<&Shape, GraphError> {
        self.shapes
            .get(name)
            .ok_or_else(|| GraphError::missing_operand(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Shape)> {
        self.order
            .iter()
            .map(move |name| (name.as_str(), &self.shapes[name]))
    }

    /// `strides` is `[h, w]`, `pads` is `[top, left, bottom, right]`; the
    /// weight is in OHWI layout.
    pub fn conv(
        &mut self,
        input: &str,
        weight: &str,
        strides: &[i32],
        pads: &[i32],
        output: &str,
    ) -> Result<(), GraphError> {
        let [n, h, w, c] = nhwc(input, self.require(input)?)?;
        let [o, kh, kw, i] = nhwc(weight, self.require(weight)?)?;
        if c != i {
            return Err(GraphError::shape_mismatch(
                output,
                format!("input has {} channels but weight expects {}", c, i),
            ));
        }
        let oh = window_extent(output, h, kh, strides[0], pads[0], pads[2])?;
        let ow = window_extent(output, w, kw, strides[1], pads[1], pads[3])?;
        self.add_shape(output, vec![n, oh, ow, o]);
        Ok(())
    }

    /// Same parameter layout as [`Shaper::conv`]; the weight is `[1, kh, kw, C*m]`.
    pub fn depthwise_conv(
        &mut self,
        input: &str,
        weight: &str,
        strides: &[i32],
        pads: &[i32],
        output: &str,
    ) -> Result<(), GraphError> {
        let [n, h, w, c] = nhwc(input, self.require(input)?)?;
        let [_, kh, kw, oc] = nhwc(weight, self.require(weight)?)?;
        if c == 0 || oc % c != 0 {
            return Err(GraphError::shape_mismatch(
                output,
                format!(
                    "depthwise output channels {} are not a multiple of input channels {}",
                    oc, c
                ),
            ));
        }
        let oh = window_extent(output, h, kh, strides[0], pads[0], pads[2])?;
        let ow = window_extent(output, w, kw, strides[1], pads[1], pads[3])?;
        self.add_shape(output, vec![n, oh, ow, oc]);
        Ok(())
    }

    /// A kernel of `[-1, -1]` pools over the entire spatial extent.
    pub fn pool(
        &mut self,
        input: &str,
        kernel: &[i32],
        strides: &[i32],
        pads: &[i32],
        output: &str,
    ) -> Result<(), GraphError> {
        let [n, h, w, c] = nhwc(input, self.require(input)?)?;
        if kernel == [-1, -1] {
            self.add_shape(output, vec![n, 1, 1, c]);
            return Ok(());
        }
        if kernel.iter().any(|&k| k <= 0) {
            return Err(GraphError::shape_mismatch(
                output,
                format!("invalid pooling kernel {:?}", kernel),
            ));
        }
        let oh = window_extent(output, h, kernel[0] as u32, strides[0], pads[0], pads[2])?;
        let ow = window_extent(output, w, kernel[1] as u32, strides[1], pads[1], pads[3])?;
        self.add_shape(output, vec![n, oh, ow, c]);
        Ok(())
    }

    /// Shape-preserving unary ops (Relu, Softmax).
    pub fn identity(&mut self, input: &str, output: &str) -> Result<(), GraphError> {
        let shape = self.require(input)?.clone();
        self.add_shape(output, shape);
        Ok(())
    }

    /// Elementwise binary op with trailing-axis broadcasting.
    pub fn eltwise(&mut self, lhs: &str, rhs: &str, output: &str) -> Result<(), GraphError> {
        let shape = broadcast_shapes(self.require(lhs)?, self.require(rhs)?).ok_or_else(|| {
            GraphError::shape_mismatch(
                output,
                format!(
                    "cannot broadcast {:?} with {:?}",
                    self.shapes[lhs], self.shapes[rhs]
                ),
            )
        })?;
        self.add_shape(output, shape);
        Ok(())
    }

    /// Fully connected: `weight` is `[units, input_size]`; the input is
    /// flattened to `[batch, input_size]`.
    pub fn fc(&mut self, input: &str, weight: &str, output: &str) -> Result<(), GraphError> {
        let input_shape = self.require(input)?;
        let weight_shape = self.require(weight)?;
        let (units, input_size) = match weight_shape.as_slice() {
            &[units, input_size] => (units, input_size),
            other => {
                return Err(GraphError::shape_mismatch(
                    weight,
                    format!("fully connected weight must be 2-D, got {:?}", other),
                ));
            }
        };
        let batch = input_shape.first().copied().unwrap_or(1);
        let elements: u64 = input_shape.iter().map(|&d| d as u64).product();
        if elements != batch as u64 * input_size as u64 {
            return Err(GraphError::shape_mismatch(
                output,
                format!(
                    "input {:?} does not flatten to [{}, {}]",
                    input_shape, batch, input_size
                ),
            ));
        }
        self.add_shape(output, vec![batch, units]);
        Ok(())
    }

    /// `axis` is already expressed in the target layout.
    pub fn concat(&mut self, inputs: &[String], axis: usize, output: &str) -> Result<(), GraphError> {
        let first = inputs
            .first()
            .ok_or_else(|| GraphError::shape_mismatch(output, "concat needs at least one input"))?;
        let mut shape = self.require(first)?.clone();
        if axis >= shape.len() {
            return Err(GraphError::shape_mismatch(
                output,
                format!("axis {} out of range for rank {}", axis, shape.len()),
            ));
        }
        for name in &inputs[1..] {
            let other = self.require(name)?;
            let compatible = other.len() == shape.len()
                && other
                    .iter()
                    .zip(&shape)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(GraphError::shape_mismatch(
                    output,
                    format!("cannot concat {:?} with {:?} on axis {}", shape, other, axis),
                ));
            }
            shape[axis] = shape[axis].checked_add(other[axis]).ok_or_else(|| {
                GraphError::shape_mismatch(
                    output,
                    format!("concatenated axis {} overflows", axis),
                )
            })?;
        }
        self.add_shape(output, shape);
        Ok(())
    }

    /// `block` is `[h, w]`, `pads` is `[top, bottom, left, right]`.
    pub fn space_to_batch(
        &mut self,
        input: &str,
        block: &[i32],
        pads: &[i32],
        output: &str,
    ) -> Result<(), GraphError> {
        let [n, h, w, c] = nhwc(input, self.require(input)?)?;
        let padded_h = h as i64 + pads[0] as i64 + pads[1] as i64;
        let padded_w = w as i64 + pads[2] as i64 + pads[3] as i64;
        let (bh, bw) = (block[0] as i64, block[1] as i64);
        if bh <= 0 || bw <= 0 || padded_h % bh != 0 || padded_w % bw != 0 {
            return Err(GraphError::shape_mismatch(
                output,
                format!(
                    "padded extent {}x{} is not divisible by block {:?}",
                    padded_h, padded_w, block
                ),
            ));
        }
        let batch = scaled_dim(output, n, bh * bw)?;
        self.add_shape(
            output,
            vec![
                batch,
                scaled_dim(output, 1, padded_h / bh)?,
                scaled_dim(output, 1, padded_w / bw)?,
                c,
            ],
        );
        Ok(())
    }

    pub fn batch_to_space(
        &mut self,
        input: &str,
        block: &[i32],
        output: &str,
    ) -> Result<(), GraphError> {
        let [n, h, w, c] = nhwc(input, self.require(input)?)?;
        let (bh, bw) = (block[0] as i64, block[1] as i64);
        if bh <= 0 || bw <= 0 || n as i64 % (bh * bw) != 0 {
            return Err(GraphError::shape_mismatch(
                output,
                format!("batch {} is not divisible by block {:?}", n, block),
            ));
        }
        self.add_shape(
            output,
            vec![
                (n as i64 / (bh * bw)) as u32,
                scaled_dim(output, h, bh)?,
                scaled_dim(output, w, bw)?,
                c,
            ],
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn strided_slice(
        &mut self,
        input: &str,
        starts: &[i32],
        ends: &[i32],
        strides: &[i32],
        begin_mask: i32,
        end_mask: i32,
        shrink_axis_mask: i32,
        output: &str,
    ) -> Result<(), GraphError> {
        let input_shape = self.require(input)?.clone();
        let rank = input_shape.len();
        if starts.len() != rank || ends.len() != rank || strides.len() != rank {
            return Err(GraphError::shape_mismatch(
                output,
                format!("slice parameters do not match rank {}", rank),
            ));
        }
        let mut shape = Vec::with_capacity(rank);
        for axis in 0..rank {
            let dim = input_shape[axis] as i64;
            let stride = strides[axis] as i64;
            if stride <= 0 {
                return Err(GraphError::shape_mismatch(
                    output,
                    format!("slice stride must be positive, got {}", stride),
                ));
            }
            let clamp = |v: i32| {
                let v = v as i64;
                let v = if v < 0 { v + dim } else { v };
                v.clamp(0, dim)
            };
            let start = if begin_mask & (1 << axis) != 0 {
                0
            } else {
                clamp(starts[axis])
            };
            let end = if end_mask & (1 << axis) != 0 {
                dim
            } else {
                clamp(ends[axis])
            };
            if shrink_axis_mask & (1 << axis) != 0 {
                continue;
            }
            let extent = if end > start {
                (end - start + stride - 1) / stride
            } else {
                0
            };
            shape.push(extent as u32);
        }
        self.add_shape(output, shape);
        Ok(())
    }
}

impl fmt::Display for Shaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, shape) in self.iter() {
            writeln!(f, "{}: {:?}", name, shape)?;
        }
        Ok(())
    }
}

/// Numpy-style broadcasting aligned on trailing axes.
pub fn broadcast_shapes(lhs: &[u32], rhs: &[u32]) -> Option<Shape> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let a = if i < rank - lhs.len() {
            1
        } else {
            lhs[i - (rank - lhs.len())]
        };
        let b = if i < rank - rhs.len() {
            1
        } else {
            rhs[i - (rank - rhs.len())]
        };
        out[i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(out)
}
