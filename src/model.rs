use serde::Serialize;
use strum::{Display, EnumIter};

use crate::tensor::LoweredTensor;

/// Activation folded into the layer that produces its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
pub enum FuseCode {
    #[default]
    None,
    Relu,
    Relu1,
    Relu6,
}

impl FuseCode {
    pub fn code(self) -> i8 {
        match self {
            FuseCode::None => 0,
            FuseCode::Relu => 1,
            FuseCode::Relu1 => 2,
            FuseCode::Relu6 => 3,
        }
    }
}

/// Layer kinds understood by the target runtime, in artifact tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
pub enum LayerType {
    Conv2D,
    AvePool,
    MaxPool,
    Relu,
    Softmax,
    FullyConnected,
    Add,
    Concat,
    DepthwiseConv2D,
    BatchToSpace,
    SpaceToBatch,
    StridedSlice,
}

impl LayerType {
    pub fn code(self) -> i8 {
        self as i8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum LoweredLayer {
    Conv2D {
        input: String,
        weight: String,
        bias: Option<String>,
        padding: Vec<i32>,
        strides: Vec<i32>,
        fuse: FuseCode,
        output: String,
    },
    AvePool {
        input: String,
        kernel_shape: Vec<i32>,
        padding: Vec<i32>,
        strides: Vec<i32>,
        fuse: FuseCode,
        output: String,
    },
    MaxPool {
        input: String,
        kernel_shape: Vec<i32>,
        padding: Vec<i32>,
        strides: Vec<i32>,
        fuse: FuseCode,
        output: String,
    },
    Relu {
        input: String,
        output: String,
    },
    Softmax {
        input: String,
        output: String,
    },
    FullyConnected {
        input: String,
        weight: String,
        bias: Option<String>,
        fuse: FuseCode,
        output: String,
    },
    Add {
        input1: String,
        input2: String,
        fuse: FuseCode,
        output: String,
    },
    Concat {
        inputs: Vec<String>,
        axis: u32,
        output: String,
    },
    DepthwiseConv2D {
        input: String,
        weight: String,
        bias: Option<String>,
        padding: Vec<i32>,
        strides: Vec<i32>,
        depth_multiplier: i32,
        fuse: FuseCode,
        output: String,
    },
    BatchToSpace {
        input: String,
        block_sizes: Vec<i32>,
        output: String,
    },
    SpaceToBatch {
        input: String,
        block_sizes: Vec<i32>,
        pads: Vec<i32>,
        output: String,
    },
    StridedSlice {
        input: String,
        starts: Vec<i32>,
        ends: Vec<i32>,
        strides: Vec<i32>,
        begin_mask: i32,
        end_mask: i32,
        shrink_axis_mask: i32,
        output: String,
    },
}

impl LoweredLayer {
    pub fn layer_type(&self) -> LayerType {
        match self {
            LoweredLayer::Conv2D { .. } => LayerType::Conv2D,
            LoweredLayer::AvePool { .. } => LayerType::AvePool,
            LoweredLayer::MaxPool { .. } => LayerType::MaxPool,
            LoweredLayer::Relu { .. } => LayerType::Relu,
            LoweredLayer::Softmax { .. } => LayerType::Softmax,
            LoweredLayer::FullyConnected { .. } => LayerType::FullyConnected,
            LoweredLayer::Add { .. } => LayerType::Add,
            LoweredLayer::Concat { .. } => LayerType::Concat,
            LoweredLayer::DepthwiseConv2D { .. } => LayerType::DepthwiseConv2D,
            LoweredLayer::BatchToSpace { .. } => LayerType::BatchToSpace,
            LoweredLayer::SpaceToBatch { .. } => LayerType::SpaceToBatch,
            LoweredLayer::StridedSlice { .. } => LayerType::StridedSlice,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            LoweredLayer::Conv2D { output, .. }
            | LoweredLayer::AvePool { output, .. }
            | LoweredLayer::MaxPool { output, .. }
            | LoweredLayer::Relu { output, .. }
            | LoweredLayer::Softmax { output, .. }
            | LoweredLayer::FullyConnected { output, .. }
            | LoweredLayer::Add { output, .. }
            | LoweredLayer::Concat { output, .. }
            | LoweredLayer::DepthwiseConv2D { output, .. }
            | LoweredLayer::BatchToSpace { output, .. }
            | LoweredLayer::SpaceToBatch { output, .. }
            | LoweredLayer::StridedSlice { output, .. } => output,
        }
    }

    /// Every operand name the layer reads, weights and biases included.
    pub fn operands(&self) -> Vec<&str> {
        match self {
            LoweredLayer::Conv2D {
                input,
                weight,
                bias,
                ..
            }
            | LoweredLayer::DepthwiseConv2D {
                input,
                weight,
                bias,
                ..
            }
            | LoweredLayer::FullyConnected {
                input,
                weight,
                bias,
                ..
            } => {
                let mut operands = vec![input.as_str(), weight.as_str()];
                operands.extend(bias.as_deref());
                operands
            }
            LoweredLayer::AvePool { input, .. }
            | LoweredLayer::MaxPool { input, .. }
            | LoweredLayer::Relu { input, .. }
            | LoweredLayer::Softmax { input, .. }
            | LoweredLayer::BatchToSpace { input, .. }
            | LoweredLayer::SpaceToBatch { input, .. }
            | LoweredLayer::StridedSlice { input, .. } => vec![input.as_str()],
            LoweredLayer::Add { input1, input2, .. } => vec![input1.as_str(), input2.as_str()],
            LoweredLayer::Concat { inputs, .. } => inputs.iter().map(String::as_str).collect(),
        }
    }

    pub fn fuse(&self) -> FuseCode {
        match self {
            LoweredLayer::Conv2D { fuse, .. }
            | LoweredLayer::AvePool { fuse, .. }
            | LoweredLayer::MaxPool { fuse, .. }
            | LoweredLayer::FullyConnected { fuse, .. }
            | LoweredLayer::Add { fuse, .. }
            | LoweredLayer::DepthwiseConv2D { fuse, .. } => *fuse,
            _ => FuseCode::None,
        }
    }
}

/// Graph input with its shape already in channel-last order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphInput {
    pub name: String,
    pub shape: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoweredModel {
    pub inputs: Vec<GraphInput>,
    pub tensors: Vec<LoweredTensor>,
    pub layers: Vec<LoweredLayer>,
}

impl LoweredModel {
    pub fn tensor(&self, name: &str) -> Option<&LoweredTensor> {
        self.tensors.iter().find(|tensor| tensor.name == name)
    }

    pub fn layers_of(&self, layer_type: LayerType) -> impl Iterator<Item = &LoweredLayer> {
        self.layers
            .iter()
            .filter(move |layer| layer.layer_type() == layer_type)
    }
}
