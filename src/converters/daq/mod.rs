//! DAQ flatbuffer emitter.
//!
//! Tables are built by hand with `FlatBufferBuilder`; slot offsets live in
//! [`schema::vt`]. Within a table, offsets are pushed before scalars so the
//! layout matches what `flatc` generated builders produce.

pub mod schema;

use flatbuffers::{FlatBufferBuilder, TableFinishedWIPOffset, WIPOffset};

use super::{ConvertedGraph, GraphConverter};
use crate::error::GraphError;
use crate::model::{FuseCode, GraphInput, LoweredLayer, LoweredModel};
use crate::tensor::LoweredTensor;
use schema::vt;

/// Flatbuffers address everything with 32-bit signed offsets.
const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

type Table = WIPOffset<TableFinishedWIPOffset>;

#[derive(Debug, Default)]
pub struct DaqConverter;

impl GraphConverter for DaqConverter {
    fn format(&self) -> &'static str {
        "daq"
    }

    fn convert(&self, model: &LoweredModel) -> Result<ConvertedGraph, GraphError> {
        let payload: usize = model.tensors.iter().map(|t| t.data.len() * 4).sum();
        if payload >= MAX_BUFFER_SIZE {
            return Err(GraphError::ConversionFailed {
                format: self.format().to_string(),
                reason: format!(
                    "{} bytes of tensor data exceed the flatbuffer size limit",
                    payload
                ),
            });
        }
        let data = encode_model(model);
        log::debug!("Encoded DAQ model: {} bytes", data.len());
        Ok(ConvertedGraph {
            format: "daq",
            content_type: "application/octet-stream",
            data,
        })
    }
}

/// Serialize `model` into a finished DAQ buffer.
pub fn encode_model(model: &LoweredModel) -> Vec<u8> {
    let payload: usize = model.tensors.iter().map(|t| t.data.len() * 4).sum();
    let mut fbb = FlatBufferBuilder::with_capacity(payload + 1024);

    let layers: Vec<Table> = model
        .layers
        .iter()
        .map(|layer| encode_layer(&mut fbb, layer))
        .collect();
    let layers = fbb.create_vector(&layers);
    let tensors: Vec<Table> = model
        .tensors
        .iter()
        .map(|tensor| encode_tensor(&mut fbb, tensor))
        .collect();
    let tensors = fbb.create_vector(&tensors);
    let inputs: Vec<Table> = model
        .inputs
        .iter()
        .map(|input| encode_input(&mut fbb, input))
        .collect();
    let inputs = fbb.create_vector(&inputs);

    let root = {
        let start = fbb.start_table();
        fbb.push_slot_always(vt::model::INPUTS, inputs);
        fbb.push_slot_always(vt::model::INITIALIZERS, tensors);
        fbb.push_slot_always(vt::model::LAYERS, layers);
        fbb.end_table(start)
    };
    fbb.finish(root, None);
    fbb.finished_data().to_vec()
}

fn encode_tensor(fbb: &mut FlatBufferBuilder<'_>, tensor: &LoweredTensor) -> Table {
    let data = fbb.create_vector(&tensor.data);
    let shape = fbb.create_vector(&tensor.shape);
    let name = fbb.create_string(&tensor.name);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::tensor::NAME, name);
    fbb.push_slot_always(vt::tensor::SHAPE, shape);
    fbb.push_slot_always(vt::tensor::FLOAT32_DATA, data);
    fbb.push_slot::<i8>(vt::tensor::DATA_TYPE, tensor.data_type.code(), 0);
    fbb.end_table(start)
}

fn encode_input(fbb: &mut FlatBufferBuilder<'_>, input: &GraphInput) -> Table {
    let shape = fbb.create_vector(&input.shape);
    let name = fbb.create_string(&input.name);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::input::NAME, name);
    fbb.push_slot_always(vt::input::SHAPE, shape);
    fbb.end_table(start)
}

fn encode_layer(fbb: &mut FlatBufferBuilder<'_>, layer: &LoweredLayer) -> Table {
    let (slot, param) = match layer {
        LoweredLayer::Conv2D {
            input,
            weight,
            bias,
            padding,
            strides,
            fuse,
            output,
        } => {
            let input = fbb.create_string(input);
            let weight = fbb.create_string(weight);
            let bias = bias.as_deref().map(|bias| fbb.create_string(bias));
            let padding = fbb.create_vector(padding);
            let strides = fbb.create_vector(strides);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::conv2d::OUTPUT, output);
            fbb.push_slot_always(vt::conv2d::STRIDES, strides);
            fbb.push_slot_always(vt::conv2d::PADDING, padding);
            if let Some(bias) = bias {
                fbb.push_slot_always(vt::conv2d::BIAS, bias);
            }
            fbb.push_slot_always(vt::conv2d::WEIGHT, weight);
            fbb.push_slot_always(vt::conv2d::INPUT, input);
            fbb.push_slot::<i8>(vt::conv2d::FUSE, fuse.code(), 0);
            (vt::layer::CONV2D_PARAM, fbb.end_table(start))
        }
        LoweredLayer::AvePool {
            input,
            kernel_shape,
            padding,
            strides,
            fuse,
            output,
        } => (
            vt::layer::AVEPOOL_PARAM,
            encode_pool(fbb, input, kernel_shape, padding, strides, *fuse, output),
        ),
        LoweredLayer::MaxPool {
            input,
            kernel_shape,
            padding,
            strides,
            fuse,
            output,
        } => (
            vt::layer::MAXPOOL_PARAM,
            encode_pool(fbb, input, kernel_shape, padding, strides, *fuse, output),
        ),
        LoweredLayer::Relu { input, output } => {
            (vt::layer::RELU_PARAM, encode_unary(fbb, input, output))
        }
        LoweredLayer::Softmax { input, output } => {
            (vt::layer::SOFTMAX_PARAM, encode_unary(fbb, input, output))
        }
        LoweredLayer::FullyConnected {
            input,
            weight,
            bias,
            fuse,
            output,
        } => {
            let input = fbb.create_string(input);
            let weight = fbb.create_string(weight);
            let bias = bias.as_deref().map(|bias| fbb.create_string(bias));
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::fc::OUTPUT, output);
            if let Some(bias) = bias {
                fbb.push_slot_always(vt::fc::BIAS, bias);
            }
            fbb.push_slot_always(vt::fc::WEIGHT, weight);
            fbb.push_slot_always(vt::fc::INPUT, input);
            fbb.push_slot::<i8>(vt::fc::FUSE, fuse.code(), 0);
            (vt::layer::FC_PARAM, fbb.end_table(start))
        }
        LoweredLayer::Add {
            input1,
            input2,
            fuse,
            output,
        } => {
            let input1 = fbb.create_string(input1);
            let input2 = fbb.create_string(input2);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::add::OUTPUT, output);
            fbb.push_slot_always(vt::add::INPUT2, input2);
            fbb.push_slot_always(vt::add::INPUT1, input1);
            fbb.push_slot::<i8>(vt::add::FUSE, fuse.code(), 0);
            (vt::layer::ADD_PARAM, fbb.end_table(start))
        }
        LoweredLayer::Concat {
            inputs,
            axis,
            output,
        } => {
            let names: Vec<_> = inputs.iter().map(|name| fbb.create_string(name)).collect();
            let inputs = fbb.create_vector(&names);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::concat::OUTPUT, output);
            fbb.push_slot::<u32>(vt::concat::AXIS, *axis, 0);
            fbb.push_slot_always(vt::concat::INPUTS, inputs);
            (vt::layer::CONCAT_PARAM, fbb.end_table(start))
        }
        LoweredLayer::DepthwiseConv2D {
            input,
            weight,
            bias,
            padding,
            strides,
            depth_multiplier,
            fuse,
            output,
        } => {
            let input = fbb.create_string(input);
            let weight = fbb.create_string(weight);
            let bias = bias.as_deref().map(|bias| fbb.create_string(bias));
            let padding = fbb.create_vector(padding);
            let strides = fbb.create_vector(strides);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::depthwise_conv2d::OUTPUT, output);
            fbb.push_slot::<i32>(vt::depthwise_conv2d::DEPTH_MULTIPLIER, *depth_multiplier, 0);
            fbb.push_slot_always(vt::depthwise_conv2d::STRIDES, strides);
            fbb.push_slot_always(vt::depthwise_conv2d::PADDING, padding);
            if let Some(bias) = bias {
                fbb.push_slot_always(vt::depthwise_conv2d::BIAS, bias);
            }
            fbb.push_slot_always(vt::depthwise_conv2d::WEIGHT, weight);
            fbb.push_slot_always(vt::depthwise_conv2d::INPUT, input);
            fbb.push_slot::<i8>(vt::depthwise_conv2d::FUSE, fuse.code(), 0);
            (vt::layer::DEPTHWISE_CONV2D_PARAM, fbb.end_table(start))
        }
        LoweredLayer::BatchToSpace {
            input,
            block_sizes,
            output,
        } => {
            let input = fbb.create_string(input);
            let block_sizes = fbb.create_vector(block_sizes);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::batch_to_space::OUTPUT, output);
            fbb.push_slot_always(vt::batch_to_space::BLOCK_SIZES, block_sizes);
            fbb.push_slot_always(vt::batch_to_space::INPUT, input);
            (vt::layer::BATCH_TO_SPACE_PARAM, fbb.end_table(start))
        }
        LoweredLayer::SpaceToBatch {
            input,
            block_sizes,
            pads,
            output,
        } => {
            let input = fbb.create_string(input);
            let block_sizes = fbb.create_vector(block_sizes);
            let pads = fbb.create_vector(pads);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::space_to_batch::OUTPUT, output);
            fbb.push_slot_always(vt::space_to_batch::PADS, pads);
            fbb.push_slot_always(vt::space_to_batch::BLOCK_SIZES, block_sizes);
            fbb.push_slot_always(vt::space_to_batch::INPUT, input);
            (vt::layer::SPACE_TO_BATCH_PARAM, fbb.end_table(start))
        }
        LoweredLayer::StridedSlice {
            input,
            starts,
            ends,
            strides,
            begin_mask,
            end_mask,
            shrink_axis_mask,
            output,
        } => {
            let input = fbb.create_string(input);
            let starts = fbb.create_vector(starts);
            let ends = fbb.create_vector(ends);
            let strides = fbb.create_vector(strides);
            let output = fbb.create_string(output);
            let start = fbb.start_table();
            fbb.push_slot_always(vt::strided_slice::OUTPUT, output);
            fbb.push_slot::<i32>(vt::strided_slice::SHRINK_AXIS_MASK, *shrink_axis_mask, 0);
            fbb.push_slot::<i32>(vt::strided_slice::END_MASK, *end_mask, 0);
            fbb.push_slot::<i32>(vt::strided_slice::BEGIN_MASK, *begin_mask, 0);
            fbb.push_slot_always(vt::strided_slice::STRIDES, strides);
            fbb.push_slot_always(vt::strided_slice::ENDS, ends);
            fbb.push_slot_always(vt::strided_slice::STARTS, starts);
            fbb.push_slot_always(vt::strided_slice::INPUT, input);
            (vt::layer::STRIDED_SLICE_PARAM, fbb.end_table(start))
        }
    };

    let start = fbb.start_table();
    fbb.push_slot_always(slot, param);
    fbb.push_slot::<i8>(vt::layer::TYPE, layer.layer_type().code(), 0);
    fbb.end_table(start)
}

fn encode_pool(
    fbb: &mut FlatBufferBuilder<'_>,
    input: &str,
    kernel_shape: &[i32],
    padding: &[i32],
    strides: &[i32],
    fuse: FuseCode,
    output: &str,
) -> Table {
    let input = fbb.create_string(input);
    let kernel_shape = fbb.create_vector(kernel_shape);
    let padding = fbb.create_vector(padding);
    let strides = fbb.create_vector(strides);
    let output = fbb.create_string(output);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::pool::OUTPUT, output);
    fbb.push_slot_always(vt::pool::STRIDES, strides);
    fbb.push_slot_always(vt::pool::PADDING, padding);
    fbb.push_slot_always(vt::pool::KERNEL_SHAPE, kernel_shape);
    fbb.push_slot_always(vt::pool::INPUT, input);
    fbb.push_slot::<i8>(vt::pool::FUSE, fuse.code(), 0);
    fbb.end_table(start)
}

fn encode_unary(fbb: &mut FlatBufferBuilder<'_>, input: &str, output: &str) -> Table {
    let input = fbb.create_string(input);
    let output = fbb.create_string(output);
    let start = fbb.start_table();
    fbb.push_slot_always(vt::unary::OUTPUT, output);
    fbb.push_slot_always(vt::unary::INPUT, input);
    fbb.end_table(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerType;

    /// Minimal flatbuffer walker for checking encoded fields.
    struct Reader<'a> {
        buf: &'a [u8],
    }

    impl<'a> Reader<'a> {
        fn u16_at(&self, pos: usize) -> u16 {
            u16::from_le_bytes([self.buf[pos], self.buf[pos + 1]])
        }

        fn u32_at(&self, pos: usize) -> u32 {
            u32::from_le_bytes(self.buf[pos..pos + 4].try_into().unwrap())
        }

        fn i32_at(&self, pos: usize) -> i32 {
            self.u32_at(pos) as i32
        }

        fn root(&self) -> usize {
            self.u32_at(0) as usize
        }

        fn field(&self, table: usize, slot: u16) -> Option<usize> {
            let vtable = (table as i64 - self.i32_at(table) as i64) as usize;
            if slot >= self.u16_at(vtable) {
                return None;
            }
            match self.u16_at(vtable + slot as usize) {
                0 => None,
                offset => Some(table + offset as usize),
            }
        }

        fn deref(&self, pos: usize) -> usize {
            pos + self.u32_at(pos) as usize
        }

        fn table(&self, table: usize, slot: u16) -> Option<usize> {
            self.field(table, slot).map(|pos| self.deref(pos))
        }

        fn i8_field(&self, table: usize, slot: u16) -> i8 {
            self.field(table, slot).map_or(0, |pos| self.buf[pos] as i8)
        }

        fn u32_field(&self, table: usize, slot: u16) -> u32 {
            self.field(table, slot).map_or(0, |pos| self.u32_at(pos))
        }

        fn string_at(&self, pos: usize) -> String {
            let len = self.u32_at(pos) as usize;
            String::from_utf8(self.buf[pos + 4..pos + 4 + len].to_vec()).unwrap()
        }

        fn string(&self, table: usize, slot: u16) -> Option<String> {
            self.table(table, slot).map(|pos| self.string_at(pos))
        }

        fn vector(&self, table: usize, slot: u16) -> (usize, usize) {
            let pos = self.table(table, slot).expect("vector field present");
            (pos + 4, self.u32_at(pos) as usize)
        }

        fn tables(&self, table: usize, slot: u16) -> Vec<usize> {
            let (start, len) = self.vector(table, slot);
            (0..len).map(|i| self.deref(start + 4 * i)).collect()
        }

        fn strings(&self, table: usize, slot: u16) -> Vec<String> {
            self.tables(table, slot)
                .into_iter()
                .map(|pos| self.string_at(pos))
                .collect()
        }

        fn i32s(&self, table: usize, slot: u16) -> Vec<i32> {
            let (start, len) = self.vector(table, slot);
            (0..len).map(|i| self.i32_at(start + 4 * i)).collect()
        }

        fn u32s(&self, table: usize, slot: u16) -> Vec<u32> {
            let (start, len) = self.vector(table, slot);
            (0..len).map(|i| self.u32_at(start + 4 * i)).collect()
        }

        fn f32s(&self, table: usize, slot: u16) -> Vec<f32> {
            let (start, len) = self.vector(table, slot);
            (0..len)
                .map(|i| f32::from_bits(self.u32_at(start + 4 * i)))
                .collect()
        }
    }

    fn sample_model() -> LoweredModel {
        LoweredModel {
            inputs: vec![GraphInput {
                name: "data".to_string(),
                shape: vec![1, 4, 4, 2],
            }],
            tensors: vec![
                LoweredTensor::float32("w_conv_w", vec![1, 1, 1, 2], vec![0.5, -1.0]),
                LoweredTensor::float32("b_conv_b", vec![1], vec![0.25]),
            ],
            layers: vec![
                LoweredLayer::Conv2D {
                    input: "data".to_string(),
                    weight: "w_conv_w".to_string(),
                    bias: Some("b_conv_b".to_string()),
                    padding: vec![0, 0, 0, 0],
                    strides: vec![1, 1],
                    fuse: FuseCode::Relu,
                    output: "conv".to_string(),
                },
                LoweredLayer::Concat {
                    inputs: vec!["conv".to_string(), "data".to_string()],
                    axis: 3,
                    output: "cat".to_string(),
                },
                LoweredLayer::StridedSlice {
                    input: "cat".to_string(),
                    starts: vec![0, 0, 0, 0],
                    ends: vec![1, 3, 3, 3],
                    strides: vec![1, 1, 1, 1],
                    begin_mask: 0,
                    end_mask: 0,
                    shrink_axis_mask: 0,
                    output: "out".to_string(),
                },
                LoweredLayer::Softmax {
                    input: "out".to_string(),
                    output: "prob".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_model_tables() {
        let bytes = encode_model(&sample_model());
        let r = Reader { buf: &bytes };
        let root = r.root();

        let inputs = r.tables(root, vt::model::INPUTS);
        assert_eq!(inputs.len(), 1);
        assert_eq!(r.string(inputs[0], vt::input::NAME).unwrap(), "data");
        assert_eq!(r.u32s(inputs[0], vt::input::SHAPE), vec![1, 4, 4, 2]);

        let tensors = r.tables(root, vt::model::INITIALIZERS);
        assert_eq!(tensors.len(), 2);
        assert_eq!(r.string(tensors[0], vt::tensor::NAME).unwrap(), "w_conv_w");
        assert_eq!(r.i8_field(tensors[0], vt::tensor::DATA_TYPE), 0);
        assert_eq!(r.u32s(tensors[0], vt::tensor::SHAPE), vec![1, 1, 1, 2]);
        assert_eq!(r.f32s(tensors[0], vt::tensor::FLOAT32_DATA), vec![0.5, -1.0]);
        assert!(r.field(tensors[0], vt::tensor::INT8_DATA).is_none());
    }

    #[test]
    fn test_layer_tables() {
        let bytes = encode_model(&sample_model());
        let r = Reader { buf: &bytes };
        let layers = r.tables(r.root(), vt::model::LAYERS);
        assert_eq!(layers.len(), 4);

        let types: Vec<i8> = layers
            .iter()
            .map(|&layer| r.i8_field(layer, vt::layer::TYPE))
            .collect();
        assert_eq!(
            types,
            vec![
                LayerType::Conv2D.code(),
                LayerType::Concat.code(),
                LayerType::StridedSlice.code(),
                LayerType::Softmax.code()
            ]
        );

        let conv = r.table(layers[0], vt::layer::CONV2D_PARAM).unwrap();
        assert!(r.table(layers[0], vt::layer::RELU_PARAM).is_none());
        assert_eq!(r.string(conv, vt::conv2d::INPUT).unwrap(), "data");
        assert_eq!(r.string(conv, vt::conv2d::WEIGHT).unwrap(), "w_conv_w");
        assert_eq!(r.string(conv, vt::conv2d::BIAS).unwrap(), "b_conv_b");
        assert_eq!(r.i32s(conv, vt::conv2d::STRIDES), vec![1, 1]);
        assert_eq!(r.i8_field(conv, vt::conv2d::FUSE), FuseCode::Relu.code());
        assert_eq!(r.string(conv, vt::conv2d::OUTPUT).unwrap(), "conv");

        let concat = r.table(layers[1], vt::layer::CONCAT_PARAM).unwrap();
        assert_eq!(r.strings(concat, vt::concat::INPUTS), vec!["conv", "data"]);
        assert_eq!(r.u32_field(concat, vt::concat::AXIS), 3);

        let slice = r.table(layers[2], vt::layer::STRIDED_SLICE_PARAM).unwrap();
        assert_eq!(r.i32s(slice, vt::strided_slice::ENDS), vec![1, 3, 3, 3]);
        assert_eq!(r.u32_field(slice, vt::strided_slice::BEGIN_MASK), 0);

        let softmax = r.table(layers[3], vt::layer::SOFTMAX_PARAM).unwrap();
        assert_eq!(r.string(softmax, vt::unary::OUTPUT).unwrap(), "prob");
    }

    #[test]
    fn test_missing_bias_is_absent() {
        let mut model = sample_model();
        if let LoweredLayer::Conv2D { bias, .. } = &mut model.layers[0] {
            *bias = None;
        }
        let bytes = encode_model(&model);
        let r = Reader { buf: &bytes };
        let layers = r.tables(r.root(), vt::model::LAYERS);
        let conv = r.table(layers[0], vt::layer::CONV2D_PARAM).unwrap();
        assert_eq!(r.string(conv, vt::conv2d::BIAS), None);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let model = sample_model();
        assert_eq!(encode_model(&model), encode_model(&model));
    }

    #[test]
    fn test_converter_metadata() {
        let converted = DaqConverter.convert(&sample_model()).unwrap();
        assert_eq!(converted.format, "daq");
        assert_eq!(converted.content_type, "application/octet-stream");
        assert!(!converted.data.is_empty());
    }
}
