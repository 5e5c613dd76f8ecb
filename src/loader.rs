//! Graph loading from serialized ONNX models and JSON graph descriptions.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use prost::Message;

use crate::error::GraphError;
use crate::graph::{AttributeValue, DataType, Dimension, GraphInfo, Initializer, Node, ValueInfo};
use crate::protos::onnx::{
    AttributeProto, ModelProto, NodeProto, TensorProto, ValueInfoProto,
    attribute_proto::AttributeType, tensor_proto::DataType as ProtoDataType,
    tensor_shape_proto::dimension::Value as DimensionValue, type_proto::Value as TypeValue,
};

/// Load a graph, picking the decoder from the file extension.
pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<GraphInfo, GraphError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let bytes = match extension.as_str() {
        "onnx" | "json" => fs::read(path).map_err(|err| GraphError::io(path, err))?,
        _ => return Err(GraphError::UnsupportedGraphFormat { extension }),
    };
    info!("Loading {} ({} bytes)", path.display(), bytes.len());

    let graph = if extension == "onnx" {
        let model = ModelProto::decode(bytes.as_slice())?;
        graph_from_model_proto(&model)?
    } else {
        serde_json::from_slice(&bytes)?
    };
    info!(
        "Loaded graph `{}`: {} nodes, {} initializers, {} inputs",
        graph.name,
        graph.nodes.len(),
        graph.initializers.len(),
        graph.inputs.len()
    );
    Ok(graph)
}

pub fn graph_from_model_proto(model: &ModelProto) -> Result<GraphInfo, GraphError> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| GraphError::malformed("model", "no graph in ModelProto"))?;
    debug!(
        "ModelProto ir_version {} from `{}` {}",
        model.ir_version, model.producer_name, model.producer_version
    );

    Ok(GraphInfo {
        name: graph.name.clone(),
        nodes: graph.node.iter().map(node_from_proto).collect(),
        initializers: graph
            .initializer
            .iter()
            .map(initializer_from_proto)
            .collect::<Result<_, _>>()?,
        inputs: graph.input.iter().map(value_info_from_proto).collect(),
        outputs: graph.output.iter().map(value_info_from_proto).collect(),
    })
}

fn node_from_proto(proto: &NodeProto) -> Node {
    let mut attributes = BTreeMap::new();
    for attr in &proto.attribute {
        match attribute_from_proto(attr) {
            Some(value) => {
                attributes.insert(attr.name.clone(), value);
            }
            None => warn!(
                "Skipping attribute `{}` of `{}`: kind not supported",
                attr.name, proto.name
            ),
        }
    }
    Node {
        name: proto.name.clone(),
        op_type: proto.op_type.clone(),
        inputs: proto.input.clone(),
        outputs: proto.output.clone(),
        attributes,
    }
}

fn attribute_from_proto(attr: &AttributeProto) -> Option<AttributeValue> {
    let kind = AttributeType::try_from(attr.r#type).unwrap_or(AttributeType::Undefined);
    let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
    match kind {
        AttributeType::Float => Some(AttributeValue::Float(attr.f)),
        AttributeType::Int => Some(AttributeValue::Int(attr.i)),
        AttributeType::String => Some(AttributeValue::String(text(&attr.s))),
        AttributeType::Floats => Some(AttributeValue::Floats(attr.floats.clone())),
        AttributeType::Ints => Some(AttributeValue::Ints(attr.ints.clone())),
        AttributeType::Strings => Some(AttributeValue::Strings(
            attr.strings.iter().map(|s| text(s)).collect(),
        )),
        // Pre-IR3 exporters leave `type` unset; infer it from the populated field.
        AttributeType::Undefined => {
            if !attr.ints.is_empty() {
                Some(AttributeValue::Ints(attr.ints.clone()))
            } else if !attr.floats.is_empty() {
                Some(AttributeValue::Floats(attr.floats.clone()))
            } else if !attr.s.is_empty() {
                Some(AttributeValue::String(text(&attr.s)))
            } else if attr.f != 0.0 {
                Some(AttributeValue::Float(attr.f))
            } else {
                Some(AttributeValue::Int(attr.i))
            }
        }
        _ => None,
    }
}

fn data_type_from_proto(name: &str, code: i32) -> Result<DataType, GraphError> {
    let data_type = match ProtoDataType::try_from(code) {
        Ok(ProtoDataType::Float) => DataType::Float32,
        Ok(ProtoDataType::Float16) => DataType::Float16,
        Ok(ProtoDataType::Double) => DataType::Float64,
        Ok(ProtoDataType::Int8) => DataType::Int8,
        Ok(ProtoDataType::Uint8) => DataType::Uint8,
        Ok(ProtoDataType::Int16) => DataType::Int16,
        Ok(ProtoDataType::Int32) => DataType::Int32,
        Ok(ProtoDataType::Int64) => DataType::Int64,
        Ok(ProtoDataType::Bool) => DataType::Bool,
        Ok(ProtoDataType::String) => DataType::String,
        _ => {
            return Err(GraphError::malformed(
                name,
                format!("unsupported tensor data type {}", code),
            ));
        }
    };
    Ok(data_type)
}

fn initializer_from_proto(proto: &TensorProto) -> Result<Initializer, GraphError> {
    let dims = proto
        .dims
        .iter()
        .map(|&d| {
            u32::try_from(d).map_err(|_| {
                GraphError::malformed(&proto.name, format!("invalid dimension {}", d))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let data_type = data_type_from_proto(&proto.name, proto.data_type)?;
    let (float_data, raw_data) = if data_type == DataType::Float32 {
        (proto.float_data.clone(), proto.raw_data.clone())
    } else {
        (Vec::new(), Vec::new())
    };
    Ok(Initializer {
        name: proto.name.clone(),
        dims,
        data_type,
        float_data,
        raw_data,
    })
}

fn value_info_from_proto(proto: &ValueInfoProto) -> ValueInfo {
    let dims = proto
        .r#type
        .as_ref()
        .and_then(|t| t.value.as_ref())
        .and_then(|value| match value {
            TypeValue::TensorType(tensor) => tensor.shape.as_ref(),
        })
        .map(|shape| shape.dim.as_slice())
        .unwrap_or_default();
    let shape = dims
        .iter()
        .map(|dim| match &dim.value {
            Some(DimensionValue::DimValue(v)) if *v > 0 && *v <= u32::MAX as i64 => {
                Dimension::Static(*v as u32)
            }
            Some(DimensionValue::DimValue(v)) => Dimension::Symbolic(v.to_string()),
            Some(DimensionValue::DimParam(p)) => Dimension::Symbolic(p.clone()),
            None => Dimension::Symbolic("?".to_string()),
        })
        .collect();
    ValueInfo {
        name: proto.name.clone(),
        shape,
    }
}
