use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::error::GraphError;
use crate::tensor::RawTensor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Dimension {
    Static(u32),
    Symbolic(String),
}

pub fn to_dimension_vector(shape: &[u32]) -> Vec<Dimension> {
    shape.iter().copied().map(Dimension::Static).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float32,
    Float16,
    Float64,
    Int8,
    Uint8,
    Int16,
    Int32,
    Int64,
    Bool,
    String,
}

impl DataType {
    pub fn bytes_per_element(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Float16 | DataType::Int16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Int64 => 8,
            // strings are variable length; callers never size them
            DataType::String => 0,
        }
    }
}

fn default_data_type() -> DataType {
    DataType::Float32
}

/// Typed node attribute, mirroring the attribute kinds the lowering reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl AttributeValue {
    fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Ints(_) => "ints",
            AttributeValue::Floats(_) => "floats",
            AttributeValue::Strings(_) => "strings",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    pub fn new(op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Node {
            name: String::new(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: AttributeValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Name used in diagnostics; unnamed nodes fall back to their first output.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.outputs.first() {
            Some(output) => format!("{}:{}", self.op_type, output),
            None => self.op_type.clone(),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn get_int(&self, name: &str, default: i64) -> Result<i64, GraphError> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(other) => Err(self.wrong_kind(name, "int", other)),
        }
    }

    pub fn get_float(&self, name: &str, default: f32) -> Result<f32, GraphError> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(AttributeValue::Float(v)) => Ok(*v),
            Some(AttributeValue::Int(v)) => Ok(*v as f32),
            Some(other) => Err(self.wrong_kind(name, "float", other)),
        }
    }

    pub fn get_ints(&self, name: &str, default: &[i64]) -> Result<Vec<i64>, GraphError> {
        match self.attributes.get(name) {
            None => Ok(default.to_vec()),
            Some(AttributeValue::Ints(v)) => Ok(v.clone()),
            Some(other) => Err(self.wrong_kind(name, "ints", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<Option<&str>, GraphError> {
        match self.attributes.get(name) {
            None => Ok(None),
            Some(AttributeValue::String(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(self.wrong_kind(name, "string", other)),
        }
    }

    /// Fetch input `index`, failing when the node declares fewer inputs.
    pub fn input(&self, index: usize) -> Result<&str, GraphError> {
        self.inputs
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                GraphError::malformed(
                    self.display_name(),
                    format!("{} expects at least {} inputs", self.op_type, index + 1),
                )
            })
    }

    /// Optional inputs may be omitted or given as an empty name.
    pub fn optional_input(&self, index: usize) -> Option<&str> {
        self.inputs
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn output(&self, index: usize) -> Result<&str, GraphError> {
        self.outputs
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                GraphError::malformed(
                    self.display_name(),
                    format!("{} expects at least {} outputs", self.op_type, index + 1),
                )
            })
    }

    fn wrong_kind(&self, name: &str, expected: &str, found: &AttributeValue) -> GraphError {
        GraphError::malformed(
            self.display_name(),
            format!(
                "attribute `{}` should be {} but is {}",
                name,
                expected,
                found.kind()
            ),
        )
    }
}

/// Declared graph input or output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default)]
    pub shape: Vec<Dimension>,
}

impl ValueInfo {
    pub fn new(name: &str, shape: &[u32]) -> Self {
        ValueInfo {
            name: name.to_string(),
            shape: to_dimension_vector(shape),
        }
    }

    pub fn static_shape(&self) -> Option<Vec<u32>> {
        let mut shape = Vec::with_capacity(self.shape.len());
        for dim in &self.shape {
            match dim {
                Dimension::Static(v) => shape.push(*v),
                Dimension::Symbolic(_) => return None,
            }
        }
        Some(shape)
    }
}

/// Initializer tensor as stored in the source graph. Float payloads come
/// either as `float_data` or as little-endian `raw_data`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Initializer {
    pub name: String,
    #[serde(default)]
    pub dims: Vec<u32>,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde_as(as = "Base64")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_data: Vec<u8>,
}

impl Initializer {
    pub fn float32(name: &str, dims: &[u32], data: Vec<f32>) -> Self {
        Initializer {
            name: name.to_string(),
            dims: dims.to_vec(),
            data_type: DataType::Float32,
            float_data: data,
            raw_data: Vec::new(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Decode the float payload. Non-float initializers yield `None`.
    pub fn to_raw_tensor(&self) -> Result<Option<RawTensor>, GraphError> {
        if self.data_type != DataType::Float32 {
            return Ok(None);
        }
        let expected = self.element_count();
        let data = if !self.float_data.is_empty() {
            self.float_data.clone()
        } else {
            if self.raw_data.len() != expected * DataType::Float32.bytes_per_element() {
                return Err(GraphError::malformed(
                    &self.name,
                    format!(
                        "raw_data holds {} bytes, expected {} for dims {:?}",
                        self.raw_data.len(),
                        expected * 4,
                        self.dims
                    ),
                ));
            }
            self.raw_data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        };
        if data.len() != expected {
            return Err(GraphError::malformed(
                &self.name,
                format!(
                    "holds {} values, expected {} for dims {:?}",
                    data.len(),
                    expected,
                    self.dims
                ),
            ));
        }
        Ok(Some(RawTensor::new(&self.name, self.dims.clone(), data)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub initializers: Vec<Initializer>,
    #[serde(default)]
    pub inputs: Vec<ValueInfo>,
    #[serde(default)]
    pub outputs: Vec<ValueInfo>,
}

impl GraphInfo {
    pub fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.iter().find(|init| init.name == name)
    }

    pub fn is_graph_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output.name == name)
    }

    /// Nodes reading `operand`, in source order.
    pub fn consumers<'a>(&'a self, operand: &'a str) -> impl Iterator<Item = (usize, &'a Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.inputs.iter().any(|input| input == operand))
    }
}
