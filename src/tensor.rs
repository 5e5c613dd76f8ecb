use serde::Serialize;

/// Float initializer read from the source graph. Never mutated once built;
/// layout conversions produce new [`LoweredTensor`]s instead.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    name: String,
    shape: Vec<u32>,
    data: Vec<f32>,
}

impl RawTensor {
    pub fn new(name: &str, shape: Vec<u32>, data: Vec<f32>) -> Self {
        RawTensor {
            name: name.to_string(),
            shape,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorDataType {
    Float32,
}

impl TensorDataType {
    /// Tag written into the artifact.
    pub fn code(self) -> i8 {
        match self {
            TensorDataType::Float32 => 0,
        }
    }
}

/// Tensor materialized for the target runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredTensor {
    pub name: String,
    pub data_type: TensorDataType,
    pub shape: Vec<u32>,
    pub data: Vec<f32>,
}

impl LoweredTensor {
    pub fn float32(name: impl Into<String>, shape: Vec<u32>, data: Vec<f32>) -> Self {
        LoweredTensor {
            name: name.into(),
            data_type: TensorDataType::Float32,
            shape,
            data,
        }
    }

    /// Same-layout copy of a source tensor under `name`.
    pub fn copy_of(raw: &RawTensor, name: impl Into<String>) -> Self {
        LoweredTensor::float32(name, raw.shape().to_vec(), raw.data().to_vec())
    }
}
