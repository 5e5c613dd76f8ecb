use std::collections::BTreeMap;

use crate::error::GraphError;
use crate::model::LoweredModel;

pub mod daq;
pub mod json;

pub use daq::DaqConverter;
pub use json::JsonConverter;

/// Serialized artifact produced by a [`GraphConverter`].
#[derive(Debug, Clone)]
pub struct ConvertedGraph {
    pub format: &'static str,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

pub trait GraphConverter {
    fn format(&self) -> &'static str;
    fn convert(&self, model: &LoweredModel) -> Result<ConvertedGraph, GraphError>;
}

/// Output formats by name.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: BTreeMap<&'static str, Box<dyn GraphConverter + Send + Sync>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DaqConverter));
        registry.register(Box::new(JsonConverter));
        registry
    }

    pub fn register(&mut self, converter: Box<dyn GraphConverter + Send + Sync>) {
        self.converters.insert(converter.format(), converter);
    }

    pub fn formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.converters.keys().copied()
    }

    pub fn convert(
        &self,
        format: &str,
        model: &LoweredModel,
    ) -> Result<ConvertedGraph, GraphError> {
        let converter =
            self.converters
                .get(format)
                .ok_or_else(|| GraphError::UnsupportedFormat {
                    format: format.to_string(),
                })?;
        converter.convert(model)
    }
}
