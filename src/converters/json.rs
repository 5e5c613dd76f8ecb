use super::{ConvertedGraph, GraphConverter};
use crate::error::GraphError;
use crate::model::LoweredModel;

/// Human-readable dump of the lowered model, mainly for inspection and
/// diffing against the binary artifact.
#[derive(Debug, Default)]
pub struct JsonConverter;

impl GraphConverter for JsonConverter {
    fn format(&self) -> &'static str {
        "json"
    }

    fn convert(&self, model: &LoweredModel) -> Result<ConvertedGraph, GraphError> {
        let data = serde_json::to_vec_pretty(model).map_err(|err| GraphError::ConversionFailed {
            format: self.format().to_string(),
            reason: err.to_string(),
        })?;
        Ok(ConvertedGraph {
            format: "json",
            content_type: "application/json",
            data,
        })
    }
}
