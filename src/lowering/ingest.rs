use log::debug;

use super::ConversionContext;
use crate::error::GraphError;

/// Index initializers and register graph inputs before any node is lowered.
///
/// Float initializers become [`RawTensor`](crate::tensor::RawTensor)s; other
/// element types are remembered by name only so they are never mistaken for
/// runtime inputs. Inputs are converted to channel-last order.
pub fn ingest_graph(ctx: &mut ConversionContext<'_>) -> Result<(), GraphError> {
    let graph = ctx.graph();

    for initializer in &graph.initializers {
        if ctx.is_initializer(&initializer.name) {
            return Err(GraphError::malformed(
                &initializer.name,
                "initializer declared more than once",
            ));
        }
        let raw = initializer.to_raw_tensor()?;
        if raw.is_none() {
            debug!(
                "Initializer `{}` ({:?}) kept by name only",
                initializer.name, initializer.data_type
            );
        }
        ctx.register_initializer(&initializer.name, raw);
    }

    for input in &graph.inputs {
        if ctx.is_initializer(&input.name) {
            continue;
        }
        let shape = input.static_shape().ok_or_else(|| {
            GraphError::malformed(
                &input.name,
                format!("input shape {:?} is not fully static", input.shape),
            )
        })?;
        if shape.is_empty() || shape.contains(&0) {
            return Err(GraphError::malformed(
                &input.name,
                format!("input shape {:?} has no usable extent", shape),
            ));
        }
        let shape = to_channel_last(&shape);
        debug!("Input `{}` {:?}", input.name, shape);
        ctx.add_input(&input.name, shape);
    }
    Ok(())
}

/// `[N, C, H, W]` to `[N, H, W, C]`; other ranks are kept as they are.
pub fn to_channel_last(shape: &[u32]) -> Vec<u32> {
    match shape {
        &[n, c, h, w] => vec![n, h, w, c],
        other => other.to_vec(),
    }
}
