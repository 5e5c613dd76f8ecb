//! Weight layout conversion from the source OIHW convention to the
//! channel-last layouts the target runtime expects.

use crate::error::GraphError;
use crate::tensor::{LoweredTensor, RawTensor};

fn dims4(raw: &RawTensor) -> Result<[usize; 4], GraphError> {
    match raw.shape() {
        &[o, i, h, w] => Ok([o as usize, i as usize, h as usize, w as usize]),
        other => Err(GraphError::shape_mismatch(
            raw.name(),
            format!("convolution weight must be 4-D, got {:?}", other),
        )),
    }
}

/// OIHW → OHWI.
pub fn to_vanilla_layout(raw: &RawTensor, name: &str) -> Result<LoweredTensor, GraphError> {
    let [o_dim, i_dim, h_dim, w_dim] = dims4(raw)?;
    let src = raw.data();
    let mut data = Vec::with_capacity(src.len());
    for o in 0..o_dim {
        for h in 0..h_dim {
            for w in 0..w_dim {
                for i in 0..i_dim {
                    data.push(src[((o * i_dim + i) * h_dim + h) * w_dim + w]);
                }
            }
        }
    }
    Ok(LoweredTensor::float32(
        name,
        vec![o_dim as u32, h_dim as u32, w_dim as u32, i_dim as u32],
        data,
    ))
}

/// `[C*m, 1, kh, kw]` → `[1, kh, kw, C*m]`.
pub fn to_depthwise_layout(raw: &RawTensor, name: &str) -> Result<LoweredTensor, GraphError> {
    let [o_dim, i_dim, h_dim, w_dim] = dims4(raw)?;
    if i_dim != 1 {
        return Err(GraphError::shape_mismatch(
            raw.name(),
            format!("depthwise weight needs a unit second dimension, got {}", i_dim),
        ));
    }
    let src = raw.data();
    let mut data = Vec::with_capacity(src.len());
    for h in 0..h_dim {
        for w in 0..w_dim {
            for o in 0..o_dim {
                data.push(src[(o * h_dim + h) * w_dim + w]);
            }
        }
    }
    Ok(LoweredTensor::float32(
        name,
        vec![1, h_dim as u32, w_dim as u32, o_dim as u32],
        data,
    ))
}
