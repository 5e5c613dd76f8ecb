//! Table layout of the DAQ model format (`schema/daq.fbs`).
//!
//! The model is written with manual table construction, so the vtable slot
//! of every field is spelled out here. Slot `n` of a table sits at byte
//! offset `4 + 2 * n` of its vtable.

pub mod vt {
    use flatbuffers::VOffsetT;

    pub mod tensor {
        use super::VOffsetT;
        pub const DATA_TYPE: VOffsetT = 4;
        pub const INT8_DATA: VOffsetT = 6;
        pub const FLOAT32_DATA: VOffsetT = 8;
        pub const SHAPE: VOffsetT = 10;
        pub const NAME: VOffsetT = 12;
    }

    pub mod input {
        use super::VOffsetT;
        pub const SHAPE: VOffsetT = 4;
        pub const NAME: VOffsetT = 6;
    }

    pub mod conv2d {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const WEIGHT: VOffsetT = 6;
        pub const BIAS: VOffsetT = 8;
        pub const PADDING: VOffsetT = 10;
        pub const STRIDES: VOffsetT = 12;
        pub const FUSE: VOffsetT = 14;
        pub const OUTPUT: VOffsetT = 16;
    }

    /// Shared by `AvePool` and `MaxPool`.
    pub mod pool {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const KERNEL_SHAPE: VOffsetT = 6;
        pub const PADDING: VOffsetT = 8;
        pub const STRIDES: VOffsetT = 10;
        pub const FUSE: VOffsetT = 12;
        pub const OUTPUT: VOffsetT = 14;
    }

    /// Shared by `Relu` and `Softmax`.
    pub mod unary {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const OUTPUT: VOffsetT = 6;
    }

    pub mod fc {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const WEIGHT: VOffsetT = 6;
        pub const BIAS: VOffsetT = 8;
        pub const FUSE: VOffsetT = 10;
        pub const OUTPUT: VOffsetT = 12;
    }

    pub mod add {
        use super::VOffsetT;
        pub const INPUT1: VOffsetT = 4;
        pub const INPUT2: VOffsetT = 6;
        pub const FUSE: VOffsetT = 8;
        pub const OUTPUT: VOffsetT = 10;
    }

    pub mod concat {
        use super::VOffsetT;
        pub const INPUTS: VOffsetT = 4;
        pub const AXIS: VOffsetT = 6;
        pub const OUTPUT: VOffsetT = 8;
    }

    pub mod depthwise_conv2d {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const WEIGHT: VOffsetT = 6;
        pub const BIAS: VOffsetT = 8;
        pub const PADDING: VOffsetT = 10;
        pub const STRIDES: VOffsetT = 12;
        pub const DEPTH_MULTIPLIER: VOffsetT = 14;
        pub const FUSE: VOffsetT = 16;
        pub const OUTPUT: VOffsetT = 18;
    }

    pub mod batch_to_space {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const BLOCK_SIZES: VOffsetT = 6;
        pub const OUTPUT: VOffsetT = 8;
    }

    pub mod space_to_batch {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const BLOCK_SIZES: VOffsetT = 6;
        pub const PADS: VOffsetT = 8;
        pub const OUTPUT: VOffsetT = 10;
    }

    pub mod strided_slice {
        use super::VOffsetT;
        pub const INPUT: VOffsetT = 4;
        pub const STARTS: VOffsetT = 6;
        pub const ENDS: VOffsetT = 8;
        pub const STRIDES: VOffsetT = 10;
        pub const BEGIN_MASK: VOffsetT = 12;
        pub const END_MASK: VOffsetT = 14;
        pub const SHRINK_AXIS_MASK: VOffsetT = 16;
        pub const OUTPUT: VOffsetT = 18;
    }

    pub mod layer {
        use super::VOffsetT;
        pub const TYPE: VOffsetT = 4;
        pub const CONV2D_PARAM: VOffsetT = 6;
        pub const AVEPOOL_PARAM: VOffsetT = 8;
        pub const MAXPOOL_PARAM: VOffsetT = 10;
        pub const RELU_PARAM: VOffsetT = 12;
        pub const SOFTMAX_PARAM: VOffsetT = 14;
        pub const FC_PARAM: VOffsetT = 16;
        pub const ADD_PARAM: VOffsetT = 18;
        pub const CONCAT_PARAM: VOffsetT = 20;
        pub const DEPTHWISE_CONV2D_PARAM: VOffsetT = 22;
        pub const BATCH_TO_SPACE_PARAM: VOffsetT = 24;
        pub const SPACE_TO_BATCH_PARAM: VOffsetT = 26;
        pub const STRIDED_SLICE_PARAM: VOffsetT = 28;
    }

    pub mod model {
        use super::VOffsetT;
        pub const LAYERS: VOffsetT = 4;
        pub const INITIALIZERS: VOffsetT = 6;
        pub const INPUTS: VOffsetT = 8;
    }
}
