pub mod converters;
pub mod error;
pub mod graph;
pub mod layout;
pub mod loader;
pub mod logger;
pub mod lowering;
pub mod model;
pub mod optimizer;
pub mod protos;
pub mod shape_inference;
pub mod tensor;

pub use converters::{ConvertedGraph, ConverterRegistry, GraphConverter};
pub use error::GraphError;
pub use graph::{AttributeValue, DataType, Dimension, GraphInfo, Initializer, Node, ValueInfo};
pub use loader::{graph_from_model_proto, load_graph_from_path};
pub use lowering::{ConvertOptions, Lowered, compile, lower_graph};
pub use model::{FuseCode, GraphInput, LayerType, LoweredLayer, LoweredModel};
pub use optimizer::fuse_bn_into_conv;
pub use shape_inference::Shaper;
pub use tensor::{LoweredTensor, RawTensor};
