//! End-to-end lowering of small graphs through the public API.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use daqc::converters::{DaqConverter, GraphConverter};
use daqc::graph::{AttributeValue, GraphInfo, Initializer, Node, ValueInfo};
use daqc::model::{FuseCode, LayerType, LoweredLayer};
use daqc::{ConvertOptions, ConverterRegistry, GraphError, compile, lower_graph};

fn weight(name: &str, dims: &[u32]) -> Initializer {
    let count: u32 = dims.iter().product();
    let data = (0..count).map(|i| (i % 7) as f32 * 0.1 - 0.3).collect();
    Initializer::float32(name, dims, data)
}

fn layer_types(layers: &[LoweredLayer]) -> Vec<LayerType> {
    layers.iter().map(LoweredLayer::layer_type).collect()
}

/// Conv -> Relu -> MaxPool -> GlobalAveragePool -> Dropout -> Reshape
fn classifier() -> GraphInfo {
    GraphInfo {
        name: "classifier".to_string(),
        nodes: vec![
            Node::new("Conv", &["data", "conv1_w", "conv1_b"], &["conv1"])
                .named("conv1")
                .with_attr("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
            Node::new("Relu", &["conv1"], &["relu1"]).named("relu1"),
            Node::new("MaxPool", &["relu1"], &["pool1"])
                .with_attr("kernel_shape", AttributeValue::Ints(vec![2, 2]))
                .with_attr("strides", AttributeValue::Ints(vec![2, 2])),
            Node::new("GlobalAveragePool", &["pool1"], &["gap"]),
            Node::new("Dropout", &["gap"], &["drop"]),
            Node::new("Reshape", &["drop", "flat_shape"], &["flat"]),
        ],
        initializers: vec![
            weight("conv1_w", &[8, 3, 3, 3]),
            weight("conv1_b", &[8]),
            Initializer {
                data_type: daqc::DataType::Int64,
                raw_data: [1i64, -1]
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect(),
                ..Initializer::float32("flat_shape", &[2], vec![])
            },
        ],
        inputs: vec![
            ValueInfo::new("data", &[1, 3, 16, 16]),
            ValueInfo::new("flat_shape", &[2]),
        ],
        outputs: vec![ValueInfo::new("flat", &[1, 8])],
    }
}

#[test]
fn test_classifier_pipeline() {
    let lowered = lower_graph(&classifier()).unwrap();
    let model = &lowered.model;

    assert_eq!(model.inputs.len(), 1);
    assert_eq!(model.inputs[0].name, "data");
    assert_eq!(model.inputs[0].shape, vec![1, 16, 16, 3]);

    assert_eq!(
        layer_types(&model.layers),
        vec![LayerType::Conv2D, LayerType::MaxPool, LayerType::AvePool]
    );
    assert_eq!(model.layers[0].fuse(), FuseCode::Relu);
    assert_eq!(model.layers[0].output(), "relu1");
    assert_eq!(model.layers[1].operands(), vec!["relu1"]);

    assert_eq!(lowered.shapes.get("relu1"), Some(&vec![1, 16, 16, 8]));
    assert_eq!(lowered.shapes.get("conv1"), None);
    assert_eq!(lowered.shapes.get("pool1"), Some(&vec![1, 8, 8, 8]));
    assert_eq!(lowered.shapes.get("gap"), Some(&vec![1, 1, 1, 8]));

    let names: Vec<_> = model.tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["conv1_b_conv_b", "conv1_w_conv_w"]);
    assert_eq!(model.tensor("conv1_w_conv_w").unwrap().shape, vec![8, 3, 3, 3]);
}

#[test]
fn test_two_relu_consumers_stay_separate() {
    let graph = GraphInfo {
        name: "branches".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("Relu", &["c"], &["r1"]),
            Node::new("Relu", &["c"], &["r2"]),
            Node::new("Add", &["r1", "r2"], &["y"]),
        ],
        initializers: vec![weight("w", &[4, 2, 1, 1])],
        inputs: vec![ValueInfo::new("x", &[1, 2, 5, 5])],
        outputs: vec![ValueInfo::new("y", &[1, 4, 5, 5])],
    };
    let lowered = lower_graph(&graph).unwrap();
    assert_eq!(
        layer_types(&lowered.model.layers),
        vec![
            LayerType::Conv2D,
            LayerType::Relu,
            LayerType::Relu,
            LayerType::Add
        ]
    );
    assert_eq!(lowered.model.layers[0].fuse(), FuseCode::None);
    assert_eq!(lowered.model.layers[3].operands(), vec!["r1", "r2"]);
}

#[test]
fn test_add_fuses_following_relu() {
    let graph = GraphInfo {
        name: "residual".to_string(),
        nodes: vec![
            Node::new("Add", &["a", "b"], &["sum"]),
            Node::new("Relu", &["sum"], &["out"]),
            Node::new("Softmax", &["out"], &["prob"]),
        ],
        inputs: vec![ValueInfo::new("a", &[1, 10]), ValueInfo::new("b", &[1, 10])],
        ..Default::default()
    };
    let lowered = lower_graph(&graph).unwrap();
    assert_eq!(
        layer_types(&lowered.model.layers),
        vec![LayerType::Add, LayerType::Softmax]
    );
    assert_eq!(lowered.model.layers[0].fuse(), FuseCode::Relu);
    assert_eq!(lowered.model.layers[0].output(), "out");
    assert_eq!(lowered.model.layers[1].operands(), vec!["out"]);
}

#[test]
fn test_fused_activation_keeps_graph_output_name() {
    let graph = GraphInfo {
        name: "head".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w"], &["c"]).named("conv"),
            Node::new("Relu", &["c"], &["y"]).named("relu"),
        ],
        initializers: vec![weight("w", &[2, 1, 3, 3])],
        inputs: vec![ValueInfo::new("x", &[1, 1, 4, 4])],
        outputs: vec![ValueInfo::new("y", &[1, 2, 2, 2])],
    };
    let lowered = lower_graph(&graph).unwrap();
    assert_eq!(lowered.model.layers.len(), 1);
    assert_eq!(lowered.model.layers[0].fuse(), FuseCode::Relu);
    assert_eq!(lowered.model.layers[0].output(), "y");
    assert_eq!(lowered.shapes.get("y"), Some(&vec![1, 2, 2, 2]));
}

#[test]
fn test_depthwise_conv_lowering() {
    let graph = GraphInfo {
        name: "mobilenet_block".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "dw"], &["y"])
                .with_attr("group", AttributeValue::Int(4))
                .with_attr("strides", AttributeValue::Ints(vec![2, 2]))
                .with_attr("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
        ],
        initializers: vec![weight("dw", &[4, 1, 3, 3])],
        inputs: vec![ValueInfo::new("x", &[1, 4, 8, 8])],
        outputs: vec![],
    };
    let lowered = lower_graph(&graph).unwrap();
    match &lowered.model.layers[0] {
        LoweredLayer::DepthwiseConv2D {
            weight,
            depth_multiplier,
            strides,
            ..
        } => {
            assert_eq!(weight, "dw_dwconv_w");
            assert_eq!(*depth_multiplier, 1);
            assert_eq!(strides, &vec![2, 2]);
        }
        other => panic!("expected depthwise conv, got {:?}", other),
    }
    assert_eq!(lowered.shapes.get("y"), Some(&vec![1, 4, 4, 4]));
}

#[test]
fn test_grouped_conv_is_unsupported() {
    let graph = GraphInfo {
        name: "grouped".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w"], &["y"])
                .named("group_conv")
                .with_attr("group", AttributeValue::Int(2)),
        ],
        initializers: vec![weight("w", &[4, 2, 3, 3])],
        inputs: vec![ValueInfo::new("x", &[1, 4, 8, 8])],
        outputs: vec![],
    };
    match lower_graph(&graph).unwrap_err() {
        GraphError::UnsupportedConfiguration { op_type, node, .. } => {
            assert_eq!(op_type, "Conv");
            assert_eq!(node, "group_conv");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_reshape_followed_by_node_fails() {
    let mut graph = classifier();
    graph
        .nodes
        .push(Node::new("Softmax", &["flat"], &["prob"]).named("prob"));
    let err = lower_graph(&graph).unwrap_err();
    assert!(
        matches!(err, GraphError::UnsupportedConfiguration { ref node, .. } if node == "prob"),
        "{}",
        err
    );
}

#[test]
fn test_concat_channel_axis() {
    let graph = GraphInfo {
        name: "inception".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w1"], &["b1"]),
            Node::new("Conv", &["x", "w2"], &["b2"]),
            Node::new("Concat", &["b1", "b2"], &["cat"])
                .with_attr("axis", AttributeValue::Int(1)),
        ],
        initializers: vec![weight("w1", &[2, 3, 1, 1]), weight("w2", &[5, 3, 1, 1])],
        inputs: vec![ValueInfo::new("x", &[1, 3, 6, 6])],
        outputs: vec![],
    };
    let lowered = lower_graph(&graph).unwrap();
    let concat = lowered.model.layers_of(LayerType::Concat).next().unwrap();
    match concat {
        LoweredLayer::Concat { axis, inputs, .. } => {
            assert_eq!(*axis, 3);
            assert_eq!(inputs, &vec!["b1".to_string(), "b2".to_string()]);
        }
        other => panic!("expected concat, got {:?}", other),
    }
    assert_eq!(lowered.shapes.get("cat"), Some(&vec![1, 6, 6, 7]));
}

#[test]
fn test_shared_weight_is_emitted_once() {
    let graph = GraphInfo {
        name: "shared".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w"], &["a"]),
            Node::new("Conv", &["a", "w"], &["b"]),
        ],
        initializers: vec![weight("w", &[3, 3, 1, 1])],
        inputs: vec![ValueInfo::new("x", &[1, 3, 4, 4])],
        outputs: vec![],
    };
    let lowered = lower_graph(&graph).unwrap();
    assert_eq!(lowered.model.tensors.len(), 1);
    assert_eq!(lowered.model.layers.len(), 2);
}

#[test]
fn test_batch_norm_folded_by_compile() {
    let graph = GraphInfo {
        name: "conv_bn".to_string(),
        nodes: vec![
            Node::new("Conv", &["x", "w"], &["c"]),
            Node::new("BatchNormalization", &["c", "s", "b", "m", "v"], &["bn"]),
            Node::new("Relu", &["bn"], &["r"]),
        ],
        initializers: vec![
            weight("w", &[2, 1, 3, 3]),
            Initializer::float32("s", &[2], vec![1.0, 1.0]),
            Initializer::float32("b", &[2], vec![0.0, 0.0]),
            Initializer::float32("m", &[2], vec![0.0, 0.0]),
            Initializer::float32("v", &[2], vec![1.0, 1.0]),
        ],
        inputs: vec![ValueInfo::new("x", &[1, 1, 5, 5])],
        outputs: vec![ValueInfo::new("r", &[1, 2, 3, 3])],
    };
    let lowered = compile(&graph, &ConvertOptions::default()).unwrap();
    assert_eq!(layer_types(&lowered.model.layers), vec![LayerType::Conv2D]);
    assert_eq!(lowered.model.layers[0].fuse(), FuseCode::Relu);
    assert_eq!(lowered.model.layers[0].output(), "r");
    assert_eq!(lowered.shapes.get("r"), Some(&vec![1, 3, 3, 2]));
    assert!(lowered.model.tensor("bn_bn_fused_w_conv_w").is_some());
    assert!(lowered.model.tensor("bn_bn_fused_b_conv_b").is_some());
}

#[test]
fn test_conversion_is_deterministic() {
    let graph = classifier();
    let first = lower_graph(&graph).unwrap();
    let second = lower_graph(&graph).unwrap();
    assert_eq!(first.model, second.model);

    let a = DaqConverter.convert(&first.model).unwrap();
    let b = DaqConverter.convert(&second.model).unwrap();
    assert_eq!(a.data, b.data);
}

#[test]
fn test_json_description_with_raw_data() {
    let raw = STANDARD.encode([2.0f32, -1.0].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>());
    let text = format!(
        r#"{{
            "name": "fc",
            "nodes": [
                {{"op_type": "Gemm", "inputs": ["x", "w"], "outputs": ["y"],
                  "attributes": {{"transB": 1}}}}
            ],
            "initializers": [{{"name": "w", "dims": [1, 2], "raw_data": "{}"}}],
            "inputs": [{{"name": "x", "shape": [1, 2]}}]
        }}"#,
        raw
    );
    let graph: GraphInfo = serde_json::from_str(&text).unwrap();
    let lowered = lower_graph(&graph).unwrap();
    assert_eq!(lowered.model.tensor("w").unwrap().data, vec![2.0, -1.0]);
    assert_eq!(lowered.shapes.get("y"), Some(&vec![1, 1]));

    let converted = ConverterRegistry::with_defaults()
        .convert("json", &lowered.model)
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&converted.data).unwrap();
    assert_eq!(value["layers"][0]["type"], "FullyConnected");
}
