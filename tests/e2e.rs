//! End-to-end conversion tests.
//!
//! These build small ONNX graphs, convert them, and check the converted
//! model both structurally and numerically: the converted layers, evaluated
//! with naive channel-last kernels, must match a naive channel-first
//! evaluation of the source graph.

use std::collections::HashMap;

use prost::Message;

use keras_import::onnx::proto::{
    AttributeProto, AttributeType, DataType, GraphProto, ModelProto, NodeProto,
    TensorDimensionProto, TensorProto, TensorShapeProto, TensorTypeProto, TypeProto,
    ValueInfoProto,
};
use keras_import::{
    convert, onnx, AttributeValue, ConvertError, Dimension, Graph, LayerKind, Model, Node,
    PaddingMode, Tensor, ValueInfo,
};

fn node(
    op_type: &str,
    name: &str,
    inputs: &[&str],
    outputs: &[&str],
    attrs: &[(&str, AttributeValue)],
) -> Node {
    Node {
        op_type: op_type.to_string(),
        name: name.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        attrs: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    }
}

fn image_input(name: &str, dims: &[usize]) -> ValueInfo {
    ValueInfo {
        name: name.to_string(),
        dtype: keras_import::ElementType::Float32,
        dims: dims.iter().map(|&d| Dimension::Fixed(d)).collect(),
    }
}

fn random_tensor(rng: &mut fastrand::Rng, shape: &[usize]) -> Tensor {
    let len = shape.iter().product();
    Tensor::from_f32(shape.to_vec(), (0..len).map(|_| rng.f32() - 0.5).collect())
}

fn assert_allclose(actual: &Tensor, expected: &Tensor, tolerance: f32) {
    assert_eq!(actual.shape(), expected.shape());
    let a = actual.as_f32().unwrap();
    let b = expected.as_f32().unwrap();
    for (index, (x, y)) in a.iter().zip(b).enumerate() {
        assert!(
            (x - y).abs() <= tolerance,
            "element {} differs: {} vs {} (tolerance {})",
            index,
            x,
            y,
            tolerance
        );
    }
}

/// Total [begin, end] padding on one axis under TF "same" rules.
fn same_pads(in_size: usize, kernel: usize, stride: usize) -> [usize; 2] {
    let out = in_size.div_ceil(stride);
    let total = ((out - 1) * stride + kernel).saturating_sub(in_size);
    [total / 2, total - total / 2]
}

// --- Reference kernels for the source (channel-first) graph. ---

/// Convolution over (N, C, H, W) data with an (O, I, kH, kW) kernel and
/// explicit ONNX pads [top, left, bottom, right].
fn conv_nchw(
    x: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    strides: [usize; 2],
    pads: [usize; 4],
) -> Tensor {
    let [n, in_c, h, w] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let [out_c, _, kh, kw] = [
        weight.shape()[0],
        weight.shape()[1],
        weight.shape()[2],
        weight.shape()[3],
    ];
    let out_h = (h + pads[0] + pads[2] - kh) / strides[0] + 1;
    let out_w = (w + pads[1] + pads[3] - kw) / strides[1] + 1;

    let src = x.as_f32().unwrap();
    let ker = weight.as_f32().unwrap();
    let mut out = vec![0.; n * out_c * out_h * out_w];
    for b in 0..n {
        for o in 0..out_c {
            let bias_val = bias.map(|t| t.as_f32().unwrap()[o]).unwrap_or(0.);
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = bias_val;
                    for i in 0..in_c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let y = (oy * strides[0] + ky) as isize - pads[0] as isize;
                                let x_pos = (ox * strides[1] + kx) as isize - pads[1] as isize;
                                if y < 0 || y >= h as isize || x_pos < 0 || x_pos >= w as isize {
                                    continue;
                                }
                                let src_at =
                                    ((b * in_c + i) * h + y as usize) * w + x_pos as usize;
                                let ker_at = ((o * in_c + i) * kh + ky) * kw + kx;
                                acc += src[src_at] * ker[ker_at];
                            }
                        }
                    }
                    out[((b * out_c + o) * out_h + oy) * out_w + ox] = acc;
                }
            }
        }
    }
    Tensor::from_f32(vec![n, out_c, out_h, out_w], out)
}

fn maxpool_nchw(x: &Tensor, kernel: [usize; 2], strides: [usize; 2]) -> Tensor {
    let [n, c, h, w] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let out_h = (h - kernel[0]) / strides[0] + 1;
    let out_w = (w - kernel[1]) / strides[1] + 1;
    let src = x.as_f32().unwrap();
    let mut out = vec![0.; n * c * out_h * out_w];
    for b in 0..n {
        for i in 0..c {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    for ky in 0..kernel[0] {
                        for kx in 0..kernel[1] {
                            let y = oy * strides[0] + ky;
                            let x_pos = ox * strides[1] + kx;
                            best = best.max(src[((b * c + i) * h + y) * w + x_pos]);
                        }
                    }
                    out[((b * c + i) * out_h + oy) * out_w + ox] = best;
                }
            }
        }
    }
    Tensor::from_f32(vec![n, c, out_h, out_w], out)
}

fn global_average_pool_nchw(x: &Tensor) -> Tensor {
    let [n, c, h, w] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let src = x.as_f32().unwrap();
    let mut out = vec![0.; n * c];
    for b in 0..n {
        for i in 0..c {
            let offset = (b * c + i) * h * w;
            out[b * c + i] = src[offset..offset + h * w].iter().sum::<f32>() / (h * w) as f32;
        }
    }
    Tensor::from_f32(vec![n, c, 1, 1], out)
}

/// `x @ weight.T + bias` over (N, in) data, the Gemm transB=1 convention.
fn gemm_transb(x: &Tensor, weight: &Tensor, bias: &Tensor) -> Tensor {
    let [n, in_features] = [x.shape()[0], x.shape()[1]];
    let units = weight.shape()[0];
    let src = x.as_f32().unwrap();
    let ker = weight.as_f32().unwrap();
    let b = bias.as_f32().unwrap();
    let mut out = vec![0.; n * units];
    for row in 0..n {
        for u in 0..units {
            let mut acc = b[u];
            for i in 0..in_features {
                acc += src[row * in_features + i] * ker[u * in_features + i];
            }
            out[row * units + u] = acc;
        }
    }
    Tensor::from_f32(vec![n, units], out)
}

fn relu(x: &Tensor) -> Tensor {
    let data = x.as_f32().unwrap().iter().map(|v| v.max(0.)).collect();
    Tensor::from_f32(x.shape().to_vec(), data)
}

fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.shape(), b.shape());
    let data = a
        .as_f32()
        .unwrap()
        .iter()
        .zip(b.as_f32().unwrap())
        .map(|(x, y)| x + y)
        .collect();
    Tensor::from_f32(a.shape().to_vec(), data)
}

// --- A naive evaluator for the converted (channel-last) model. ---

fn conv_nhwc(
    x: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    strides: [usize; 2],
    padding: PaddingMode,
) -> Tensor {
    let [n, h, w, in_c] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let [kh, kw, _, out_c] = [
        kernel.shape()[0],
        kernel.shape()[1],
        kernel.shape()[2],
        kernel.shape()[3],
    ];
    let (pads_h, pads_w) = match padding {
        PaddingMode::Same => (same_pads(h, kh, strides[0]), same_pads(w, kw, strides[1])),
        PaddingMode::Valid => ([0, 0], [0, 0]),
    };
    let out_h = (h + pads_h[0] + pads_h[1] - kh) / strides[0] + 1;
    let out_w = (w + pads_w[0] + pads_w[1] - kw) / strides[1] + 1;

    let src = x.as_f32().unwrap();
    let ker = kernel.as_f32().unwrap();
    let mut out = vec![0.; n * out_h * out_w * out_c];
    for b in 0..n {
        for oy in 0..out_h {
            for ox in 0..out_w {
                for o in 0..out_c {
                    let mut acc = bias.map(|t| t.as_f32().unwrap()[o]).unwrap_or(0.);
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let y = (oy * strides[0] + ky) as isize - pads_h[0] as isize;
                            let x_pos = (ox * strides[1] + kx) as isize - pads_w[0] as isize;
                            if y < 0 || y >= h as isize || x_pos < 0 || x_pos >= w as isize {
                                continue;
                            }
                            for i in 0..in_c {
                                let src_at =
                                    ((b * h + y as usize) * w + x_pos as usize) * in_c + i;
                                let ker_at = ((ky * kw + kx) * in_c + i) * out_c + o;
                                acc += src[src_at] * ker[ker_at];
                            }
                        }
                    }
                    out[((b * out_h + oy) * out_w + ox) * out_c + o] = acc;
                }
            }
        }
    }
    Tensor::from_f32(vec![n, out_h, out_w, out_c], out)
}

fn maxpool_nhwc(x: &Tensor, kernel: [usize; 2], strides: [usize; 2]) -> Tensor {
    let [n, h, w, c] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let out_h = (h - kernel[0]) / strides[0] + 1;
    let out_w = (w - kernel[1]) / strides[1] + 1;
    let src = x.as_f32().unwrap();
    let mut out = vec![0.; n * out_h * out_w * c];
    for b in 0..n {
        for oy in 0..out_h {
            for ox in 0..out_w {
                for i in 0..c {
                    let mut best = f32::NEG_INFINITY;
                    for ky in 0..kernel[0] {
                        for kx in 0..kernel[1] {
                            let y = oy * strides[0] + ky;
                            let x_pos = ox * strides[1] + kx;
                            best = best.max(src[((b * h + y) * w + x_pos) * c + i]);
                        }
                    }
                    out[((b * out_h + oy) * out_w + ox) * c + i] = best;
                }
            }
        }
    }
    Tensor::from_f32(vec![n, out_h, out_w, c], out)
}

fn zero_pad_nhwc(x: &Tensor, padding: [[usize; 2]; 2]) -> Tensor {
    let [n, h, w, c] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
    let out_h = h + padding[0][0] + padding[0][1];
    let out_w = w + padding[1][0] + padding[1][1];
    let src = x.as_f32().unwrap();
    let mut out = vec![0.; n * out_h * out_w * c];
    for b in 0..n {
        for y in 0..h {
            for x_pos in 0..w {
                for i in 0..c {
                    let at = ((b * out_h + y + padding[0][0]) * out_w + x_pos + padding[1][0]) * c
                        + i;
                    out[at] = src[((b * h + y) * w + x_pos) * c + i];
                }
            }
        }
    }
    Tensor::from_f32(vec![n, out_h, out_w, c], out)
}

/// Evaluate the converted model on the given input feeds.
///
/// Layers appear in construction order, so every input is available by the
/// time its consumer runs. Only the layer kinds these tests produce are
/// implemented.
fn run_model(model: &Model, feeds: &[(&str, &Tensor)]) -> HashMap<String, Tensor> {
    let mut env: HashMap<String, Tensor> = feeds
        .iter()
        .map(|(name, tensor)| (name.to_string(), (*tensor).clone()))
        .collect();

    for layer in model.layers() {
        let input = |index: usize| env[&layer.inputs[index]].clone();
        let value = match &layer.kind {
            LayerKind::Input { .. } => continue,
            LayerKind::Permute { dims } => {
                let full: Vec<usize> = [0].into_iter().chain(dims.iter().copied()).collect();
                input(0).permute(&full)
            }
            LayerKind::ZeroPadding2d { padding } => zero_pad_nhwc(&input(0), *padding),
            LayerKind::Conv2d(config) => {
                assert_eq!(config.groups, 1, "evaluator only supports unit groups");
                conv_nhwc(
                    &input(0),
                    &layer.weights[0],
                    layer.weights.get(1),
                    config.strides,
                    config.padding,
                )
            }
            LayerKind::MaxPool2d(config) => {
                assert_eq!(config.padding, PaddingMode::Valid);
                maxpool_nhwc(&input(0), config.pool_size, config.strides)
            }
            LayerKind::GlobalAvgPool2d { keepdims } => {
                // Mean over the spatial axes of (N, H, W, C) data.
                let x = input(0);
                let [n, h, w, c] = [x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]];
                let src = x.as_f32().unwrap();
                let mut out = vec![0.; n * c];
                for b in 0..n {
                    for y in 0..h {
                        for x_pos in 0..w {
                            for i in 0..c {
                                out[b * c + i] += src[((b * h + y) * w + x_pos) * c + i];
                            }
                        }
                    }
                }
                for value in &mut out {
                    *value /= (h * w) as f32;
                }
                let shape = if *keepdims {
                    vec![n, 1, 1, c]
                } else {
                    vec![n, c]
                };
                Tensor::from_f32(shape, out)
            }
            LayerKind::Flatten => {
                let x = input(0);
                let n = x.shape()[0];
                x.reshape(vec![n, x.len() / n]).unwrap()
            }
            LayerKind::Dense(config) => {
                let x = input(0);
                let kernel = layer.weights[0].as_f32().unwrap();
                let [n, in_features] = [x.shape()[0], x.shape()[1]];
                let units = config.units;
                let src = x.as_f32().unwrap();
                let mut out = vec![0.; n * units];
                for row in 0..n {
                    for u in 0..units {
                        let mut acc = if config.use_bias {
                            layer.weights[1].as_f32().unwrap()[u]
                        } else {
                            0.
                        };
                        for i in 0..in_features {
                            acc += src[row * in_features + i] * kernel[i * units + u];
                        }
                        out[row * units + u] = acc;
                    }
                }
                Tensor::from_f32(vec![n, units], out)
            }
            LayerKind::Relu { max_value } => {
                assert!(max_value.is_none());
                relu(&input(0))
            }
            LayerKind::Merge(keras_import::MergeOp::Add) => add(&input(0), &input(1)),
            other => panic!("evaluator does not implement {:?}", other),
        };
        env.insert(layer.outputs[0].clone(), value);
    }
    env
}

/// The Conv -> GlobalAveragePool -> Flatten -> Gemm scenario, channel-first
/// at the source.
fn conv_gap_dense_graph(rng: &mut fastrand::Rng) -> Graph {
    Graph {
        nodes: vec![
            node(
                "Conv",
                "conv_0",
                &["x", "conv_w", "conv_b"],
                &["conv_out"],
                &[
                    ("kernel_shape", AttributeValue::Ints(vec![3, 3])),
                    ("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
                    ("strides", AttributeValue::Ints(vec![1, 1])),
                ],
            ),
            node("GlobalAveragePool", "gap_0", &["conv_out"], &["gap_out"], &[]),
            node(
                "Flatten",
                "flatten_0",
                &["gap_out"],
                &["flat_out"],
                &[("axis", AttributeValue::Int(1))],
            ),
            node(
                "Gemm",
                "gemm_0",
                &["flat_out", "fc_w", "fc_b"],
                &["y"],
                &[("transB", AttributeValue::Int(1))],
            ),
        ],
        initializers: [
            ("conv_w".to_string(), random_tensor(rng, &[8, 3, 3, 3])),
            ("conv_b".to_string(), random_tensor(rng, &[8])),
            ("fc_w".to_string(), random_tensor(rng, &[10, 8])),
            ("fc_b".to_string(), random_tensor(rng, &[10])),
        ]
        .into_iter()
        .collect(),
        inputs: vec![image_input("x", &[1, 3, 5, 5])],
        outputs: vec!["y".to_string()],
    }
}

#[test]
fn test_conv_gap_dense_matches_reference() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let graph = conv_gap_dense_graph(&mut rng);
    let model = convert(&graph).unwrap();

    let classes: Vec<_> = model
        .layers()
        .iter()
        .map(|layer| layer.kind.class_name())
        .collect();
    assert_eq!(
        classes,
        [
            "InputLayer",
            "Permute",
            "Conv2D",
            "GlobalAveragePooling2D",
            "Flatten",
            "Dense",
        ]
    );
    assert_eq!(model.layer("conv2d").unwrap().weights[0].shape(), &[3, 3, 3, 8]);

    let x = random_tensor(&mut rng, &[1, 3, 5, 5]);
    let env = run_model(&model, &[("x", &x)]);
    let actual = &env[&model.outputs()[0].tensor];

    let conv_out = conv_nchw(
        &x,
        &graph.initializers["conv_w"],
        Some(&graph.initializers["conv_b"]),
        [1, 1],
        [1, 1, 1, 1],
    );
    let gap_out = global_average_pool_nchw(&conv_out);
    let flat = gap_out.reshape(vec![1, 8]).unwrap();
    let expected = gemm_transb(&flat, &graph.initializers["fc_w"], &graph.initializers["fc_b"]);

    assert_allclose(actual, &expected, 1e-5);
}

#[test]
fn test_residual_add_matches_reference() {
    // conv -> relu -> add(input): the add joins a channel-last branch with
    // the channel-first model input, forcing a layout conversion, and the
    // declared output is converted back to the source convention.
    let mut rng = fastrand::Rng::with_seed(7);
    let graph = Graph {
        nodes: vec![
            node(
                "Conv",
                "conv_0",
                &["x", "w", "b"],
                &["conv_out"],
                &[
                    ("kernel_shape", AttributeValue::Ints(vec![3, 3])),
                    ("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
                ],
            ),
            node("Relu", "relu_0", &["conv_out"], &["relu_out"], &[]),
            node("Add", "add_0", &["relu_out", "x"], &["y"], &[]),
        ],
        initializers: [
            ("w".to_string(), random_tensor(&mut rng, &[2, 2, 3, 3])),
            ("b".to_string(), random_tensor(&mut rng, &[2])),
        ]
        .into_iter()
        .collect(),
        inputs: vec![image_input("x", &[1, 2, 4, 4])],
        outputs: vec!["y".to_string()],
    };
    let model = convert(&graph).unwrap();

    let x = random_tensor(&mut rng, &[1, 2, 4, 4]);
    let env = run_model(&model, &[("x", &x)]);
    // The declared output is restored to channel-first order.
    let actual = &env[&model.outputs()[0].tensor];
    assert_eq!(actual.shape(), &[1, 2, 4, 4]);

    let conv_out = conv_nchw(
        &x,
        &graph.initializers["w"],
        Some(&graph.initializers["b"]),
        [1, 1],
        [1, 1, 1, 1],
    );
    let expected = add(&relu(&conv_out), &x);
    assert_allclose(actual, &expected, 1e-5);
}

#[test]
fn test_asymmetric_padding_matches_reference() {
    // Pads that match "same" on one axis only must become an explicit
    // ZeroPadding2D layer, not a padding mode.
    let mut rng = fastrand::Rng::with_seed(99);
    let graph = Graph {
        nodes: vec![
            node(
                "Conv",
                "conv_0",
                &["x", "w"],
                &["conv_out"],
                &[
                    ("kernel_shape", AttributeValue::Ints(vec![3, 3])),
                    ("pads", AttributeValue::Ints(vec![1, 0, 1, 0])),
                ],
            ),
            node(
                "MaxPool",
                "pool_0",
                &["conv_out"],
                &["pool_out"],
                &[
                    ("kernel_shape", AttributeValue::Ints(vec![2, 2])),
                    ("strides", AttributeValue::Ints(vec![2, 2])),
                ],
            ),
            node(
                "Flatten",
                "flatten_0",
                &["pool_out"],
                &["flat_out"],
                &[("axis", AttributeValue::Int(1))],
            ),
            node(
                "Gemm",
                "gemm_0",
                &["flat_out", "fc_w", "fc_b"],
                &["y"],
                &[("transB", AttributeValue::Int(1))],
            ),
        ],
        initializers: [
            ("w".to_string(), random_tensor(&mut rng, &[4, 2, 3, 3])),
            ("fc_w".to_string(), random_tensor(&mut rng, &[5, 24])),
            ("fc_b".to_string(), random_tensor(&mut rng, &[5])),
        ]
        .into_iter()
        .collect(),
        inputs: vec![image_input("x", &[1, 2, 6, 6])],
        outputs: vec!["y".to_string()],
    };
    let model = convert(&graph).unwrap();

    let zero_pad = model
        .layers()
        .iter()
        .find(|layer| matches!(layer.kind, LayerKind::ZeroPadding2d { .. }))
        .expect("asymmetric pads produce a ZeroPadding2D layer");
    assert!(matches!(
        zero_pad.kind,
        LayerKind::ZeroPadding2d {
            padding: [[1, 1], [0, 0]],
        }
    ));

    let x = random_tensor(&mut rng, &[1, 2, 6, 6]);
    let env = run_model(&model, &[("x", &x)]);
    let actual = &env[&model.outputs()[0].tensor];

    // Flatten happens in source order: (N, C, H, W) -> (N, C*H*W).
    let conv_out = conv_nchw(&x, &graph.initializers["w"], None, [1, 1], [1, 0, 1, 0]);
    let pool_out = maxpool_nchw(&conv_out, [2, 2], [2, 2]);
    let flat = pool_out.reshape(vec![1, 24]).unwrap();
    let expected = gemm_transb(&flat, &graph.initializers["fc_w"], &graph.initializers["fc_b"]);

    assert_allclose(actual, &expected, 1e-5);
}

#[test]
fn test_conversion_is_deterministic() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let graph = conv_gap_dense_graph(&mut rng);
    let first = convert(&graph).unwrap();
    let second = convert(&graph).unwrap();

    assert_eq!(first.layers().len(), second.layers().len());
    for (a, b) in first.layers().iter().zip(second.layers()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.inputs, b.inputs);
        assert_eq!(a.weights, b.weights);
    }
    assert_eq!(first.to_json(), second.to_json());
}

#[test]
fn test_unsupported_operator_yields_no_model() {
    let mut rng = fastrand::Rng::with_seed(3);
    let mut graph = conv_gap_dense_graph(&mut rng);
    graph
        .nodes
        .push(node("Einsum", "einsum_0", &["y"], &["z"], &[]));
    graph.outputs = vec!["z".to_string()];

    match convert(&graph) {
        Err(ConvertError::UnsupportedOperator { node, op_type }) => {
            assert_eq!(node, "einsum_0");
            assert_eq!(op_type, "Einsum");
        }
        other => panic!("expected UnsupportedOperator, got {:?}", other.map(|_| ())),
    }
}

// --- Loading from serialized ONNX bytes. ---

fn float_value_info(name: &str, dims: &[i64]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            tensor_type: Some(TensorTypeProto {
                elem_type: DataType::FLOAT.0,
                shape: Some(TensorShapeProto {
                    dim: dims
                        .iter()
                        .map(|&d| TensorDimensionProto {
                            value: Some(
                                keras_import::onnx::proto::tensor_dimension_proto::Value::DimValue(
                                    d,
                                ),
                            ),
                        })
                        .collect(),
                }),
            }),
        }),
    }
}

fn float_initializer(name: &str, dims: &[i64], rng: &mut fastrand::Rng) -> TensorProto {
    let len: i64 = dims.iter().product();
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::FLOAT.0,
        float_data: (0..len).map(|_| rng.f32() - 0.5).collect(),
        ..Default::default()
    }
}

fn ints_attr(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        ints: values.to_vec(),
        r#type: AttributeType::INTS.0,
        ..Default::default()
    }
}

#[test]
fn test_onnx_bytes_to_json() {
    let mut rng = fastrand::Rng::with_seed(11);
    let model_proto = ModelProto {
        ir_version: 8,
        producer_name: "e2e-test".to_string(),
        graph: Some(GraphProto {
            name: "net".to_string(),
            node: vec![
                NodeProto {
                    input: vec!["x".to_string(), "w".to_string()],
                    output: vec!["conv_out".to_string()],
                    op_type: "Conv".to_string(),
                    attribute: vec![
                        ints_attr("kernel_shape", &[3, 3]),
                        ints_attr("pads", &[1, 1, 1, 1]),
                    ],
                    ..Default::default()
                },
                NodeProto {
                    input: vec!["conv_out".to_string()],
                    output: vec!["y".to_string()],
                    op_type: "Relu".to_string(),
                    ..Default::default()
                },
            ],
            initializer: vec![float_initializer("w", &[4, 3, 3, 3], &mut rng)],
            input: vec![float_value_info("x", &[1, 3, 8, 8])],
            output: vec![float_value_info("y", &[1, 4, 8, 8])],
            ..Default::default()
        }),
        ..Default::default()
    };

    let graph = onnx::load(&model_proto.encode_to_vec()).unwrap();
    let model = convert(&graph).unwrap();

    let classes: Vec<_> = model
        .layers()
        .iter()
        .map(|layer| layer.kind.class_name())
        .collect();
    // Conversion to channel-last before the conv, back after the relu.
    assert_eq!(
        classes,
        ["InputLayer", "Permute", "Conv2D", "ReLU", "Permute"]
    );
    assert_eq!(model.inputs(), ["x".to_string()]);
    assert_eq!(model.outputs()[0].name, "y");

    let doc = model.to_json();
    assert_eq!(doc["class_name"], "Functional");
    assert_eq!(
        doc["config"]["layers"].as_array().unwrap().len(),
        model.layers().len()
    );
}
