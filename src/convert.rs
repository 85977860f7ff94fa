//! The model assembler: drives the scheduler, translates each node and
//! wires the produced layers into a [`Model`].

use std::error::Error;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::infer_shapes::{
    infer, DynamicShapeError, InferError, LayoutTag, ShapeCatalog, ShapeInferenceError,
};
use crate::ir::{Graph, MalformedGraphError};
use crate::layers::{Layer, LayerKind};
use crate::model::{Model, ModelOutput};
use crate::schedule::{execution_order, CyclicGraphError};
use crate::tensor::Tensor;
use crate::translate::{
    NameGen, OpTranslator, OutputValue, Registry, ResolvedInput, TranslateCtx, TranslateError,
};
use crate::weights::WeightShapeError;

/// Why a conversion run failed. All failures are fatal: no partial model is
/// ever returned.
#[derive(Debug)]
pub enum ConvertError {
    /// The source graph violates a structural invariant.
    Malformed(MalformedGraphError),

    /// A needed shape or layout could not be determined.
    ShapeInference(ShapeInferenceError),

    /// An operator type has no registered translation.
    UnsupportedOperator { node: String, op_type: String },

    /// A weight tensor's shape does not match its role.
    WeightShape {
        node: String,
        error: WeightShapeError,
    },

    /// An output shape depends on runtime data.
    DynamicShape(DynamicShapeError),

    /// The node dependencies contain a cycle.
    Cyclic(CyclicGraphError),

    /// A supported operator could not be translated with these attributes
    /// or inputs.
    Translate(TranslateError),

    /// A declared graph output resolves to a compile-time constant; there is
    /// no layer to wire it to.
    ConstantOutput { output: String },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Malformed(e) => write!(f, "malformed graph: {}", e),
            ConvertError::ShapeInference(e) => write!(f, "shape inference failed: {}", e),
            ConvertError::UnsupportedOperator { node, op_type } => {
                write!(f, "unsupported operator {} (node \"{}\")", op_type, node)
            }
            ConvertError::WeightShape { node, error } => {
                write!(f, "node \"{}\": {}", node, error)
            }
            ConvertError::DynamicShape(e) => write!(f, "{}", e),
            ConvertError::Cyclic(e) => write!(f, "{}", e),
            ConvertError::Translate(e) => write!(f, "{}", e),
            ConvertError::ConstantOutput { output } => {
                write!(f, "graph output \"{}\" is a compile-time constant", output)
            }
        }
    }
}

impl Error for ConvertError {}

impl From<MalformedGraphError> for ConvertError {
    fn from(e: MalformedGraphError) -> ConvertError {
        ConvertError::Malformed(e)
    }
}

impl From<CyclicGraphError> for ConvertError {
    fn from(e: CyclicGraphError) -> ConvertError {
        ConvertError::Cyclic(e)
    }
}

impl From<InferError> for ConvertError {
    fn from(e: InferError) -> ConvertError {
        match e {
            InferError::Shape(e) => ConvertError::ShapeInference(e),
            InferError::Dynamic(e) => ConvertError::DynamicShape(e),
        }
    }
}

impl From<TranslateError> for ConvertError {
    fn from(e: TranslateError) -> ConvertError {
        match e {
            TranslateError::UnsupportedOperator { node, op_type } => {
                ConvertError::UnsupportedOperator { node, op_type }
            }
            TranslateError::Weight { node, error } => ConvertError::WeightShape { node, error },
            TranslateError::Dynamic(e) => ConvertError::DynamicShape(e),
            TranslateError::Shape(e) => ConvertError::ShapeInference(e),
            other => ConvertError::Translate(other),
        }
    }
}

/// A value recorded for a source tensor name during conversion.
#[derive(Clone, Debug)]
struct WiredValue {
    /// Target tensor carrying the value.
    tensor: String,
    layout: LayoutTag,
}

/// Per-run conversion state: the translated values keyed by source tensor
/// name, the layout conversions already inserted, and the name generator.
/// Created fresh for every conversion call.
struct ConversionContext<'g> {
    values: FxHashMap<String, WiredValue>,
    /// Constants produced by translation (inference folds live in the
    /// catalog).
    computed: FxHashMap<String, Tensor>,
    /// Inserted layout conversions, keyed by (tensor, target layout) so each
    /// value is converted at most once per layout.
    converted: FxHashMap<(String, LayoutTag), String>,
    names: NameGen,
    catalog: ShapeCatalog<'g>,
}

impl ConversionContext<'_> {
    fn constant(&self, name: &str) -> Option<&Tensor> {
        self.catalog.constant(name).or_else(|| self.computed.get(name))
    }

    /// The layout a node input is currently in (constants and omitted inputs
    /// are agnostic).
    fn current_layout(&self, name: &str) -> LayoutTag {
        if name.is_empty() || self.constant(name).is_some() {
            LayoutTag::Agnostic
        } else {
            self.values
                .get(name)
                .map(|value| value.layout)
                .unwrap_or(LayoutTag::Agnostic)
        }
    }
}

/// Keras `Permute` dims (1-based, batch excluded) converting `rank`-d data
/// between the channel conventions.
fn conversion_dims(rank: usize, to: LayoutTag) -> Vec<usize> {
    match to {
        // (N, C, S...) -> (N, S..., C)
        LayoutTag::ChannelLast => (2..rank).chain([1]).collect(),
        // (N, S..., C) -> (N, C, S...)
        LayoutTag::ChannelFirst => [rank - 1].into_iter().chain(1..rank - 1).collect(),
        LayoutTag::Agnostic => unreachable!("no conversion to agnostic"),
    }
}

fn needs_conversion(current: LayoutTag, required: LayoutTag) -> bool {
    matches!(
        (current, required),
        (LayoutTag::ChannelFirst, LayoutTag::ChannelLast)
            | (LayoutTag::ChannelLast, LayoutTag::ChannelFirst)
    )
}

/// Convert `graph` using the built-in operator registry.
pub fn convert(graph: &Graph) -> Result<Model, ConvertError> {
    convert_with_registry(graph, &Registry::with_all_ops())
}

/// Convert `graph` using a caller-provided operator registry.
pub fn convert_with_registry(graph: &Graph, registry: &Registry) -> Result<Model, ConvertError> {
    graph.validate()?;

    // Check operator support for the whole graph up front, so the error
    // names the first unsupported node even when eg. shape inference would
    // fail earlier for an unrelated reason.
    for node in &graph.nodes {
        registry.get(node)?;
    }

    let order = execution_order(graph)?;
    let catalog = infer(graph, &order)?;
    log::info!(
        "converting graph: {} nodes, {} inputs, {} outputs",
        graph.nodes.len(),
        graph.inputs.len(),
        graph.outputs.len()
    );

    // Reserve every source tensor name so generated layer names never
    // collide with them.
    let reserved = graph
        .inputs
        .iter()
        .map(|input| input.name.clone())
        .chain(graph.initializers.keys().cloned())
        .chain(
            graph
                .nodes
                .iter()
                .flat_map(|node| node.outputs.iter().cloned()),
        );
    let mut ctx = ConversionContext {
        values: FxHashMap::default(),
        computed: FxHashMap::default(),
        converted: FxHashMap::default(),
        names: NameGen::new(reserved),
        catalog,
    };

    let mut layers: Vec<Layer> = Vec::new();

    // Graph inputs become input layers; their tensor names are preserved.
    for input in &graph.inputs {
        let layout = ctx
            .catalog
            .shape(&input.name)
            .map(|info| info.layout)
            .unwrap_or(LayoutTag::Agnostic);
        layers.push(Layer::new(
            input.name.clone(),
            LayerKind::Input {
                dims: input.dims.clone(),
                dtype: input.dtype,
            },
            Vec::new(),
            vec![input.name.clone()],
        ));
        ctx.values.insert(
            input.name.clone(),
            WiredValue {
                tensor: input.name.clone(),
                layout,
            },
        );
    }

    for &index in &order {
        let node = &graph.nodes[index];

        // Values fully determined at conversion time flow past translation,
        // the way constants flow through the source tool.
        if !node.outputs.is_empty()
            && node
                .outputs
                .iter()
                .all(|output| ctx.catalog.constant(output).is_some())
        {
            log::debug!("node {} folded to constants", node.name);
            continue;
        }

        let translator = registry.get(node)?;
        translate_node(node, translator, &mut ctx, &mut layers)?;
    }

    // Collect declared outputs, restoring the source layout convention where
    // conversion produced channel-last values.
    let mut outputs = Vec::with_capacity(graph.outputs.len());
    for output in &graph.outputs {
        if ctx.constant(output).is_some() && !ctx.values.contains_key(output) {
            return Err(ConvertError::ConstantOutput {
                output: output.clone(),
            });
        }
        let value = ctx
            .values
            .get(output)
            .cloned()
            .expect("validated output has a value");
        let tensor = if value.layout == LayoutTag::ChannelLast {
            let rank = ctx
                .catalog
                .shape(output)
                .map(|info| info.rank())
                .unwrap_or(4);
            ensure_layout(
                &mut ctx.converted,
                &mut ctx.names,
                &mut layers,
                &value.tensor,
                rank,
                LayoutTag::ChannelFirst,
            )
        } else {
            value.tensor
        };
        outputs.push(ModelOutput {
            name: output.clone(),
            tensor,
        });
    }

    let inputs = graph.inputs.iter().map(|input| input.name.clone()).collect();
    let model = Model::new(layers, inputs, outputs);
    log::info!(
        "conversion finished: {} layers, {} parameters",
        model.layers().len(),
        model.param_count()
    );
    Ok(model)
}

/// Insert (or reuse) a `Permute` layer converting `tensor` to `target`.
fn ensure_layout(
    converted: &mut FxHashMap<(String, LayoutTag), String>,
    names: &mut NameGen,
    layers: &mut Vec<Layer>,
    tensor: &str,
    rank: usize,
    target: LayoutTag,
) -> String {
    if let Some(existing) = converted.get(&(tensor.to_string(), target)) {
        return existing.clone();
    }
    let name = names.fresh("permute");
    let out_tensor = format!("{}_out", name);
    layers.push(Layer::new(
        name,
        LayerKind::Permute {
            dims: conversion_dims(rank, target),
        },
        vec![tensor.to_string()],
        vec![out_tensor.clone()],
    ));
    converted.insert((tensor.to_string(), target), out_tensor.clone());
    out_tensor
}

fn translate_node(
    node: &crate::ir::Node,
    translator: &dyn OpTranslator,
    ctx: &mut ConversionContext,
    layers: &mut Vec<Layer>,
) -> Result<(), ConvertError> {
    let current: Vec<LayoutTag> = node
        .inputs
        .iter()
        .map(|name| ctx.current_layout(name))
        .collect();
    let required = translator.input_layouts(node, &current, &ctx.catalog);
    debug_assert_eq!(required.len(), current.len());

    // Insert layout conversions where the producer's layout differs from
    // what the translator requires. Conversions are cached per (tensor,
    // layout) so shared values convert once.
    let mut resolved: Vec<ResolvedInput> = Vec::with_capacity(node.inputs.len());
    for (index, name) in node.inputs.iter().enumerate() {
        if name.is_empty() {
            resolved.push(ResolvedInput::Omitted);
            continue;
        }
        if let Some(constant) = ctx.catalog.constant(name) {
            resolved.push(ResolvedInput::Constant(constant));
            continue;
        }
        if let Some(constant) = ctx.computed.get(name) {
            resolved.push(ResolvedInput::Constant(constant));
            continue;
        }
        let value = ctx
            .values
            .get(name)
            .cloned()
            .expect("scheduled node input has a value");
        let target = required.get(index).copied().unwrap_or(value.layout);
        if needs_conversion(value.layout, target) {
            let rank = ctx
                .catalog
                .shape(name)
                .map(|info| info.rank())
                .unwrap_or(4);
            log::debug!(
                "inserting {} -> {} conversion for {} (consumer {})",
                value.layout,
                target,
                name,
                node.name
            );
            let tensor = ensure_layout(
                &mut ctx.converted,
                &mut ctx.names,
                layers,
                &value.tensor,
                rank,
                target,
            );
            resolved.push(ResolvedInput::Value {
                tensor,
                layout: target,
            });
        } else {
            resolved.push(ResolvedInput::Value {
                tensor: value.tensor,
                layout: value.layout,
            });
        }
    }

    let translation = {
        let mut translate_ctx = TranslateCtx {
            node,
            inputs: resolved,
            catalog: &ctx.catalog,
            names: &mut ctx.names,
        };
        translator.translate(&mut translate_ctx)?
    };

    if translation.outputs.len() != node.outputs.len() {
        // A translator bug, not a model problem.
        panic!(
            "translator for {} produced {} outputs, node {} declares {}",
            node.op_type,
            translation.outputs.len(),
            node.name,
            node.outputs.len()
        );
    }

    layers.extend(translation.layers);
    for (name, output) in node.outputs.iter().zip(translation.outputs) {
        if name.is_empty() {
            continue;
        }
        match output {
            OutputValue::Tensor { name: tensor, layout } => {
                ctx.values.insert(
                    name.clone(),
                    WiredValue { tensor, layout },
                );
            }
            OutputValue::Constant(tensor) => {
                ctx.computed.insert(name.clone(), tensor);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use keras_import_testing::TestCases;

    use super::{convert, ConvertError};
    use crate::ir::{AttributeValue, Dimension, Graph, Node, ValueInfo};
    use crate::layers::{LayerKind, PaddingMode};
    use crate::model::Model;
    use crate::tensor::{ElementType, Tensor};

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
            dtype: ElementType::Float32,
            dims: dims.iter().map(|&d| Dimension::Fixed(d)).collect(),
        }
    }

    fn counting(shape: &[usize]) -> Tensor {
        let len = shape.iter().product();
        Tensor::from_f32(shape.to_vec(), (0..len).map(|x| x as f32 * 0.01).collect())
    }

    /// Conv -> GlobalAveragePool -> Flatten -> Gemm, all channel-first.
    fn conv_gap_dense_graph() -> Graph {
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
                ("conv_w".to_string(), counting(&[8, 3, 3, 3])),
                ("conv_b".to_string(), counting(&[8])),
                ("fc_w".to_string(), counting(&[10, 8])),
                ("fc_b".to_string(), counting(&[10])),
            ]
            .into_iter()
            .collect(),
            inputs: vec![image_input("x", &[1, 3, 5, 5])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        }
    }

    /// Walk every wired connection and check producer/consumer layouts were
    /// reconciled (a consumer never reads a tensor that required conversion).
    fn class_names(model: &Model) -> Vec<&'static str> {
        model
            .layers()
            .iter()
            .map(|layer| layer.kind.class_name())
            .collect()
    }

    #[test]
    fn test_conv_gap_dense_structure() {
        let model = convert(&conv_gap_dense_graph()).unwrap();

        assert_eq!(
            class_names(&model),
            [
                "InputLayer",
                "Permute",
                "Conv2D",
                "GlobalAveragePooling2D",
                "Flatten",
                "Dense",
            ]
        );

        // The inserted conversion feeds the convolution.
        let conv = model.layer("conv2d").unwrap();
        let (producer, _) = model.producer(&conv.inputs[0]).unwrap();
        assert!(matches!(producer.kind, LayerKind::Permute { ref dims } if dims == &[2, 3, 1]));

        // Kernel permuted to (kH, kW, in, out); same padding recognized.
        assert_eq!(conv.weights[0].shape(), &[3, 3, 3, 8]);
        match &conv.kind {
            LayerKind::Conv2d(config) => {
                assert_eq!(config.padding, PaddingMode::Same);
                assert_eq!(config.filters, 8);
            }
            other => panic!("expected Conv2D, got {:?}", other),
        }

        // Dense kernel transposed to (in, units).
        let dense = model.layer("dense").unwrap();
        assert_eq!(dense.weights[0].shape(), &[8, 10]);

        // The declared output keeps its name and is layout-agnostic, so no
        // trailing conversion is inserted.
        assert_eq!(model.outputs()[0].name, "y");
        assert_eq!(model.outputs()[0].tensor, "y");
    }

    #[test]
    fn test_determinism() {
        let graph = conv_gap_dense_graph();
        let first = convert(&graph).unwrap();
        let second = convert(&graph).unwrap();
        let names = |model: &Model| -> Vec<String> {
            model
                .layers()
                .iter()
                .map(|layer| layer.name.clone())
                .collect()
        };
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.to_json(), second.to_json());
        for (a, b) in first.layers().iter().zip(second.layers()) {
            assert_eq!(a.weights, b.weights);
        }
    }

    #[test]
    fn test_wiring_resolves_and_layouts_match() {
        let model = convert(&conv_gap_dense_graph()).unwrap();
        for layer in model.layers() {
            for input in &layer.inputs {
                assert!(
                    model.producer(input).is_some(),
                    "dangling input {} of layer {}",
                    input,
                    layer.name
                );
            }
        }
        for output in model.outputs() {
            assert!(model.producer(&output.tensor).is_some());
        }
    }

    #[test]
    fn test_unsupported_operator_fails_fast() {
        let mut graph = conv_gap_dense_graph();
        graph.nodes.push(node(
            "NonMaxSuppression",
            "nms_0",
            &["y"],
            &["nms_out"],
            &[],
        ));
        graph.outputs = vec!["nms_out".to_string()];

        match convert(&graph) {
            Err(ConvertError::UnsupportedOperator { node, op_type }) => {
                assert_eq!(node, "nms_0");
                assert_eq!(op_type, "NonMaxSuppression");
            }
            other => panic!("expected UnsupportedOperator, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let graph = Graph {
            nodes: vec![
                node("Relu", "a", &["b_out"], &["a_out"], &[]),
                node("Relu", "b", &["a_out"], &["b_out"], &[]),
            ],
            inputs: vec![image_input("x", &[1, 3, 4, 4])],
            outputs: vec!["a_out".to_string()],
            ..Default::default()
        };
        assert!(matches!(convert(&graph), Err(ConvertError::Cyclic(_))));
    }

    #[test]
    fn test_shared_value_converted_once() {
        // Two convolutions consume the same input; the layout conversion
        // must be inserted exactly once.
        let graph = Graph {
            nodes: vec![
                node(
                    "Conv",
                    "conv_a",
                    &["x", "w"],
                    &["a_out"],
                    &[("kernel_shape", AttributeValue::Ints(vec![1, 1]))],
                ),
                node(
                    "Conv",
                    "conv_b",
                    &["x", "w"],
                    &["b_out"],
                    &[("kernel_shape", AttributeValue::Ints(vec![1, 1]))],
                ),
                node("Add", "add_0", &["a_out", "b_out"], &["y"], &[]),
            ],
            initializers: [("w".to_string(), counting(&[4, 3, 1, 1]))]
                .into_iter()
                .collect(),
            inputs: vec![image_input("x", &[1, 3, 6, 6])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };
        let model = convert(&graph).unwrap();
        let permutes = model
            .layers()
            .iter()
            .filter(|layer| matches!(layer.kind, LayerKind::Permute { .. }))
            .count();
        // One for the shared input, one restoring the declared output.
        assert_eq!(permutes, 2);
    }

    #[test]
    fn test_channel_last_output_restored() {
        // A graph ending in a convolution produces channel-last data; the
        // declared output must be converted back to the source convention.
        let graph = Graph {
            nodes: vec![node(
                "Conv",
                "conv_0",
                &["x", "w"],
                &["y"],
                &[("kernel_shape", AttributeValue::Ints(vec![1, 1]))],
            )],
            initializers: [("w".to_string(), counting(&[4, 3, 1, 1]))]
                .into_iter()
                .collect(),
            inputs: vec![image_input("x", &[1, 3, 6, 6])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };
        let model = convert(&graph).unwrap();
        let output = &model.outputs()[0];
        assert_eq!(output.name, "y");
        assert_ne!(output.tensor, "y");
        let (producer, _) = model.producer(&output.tensor).unwrap();
        assert!(matches!(producer.kind, LayerKind::Permute { ref dims } if dims == &[3, 1, 2]));
    }

    #[test]
    fn test_elementwise_layout_harmonized() {
        // conv output (channel-last) + raw input (channel-first): the Add
        // translator settles both on one layout via an inserted conversion.
        let graph = Graph {
            nodes: vec![
                node(
                    "Conv",
                    "conv_0",
                    &["x", "w"],
                    &["conv_out"],
                    &[("kernel_shape", AttributeValue::Ints(vec![1, 1]))],
                ),
                node("Add", "add_0", &["conv_out", "x"], &["y"], &[]),
            ],
            initializers: [("w".to_string(), counting(&[3, 3, 1, 1]))]
                .into_iter()
                .collect(),
            inputs: vec![image_input("x", &[1, 3, 6, 6])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };
        let model = convert(&graph).unwrap();
        let add = model
            .layers()
            .iter()
            .find(|layer| matches!(layer.kind, LayerKind::Merge(_)))
            .unwrap();
        // Both Add inputs must trace to the same layout: the first is the
        // conv output (channel-last), the second the converted input.
        let (second_producer, _) = model.producer(&add.inputs[1]).unwrap();
        assert!(matches!(
            second_producer.kind,
            LayerKind::Permute { ref dims } if dims == &[2, 3, 1]
        ));
    }

    #[test]
    fn test_constant_graph_output_rejected() {
        let graph = Graph {
            nodes: vec![node("Shape", "shape_0", &["x"], &["y"], &[])],
            inputs: vec![image_input("x", &[1, 3, 4, 4])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            convert(&graph),
            Err(ConvertError::ConstantOutput { .. })
        ));
    }

    #[test]
    fn test_error_messages_name_the_node() {
        #[derive(Debug)]
        struct Case {
            graph: Graph,
            needle: &'static str,
        }

        let unsupported = Graph {
            nodes: vec![node("Scan", "scan_7", &["x"], &["y"], &[])],
            inputs: vec![image_input("x", &[1, 3, 4, 4])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };

        let bad_weight = Graph {
            nodes: vec![node(
                "Conv",
                "conv_bad",
                &["x", "w"],
                &["y"],
                &[("kernel_shape", AttributeValue::Ints(vec![1, 1]))],
            )],
            initializers: [("w".to_string(), counting(&[4, 3]))].into_iter().collect(),
            inputs: vec![image_input("x", &[1, 3, 4, 4])],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };

        let cases = [
            Case {
                graph: unsupported,
                needle: "scan_7",
            },
            Case {
                graph: bad_weight,
                needle: "conv_bad",
            },
        ];

        cases.test_each(|case| {
            let err = convert(&case.graph).err().unwrap();
            assert!(
                err.to_string().contains(case.needle),
                "error {:?} does not name {}",
                err.to_string(),
                case.needle
            );
        });
    }

}
