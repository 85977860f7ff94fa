//! The converted target model.

use std::fmt::Write as _;

use serde_json::{json, Value};

use crate::ir::Dimension;
use crate::layers::{Layer, LayerKind, MergeOp, ReduceOp, UnaryOp};
use crate::tensor::ElementType;

/// A declared model output.
///
/// `name` is the name the source graph declared; `tensor` is the internal
/// tensor that carries its value, which differs from `name` only when a
/// final layout conversion was inserted after the producing layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModelOutput {
    pub name: String,
    pub tensor: String,
}

/// A converted model: a connected graph of named [`Layer`]s with declared
/// inputs and outputs.
///
/// The model is a pure in-memory structure. Serialization of weights is left
/// to the caller; [`Model::to_json`] renders the architecture in the Keras
/// `Functional` JSON format.
#[derive(Clone, Debug, Default)]
pub struct Model {
    layers: Vec<Layer>,
    inputs: Vec<String>,
    outputs: Vec<ModelOutput>,
}

impl Model {
    pub(crate) fn new(layers: Vec<Layer>, inputs: Vec<String>, outputs: Vec<ModelOutput>) -> Model {
        Model {
            layers,
            inputs,
            outputs,
        }
    }

    /// Layers in construction order. Every layer appears after the layers
    /// producing its inputs.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Names of the model inputs. These match the source graph's declared
    /// input names.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared model outputs, in source graph order.
    pub fn outputs(&self) -> &[ModelOutput] {
        &self.outputs
    }

    /// Look up a layer by name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// The layer producing `tensor`, along with the tensor's index among the
    /// layer's outputs.
    pub fn producer(&self, tensor: &str) -> Option<(&Layer, usize)> {
        self.layers.iter().find_map(|layer| {
            layer
                .outputs
                .iter()
                .position(|output| output == tensor)
                .map(|index| (layer, index))
        })
    }

    /// Layers that consume `tensor`.
    pub fn consumers<'a>(&'a self, tensor: &'a str) -> impl Iterator<Item = &'a Layer> {
        self.layers
            .iter()
            .filter(move |layer| layer.inputs.iter().any(|input| input == tensor))
    }

    /// Total number of weight elements across all layers.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.param_count()).sum()
    }

    /// Render the architecture as a Keras `Functional` JSON document.
    ///
    /// Weights are not included; Keras keeps them in a separate store.
    pub fn to_json(&self) -> Value {
        let layers: Vec<Value> = self
            .layers
            .iter()
            .map(|layer| {
                let inbound: Vec<Value> = layer
                    .inputs
                    .iter()
                    .map(|input| {
                        // (producing layer, node index, output index, kwargs)
                        let (producer, output_index) =
                            self.producer(input).expect("wired input has a producer");
                        json!([producer.name, 0, output_index, {}])
                    })
                    .collect();
                let inbound_nodes: Value = if inbound.is_empty() {
                    json!([])
                } else {
                    json!([inbound])
                };
                json!({
                    "class_name": layer.kind.class_name(),
                    "name": layer.name,
                    "config": config_json(layer),
                    "inbound_nodes": inbound_nodes,
                })
            })
            .collect();

        let input_layers: Vec<Value> = self
            .inputs
            .iter()
            .map(|input| {
                let (producer, index) = self.producer(input).expect("input layer exists");
                json!([producer.name, 0, index])
            })
            .collect();
        let output_layers: Vec<Value> = self
            .outputs
            .iter()
            .map(|output| {
                let (producer, index) =
                    self.producer(&output.tensor).expect("output has a producer");
                json!([producer.name, 0, index])
            })
            .collect();

        json!({
            "class_name": "Functional",
            "config": {
                "name": "model",
                "layers": layers,
                "input_layers": input_layers,
                "output_layers": output_layers,
            },
        })
    }

    /// A human-readable layer table in the spirit of Keras' `summary()`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<28} {:<22} {:>10}", "Layer (name)", "Type", "Params");
        let _ = writeln!(out, "{}", "-".repeat(62));
        for layer in &self.layers {
            let _ = writeln!(
                out,
                "{:<28} {:<22} {:>10}",
                layer.name,
                layer.kind.class_name(),
                layer.param_count()
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(62));
        let _ = writeln!(out, "Total params: {}", self.param_count());
        out
    }
}

fn dims_json(dims: &[Dimension]) -> Value {
    Value::Array(
        dims.iter()
            .map(|dim| match dim {
                Dimension::Fixed(size) => json!(size),
                Dimension::Symbolic(_) => Value::Null,
            })
            .collect(),
    )
}

fn dtype_json(dtype: &ElementType) -> Value {
    match dtype {
        ElementType::Float32 => json!("float32"),
        ElementType::Int64 => json!("int64"),
    }
}

/// Keras `config` dict for a layer.
fn config_json(layer: &Layer) -> Value {
    let name = &layer.name;
    match &layer.kind {
        LayerKind::Input { dims, dtype } => json!({
            "name": name,
            "batch_input_shape": dims_json(dims),
            "dtype": dtype_json(dtype),
        }),
        LayerKind::Permute { dims } => json!({ "name": name, "dims": dims }),
        LayerKind::ZeroPadding2d { padding } => json!({ "name": name, "padding": padding }),
        LayerKind::Cropping2d { cropping } => json!({ "name": name, "cropping": cropping }),
        LayerKind::Conv2d(config) => json!({
            "name": name,
            "filters": config.filters,
            "kernel_size": config.kernel_size,
            "strides": config.strides,
            "dilation_rate": config.dilation_rate,
            "padding": config.padding.as_str(),
            "groups": config.groups,
            "use_bias": config.use_bias,
            "data_format": "channels_last",
        }),
        LayerKind::DepthwiseConv2d(config) => json!({
            "name": name,
            "kernel_size": config.kernel_size,
            "strides": config.strides,
            "dilation_rate": config.dilation_rate,
            "padding": config.padding.as_str(),
            "use_bias": config.use_bias,
            "data_format": "channels_last",
        }),
        LayerKind::Conv2dTranspose(config) => json!({
            "name": name,
            "filters": config.filters,
            "kernel_size": config.kernel_size,
            "strides": config.strides,
            "dilation_rate": config.dilation_rate,
            "padding": config.padding.as_str(),
            "output_padding": config.output_padding,
            "use_bias": config.use_bias,
            "data_format": "channels_last",
        }),
        LayerKind::Dense(config) => json!({
            "name": name,
            "units": config.units,
            "use_bias": config.use_bias,
        }),
        LayerKind::BatchNorm(config) => json!({
            "name": name,
            "axis": config.axis,
            "epsilon": config.epsilon,
            "momentum": config.momentum,
        }),
        LayerKind::MaxPool2d(config) | LayerKind::AvgPool2d(config) => json!({
            "name": name,
            "pool_size": config.pool_size,
            "strides": config.strides,
            "padding": config.padding.as_str(),
            "data_format": "channels_last",
        }),
        LayerKind::GlobalAvgPool2d { keepdims } => json!({
            "name": name,
            "keepdims": keepdims,
            "data_format": "channels_last",
        }),
        LayerKind::UpSampling2d {
            size,
            interpolation,
        } => json!({
            "name": name,
            "size": size,
            "interpolation": interpolation.as_str(),
            "data_format": "channels_last",
        }),
        LayerKind::Relu { max_value } => json!({ "name": name, "max_value": max_value }),
        LayerKind::LeakyRelu { alpha } => json!({ "name": name, "alpha": alpha }),
        LayerKind::PRelu { shared_axes } => json!({ "name": name, "shared_axes": shared_axes }),
        LayerKind::Softmax { axis } => json!({ "name": name, "axis": axis }),
        LayerKind::Activation(op) => match op.activation_name() {
            Some(activation) => json!({ "name": name, "activation": activation }),
            None => json!({
                "name": name,
                "function": match op {
                    UnaryOp::Sqrt => "math.sqrt",
                    UnaryOp::Abs => "math.abs",
                    UnaryOp::Neg => "math.negative",
                    _ => unreachable!(),
                },
            }),
        },
        LayerKind::Clip { min, max } => json!({
            "name": name,
            "function": "clip_by_value",
            "min": min,
            "max": max,
        }),
        LayerKind::Merge(op) => match op {
            MergeOp::Add | MergeOp::Subtract | MergeOp::Multiply => json!({ "name": name }),
            MergeOp::Divide => json!({ "name": name, "function": "math.divide" }),
            MergeOp::Equal => json!({ "name": name, "function": "math.equal" }),
        },
        LayerKind::MergeConstant { op, flipped } => json!({
            "name": name,
            "function": match op {
                MergeOp::Add => "math.add",
                MergeOp::Subtract => "math.subtract",
                MergeOp::Multiply => "math.multiply",
                MergeOp::Divide => "math.divide",
                MergeOp::Equal => "math.equal",
            },
            "flipped": flipped,
        }),
        LayerKind::Reshape { target_shape } => {
            json!({ "name": name, "target_shape": target_shape })
        }
        LayerKind::Flatten => json!({ "name": name }),
        LayerKind::Concatenate { axis } => json!({ "name": name, "axis": axis }),
        LayerKind::Split { axis, sizes } => json!({
            "name": name,
            "function": "split",
            "axis": axis,
            "num_or_size_splits": sizes,
        }),
        LayerKind::Tile { repeats } => json!({
            "name": name,
            "function": "tile",
            "multiples": repeats,
        }),
        LayerKind::Cast { dtype } => json!({
            "name": name,
            "function": "cast",
            "dtype": dtype_json(dtype),
        }),
        LayerKind::Reduce { op, axes, keepdims } => json!({
            "name": name,
            "function": match op {
                ReduceOp::Max => "math.reduce_max",
                ReduceOp::Mean => "math.reduce_mean",
                ReduceOp::Sum => "math.reduce_sum",
            },
            "axis": axes,
            "keepdims": keepdims,
        }),
    }
}
