//! Forward shape, layout and constant propagation over the source graph.
//!
//! Starting from the declared graph-input shapes, [`infer`] computes a
//! [`ShapeInfo`] for every tensor in the graph: its dimensions (in the source
//! ONNX convention), element type and [`LayoutTag`]. It also propagates
//! values that are computable at conversion time (initializers, `Constant`
//! nodes, `Shape` of statically-shaped tensors, and simple arithmetic on
//! those), which is how parameters that newer ONNX opsets pass as inputs
//! rather than attributes are resolved.

use std::error::Error;
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::{AttributeValue, Dimension, Graph, Node};
use crate::tensor::{ElementType, Tensor, TensorData};

/// Data layout of a tensor with a channel dimension.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum LayoutTag {
    /// Channels precede the spatial dimensions (ONNX convention, NCHW).
    ChannelFirst,

    /// Channels follow the spatial dimensions (Keras convention, NHWC).
    ChannelLast,

    /// The tensor has no channel dimension, or its layout does not matter.
    Agnostic,
}

impl fmt::Display for LayoutTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutTag::ChannelFirst => write!(f, "channel-first"),
            LayoutTag::ChannelLast => write!(f, "channel-last"),
            LayoutTag::Agnostic => write!(f, "layout-agnostic"),
        }
    }
}

/// Inferred shape, type and layout of one tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeInfo {
    /// Dimensions in the source (channel-first) convention.
    pub dims: Vec<Dimension>,
    pub dtype: ElementType,
    pub layout: LayoutTag,
}

impl ShapeInfo {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// All dimensions as fixed sizes, if none is symbolic.
    pub fn fixed_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(|d| d.as_fixed()).collect()
    }
}

/// Per-tensor results of a shape inference pass.
pub struct ShapeCatalog<'g> {
    graph: &'g Graph,
    shapes: FxHashMap<String, ShapeInfo>,
    constants: FxHashMap<String, Tensor>,
}

impl<'g> ShapeCatalog<'g> {
    pub fn shape(&self, name: &str) -> Option<&ShapeInfo> {
        self.shapes.get(name)
    }

    /// The conversion-time value of a tensor, if it has one: an initializer
    /// or a value computed by constant propagation.
    pub fn constant(&self, name: &str) -> Option<&Tensor> {
        self.constants
            .get(name)
            .or_else(|| self.graph.initializers.get(name))
    }
}

/// A shape required by an operator could not be determined or is
/// inconsistent with the operator's other inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShapeInferenceError {
    /// An input's shape is unknown.
    MissingShape { node: String, tensor: String },

    /// An input's rank does not match what the operator requires.
    RankMismatch {
        node: String,
        expected: usize,
        actual: usize,
    },

    /// Input shapes cannot be combined (eg. broadcast failure).
    IncompatibleShapes { node: String, detail: String },

    /// An attribute value is missing or outside the supported range.
    InvalidAttribute {
        node: String,
        attr: String,
        detail: String,
    },

    /// No inference rule exists for this operator. Conversion checks
    /// operator support before inference runs, so reaching this indicates
    /// the tracker was invoked directly on an unsupported graph.
    NoRule { node: String, op_type: String },
}

impl ShapeInferenceError {
    fn incompatible(node: &Node, detail: impl Into<String>) -> ShapeInferenceError {
        ShapeInferenceError::IncompatibleShapes {
            node: node.name.clone(),
            detail: detail.into(),
        }
    }

    fn invalid_attr(node: &Node, attr: &str, detail: impl Into<String>) -> ShapeInferenceError {
        ShapeInferenceError::InvalidAttribute {
            node: node.name.clone(),
            attr: attr.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ShapeInferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeInferenceError::MissingShape { node, tensor } => {
                write!(f, "node \"{}\": shape of \"{}\" is unknown", node, tensor)
            }
            ShapeInferenceError::RankMismatch {
                node,
                expected,
                actual,
            } => write!(
                f,
                "node \"{}\": expected rank {}, got {}",
                node, expected, actual
            ),
            ShapeInferenceError::IncompatibleShapes { node, detail } => {
                write!(f, "node \"{}\": incompatible shapes: {}", node, detail)
            }
            ShapeInferenceError::InvalidAttribute { node, attr, detail } => {
                write!(f, "node \"{}\": attribute \"{}\": {}", node, attr, detail)
            }
            ShapeInferenceError::NoRule { node, op_type } => {
                write!(f, "node \"{}\": no shape rule for {}", node, op_type)
            }
        }
    }
}

impl Error for ShapeInferenceError {}

/// An output shape depends on data that is not available at conversion time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DynamicShapeError {
    pub node: String,
    pub op_type: String,
    pub detail: String,
}

impl DynamicShapeError {
    fn new(node: &Node, detail: impl Into<String>) -> DynamicShapeError {
        DynamicShapeError {
            node: node.name.clone(),
            op_type: node.op_type.clone(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for DynamicShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node \"{}\" ({}): output shape is not statically determinable: {}",
            self.node, self.op_type, self.detail
        )
    }
}

impl Error for DynamicShapeError {}

/// Error type of the shape/layout tracker.
#[derive(Clone, Debug, PartialEq)]
pub enum InferError {
    Shape(ShapeInferenceError),
    Dynamic(DynamicShapeError),
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferError::Shape(e) => write!(f, "{}", e),
            InferError::Dynamic(e) => write!(f, "{}", e),
        }
    }
}

impl Error for InferError {}

impl From<ShapeInferenceError> for InferError {
    fn from(e: ShapeInferenceError) -> InferError {
        InferError::Shape(e)
    }
}

impl From<DynamicShapeError> for InferError {
    fn from(e: DynamicShapeError) -> InferError {
        InferError::Dynamic(e)
    }
}

/// Inferred description of one node output.
struct OutputInfo {
    info: ShapeInfo,
    constant: Option<Tensor>,
}

impl OutputInfo {
    fn value(dims: Vec<Dimension>, dtype: ElementType, layout: LayoutTag) -> OutputInfo {
        OutputInfo {
            info: ShapeInfo {
                dims,
                dtype,
                layout,
            },
            constant: None,
        }
    }

    fn constant(tensor: Tensor) -> OutputInfo {
        OutputInfo {
            info: ShapeInfo {
                dims: tensor.shape().iter().map(|&d| Dimension::Fixed(d)).collect(),
                dtype: tensor.element_type(),
                layout: LayoutTag::Agnostic,
            },
            constant: Some(tensor),
        }
    }
}

/// Layout for a freshly computed tensor of the given rank, in the source
/// convention: rank >= 3 values keep a channel-first meaning, anything lower
/// has no channel axis to speak of.
fn source_layout(rank: usize) -> LayoutTag {
    if rank >= 3 {
        LayoutTag::ChannelFirst
    } else {
        LayoutTag::Agnostic
    }
}

/// Resolve a possibly-negative axis against `rank`.
fn resolve_axis(node: &Node, axis: i64, rank: usize) -> Result<usize, ShapeInferenceError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(ShapeInferenceError::invalid_attr(
            node,
            "axis",
            format!("axis {} out of range for rank {}", axis, rank),
        ));
    }
    Ok(resolved as usize)
}

fn resolve_axes(
    node: &Node,
    axes: &[i64],
    rank: usize,
) -> Result<SmallVec<[usize; 4]>, ShapeInferenceError> {
    let mut resolved: SmallVec<[usize; 4]> = SmallVec::new();
    for &axis in axes {
        resolved.push(resolve_axis(node, axis, rank)?);
    }
    resolved.sort_unstable();
    resolved.dedup();
    Ok(resolved)
}

/// Infer shapes, layouts and propagated constants for every tensor.
///
/// `order` is the execution order from [`crate::schedule::execution_order`];
/// visiting nodes in that order guarantees input shapes exist before they
/// are needed.
pub fn infer<'g>(graph: &'g Graph, order: &[usize]) -> Result<ShapeCatalog<'g>, InferError> {
    let mut catalog = ShapeCatalog {
        graph,
        shapes: FxHashMap::default(),
        constants: FxHashMap::default(),
    };

    for input in &graph.inputs {
        // Rank-4 float inputs follow the originating export convention of
        // image batches; everything else starts layout-agnostic.
        let layout = if input.dims.len() == 4 && input.dtype == ElementType::Float32 {
            LayoutTag::ChannelFirst
        } else {
            LayoutTag::Agnostic
        };
        catalog.shapes.insert(
            input.name.clone(),
            ShapeInfo {
                dims: input.dims.clone(),
                dtype: input.dtype,
                layout,
            },
        );
    }

    for (name, tensor) in &graph.initializers {
        catalog.shapes.insert(
            name.clone(),
            ShapeInfo {
                dims: tensor.shape().iter().map(|&d| Dimension::Fixed(d)).collect(),
                dtype: tensor.element_type(),
                layout: LayoutTag::Agnostic,
            },
        );
    }

    for &index in order {
        let node = &graph.nodes[index];
        let outputs = infer_node(node, &catalog)?;
        debug_assert_eq!(outputs.len(), node.outputs.len());
        for (name, output) in node.outputs.iter().zip(outputs) {
            log::debug!(
                "inferred {}: {:?} {} {}",
                name,
                output.info.dims,
                output.info.dtype,
                output.info.layout
            );
            catalog.shapes.insert(name.clone(), output.info);
            if let Some(value) = output.constant {
                catalog.constants.insert(name.clone(), value);
            }
        }
    }

    Ok(catalog)
}

/// Fetch the inferred shape of a node input.
fn require<'c>(
    catalog: &'c ShapeCatalog,
    node: &Node,
    input: usize,
) -> Result<&'c ShapeInfo, ShapeInferenceError> {
    let name = node.inputs.get(input).map(String::as_str).unwrap_or("");
    catalog
        .shape(name)
        .ok_or_else(|| ShapeInferenceError::MissingShape {
            node: node.name.clone(),
            tensor: name.to_string(),
        })
}

/// Fetch the constant value of a node input, which may be an attribute in
/// older opsets (`attr`) or a constant input tensor in newer ones.
fn attr_or_constant_ints(
    catalog: &ShapeCatalog,
    node: &Node,
    attr: &str,
    input: usize,
) -> Option<Vec<i64>> {
    if let Some(values) = node.attr_ints(attr) {
        return Some(values.to_vec());
    }
    let name = node.inputs.get(input)?;
    let tensor = catalog.constant(name)?;
    tensor.as_i64().map(|v| v.to_vec())
}

/// Broadcast two shapes together per the ONNX/numpy rules.
fn broadcast(
    node: &Node,
    a: &[Dimension],
    b: &[Dimension],
) -> Result<Vec<Dimension>, ShapeInferenceError> {
    let rank = a.len().max(b.len());
    let a_pad = rank - a.len();
    let b_pad = rank - b.len();
    let one = Dimension::Fixed(1);

    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let da = if i < a_pad { &one } else { &a[i - a_pad] };
        let db = if i < b_pad { &one } else { &b[i - b_pad] };
        let dim = match (da, db) {
            (a, b) if a == b => a.clone(),
            (Dimension::Fixed(1), d) | (d, Dimension::Fixed(1)) => d.clone(),
            (Dimension::Fixed(_), Dimension::Fixed(_)) => {
                return Err(ShapeInferenceError::incompatible(
                    node,
                    format!("cannot broadcast {} against {}", da, db),
                ));
            }
            // A fixed size against a symbolic one can only succeed if they
            // agree at runtime; assume the fixed size.
            (Dimension::Fixed(n), Dimension::Symbolic(_))
            | (Dimension::Symbolic(_), Dimension::Fixed(n)) => Dimension::Fixed(*n),
            (Dimension::Symbolic(_), Dimension::Symbolic(_)) => da.clone(),
        };
        out.push(dim);
    }
    Ok(out)
}

/// Output extent of one spatial dimension of a convolution or pool.
///
/// The formula is the one in the ONNX Conv/Pool operator docs.
fn spatial_out(in_size: usize, kernel: usize, stride: usize, dilation: usize, pads: usize) -> usize {
    let window = dilation * (kernel - 1) + 1;
    (in_size + pads).saturating_sub(window) / stride + 1
}

/// Padding mode resolved from `auto_pad` + `pads` attributes.
pub(crate) enum Pads {
    /// Explicit [top, left, bottom, right] padding (NOTSET).
    Fixed([usize; 4]),
    /// SAME_UPPER / SAME_LOWER: output extent is ceil(in / stride).
    Same,
}

pub(crate) fn conv_pads(node: &Node) -> Result<Pads, ShapeInferenceError> {
    let auto_pad = node.attr_string("auto_pad", "NOTSET");
    match auto_pad.as_str() {
        "NOTSET" => {
            let pads = node.attr_ints("pads").unwrap_or(&[0, 0, 0, 0]);
            if pads.len() != 4 {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "pads",
                    format!("expected 4 values, got {}", pads.len()),
                ));
            }
            if pads.iter().any(|&p| p < 0) {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "pads",
                    "negative padding",
                ));
            }
            Ok(Pads::Fixed([
                pads[0] as usize,
                pads[1] as usize,
                pads[2] as usize,
                pads[3] as usize,
            ]))
        }
        "SAME_UPPER" | "SAME_LOWER" => Ok(Pads::Same),
        "VALID" => Ok(Pads::Fixed([0, 0, 0, 0])),
        other => Err(ShapeInferenceError::invalid_attr(
            node,
            "auto_pad",
            format!("unsupported mode \"{}\"", other),
        )),
    }
}

fn attr_pair(node: &Node, name: &str, default: [usize; 2]) -> Result<[usize; 2], ShapeInferenceError> {
    match node.attr_ints(name) {
        None => Ok(default),
        Some([a, b]) if *a > 0 && *b > 0 => Ok([*a as usize, *b as usize]),
        Some(values) => Err(ShapeInferenceError::invalid_attr(
            node,
            name,
            format!("expected 2 positive values, got {:?}", values),
        )),
    }
}

/// Spatial dims of a 4-d input, or symbolic placeholders derived from the
/// node name when unknown.
fn spatial_dims(node: &Node, info: &ShapeInfo) -> Result<[Dimension; 2], ShapeInferenceError> {
    if info.rank() != 4 {
        return Err(ShapeInferenceError::RankMismatch {
            node: node.name.clone(),
            expected: 4,
            actual: info.rank(),
        });
    }
    Ok([info.dims[2].clone(), info.dims[3].clone()])
}

fn conv_like_spatial(
    node: &Node,
    input: &ShapeInfo,
    kernel: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
    pads: &Pads,
) -> Result<[Dimension; 2], ShapeInferenceError> {
    let spatial = spatial_dims(node, input)?;
    let mut out = [Dimension::Fixed(0), Dimension::Fixed(0)];
    for axis in 0..2 {
        out[axis] = match &spatial[axis] {
            Dimension::Fixed(size) => match pads {
                Pads::Same => Dimension::Fixed(size.div_ceil(strides[axis])),
                Pads::Fixed(p) => Dimension::Fixed(spatial_out(
                    *size,
                    kernel[axis],
                    strides[axis],
                    dilations[axis],
                    p[axis] + p[axis + 2],
                )),
            },
            Dimension::Symbolic(_) => Dimension::Symbolic(format!("{}:{}", node.name, axis + 2)),
        };
    }
    Ok(out)
}

fn infer_node(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let op = node.op_type.as_str();
    match op {
        // Shape- and layout-preserving unary ops.
        "Relu" | "LeakyRelu" | "Sigmoid" | "Softmax" | "Exp" | "Sqrt" | "Abs" | "Neg"
        | "Clip" | "Identity" | "Dropout" | "PRelu" => {
            let input = require(catalog, node, 0)?;
            let mut outputs = vec![OutputInfo::value(
                input.dims.clone(),
                input.dtype,
                input.layout,
            )];
            // Dropout may declare a mask output; it is never consumed in
            // inference mode.
            for _ in 1..node.outputs.len() {
                outputs.push(OutputInfo::value(
                    input.dims.clone(),
                    input.dtype,
                    input.layout,
                ));
            }
            Ok(outputs)
        }

        "Floor" => {
            let name = &node.inputs[0];
            if let Some(value) = catalog.constant(name) {
                Ok(vec![OutputInfo::constant(fold_floor(value))])
            } else {
                let input = require(catalog, node, 0)?;
                Ok(vec![OutputInfo::value(
                    input.dims.clone(),
                    input.dtype,
                    input.layout,
                )])
            }
        }

        "Cast" => {
            let to = node.attr_int("to", 0);
            let dtype = match to {
                1 => ElementType::Float32,   // FLOAT
                6 | 7 | 9 => ElementType::Int64, // INT32 / INT64 / BOOL
                other => {
                    return Err(ShapeInferenceError::invalid_attr(
                        node,
                        "to",
                        format!("unsupported target data type {}", other),
                    )
                    .into());
                }
            };
            if let Some(value) = catalog.constant(&node.inputs[0]) {
                return Ok(vec![OutputInfo::constant(fold_cast(value, dtype))]);
            }
            let input = require(catalog, node, 0)?;
            Ok(vec![OutputInfo::value(
                input.dims.clone(),
                dtype,
                input.layout,
            )])
        }

        "Add" | "Sub" | "Mul" | "Div" | "Equal" => {
            let a = require(catalog, node, 0)?.clone();
            let b = require(catalog, node, 1)?.clone();
            let dims = broadcast(node, &a.dims, &b.dims)?;
            let dtype = if op == "Equal" {
                ElementType::Int64
            } else {
                a.dtype
            };
            let layout = [a.layout, b.layout]
                .into_iter()
                .find(|l| *l != LayoutTag::Agnostic)
                .unwrap_or(LayoutTag::Agnostic);

            let lhs = catalog.constant(&node.inputs[0]);
            let rhs = catalog.constant(&node.inputs[1]);
            if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                if let Some(folded) = fold_binary(op, lhs, rhs) {
                    return Ok(vec![OutputInfo::constant(folded)]);
                }
            }
            Ok(vec![OutputInfo::value(dims, dtype, layout)])
        }

        "Conv" | "ConvTranspose" => infer_conv(node, catalog, op == "ConvTranspose"),

        "MaxPool" | "AveragePool" => {
            let input = require(catalog, node, 0)?;
            let kernel = match node.attr_ints("kernel_shape") {
                Some([h, w]) => [*h as usize, *w as usize],
                _ => {
                    return Err(ShapeInferenceError::invalid_attr(
                        node,
                        "kernel_shape",
                        "expected 2 values",
                    )
                    .into());
                }
            };
            let strides = attr_pair(node, "strides", [1, 1])?;
            let dilations = attr_pair(node, "dilations", [1, 1])?;
            let pads = conv_pads(node)?;
            let spatial = conv_like_spatial(node, input, kernel, strides, dilations, &pads)?;
            let dims = vec![
                input.dims[0].clone(),
                input.dims[1].clone(),
                spatial[0].clone(),
                spatial[1].clone(),
            ];
            Ok(vec![OutputInfo::value(
                dims,
                input.dtype,
                LayoutTag::ChannelFirst,
            )])
        }

        "GlobalAveragePool" => {
            let input = require(catalog, node, 0)?;
            spatial_dims(node, input)?;
            let dims = vec![
                input.dims[0].clone(),
                input.dims[1].clone(),
                Dimension::Fixed(1),
                Dimension::Fixed(1),
            ];
            Ok(vec![OutputInfo::value(
                dims,
                input.dtype,
                LayoutTag::ChannelFirst,
            )])
        }

        "BatchNormalization" => {
            let input = require(catalog, node, 0)?;
            let out = OutputInfo::value(input.dims.clone(), input.dtype, input.layout);
            // Training-mode outputs (mean/var) share the parameter shape;
            // conversion rejects them later, but give them a shape so the
            // catalog stays total.
            let mut outputs = vec![out];
            for _ in 1..node.outputs.len() {
                let param = require(catalog, node, 1)?;
                outputs.push(OutputInfo::value(
                    param.dims.clone(),
                    param.dtype,
                    LayoutTag::Agnostic,
                ));
            }
            Ok(outputs)
        }

        "Concat" => {
            let first = require(catalog, node, 0)?.clone();
            let axis = resolve_axis(node, node.attr_int("axis", 0), first.rank().max(1))?;

            // Concat over constants is folded so shape vectors assembled
            // from pieces (Shape + Concat) stay resolvable.
            let values: Option<Vec<&Tensor>> = node
                .inputs
                .iter()
                .map(|name| catalog.constant(name))
                .collect();
            if let Some(values) = values {
                if let Some(folded) = fold_concat(&values, axis) {
                    return Ok(vec![OutputInfo::constant(folded)]);
                }
            }

            let mut dims = first.dims.clone();
            let mut total = Some(match &dims[axis] {
                Dimension::Fixed(size) => *size,
                Dimension::Symbolic(_) => {
                    return Err(ShapeInferenceError::incompatible(
                        node,
                        "concat axis has symbolic extent",
                    )
                    .into());
                }
            });
            for index in 1..node.inputs.len() {
                let other = require(catalog, node, index)?;
                if other.rank() != first.rank() {
                    return Err(ShapeInferenceError::RankMismatch {
                        node: node.name.clone(),
                        expected: first.rank(),
                        actual: other.rank(),
                    }
                    .into());
                }
                match &other.dims[axis] {
                    Dimension::Fixed(size) => total = total.map(|t| t + size),
                    Dimension::Symbolic(_) => total = None,
                }
            }
            dims[axis] = match total {
                Some(size) => Dimension::Fixed(size),
                None => Dimension::Symbolic(format!("{}:{}", node.name, axis)),
            };
            Ok(vec![OutputInfo::value(dims, first.dtype, first.layout)])
        }

        "Gemm" => {
            let a = require(catalog, node, 0)?;
            let b = require(catalog, node, 1)?;
            if a.rank() != 2 || b.rank() != 2 {
                return Err(ShapeInferenceError::RankMismatch {
                    node: node.name.clone(),
                    expected: 2,
                    actual: a.rank().max(b.rank()),
                }
                .into());
            }
            let trans_a = node.attr_int("transA", 0) != 0;
            let trans_b = node.attr_int("transB", 0) != 0;
            let m = a.dims[if trans_a { 1 } else { 0 }].clone();
            let n = b.dims[if trans_b { 0 } else { 1 }].clone();
            Ok(vec![OutputInfo::value(
                vec![m, n],
                a.dtype,
                LayoutTag::Agnostic,
            )])
        }

        "MatMul" => {
            let a = require(catalog, node, 0)?;
            let b = require(catalog, node, 1)?;
            if a.rank() < 2 || b.rank() < 2 {
                return Err(ShapeInferenceError::RankMismatch {
                    node: node.name.clone(),
                    expected: 2,
                    actual: a.rank().min(b.rank()),
                }
                .into());
            }
            let batch = broadcast(
                node,
                &a.dims[..a.rank() - 2],
                &b.dims[..b.rank() - 2],
            )?;
            let mut dims = batch;
            dims.push(a.dims[a.rank() - 2].clone());
            dims.push(b.dims[b.rank() - 1].clone());
            let layout = source_layout(dims.len());
            Ok(vec![OutputInfo::value(dims, a.dtype, layout)])
        }

        "Reshape" => infer_reshape(node, catalog),

        "Flatten" => {
            let input = require(catalog, node, 0)?;
            let axis = resolve_axis(node, node.attr_int("axis", 1), input.rank().max(1))?;
            let fold_dims = |dims: &[Dimension]| -> Option<usize> {
                dims.iter()
                    .map(|d| d.as_fixed())
                    .product::<Option<usize>>()
            };
            let head = if axis == 1 && matches!(input.dims.first(), Some(Dimension::Symbolic(_)))
            {
                input.dims[0].clone()
            } else {
                match fold_dims(&input.dims[..axis]) {
                    Some(size) => Dimension::Fixed(size),
                    None => Dimension::Symbolic(format!("{}:0", node.name)),
                }
            };
            let tail = match fold_dims(&input.dims[axis..]) {
                Some(size) => Dimension::Fixed(size),
                None => {
                    return Err(ShapeInferenceError::incompatible(
                        node,
                        "flattened extent is symbolic",
                    )
                    .into());
                }
            };
            Ok(vec![OutputInfo::value(
                vec![head, tail],
                input.dtype,
                LayoutTag::Agnostic,
            )])
        }

        "Transpose" => {
            let input = require(catalog, node, 0)?;
            let rank = input.rank();
            let perm: Vec<usize> = match node.attr_ints("perm") {
                Some(perm) => perm
                    .iter()
                    .map(|&axis| resolve_axis(node, axis, rank))
                    .collect::<Result<_, _>>()?,
                None => (0..rank).rev().collect(),
            };
            if perm.len() != rank {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "perm",
                    format!("expected {} axes, got {}", rank, perm.len()),
                )
                .into());
            }
            let dims: Vec<Dimension> = perm.iter().map(|&axis| input.dims[axis].clone()).collect();
            // A permutation that moves the channel axis last switches the
            // value to the channel-last convention; the identity keeps the
            // input's tag; anything else loses the channel interpretation.
            let layout = if perm == [0, 2, 3, 1] {
                LayoutTag::ChannelLast
            } else if perm.iter().enumerate().all(|(i, &axis)| i == axis) {
                input.layout
            } else {
                LayoutTag::Agnostic
            };
            Ok(vec![OutputInfo::value(dims, input.dtype, layout)])
        }

        "Squeeze" | "Unsqueeze" => infer_squeeze(node, catalog, op == "Unsqueeze"),

        "ReduceMean" | "ReduceMax" | "ReduceSum" => {
            let input = require(catalog, node, 0)?;
            let keep_dims = node.attr_int("keepdims", 1) != 0;
            let axes = match attr_or_constant_ints(catalog, node, "axes", 1) {
                Some(axes) => resolve_axes(node, &axes, input.rank())?,
                None => (0..input.rank()).collect(),
            };
            let mut dims = Vec::new();
            for (index, dim) in input.dims.iter().enumerate() {
                if axes.contains(&index) {
                    if keep_dims {
                        dims.push(Dimension::Fixed(1));
                    }
                } else {
                    dims.push(dim.clone());
                }
            }
            let layout = source_layout(dims.len());
            Ok(vec![OutputInfo::value(dims, input.dtype, layout)])
        }

        "Shape" => {
            let input = require(catalog, node, 0)?;
            match input.fixed_dims() {
                Some(dims) => Ok(vec![OutputInfo::constant(Tensor::from_i64(
                    vec![dims.len()],
                    dims.iter().map(|&d| d as i64).collect(),
                ))]),
                None => Ok(vec![OutputInfo::value(
                    vec![Dimension::Fixed(input.rank())],
                    ElementType::Int64,
                    LayoutTag::Agnostic,
                )]),
            }
        }

        "Gather" => infer_gather(node, catalog),

        "Slice" => infer_slice(node, catalog),

        "Split" => infer_split(node, catalog),

        "Expand" => {
            let input = require(catalog, node, 0)?;
            let target = attr_or_constant_ints(catalog, node, "shape", 1).ok_or_else(|| {
                DynamicShapeError::new(node, "target shape is not a compile-time constant")
            })?;
            let target_dims: Vec<Dimension> = target
                .iter()
                .map(|&d| Dimension::Fixed(d.max(1) as usize))
                .collect();
            let dims = broadcast(node, &input.dims, &target_dims)?;
            Ok(vec![OutputInfo::value(dims, input.dtype, input.layout)])
        }

        "Upsample" | "Resize" => infer_resize(node, catalog),

        "Pad" => {
            let input = require(catalog, node, 0)?;
            let pads = attr_or_constant_ints(catalog, node, "pads", 1).ok_or_else(|| {
                DynamicShapeError::new(node, "pad amounts are not a compile-time constant")
            })?;
            if pads.len() != input.rank() * 2 {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "pads",
                    format!("expected {} values, got {}", input.rank() * 2, pads.len()),
                )
                .into());
            }
            let rank = input.rank();
            let dims = input
                .dims
                .iter()
                .enumerate()
                .map(|(axis, dim)| {
                    let total = (pads[axis] + pads[axis + rank]).max(0) as usize;
                    match dim {
                        Dimension::Fixed(size) => Dimension::Fixed(size + total),
                        Dimension::Symbolic(_) if total == 0 => dim.clone(),
                        Dimension::Symbolic(_) => {
                            Dimension::Symbolic(format!("{}:{}", node.name, axis))
                        }
                    }
                })
                .collect();
            Ok(vec![OutputInfo::value(dims, input.dtype, input.layout)])
        }

        "Constant" => {
            let value = node
                .attr("value")
                .and_then(|attr| attr.as_tensor())
                .cloned()
                .ok_or_else(|| {
                    ShapeInferenceError::invalid_attr(node, "value", "missing tensor value")
                })?;
            Ok(vec![OutputInfo::constant(value)])
        }

        other => Err(ShapeInferenceError::NoRule {
            node: node.name.clone(),
            op_type: other.to_string(),
        }
        .into()),
    }
}

fn infer_conv(
    node: &Node,
    catalog: &ShapeCatalog,
    transposed: bool,
) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?;
    let weight = require(catalog, node, 1)?;
    if weight.rank() != 4 {
        return Err(ShapeInferenceError::RankMismatch {
            node: node.name.clone(),
            expected: 4,
            actual: weight.rank(),
        }
        .into());
    }
    let weight_dims = weight.fixed_dims().ok_or_else(|| {
        ShapeInferenceError::incompatible(node, "weight tensor has symbolic shape")
    })?;

    let strides = attr_pair(node, "strides", [1, 1])?;
    let dilations = attr_pair(node, "dilations", [1, 1])?;
    let kernel = match node.attr_ints("kernel_shape") {
        Some([h, w]) => [*h as usize, *w as usize],
        Some(other) => {
            return Err(ShapeInferenceError::invalid_attr(
                node,
                "kernel_shape",
                format!("expected 2 values, got {}", other.len()),
            )
            .into());
        }
        None => [weight_dims[2], weight_dims[3]],
    };
    let group = node.attr_int("group", 1).max(1) as usize;

    if transposed {
        let spatial = spatial_dims(node, input)?;
        let pads = match conv_pads(node)? {
            Pads::Fixed(pads) => pads,
            Pads::Same => {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "auto_pad",
                    "same padding is not supported for transposed convolution",
                )
                .into());
            }
        };
        let output_padding = node
            .attr_ints("output_padding")
            .map(|p| [p[0] as usize, p.get(1).map(|&v| v as usize).unwrap_or(0)])
            .unwrap_or([0, 0]);
        // ONNX ConvTranspose weight layout is (in, out / group, kH, kW).
        let out_channels = weight_dims[1] * group;
        let mut out_spatial = [Dimension::Fixed(0), Dimension::Fixed(0)];
        for axis in 0..2 {
            out_spatial[axis] = match &spatial[axis] {
                Dimension::Fixed(size) => {
                    let out = (*size as i64 - 1) * strides[axis] as i64
                        + dilations[axis] as i64 * (kernel[axis] as i64 - 1)
                        + 1
                        + output_padding[axis] as i64
                        - pads[axis] as i64
                        - pads[axis + 2] as i64;
                    if out <= 0 {
                        return Err(ShapeInferenceError::incompatible(
                            node,
                            format!("transposed conv output extent {} on axis {}", out, axis + 2),
                        )
                        .into());
                    }
                    Dimension::Fixed(out as usize)
                }
                Dimension::Symbolic(_) => {
                    Dimension::Symbolic(format!("{}:{}", node.name, axis + 2))
                }
            };
        }
        let dims = vec![
            input.dims[0].clone(),
            Dimension::Fixed(out_channels),
            out_spatial[0].clone(),
            out_spatial[1].clone(),
        ];
        return Ok(vec![OutputInfo::value(
            dims,
            input.dtype,
            LayoutTag::ChannelFirst,
        )]);
    }

    let pads = conv_pads(node)?;
    let spatial = conv_like_spatial(node, input, kernel, strides, dilations, &pads)?;
    let dims = vec![
        input.dims[0].clone(),
        Dimension::Fixed(weight_dims[0]),
        spatial[0].clone(),
        spatial[1].clone(),
    ];
    Ok(vec![OutputInfo::value(
        dims,
        input.dtype,
        LayoutTag::ChannelFirst,
    )])
}

fn infer_reshape(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?;
    let target = attr_or_constant_ints(catalog, node, "shape", 1).ok_or_else(|| {
        DynamicShapeError::new(node, "target shape is not a compile-time constant")
    })?;

    // Fold reshapes of constants outright.
    if let Some(value) = catalog.constant(&node.inputs[0]) {
        if let Some(dims) = resolve_reshape_fixed(value.shape(), &target) {
            if let Some(folded) = value.reshape(dims) {
                return Ok(vec![OutputInfo::constant(folded)]);
            }
        }
    }

    let mut dims: Vec<Dimension> = Vec::with_capacity(target.len());
    let mut infer_axis = None;
    for (axis, &size) in target.iter().enumerate() {
        match size {
            0 => {
                // Copy the corresponding input dimension.
                let dim = input.dims.get(axis).cloned().ok_or_else(|| {
                    ShapeInferenceError::invalid_attr(
                        node,
                        "shape",
                        format!("dimension {} copies a nonexistent input axis", axis),
                    )
                })?;
                dims.push(dim);
            }
            -1 => {
                if infer_axis.is_some() {
                    return Err(ShapeInferenceError::invalid_attr(
                        node,
                        "shape",
                        "more than one inferred (-1) dimension",
                    )
                    .into());
                }
                infer_axis = Some(axis);
                dims.push(Dimension::Fixed(1));
            }
            size if size > 0 => {
                dims.push(Dimension::Fixed(size as usize));
            }
            size => {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "shape",
                    format!("invalid dimension {}", size),
                )
                .into());
            }
        }
    }

    if let Some(axis) = infer_axis {
        // The inferred extent needs the full input element count.
        let total: usize = match input.fixed_dims() {
            Some(fixed) => fixed.iter().product(),
            None => {
                // A symbolic batch that is carried through unchanged can
                // still be handled: drop it from both sides.
                let symbolic_ok = matches!(input.dims.first(), Some(Dimension::Symbolic(_)))
                    && matches!(dims.first(), Some(Dimension::Symbolic(_)))
                    && input.dims[1..].iter().all(|d| d.as_fixed().is_some());
                if !symbolic_ok {
                    return Err(DynamicShapeError::new(
                        node,
                        "cannot infer -1 extent from a symbolic input shape",
                    )
                    .into());
                }
                input.dims[1..]
                    .iter()
                    .map(|d| d.as_fixed().unwrap_or(1))
                    .product()
            }
        };
        let known: usize = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != axis)
            .map(|(_, d)| d.as_fixed().unwrap_or(1))
            .product();
        if known == 0 || total % known != 0 {
            return Err(
                ShapeInferenceError::incompatible(node, "element count does not divide").into(),
            );
        }
        dims[axis] = Dimension::Fixed(total / known);
    }

    let layout = source_layout(dims.len());
    Ok(vec![OutputInfo::value(dims, input.dtype, layout)])
}

/// Resolve a reshape target against a fully fixed input shape.
fn resolve_reshape_fixed(input: &[usize], target: &[i64]) -> Option<Vec<usize>> {
    let total: usize = input.iter().product();
    let mut dims = Vec::with_capacity(target.len());
    let mut infer_axis = None;
    for (axis, &size) in target.iter().enumerate() {
        match size {
            0 => dims.push(*input.get(axis)?),
            -1 => {
                infer_axis = Some(axis);
                dims.push(1);
            }
            size if size > 0 => dims.push(size as usize),
            _ => return None,
        }
    }
    if let Some(axis) = infer_axis {
        let known: usize = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != axis)
            .map(|(_, &d)| d)
            .product();
        if known == 0 || total % known != 0 {
            return None;
        }
        dims[axis] = total / known;
    }
    Some(dims)
}

fn infer_squeeze(
    node: &Node,
    catalog: &ShapeCatalog,
    unsqueeze: bool,
) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?.clone();
    let axes = attr_or_constant_ints(catalog, node, "axes", 1);

    let dims: Vec<Dimension> = if unsqueeze {
        let axes = axes.ok_or_else(|| {
            DynamicShapeError::new(node, "unsqueeze axes are not a compile-time constant")
        })?;
        let out_rank = input.rank() + axes.len();
        let axes = resolve_axes(node, &axes, out_rank)?;
        let mut dims = input.dims.clone();
        for &axis in axes.iter() {
            if axis > dims.len() {
                return Err(ShapeInferenceError::invalid_attr(
                    node,
                    "axes",
                    format!("axis {} out of range", axis),
                )
                .into());
            }
            dims.insert(axis, Dimension::Fixed(1));
        }
        dims
    } else {
        match axes {
            Some(axes) => {
                let axes = resolve_axes(node, &axes, input.rank())?;
                let mut dims = Vec::new();
                for (index, dim) in input.dims.iter().enumerate() {
                    if axes.contains(&index) {
                        if dim.as_fixed() != Some(1) {
                            return Err(ShapeInferenceError::incompatible(
                                node,
                                format!("squeezed axis {} has extent {}", index, dim),
                            )
                            .into());
                        }
                    } else {
                        dims.push(dim.clone());
                    }
                }
                dims
            }
            None => input
                .dims
                .iter()
                .filter(|d| d.as_fixed() != Some(1))
                .cloned()
                .collect(),
        }
    };

    // Fold when the input value is known.
    if let Some(value) = catalog.constant(&node.inputs[0]) {
        if let Some(fixed) = dims.iter().map(|d| d.as_fixed()).collect::<Option<Vec<_>>>() {
            if let Some(folded) = value.reshape(fixed) {
                return Ok(vec![OutputInfo::constant(folded)]);
            }
        }
    }

    let layout = source_layout(dims.len());
    Ok(vec![OutputInfo::value(dims, input.dtype, layout)])
}

fn infer_gather(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let data = require(catalog, node, 0)?;
    let axis = resolve_axis(node, node.attr_int("axis", 0), data.rank().max(1))?;

    let indices = catalog.constant(&node.inputs[1]).and_then(|t| {
        t.as_i64().map(|values| (t.shape().to_vec(), values.to_vec()))
    });

    if let (Some(value), Some((index_shape, indices)), 0) =
        (catalog.constant(&node.inputs[0]), &indices, axis)
    {
        if let Some(folded) = fold_gather_axis0(value, index_shape, indices) {
            return Ok(vec![OutputInfo::constant(folded)]);
        }
    }

    let (index_shape, _) = indices.ok_or_else(|| {
        DynamicShapeError::new(node, "gather indices are not a compile-time constant")
    })?;

    let mut dims = Vec::new();
    dims.extend_from_slice(&data.dims[..axis]);
    dims.extend(index_shape.iter().map(|&d| Dimension::Fixed(d)));
    dims.extend_from_slice(&data.dims[axis + 1..]);
    Ok(vec![OutputInfo::value(
        dims,
        data.dtype,
        LayoutTag::Agnostic,
    )])
}

fn infer_slice(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?;
    let rank = input.rank();

    let starts = attr_or_constant_ints(catalog, node, "starts", 1);
    let ends = attr_or_constant_ints(catalog, node, "ends", 2);
    let (starts, ends) = match (starts, ends) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(
                DynamicShapeError::new(node, "slice bounds are not compile-time constants").into(),
            );
        }
    };
    let axes = attr_or_constant_ints(catalog, node, "axes", 3)
        .unwrap_or_else(|| (0..starts.len() as i64).collect());
    let steps = attr_or_constant_ints(catalog, node, "steps", 4)
        .unwrap_or_else(|| vec![1; starts.len()]);
    if starts.len() != ends.len() || starts.len() != axes.len() || starts.len() != steps.len() {
        return Err(ShapeInferenceError::invalid_attr(
            node,
            "starts",
            "starts/ends/axes/steps lengths differ",
        )
        .into());
    }

    // Fold 1-d slices of constants (index vectors and similar).
    if let Some(value) = catalog.constant(&node.inputs[0]) {
        if value.ndim() == 1 && axes == [0] {
            if let Some(folded) = fold_slice_1d(value, starts[0], ends[0], steps[0]) {
                return Ok(vec![OutputInfo::constant(folded)]);
            }
        }
    }

    let mut dims = input.dims.clone();
    for i in 0..axes.len() {
        let axis = resolve_axis(node, axes[i], rank)?;
        let size = match &input.dims[axis] {
            Dimension::Fixed(size) => *size as i64,
            Dimension::Symbolic(_) => {
                return Err(DynamicShapeError::new(
                    node,
                    format!("sliced axis {} has symbolic extent", axis),
                )
                .into());
            }
        };
        let step = steps[i];
        if step <= 0 {
            return Err(ShapeInferenceError::invalid_attr(
                node,
                "steps",
                "only positive steps are supported",
            )
            .into());
        }
        let clamp = |v: i64| -> i64 {
            let v = if v < 0 { v + size } else { v };
            v.clamp(0, size)
        };
        let start = clamp(starts[i]);
        let end = clamp(ends[i].min(size));
        let extent = (end - start).max(0);
        dims[axis] = Dimension::Fixed((extent as usize).div_ceil(step as usize));
    }

    Ok(vec![OutputInfo::value(dims, input.dtype, input.layout)])
}

fn infer_split(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?;
    let axis = resolve_axis(node, node.attr_int("axis", 0), input.rank().max(1))?;
    let size = match &input.dims[axis] {
        Dimension::Fixed(size) => *size,
        Dimension::Symbolic(_) => {
            return Err(
                DynamicShapeError::new(node, "split axis has symbolic extent").into(),
            );
        }
    };

    let sizes: Vec<usize> = match attr_or_constant_ints(catalog, node, "split", 1) {
        Some(sizes) => sizes.iter().map(|&s| s.max(0) as usize).collect(),
        None => {
            let parts = node.outputs.len();
            if parts == 0 || size % parts != 0 {
                return Err(ShapeInferenceError::incompatible(
                    node,
                    format!("cannot split extent {} into {} equal parts", size, parts),
                )
                .into());
            }
            vec![size / parts; parts]
        }
    };
    if sizes.len() != node.outputs.len() || sizes.iter().sum::<usize>() != size {
        return Err(ShapeInferenceError::incompatible(
            node,
            format!("split sizes {:?} do not cover extent {}", sizes, size),
        )
        .into());
    }

    Ok(sizes
        .iter()
        .map(|&part| {
            let mut dims = input.dims.clone();
            dims[axis] = Dimension::Fixed(part);
            OutputInfo::value(dims, input.dtype, input.layout)
        })
        .collect())
}

fn infer_resize(node: &Node, catalog: &ShapeCatalog) -> Result<Vec<OutputInfo>, InferError> {
    let input = require(catalog, node, 0)?;
    spatial_dims(node, input)?;

    // Upsample (and Resize before opset 13) pass scales; newer Resize may
    // pass explicit output sizes instead. Upsample opset 7 has scales as an
    // attribute.
    let scales_input = if node.op_type == "Upsample" { 1 } else { 2 };
    let scales_attr = match node.attr("scales") {
        Some(AttributeValue::Floats(values)) => Some(values.clone()),
        _ => None,
    };
    let scales = scales_attr.or_else(|| {
        node.inputs
            .get(scales_input)
            .filter(|name| !name.is_empty())
            .and_then(|name| catalog.constant(name))
            .and_then(|t| t.as_f32().map(|v| v.to_vec()))
    });

    if let Some(scales) = scales {
        if scales.len() != 4 || scales[0] != 1. || scales[1] != 1. {
            return Err(ShapeInferenceError::invalid_attr(
                node,
                "scales",
                "expected scales [1, 1, sh, sw]",
            )
            .into());
        }
        let scale = |dim: &Dimension, factor: f32, axis: usize| match dim {
            Dimension::Fixed(size) => Dimension::Fixed((*size as f32 * factor) as usize),
            Dimension::Symbolic(_) => Dimension::Symbolic(format!("{}:{}", node.name, axis)),
        };
        let dims = vec![
            input.dims[0].clone(),
            input.dims[1].clone(),
            scale(&input.dims[2], scales[2], 2),
            scale(&input.dims[3], scales[3], 3),
        ];
        return Ok(vec![OutputInfo::value(
            dims,
            input.dtype,
            LayoutTag::ChannelFirst,
        )]);
    }

    let sizes = node
        .inputs
        .get(3)
        .filter(|name| !name.is_empty())
        .and_then(|name| catalog.constant(name))
        .and_then(|t| t.as_i64().map(|v| v.to_vec()));
    match sizes {
        Some(sizes) if sizes.len() == 4 => {
            let dims = vec![
                input.dims[0].clone(),
                input.dims[1].clone(),
                Dimension::Fixed(sizes[2].max(0) as usize),
                Dimension::Fixed(sizes[3].max(0) as usize),
            ];
            Ok(vec![OutputInfo::value(
                dims,
                input.dtype,
                LayoutTag::ChannelFirst,
            )])
        }
        _ => Err(DynamicShapeError::new(
            node,
            "neither scales nor sizes are compile-time constants",
        )
        .into()),
    }
}

// Constant folding helpers. These cover the value flows the original models
// exercise: shape vectors being sliced, concatenated and fed to Reshape.

fn fold_floor(value: &Tensor) -> Tensor {
    match value.data() {
        TensorData::Float32(data) => Tensor::from_f32(
            value.shape().to_vec(),
            data.iter().map(|v| v.floor()).collect(),
        ),
        TensorData::Int64(_) => value.clone(),
    }
}

fn fold_cast(value: &Tensor, dtype: ElementType) -> Tensor {
    match (value.data(), dtype) {
        (TensorData::Float32(data), ElementType::Int64) => Tensor::from_i64(
            value.shape().to_vec(),
            data.iter().map(|&v| v as i64).collect(),
        ),
        (TensorData::Int64(data), ElementType::Float32) => Tensor::from_f32(
            value.shape().to_vec(),
            data.iter().map(|&v| v as f32).collect(),
        ),
        _ => value.clone(),
    }
}

/// Elementwise fold for same-shape or scalar-broadcast operands.
fn fold_binary(op: &str, lhs: &Tensor, rhs: &Tensor) -> Option<Tensor> {
    fn apply(op: &str, a: f64, b: f64) -> Option<f64> {
        match op {
            "Add" => Some(a + b),
            "Sub" => Some(a - b),
            "Mul" => Some(a * b),
            "Div" => Some(a / b),
            _ => None,
        }
    }

    let (shape, len) = if lhs.len() == rhs.len() && lhs.shape() == rhs.shape() {
        (lhs.shape().to_vec(), lhs.len())
    } else if rhs.len() == 1 {
        (lhs.shape().to_vec(), lhs.len())
    } else if lhs.len() == 1 {
        (rhs.shape().to_vec(), rhs.len())
    } else {
        return None;
    };

    let get = |t: &Tensor, i: usize| -> f64 {
        let i = if t.len() == 1 { 0 } else { i };
        match t.data() {
            TensorData::Float32(d) => d[i] as f64,
            TensorData::Int64(d) => d[i] as f64,
        }
    };

    let int_result = lhs.element_type() == ElementType::Int64
        && rhs.element_type() == ElementType::Int64
        && op != "Div";
    if int_result {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(apply(op, get(lhs, i), get(rhs, i))? as i64);
        }
        Some(Tensor::from_i64(shape, out))
    } else {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(apply(op, get(lhs, i), get(rhs, i))? as f32);
        }
        Some(Tensor::from_f32(shape, out))
    }
}

fn fold_concat(values: &[&Tensor], axis: usize) -> Option<Tensor> {
    // Concatenating 1-d vectors covers the shape-assembly patterns; higher
    // ranks fall back to shape-only inference.
    if axis != 0 || values.iter().any(|v| v.ndim() != 1) {
        return None;
    }
    if values
        .iter()
        .all(|v| v.element_type() == ElementType::Int64)
    {
        let mut out = Vec::new();
        for value in values {
            out.extend_from_slice(value.as_i64()?);
        }
        Some(Tensor::from_i64(vec![out.len()], out))
    } else {
        let mut out = Vec::new();
        for value in values {
            out.extend_from_slice(value.as_f32()?);
        }
        Some(Tensor::from_f32(vec![out.len()], out))
    }
}

fn fold_gather_axis0(data: &Tensor, index_shape: &[usize], indices: &[i64]) -> Option<Tensor> {
    let first = *data.shape().first()?;
    let row: usize = data.shape()[1..].iter().product();
    let mut out_shape: Vec<usize> = index_shape.to_vec();
    out_shape.extend_from_slice(&data.shape()[1..]);

    let resolve = |index: i64| -> Option<usize> {
        let index = if index < 0 { index + first as i64 } else { index };
        (index >= 0 && (index as usize) < first).then_some(index as usize)
    };

    match data.data() {
        TensorData::Int64(src) => {
            let mut out = Vec::with_capacity(indices.len() * row);
            for &index in indices {
                let at = resolve(index)?;
                out.extend_from_slice(&src[at * row..(at + 1) * row]);
            }
            Some(Tensor::from_i64(out_shape, out))
        }
        TensorData::Float32(src) => {
            let mut out = Vec::with_capacity(indices.len() * row);
            for &index in indices {
                let at = resolve(index)?;
                out.extend_from_slice(&src[at * row..(at + 1) * row]);
            }
            Some(Tensor::from_f32(out_shape, out))
        }
    }
}

fn fold_slice_1d(value: &Tensor, start: i64, end: i64, step: i64) -> Option<Tensor> {
    if step <= 0 {
        return None;
    }
    let len = value.len() as i64;
    let clamp = |v: i64| -> usize {
        let v = if v < 0 { v + len } else { v };
        v.clamp(0, len) as usize
    };
    let (start, end) = (clamp(start), clamp(end.min(len)));
    let indices: Vec<usize> = (start..end).step_by(step as usize).collect();
    match value.data() {
        TensorData::Int64(data) => Some(Tensor::from_i64(
            vec![indices.len()],
            indices.iter().map(|&i| data[i]).collect(),
        )),
        TensorData::Float32(data) => Some(Tensor::from_f32(
            vec![indices.len()],
            indices.iter().map(|&i| data[i]).collect(),
        )),
    }
}
