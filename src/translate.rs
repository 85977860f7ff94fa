//! Per-operator translation to target layers.
//!
//! The [`Registry`] maps ONNX operator tags to [`OpTranslator`]
//! implementations. Each translator declares the layout every wired input
//! must arrive in ([`OpTranslator::input_layouts`], which the assembler
//! satisfies by inserting `Permute` layers) and then builds one or more
//! layers from the node's attributes and weights
//! ([`OpTranslator::translate`]).
//!
//! Adding support for an operator means registering a new implementation;
//! nothing here dispatches on operator names outside the registry.

use std::error::Error;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::infer_shapes::{DynamicShapeError, LayoutTag, ShapeCatalog, ShapeInfo, ShapeInferenceError};
use crate::ir::Node;
use crate::layers::{Layer, LayerKind};
use crate::tensor::Tensor;
use crate::weights::WeightShapeError;

mod activations;
mod binary_elementwise;
mod concat;
mod conv;
mod layout;
mod matmul;
mod norm;
mod pad;
mod pooling;
mod reduce;
mod resize;
mod slice;
mod unary_elementwise;

/// Why a node could not be translated.
#[derive(Clone, Debug, PartialEq)]
pub enum TranslateError {
    /// No translation is registered for the operator type.
    UnsupportedOperator { node: String, op_type: String },

    /// The operator is supported, but not with this attribute combination.
    UnsupportedAttribute {
        node: String,
        op_type: String,
        attr: String,
        detail: String,
    },

    /// An input has the wrong kind (eg. a weight that is not a constant).
    InvalidInput {
        node: String,
        op_type: String,
        detail: String,
    },

    /// A weight tensor does not fit its declared role.
    Weight {
        node: String,
        error: WeightShapeError,
    },

    /// The translation needs a statically known shape that is unavailable.
    Dynamic(DynamicShapeError),

    /// An attribute or shape error detected during translation.
    Shape(ShapeInferenceError),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::UnsupportedOperator { node, op_type } => {
                write!(f, "node \"{}\": unsupported operator {}", node, op_type)
            }
            TranslateError::UnsupportedAttribute {
                node,
                op_type,
                attr,
                detail,
            } => write!(
                f,
                "node \"{}\" ({}): unsupported \"{}\": {}",
                node, op_type, attr, detail
            ),
            TranslateError::InvalidInput {
                node,
                op_type,
                detail,
            } => write!(f, "node \"{}\" ({}): {}", node, op_type, detail),
            TranslateError::Weight { node, error } => {
                write!(f, "node \"{}\": {}", node, error)
            }
            TranslateError::Dynamic(error) => write!(f, "{}", error),
            TranslateError::Shape(error) => write!(f, "{}", error),
        }
    }
}

impl Error for TranslateError {}

impl From<DynamicShapeError> for TranslateError {
    fn from(error: DynamicShapeError) -> TranslateError {
        TranslateError::Dynamic(error)
    }
}

impl From<ShapeInferenceError> for TranslateError {
    fn from(error: ShapeInferenceError) -> TranslateError {
        TranslateError::Shape(error)
    }
}

/// A node input as seen by a translator, after the assembler resolved names
/// and layouts.
#[derive(Clone, Debug)]
pub enum ResolvedInput<'a> {
    /// A tensor produced by an earlier layer or a model input, already
    /// converted to the layout the translator asked for.
    Value { tensor: String, layout: LayoutTag },

    /// A value known at conversion time (initializer or folded constant).
    Constant(&'a Tensor),

    /// An omitted optional input.
    Omitted,
}

/// One output of a translated node.
#[derive(Clone, Debug)]
pub enum OutputValue {
    /// A tensor produced by one of the returned layers (or passed through
    /// from an input, for identity-like ops).
    Tensor { name: String, layout: LayoutTag },

    /// A compile-time constant; no layer carries it.
    Constant(Tensor),
}

/// The result of translating one node.
#[derive(Debug, Default)]
pub struct Translation {
    /// New layers, in wiring order.
    pub layers: Vec<Layer>,

    /// One value per node output, in order.
    pub outputs: Vec<OutputValue>,
}

/// Generates unique Keras-style names ("conv2d", "conv2d_1", ...), avoiding
/// the source graph's tensor names.
pub struct NameGen {
    counters: FxHashMap<&'static str, usize>,
    reserved: rustc_hash::FxHashSet<String>,
}

impl NameGen {
    pub(crate) fn new(reserved: impl IntoIterator<Item = String>) -> NameGen {
        NameGen {
            counters: FxHashMap::default(),
            reserved: reserved.into_iter().collect(),
        }
    }

    /// A fresh layer name for `stem`. The name and its derived output tensor
    /// name (`<name>_out`) are both unique.
    pub fn fresh(&mut self, stem: &'static str) -> String {
        loop {
            let count = self.counters.entry(stem).or_insert(0);
            let name = if *count == 0 {
                stem.to_string()
            } else {
                format!("{}_{}", stem, count)
            };
            *count += 1;
            let tensor = format!("{}_out", name);
            if !self.reserved.contains(&name) && !self.reserved.contains(&tensor) {
                self.reserved.insert(name.clone());
                self.reserved.insert(tensor);
                return name;
            }
        }
    }
}

/// Everything a translator needs to build layers for one node.
pub struct TranslateCtx<'a> {
    pub node: &'a Node,

    /// Resolved inputs, aligned with `node.inputs`.
    pub inputs: Vec<ResolvedInput<'a>>,

    pub catalog: &'a ShapeCatalog<'a>,

    pub names: &'a mut NameGen,
}

impl<'a> TranslateCtx<'a> {
    /// The resolved input at `index`, or `Omitted` past the end.
    pub fn input(&self, index: usize) -> &ResolvedInput<'a> {
        self.inputs.get(index).unwrap_or(&ResolvedInput::Omitted)
    }

    /// The wired tensor at `index`; an error if the input is a constant or
    /// omitted.
    pub fn wired(&self, index: usize) -> Result<(&str, LayoutTag), TranslateError> {
        match self.input(index) {
            ResolvedInput::Value { tensor, layout } => Ok((tensor, *layout)),
            ResolvedInput::Constant(_) => Err(self.invalid_input(format!(
                "input {} must be a runtime tensor, got a constant",
                index
            ))),
            ResolvedInput::Omitted => {
                Err(self.invalid_input(format!("missing required input {}", index)))
            }
        }
    }

    /// The constant at `index`; an error if the input is wired or omitted.
    pub fn constant(&self, index: usize) -> Result<&'a Tensor, TranslateError> {
        match self.input(index) {
            ResolvedInput::Constant(tensor) => Ok(tensor),
            ResolvedInput::Value { .. } => Err(self.invalid_input(format!(
                "input {} must be a constant (initializer), got a runtime tensor",
                index
            ))),
            ResolvedInput::Omitted => {
                Err(self.invalid_input(format!("missing required input {}", index)))
            }
        }
    }

    /// The constant at `index`, or None if the input is omitted.
    pub fn optional_constant(&self, index: usize) -> Result<Option<&'a Tensor>, TranslateError> {
        match self.input(index) {
            ResolvedInput::Constant(tensor) => Ok(Some(tensor)),
            ResolvedInput::Omitted => Ok(None),
            ResolvedInput::Value { .. } => Err(self.invalid_input(format!(
                "input {} must be a constant (initializer), got a runtime tensor",
                index
            ))),
        }
    }

    /// Source-side shape of the input at `index`.
    pub fn shape(&self, index: usize) -> Result<&'a ShapeInfo, TranslateError> {
        let name = self
            .node
            .inputs
            .get(index)
            .map(String::as_str)
            .unwrap_or("");
        self.catalog
            .shape(name)
            .ok_or_else(|| {
                TranslateError::Shape(ShapeInferenceError::MissingShape {
                    node: self.node.name.clone(),
                    tensor: name.to_string(),
                })
            })
    }

    /// Source-side shape of the output at `index`, as inferred.
    pub fn output_shape(&self, index: usize) -> Result<&'a ShapeInfo, TranslateError> {
        let name = self
            .node
            .outputs
            .get(index)
            .map(String::as_str)
            .unwrap_or("");
        self.catalog
            .shape(name)
            .ok_or_else(|| {
                TranslateError::Shape(ShapeInferenceError::MissingShape {
                    node: self.node.name.clone(),
                    tensor: name.to_string(),
                })
            })
    }

    /// A fresh layer built around the node's own output: the layer is named
    /// from the kind's stem and produces the node's output tensor `index`.
    pub fn layer_for_output(&mut self, kind: LayerKind, inputs: Vec<String>, index: usize) -> Layer {
        let name = self.names.fresh(kind.name_stem());
        Layer::new(name, kind, inputs, vec![self.node.outputs[index].clone()])
    }

    /// A fresh intermediate layer (its output tensor is derived from the
    /// generated layer name).
    pub fn intermediate_layer(&mut self, kind: LayerKind, inputs: Vec<String>) -> (Layer, String) {
        let name = self.names.fresh(kind.name_stem());
        let tensor = format!("{}_out", name);
        (
            Layer::new(name, kind, inputs, vec![tensor.clone()]),
            tensor,
        )
    }

    pub fn unsupported_attr(
        &self,
        attr: impl Into<String>,
        detail: impl Into<String>,
    ) -> TranslateError {
        TranslateError::UnsupportedAttribute {
            node: self.node.name.clone(),
            op_type: self.node.op_type.clone(),
            attr: attr.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_input(&self, detail: impl Into<String>) -> TranslateError {
        TranslateError::InvalidInput {
            node: self.node.name.clone(),
            op_type: self.node.op_type.clone(),
            detail: detail.into(),
        }
    }

    pub fn weight_error(&self, error: WeightShapeError) -> TranslateError {
        TranslateError::Weight {
            node: self.node.name.clone(),
            error,
        }
    }

    pub fn dynamic(&self, detail: impl Into<String>) -> TranslateError {
        TranslateError::Dynamic(DynamicShapeError {
            node: self.node.name.clone(),
            op_type: self.node.op_type.clone(),
            detail: detail.into(),
        })
    }
}

/// Translates one operator type into target layers.
pub trait OpTranslator {
    /// The layout each wired input must be converted to before
    /// [`translate`](OpTranslator::translate) runs.
    ///
    /// `current` holds the layout every input is in right now (`Agnostic`
    /// for constants and omitted inputs). Returning `Agnostic` for an input
    /// leaves it unconverted. The default keeps all inputs as they are.
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        let _ = (node, catalog);
        current.to_vec()
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError>;
}

/// The first non-agnostic layout among `current`, used by elementwise ops to
/// settle all their inputs on one layout.
pub(crate) fn harmonized(current: &[LayoutTag]) -> LayoutTag {
    current
        .iter()
        .copied()
        .find(|layout| *layout != LayoutTag::Agnostic)
        .unwrap_or(LayoutTag::Agnostic)
}

/// Map a source (channel-first) axis to the corresponding axis of a
/// channel-last tensor: 0->0, 1->3, 2->1, 3->2.
pub(crate) fn channel_last_axis(axis: usize) -> usize {
    match axis {
        0 => 0,
        1 => 3,
        other => other - 1,
    }
}

/// Registry of operator translations.
///
/// New registries are empty; [`Registry::with_all_ops`] returns one with
/// every built-in translation registered.
#[derive(Default)]
pub struct Registry {
    ops: FxHashMap<&'static str, Box<dyn OpTranslator>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            ops: FxHashMap::default(),
        }
    }

    /// Register (or replace) the translation for `op_type`.
    pub fn register(&mut self, op_type: &'static str, translator: Box<dyn OpTranslator>) {
        self.ops.insert(op_type, translator);
    }

    pub fn supports(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    /// The translation for a node's operator, or the distinguished
    /// unsupported-operator failure.
    pub fn get(&self, node: &Node) -> Result<&dyn OpTranslator, TranslateError> {
        self.ops
            .get(node.op_type.as_str())
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| TranslateError::UnsupportedOperator {
                node: node.name.clone(),
                op_type: node.op_type.clone(),
            })
    }

    /// A registry with all built-in operator translations.
    pub fn with_all_ops() -> Registry {
        let mut registry = Registry::new();
        conv::register(&mut registry);
        pooling::register(&mut registry);
        matmul::register(&mut registry);
        norm::register(&mut registry);
        activations::register(&mut registry);
        unary_elementwise::register(&mut registry);
        binary_elementwise::register(&mut registry);
        layout::register(&mut registry);
        concat::register(&mut registry);
        reduce::register(&mut registry);
        pad::register(&mut registry);
        resize::register(&mut registry);
        slice::register(&mut registry);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::{NameGen, Registry};
    use crate::ir::Node;

    #[test]
    fn test_registry_reports_unsupported() {
        let registry = Registry::with_all_ops();
        assert!(registry.supports("Conv"));
        assert!(!registry.supports("Einsum"));

        let node = Node {
            op_type: "Einsum".to_string(),
            name: "einsum1".to_string(),
            inputs: vec![],
            outputs: vec![],
            attrs: Default::default(),
        };
        let err = registry.get(&node).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("einsum1"));
        assert!(message.contains("Einsum"));
    }

    #[test]
    fn test_name_gen_unique_and_reserved() {
        let mut names = NameGen::new(["conv2d_1".to_string(), "permute_out".to_string()]);
        assert_eq!(names.fresh("conv2d"), "conv2d");
        // "conv2d_1" collides with a source tensor name and is skipped.
        assert_eq!(names.fresh("conv2d"), "conv2d_2");
        // "permute" would produce the reserved tensor name "permute_out".
        assert_eq!(names.fresh("permute"), "permute_1");
    }
}
