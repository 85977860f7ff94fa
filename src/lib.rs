//! keras-import converts [ONNX](https://onnx.ai) models into Keras-style
//! layer graphs.
//!
//! The converter walks the source graph in dependency order, tracks the
//! shape and data layout (channel-first vs. channel-last) of every tensor,
//! rewrites weight tensors into the target layout, and maps each operator
//! onto the high-level layer a person would have written — `Conv2D`,
//! `Dense`, `BatchNormalization` — rather than a soup of primitive tensor
//! ops. Layout conversions (`Permute` layers) are inserted only where a
//! producer and consumer disagree.
//!
//! # Converting a model
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = keras_import::onnx::load_file("model.onnx")?;
//! let model = keras_import::convert(&graph)?;
//!
//! for layer in model.layers() {
//!     println!("{} ({})", layer.name, layer.kind.class_name());
//! }
//! std::fs::write("model.json", model.to_json().to_string())?;
//! # Ok(()) }
//! ```
//!
//! The returned [`Model`] owns the converted weights; serializing them is
//! left to the caller. [`Model::to_json`] renders the architecture in the
//! Keras `Functional` JSON format.
//!
//! # Supported operators
//!
//! The registry covers the convolutional-network vocabulary: convolutions
//! (including depthwise, grouped and transposed), pooling, dense layers,
//! batch normalization, the common activations and elementwise ops, layout
//! ops (reshape, transpose, concat, split, slice, pad) and nearest/bilinear
//! upsampling. Values that are computable at conversion time (`Shape`,
//! `Gather` on constants, shape arithmetic) are folded instead of becoming
//! layers. Anything else fails fast with
//! [`ConvertError::UnsupportedOperator`]; there is no partial output.
//!
//! Custom registries can be assembled with [`translate::Registry`] and
//! passed to [`convert_with_registry`].

mod convert;
mod ir;
mod layers;
mod model;
mod schedule;
mod tensor;
mod weights;

pub mod infer_shapes;
pub mod onnx;
pub mod translate;

pub use convert::{convert, convert_with_registry, ConvertError};
pub use infer_shapes::{DynamicShapeError, LayoutTag, ShapeInfo, ShapeInferenceError};
pub use ir::{AttributeValue, Dimension, Graph, MalformedGraphError, Node, ValueInfo};
pub use layers::{
    BatchNormConfig, Conv2dConfig, Conv2dTransposeConfig, DenseConfig, DepthwiseConv2dConfig,
    Interpolation, Layer, LayerKind, MergeOp, PaddingMode, Pool2dConfig, ReduceOp, UnaryOp,
};
pub use model::{Model, ModelOutput};
pub use onnx::LoadError;
pub use schedule::{execution_order, CyclicGraphError};
pub use tensor::{ElementType, Tensor, TensorData};
pub use weights::{permute, WeightRole, WeightShapeError};
