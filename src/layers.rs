//! The Keras-style layer vocabulary the translator emits.
//!
//! A [`Layer`] is a named unit of the target model: a configuration
//! ([`LayerKind`]), already-permuted weight tensors, and named input/output
//! tensor connections. Layers are wired together by tensor name; the
//! assembler checks that every connection resolves and that producer and
//! consumer agree on layout before a layer is created.

use crate::ir::Dimension;
use crate::tensor::{ElementType, Tensor};

/// Keras padding mode for convolution and pooling layers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PaddingMode {
    /// No implicit padding.
    Valid,
    /// Pad so each spatial output extent is `ceil(input / stride)`.
    Same,
}

impl PaddingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaddingMode::Valid => "valid",
            PaddingMode::Same => "same",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl Interpolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
        }
    }
}

/// Elementwise combination of two tensors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MergeOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
}

/// Elementwise function of one tensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Sigmoid,
    Exponential,
    Sqrt,
    Abs,
    Neg,
}

impl UnaryOp {
    /// Keras activation name, for the ops that are activations.
    pub fn activation_name(&self) -> Option<&'static str> {
        match self {
            UnaryOp::Sigmoid => Some("sigmoid"),
            UnaryOp::Exponential => Some("exponential"),
            UnaryOp::Sqrt | UnaryOp::Abs | UnaryOp::Neg => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReduceOp {
    Max,
    Mean,
    Sum,
}

/// Configuration of a `Conv2D` layer. Weights: kernel (kH, kW, in, out),
/// then bias if `use_bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2dConfig {
    pub filters: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub dilation_rate: [usize; 2],
    pub padding: PaddingMode,
    pub groups: usize,
    pub use_bias: bool,
}

/// Configuration of a `DepthwiseConv2D` layer. Weights: kernel
/// (kH, kW, channels, 1), then bias if `use_bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthwiseConv2dConfig {
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub dilation_rate: [usize; 2],
    pub padding: PaddingMode,
    pub use_bias: bool,
}

/// Configuration of a `Conv2DTranspose` layer. Weights: kernel
/// (kH, kW, out, in), then bias if `use_bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2dTransposeConfig {
    pub filters: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub dilation_rate: [usize; 2],
    pub padding: PaddingMode,
    pub output_padding: Option<[usize; 2]>,
    pub use_bias: bool,
}

/// Configuration of a `Dense` layer. Weights: kernel (in, units), then bias
/// if `use_bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseConfig {
    pub units: usize,
    pub use_bias: bool,
}

/// Configuration of a `BatchNormalization` layer. Weights: gamma, beta,
/// moving mean, moving variance.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNormConfig {
    /// Channel axis in the layer's input, typically -1 (channel-last).
    pub axis: i64,
    pub epsilon: f32,
    pub momentum: f32,
}

/// Shared configuration of `MaxPooling2D` / `AveragePooling2D`.
#[derive(Clone, Debug, PartialEq)]
pub struct Pool2dConfig {
    pub pool_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: PaddingMode,
}

/// The kind and configuration of a target layer.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    /// `InputLayer`: a declared model input. `dims` is the full source-order
    /// shape including the batch dimension.
    Input {
        dims: Vec<Dimension>,
        dtype: ElementType,
    },

    /// `Permute`: axis reordering, `dims` are 1-based and exclude the batch
    /// axis, as Keras specifies them. Used for layout conversions.
    Permute { dims: Vec<usize> },

    /// `ZeroPadding2D`: `padding` is ((top, bottom), (left, right)).
    ZeroPadding2d { padding: [[usize; 2]; 2] },

    /// `Cropping2D`: `cropping` is ((top, bottom), (left, right)).
    Cropping2d { cropping: [[usize; 2]; 2] },

    Conv2d(Conv2dConfig),
    DepthwiseConv2d(DepthwiseConv2dConfig),
    Conv2dTranspose(Conv2dTransposeConfig),
    Dense(DenseConfig),
    BatchNorm(BatchNormConfig),
    MaxPool2d(Pool2dConfig),
    AvgPool2d(Pool2dConfig),
    GlobalAvgPool2d { keepdims: bool },

    UpSampling2d {
        size: [usize; 2],
        interpolation: Interpolation,
    },

    /// `ReLU`, optionally capped (used for `Clip` with a zero lower bound).
    Relu { max_value: Option<f32> },
    LeakyRelu { alpha: f32 },
    /// `PReLU`; weights: alpha. `shared_axes` are 1-based per Keras.
    PRelu { shared_axes: Vec<usize> },
    Softmax { axis: i64 },
    /// An elementwise activation or function layer.
    Activation(UnaryOp),
    Clip { min: f32, max: f32 },

    /// Elementwise merge of two wired inputs.
    Merge(MergeOp),

    /// Elementwise op between a wired input and a constant (weights: the
    /// constant). `flipped` means the constant is the left operand.
    MergeConstant { op: MergeOp, flipped: bool },

    /// `Reshape`: `target_shape` excludes the batch dimension.
    Reshape { target_shape: Vec<usize> },
    Flatten,
    Concatenate { axis: i64 },
    /// Split along `axis` into chunks of `sizes`; one output per chunk.
    Split { axis: i64, sizes: Vec<usize> },
    /// Tile the input; `repeats` includes the batch axis.
    Tile { repeats: Vec<usize> },
    Cast { dtype: ElementType },
    /// Reduction in the layer input's own axis order.
    Reduce {
        op: ReduceOp,
        axes: Vec<usize>,
        keepdims: bool,
    },
}

impl LayerKind {
    /// The Keras class name used in exported architecture JSON.
    pub fn class_name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "InputLayer",
            LayerKind::Permute { .. } => "Permute",
            LayerKind::ZeroPadding2d { .. } => "ZeroPadding2D",
            LayerKind::Cropping2d { .. } => "Cropping2D",
            LayerKind::Conv2d(_) => "Conv2D",
            LayerKind::DepthwiseConv2d(_) => "DepthwiseConv2D",
            LayerKind::Conv2dTranspose(_) => "Conv2DTranspose",
            LayerKind::Dense(_) => "Dense",
            LayerKind::BatchNorm(_) => "BatchNormalization",
            LayerKind::MaxPool2d(_) => "MaxPooling2D",
            LayerKind::AvgPool2d(_) => "AveragePooling2D",
            LayerKind::GlobalAvgPool2d { .. } => "GlobalAveragePooling2D",
            LayerKind::UpSampling2d { .. } => "UpSampling2D",
            LayerKind::Relu { .. } => "ReLU",
            LayerKind::LeakyRelu { .. } => "LeakyReLU",
            LayerKind::PRelu { .. } => "PReLU",
            LayerKind::Softmax { .. } => "Softmax",
            LayerKind::Activation(op) => {
                if op.activation_name().is_some() {
                    "Activation"
                } else {
                    "TFOpLambda"
                }
            }
            LayerKind::Clip { .. } => "TFOpLambda",
            LayerKind::Merge(op) => match op {
                MergeOp::Add => "Add",
                MergeOp::Subtract => "Subtract",
                MergeOp::Multiply => "Multiply",
                MergeOp::Divide | MergeOp::Equal => "TFOpLambda",
            },
            LayerKind::MergeConstant { .. } => "TFOpLambda",
            LayerKind::Reshape { .. } => "Reshape",
            LayerKind::Flatten => "Flatten",
            LayerKind::Concatenate { .. } => "Concatenate",
            LayerKind::Split { .. } => "TFOpLambda",
            LayerKind::Tile { .. } => "TFOpLambda",
            LayerKind::Cast { .. } => "TFOpLambda",
            LayerKind::Reduce { .. } => "TFOpLambda",
        }
    }

    /// A short lower-case stem for generated layer names, eg. "conv2d" for
    /// `Conv2D`. Matches Keras' automatic naming.
    pub fn name_stem(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "input",
            LayerKind::Permute { .. } => "permute",
            LayerKind::ZeroPadding2d { .. } => "zero_padding2d",
            LayerKind::Cropping2d { .. } => "cropping2d",
            LayerKind::Conv2d(_) => "conv2d",
            LayerKind::DepthwiseConv2d(_) => "depthwise_conv2d",
            LayerKind::Conv2dTranspose(_) => "conv2d_transpose",
            LayerKind::Dense(_) => "dense",
            LayerKind::BatchNorm(_) => "batch_normalization",
            LayerKind::MaxPool2d(_) => "max_pooling2d",
            LayerKind::AvgPool2d(_) => "average_pooling2d",
            LayerKind::GlobalAvgPool2d { .. } => "global_average_pooling2d",
            LayerKind::UpSampling2d { .. } => "up_sampling2d",
            LayerKind::Relu { .. } => "re_lu",
            LayerKind::LeakyRelu { .. } => "leaky_re_lu",
            LayerKind::PRelu { .. } => "p_re_lu",
            LayerKind::Softmax { .. } => "softmax",
            LayerKind::Activation(_) => "activation",
            LayerKind::Clip { .. } => "clip",
            LayerKind::Merge(op) | LayerKind::MergeConstant { op, .. } => match op {
                MergeOp::Add => "add",
                MergeOp::Subtract => "subtract",
                MergeOp::Multiply => "multiply",
                MergeOp::Divide => "divide",
                MergeOp::Equal => "equal",
            },
            LayerKind::Reshape { .. } => "reshape",
            LayerKind::Flatten => "flatten",
            LayerKind::Concatenate { .. } => "concatenate",
            LayerKind::Split { .. } => "split",
            LayerKind::Tile { .. } => "tile",
            LayerKind::Cast { .. } => "cast",
            LayerKind::Reduce { op, .. } => match op {
                ReduceOp::Max => "reduce_max",
                ReduceOp::Mean => "reduce_mean",
                ReduceOp::Sum => "reduce_sum",
            },
        }
    }
}

/// One named layer of the target model.
#[derive(Clone, Debug)]
pub struct Layer {
    /// Unique layer name, generated Keras-style from the kind's stem.
    pub name: String,

    pub kind: LayerKind,

    /// Names of consumed tensors, in order.
    pub inputs: Vec<String>,

    /// Names of produced tensors. All kinds produce exactly one output
    /// except `Split`.
    pub outputs: Vec<String>,

    /// Layer weights in Keras order, already permuted for the target layout.
    pub weights: Vec<Tensor>,
}

impl Layer {
    pub fn new(
        name: impl Into<String>,
        kind: LayerKind,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Layer {
        Layer {
            name: name.into(),
            kind,
            inputs,
            outputs,
            weights: Vec::new(),
        }
    }

    pub fn with_weights(mut self, weights: Vec<Tensor>) -> Layer {
        self.weights = weights;
        self
    }

    /// Total number of weight elements.
    pub fn param_count(&self) -> usize {
        self.weights.iter().map(|w| w.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{Conv2dConfig, Layer, LayerKind, MergeOp, PaddingMode, UnaryOp};
    use crate::tensor::Tensor;

    #[test]
    fn test_class_names() {
        let conv = LayerKind::Conv2d(Conv2dConfig {
            filters: 8,
            kernel_size: [3, 3],
            strides: [1, 1],
            dilation_rate: [1, 1],
            padding: PaddingMode::Same,
            groups: 1,
            use_bias: true,
        });
        assert_eq!(conv.class_name(), "Conv2D");
        assert_eq!(conv.name_stem(), "conv2d");
        assert_eq!(LayerKind::Merge(MergeOp::Add).class_name(), "Add");
        assert_eq!(
            LayerKind::Activation(UnaryOp::Sigmoid).class_name(),
            "Activation"
        );
        assert_eq!(
            LayerKind::Activation(UnaryOp::Sqrt).class_name(),
            "TFOpLambda"
        );
    }

    #[test]
    fn test_param_count() {
        let layer = Layer::new(
            "dense",
            LayerKind::Dense(super::DenseConfig {
                units: 10,
                use_bias: true,
            }),
            vec!["x".to_string()],
            vec!["y".to_string()],
        )
        .with_weights(vec![
            Tensor::from_f32(vec![8, 10], vec![0.; 80]),
            Tensor::from_f32(vec![10], vec![0.; 10]),
        ]);
        assert_eq!(layer.param_count(), 90);
    }
}
