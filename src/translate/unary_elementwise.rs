use crate::layers::{LayerKind, UnaryOp};
use crate::tensor::ElementType;
use crate::translate::{
    OpTranslator, OutputValue, Registry, ResolvedInput, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Exp", Box::new(Unary(UnaryOp::Exponential)));
    registry.register("Sqrt", Box::new(Unary(UnaryOp::Sqrt)));
    registry.register("Abs", Box::new(Unary(UnaryOp::Abs)));
    registry.register("Neg", Box::new(Unary(UnaryOp::Neg)));
    registry.register("Cast", Box::new(Cast));
    registry.register("Floor", Box::new(Floor));
    registry.register("Identity", Box::new(Passthrough));
    registry.register("Dropout", Box::new(Passthrough));
    registry.register("Constant", Box::new(ConstantOp));
    registry.register("Shape", Box::new(ShapeOp));
    registry.register("Gather", Box::new(GatherOp));
}

struct Unary(UnaryOp);

impl OpTranslator for Unary {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Activation(self.0), vec![data], 0);
        let output = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout,
            }],
        })
    }
}

struct Cast;

impl OpTranslator for Cast {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        // Casts of constants are folded before translation runs.
        let dtype = match ctx.node.attr_int("to", 0) {
            1 => ElementType::Float32,
            6 | 7 | 9 => ElementType::Int64,
            other => {
                return Err(ctx.unsupported_attr("to", format!("data type {}", other)));
            }
        };
        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Cast { dtype }, vec![data], 0);
        let output = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout,
            }],
        })
    }
}

struct Floor;

impl OpTranslator for Floor {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        // Reached only for non-constant inputs; the source tool only ever
        // floors conversion-time values (eg. computed resize factors).
        Err(ctx.invalid_input("floor of a runtime tensor is not supported"))
    }
}

/// `Identity`, and `Dropout` in inference mode: forward the input value
/// without creating a layer.
struct Passthrough;

impl OpTranslator for Passthrough {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let value = match ctx.input(0) {
            ResolvedInput::Value { tensor, layout } => OutputValue::Tensor {
                name: tensor.clone(),
                layout: *layout,
            },
            ResolvedInput::Constant(tensor) => OutputValue::Constant((*tensor).clone()),
            ResolvedInput::Omitted => {
                return Err(ctx.invalid_input("missing required input 0"));
            }
        };
        // Dropout's optional mask output is never wired in inference graphs.
        if ctx
            .node
            .outputs
            .get(1)
            .is_some_and(|name| !name.is_empty())
        {
            return Err(ctx.invalid_input("mask output is not supported"));
        }
        let outputs = vec![value; ctx.node.outputs.len().max(1)];
        Ok(Translation {
            layers: Vec::new(),
            outputs,
        })
    }
}

/// `Constant` nodes are folded during inference; reaching translation means
/// the value attribute was missing or unusable.
struct ConstantOp;

impl OpTranslator for ConstantOp {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        Err(ctx.invalid_input("constant node has no usable value"))
    }
}

/// `Shape` folds when the input's shape is static; otherwise the value is
/// data the conversion cannot produce.
struct ShapeOp;

impl OpTranslator for ShapeOp {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        Err(ctx.dynamic("shape of a dynamically-shaped tensor"))
    }
}

/// `Gather` converts only as a conversion-time lookup (folded during
/// inference).
struct GatherOp;

impl OpTranslator for GatherOp {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        Err(ctx.dynamic("gather on runtime tensors is not supported"))
    }
}
