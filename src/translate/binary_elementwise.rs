use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{LayerKind, MergeOp};
use crate::tensor::Tensor;
use crate::translate::{
    harmonized, OpTranslator, OutputValue, Registry, ResolvedInput, TranslateCtx, TranslateError,
    Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Add", Box::new(Binary(MergeOp::Add)));
    registry.register("Sub", Box::new(Binary(MergeOp::Subtract)));
    registry.register("Mul", Box::new(Binary(MergeOp::Multiply)));
    registry.register("Div", Box::new(Binary(MergeOp::Divide)));
    registry.register("Equal", Box::new(Binary(MergeOp::Equal)));
}

/// Rearrange a constant operand so it broadcasts against a channel-last
/// tensor the way it would have against the channel-first original:
/// right-aligned source axes are padded to rank 4 and the channel axis moved
/// last.
fn constant_for_channel_last(value: &Tensor) -> Tensor {
    match value.ndim() {
        0 => value.clone(),
        rank @ 1..=4 => {
            let mut shape = vec![1; 4 - rank];
            shape.extend_from_slice(value.shape());
            let padded = value
                .reshape(shape)
                .expect("padding with unit axes preserves length");
            padded.permute(&[0, 2, 3, 1])
        }
        _ => value.clone(),
    }
}

struct Binary(MergeOp);

impl OpTranslator for Binary {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        let ranks: Vec<usize> = node
            .inputs
            .iter()
            .map(|name| catalog.shape(name).map(|info| info.rank()).unwrap_or(0))
            .collect();
        if ranks.len() == 2 && ranks[0] == ranks[1] {
            // Same-rank operands broadcast identically in either layout;
            // settle them on one.
            let layout = harmonized(current);
            return vec![layout; current.len()];
        }
        // Mixed ranks broadcast from the right in the source convention, so
        // image-shaped operands must be in it.
        current
            .iter()
            .zip(&ranks)
            .map(|(&layout, &rank)| {
                if rank >= 3 {
                    LayoutTag::ChannelFirst
                } else {
                    layout
                }
            })
            .collect()
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let lhs = ctx.input(0).clone();
        let rhs = ctx.input(1).clone();

        match (lhs, rhs) {
            (
                ResolvedInput::Value {
                    tensor: a,
                    layout: a_layout,
                },
                ResolvedInput::Value {
                    tensor: b,
                    layout: b_layout,
                },
            ) => {
                let layout = harmonized(&[a_layout, b_layout]);
                let layer = ctx.layer_for_output(LayerKind::Merge(self.0), vec![a, b], 0);
                let output = layer.outputs[0].clone();
                Ok(Translation {
                    layers: vec![layer],
                    outputs: vec![OutputValue::Tensor {
                        name: output,
                        layout,
                    }],
                })
            }
            (ResolvedInput::Value { tensor, layout }, ResolvedInput::Constant(value))
            | (ResolvedInput::Constant(value), ResolvedInput::Value { tensor, layout }) => {
                let flipped = matches!(ctx.input(0), ResolvedInput::Constant(_));
                let constant = if layout == LayoutTag::ChannelLast && value.ndim() > 0 {
                    constant_for_channel_last(value)
                } else {
                    value.clone()
                };
                let layer = ctx
                    .layer_for_output(
                        LayerKind::MergeConstant {
                            op: self.0,
                            flipped,
                        },
                        vec![tensor],
                        0,
                    )
                    .with_weights(vec![constant]);
                let output = layer.outputs[0].clone();
                Ok(Translation {
                    layers: vec![layer],
                    outputs: vec![OutputValue::Tensor {
                        name: output,
                        layout,
                    }],
                })
            }
            (ResolvedInput::Constant(_), ResolvedInput::Constant(_)) => Err(ctx.invalid_input(
                "operation on two constants did not fold during inference",
            )),
            _ => Err(ctx.invalid_input("missing required input")),
        }
    }
}
