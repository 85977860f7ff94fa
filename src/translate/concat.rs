use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::{Dimension, Node};
use crate::layers::LayerKind;
use crate::translate::{
    channel_last_axis, harmonized, OpTranslator, OutputValue, Registry, ResolvedInput,
    TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Concat", Box::new(Concat));
    registry.register("Split", Box::new(Split));
}

fn resolve_axis(ctx: &TranslateCtx, axis: i64, rank: usize) -> Result<usize, TranslateError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(ctx.unsupported_attr("axis", format!("axis {} out of range", axis)));
    }
    Ok(resolved as usize)
}

/// Map a source-order axis onto the axis of the wired data, which may be in
/// the channel-last convention.
fn mapped_axis(axis: usize, rank: usize, layout: LayoutTag) -> i64 {
    if layout == LayoutTag::ChannelLast && rank == 4 {
        channel_last_axis(axis) as i64
    } else {
        axis as i64
    }
}

struct Concat;

impl OpTranslator for Concat {
    fn input_layouts(
        &self,
        _node: &Node,
        current: &[LayoutTag],
        _catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        // All pieces join on one axis, so they must agree on a layout.
        let layout = harmonized(current);
        vec![layout; current.len()]
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let rank = ctx.shape(0)?.rank();
        let axis = resolve_axis(ctx, ctx.node.attr_int("axis", 0), rank.max(1))?;

        let mut tensors = Vec::with_capacity(ctx.inputs.len());
        let mut layout = LayoutTag::Agnostic;
        for index in 0..ctx.inputs.len() {
            match ctx.input(index) {
                ResolvedInput::Value {
                    tensor,
                    layout: value_layout,
                } => {
                    layout = harmonized(&[layout, *value_layout]);
                    tensors.push(tensor.clone());
                }
                ResolvedInput::Constant(_) => {
                    // All-constant concats fold during inference; a mix of
                    // runtime and constant pieces has no layer equivalent.
                    return Err(ctx.invalid_input(
                        "concatenation of runtime tensors with constants is not supported",
                    ));
                }
                ResolvedInput::Omitted => {
                    return Err(ctx.invalid_input(format!("missing input {}", index)));
                }
            }
        }

        let keras_axis = mapped_axis(axis, rank, layout);
        let layer =
            ctx.layer_for_output(LayerKind::Concatenate { axis: keras_axis }, tensors, 0);
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

struct Split;

impl OpTranslator for Split {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let rank = input.rank();
        let axis = resolve_axis(ctx, ctx.node.attr_int("axis", 0), rank.max(1))?;

        let extent = match &input.dims[axis] {
            Dimension::Fixed(size) => *size,
            Dimension::Symbolic(_) => {
                return Err(ctx.dynamic("split axis has symbolic extent"));
            }
        };
        let sizes: Vec<usize> = match ctx.node.attr_ints("split") {
            Some(sizes) => sizes.iter().map(|&s| s.max(0) as usize).collect(),
            None => match ctx.optional_constant(1).ok().flatten() {
                Some(tensor) => tensor
                    .as_i64()
                    .map(|values| values.iter().map(|&s| s.max(0) as usize).collect())
                    .unwrap_or_default(),
                None => {
                    let parts = ctx.node.outputs.len();
                    if parts == 0 || extent % parts != 0 {
                        return Err(ctx.invalid_input(format!(
                            "cannot split extent {} into {} equal parts",
                            extent, parts
                        )));
                    }
                    vec![extent / parts; parts]
                }
            },
        };
        if sizes.len() != ctx.node.outputs.len() || sizes.iter().sum::<usize>() != extent {
            return Err(ctx.invalid_input(format!(
                "split sizes {:?} do not cover extent {}",
                sizes, extent
            )));
        }

        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        let keras_axis = mapped_axis(axis, rank, layout);
        let name = ctx.names.fresh("split");
        let layer = crate::layers::Layer::new(
            name,
            LayerKind::Split {
                axis: keras_axis,
                sizes,
            },
            vec![data],
            ctx.node.outputs.clone(),
        );
        let outputs = layer
            .outputs
            .iter()
            .map(|output| OutputValue::Tensor {
                name: output.clone(),
                layout,
            })
            .collect();
        Ok(Translation {
            layers: vec![layer],
            outputs,
        })
    }
}
