use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{LayerKind, ReduceOp};
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("ReduceMean", Box::new(Reduce(ReduceOp::Mean)));
    registry.register("ReduceMax", Box::new(Reduce(ReduceOp::Max)));
    registry.register("ReduceSum", Box::new(Reduce(ReduceOp::Sum)));
}

/// Resolved reduction axes, in source order.
fn reduce_axes(ctx: &TranslateCtx, rank: usize) -> Result<Vec<usize>, TranslateError> {
    let raw: Vec<i64> = match ctx.node.attr_ints("axes") {
        Some(axes) => axes.to_vec(),
        None => match ctx.optional_constant(1).ok().flatten() {
            Some(tensor) => tensor.as_i64().map(|v| v.to_vec()).unwrap_or_default(),
            None => (0..rank as i64).collect(),
        },
    };
    let mut axes = Vec::with_capacity(raw.len());
    for axis in raw {
        let resolved = if axis < 0 { axis + rank as i64 } else { axis };
        if resolved < 0 || resolved >= rank as i64 {
            return Err(ctx.unsupported_attr("axes", format!("axis {} out of range", axis)));
        }
        axes.push(resolved as usize);
    }
    axes.sort_unstable();
    axes.dedup();
    Ok(axes)
}

/// Whether this reduction is a spatial global average pool: mean over the
/// spatial axes of an image batch.
fn is_global_average(op: ReduceOp, axes: &[usize], rank: usize) -> bool {
    op == ReduceOp::Mean && rank == 4 && axes == [2, 3]
}

struct Reduce(ReduceOp);

impl OpTranslator for Reduce {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        let mut required = current.to_vec();
        let rank = node
            .inputs
            .first()
            .and_then(|name| catalog.shape(name))
            .map(|info| info.rank())
            .unwrap_or(0);
        // The global-average case runs channel-last as a pooling layer; any
        // other reduction uses source-order axes.
        let axes = node
            .attr_ints("axes")
            .map(|axes| {
                axes.iter()
                    .map(|&a| if a < 0 { (a + rank as i64) as usize } else { a as usize })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let layout = if is_global_average(self.0, &axes, rank) {
            LayoutTag::ChannelLast
        } else if rank >= 3 {
            LayoutTag::ChannelFirst
        } else {
            return required;
        };
        if let Some(data) = required.first_mut() {
            *data = layout;
        }
        required
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let rank = input.rank();
        let keep_dims = ctx.node.attr_int("keepdims", 1) != 0;
        let axes = reduce_axes(ctx, rank)?;

        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();

        if is_global_average(self.0, &axes, rank) {
            let layer = ctx.layer_for_output(
                LayerKind::GlobalAvgPool2d {
                    keepdims: keep_dims,
                },
                vec![data],
                0,
            );
            let output = layer.outputs[0].clone();
            let layout = if keep_dims {
                LayoutTag::ChannelLast
            } else {
                LayoutTag::Agnostic
            };
            return Ok(Translation {
                layers: vec![layer],
                outputs: vec![OutputValue::Tensor {
                    name: output,
                    layout,
                }],
            });
        }

        // Generic reductions run on source-order axes.
        let out_rank = if keep_dims { rank } else { rank - axes.len() };
        let out_layout = if out_rank >= 3 { layout } else { LayoutTag::Agnostic };
        let layer = ctx.layer_for_output(
            LayerKind::Reduce {
                op: self.0,
                axes,
                keepdims: keep_dims,
            },
            vec![data],
            0,
        );
        let output = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout: out_layout,
            }],
        })
    }
}
