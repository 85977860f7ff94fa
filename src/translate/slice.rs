use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::{Dimension, Node};
use crate::layers::LayerKind;
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Slice", Box::new(Slice));
}

/// Runtime slices convert only as spatial crops of an image batch
/// (`Cropping2D`); slices of constants fold during inference.
struct Slice;

impl Slice {
    fn bounds(ctx: &TranslateCtx) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>, Vec<i64>), TranslateError>
    {
        let from_input = |index: usize| -> Option<Vec<i64>> {
            ctx.optional_constant(index)
                .ok()
                .flatten()
                .and_then(|tensor| tensor.as_i64().map(|v| v.to_vec()))
        };
        let starts = ctx
            .node
            .attr_ints("starts")
            .map(|v| v.to_vec())
            .or_else(|| from_input(1))
            .ok_or_else(|| ctx.dynamic("slice bounds are not compile-time constants"))?;
        let ends = ctx
            .node
            .attr_ints("ends")
            .map(|v| v.to_vec())
            .or_else(|| from_input(2))
            .ok_or_else(|| ctx.dynamic("slice bounds are not compile-time constants"))?;
        let axes = ctx
            .node
            .attr_ints("axes")
            .map(|v| v.to_vec())
            .or_else(|| from_input(3))
            .unwrap_or_else(|| (0..starts.len() as i64).collect());
        let steps = ctx
            .node
            .attr_ints("steps")
            .map(|v| v.to_vec())
            .or_else(|| from_input(4))
            .unwrap_or_else(|| vec![1; starts.len()]);
        Ok((starts, ends, axes, steps))
    }
}

impl OpTranslator for Slice {
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
        if rank == 4 {
            if let Some(data) = required.first_mut() {
                *data = LayoutTag::ChannelLast;
            }
        }
        required
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        if input.rank() != 4 {
            return Err(ctx.invalid_input(
                "only spatial slices of 4-d image batches are supported",
            ));
        }
        let (starts, ends, axes, steps) = Slice::bounds(ctx)?;
        if steps.iter().any(|&s| s != 1) {
            return Err(ctx.unsupported_attr("steps", "strided slicing is not supported"));
        }

        // ((top, bottom), (left, right)) crop amounts.
        let mut cropping = [[0usize; 2]; 2];
        for i in 0..axes.len() {
            let axis = axes[i];
            let axis = if axis < 0 { axis + 4 } else { axis };
            if axis != 2 && axis != 3 {
                return Err(ctx.unsupported_attr(
                    "axes",
                    "only the spatial axes can be sliced",
                ));
            }
            let extent = match &input.dims[axis as usize] {
                Dimension::Fixed(size) => *size as i64,
                Dimension::Symbolic(_) => {
                    return Err(ctx.dynamic("sliced axis has symbolic extent"));
                }
            };
            let clamp = |v: i64| -> i64 {
                let v = if v < 0 { v + extent } else { v };
                v.clamp(0, extent)
            };
            let start = clamp(starts[i]);
            let end = clamp(ends[i].min(extent));
            if end <= start {
                return Err(ctx.invalid_input("slice selects an empty range"));
            }
            cropping[axis as usize - 2] = [start as usize, (extent - end) as usize];
        }

        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Cropping2d { cropping }, vec![data], 0);
        let output = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout: LayoutTag::ChannelLast,
            }],
        })
    }
}
