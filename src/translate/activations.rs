use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{LayerKind, UnaryOp};
use crate::translate::{
    channel_last_axis, OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError,
    Translation,
};
use crate::tensor::Tensor;

pub(super) fn register(registry: &mut Registry) {
    registry.register("Relu", Box::new(Relu));
    registry.register("LeakyRelu", Box::new(LeakyRelu));
    registry.register("PRelu", Box::new(PRelu));
    registry.register("Sigmoid", Box::new(Sigmoid));
    registry.register("Softmax", Box::new(Softmax));
    registry.register("Clip", Box::new(Clip));
}

/// Emit a single one-input layer that carries its input's layout through.
fn passthrough_layer(
    ctx: &mut TranslateCtx,
    kind: LayerKind,
) -> Result<Translation, TranslateError> {
    let (data, layout) = ctx.wired(0)?;
    let data = data.to_string();
    let layer = ctx.layer_for_output(kind, vec![data], 0);
    let output = layer.outputs[0].clone();
    Ok(Translation {
        layers: vec![layer],
        outputs: vec![OutputValue::Tensor {
            name: output,
            layout,
        }],
    })
}

struct Relu;

impl OpTranslator for Relu {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        passthrough_layer(ctx, LayerKind::Relu { max_value: None })
    }
}

struct LeakyRelu;

impl OpTranslator for LeakyRelu {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let alpha = ctx.node.attr_float("alpha", 0.01);
        passthrough_layer(ctx, LayerKind::LeakyRelu { alpha })
    }
}

struct Sigmoid;

impl OpTranslator for Sigmoid {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        passthrough_layer(ctx, LayerKind::Activation(UnaryOp::Sigmoid))
    }
}

struct Softmax;

impl OpTranslator for Softmax {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let rank = input.rank();
        let axis = ctx.node.attr_int("axis", 1);
        let axis = if axis < 0 { axis + rank as i64 } else { axis };
        if axis < 0 || axis >= rank as i64 {
            return Err(ctx.unsupported_attr("axis", format!("axis {} out of range", axis)));
        }

        let (_, layout) = ctx.wired(0)?;
        let mapped = if layout == LayoutTag::ChannelLast && rank == 4 {
            channel_last_axis(axis as usize) as i64
        } else {
            axis
        };
        passthrough_layer(ctx, LayerKind::Softmax { axis: mapped })
    }
}

struct PRelu;

impl OpTranslator for PRelu {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        // Per-channel slopes need the channels in the last axis; a single
        // shared slope works in any layout.
        let mut required = current.to_vec();
        let per_channel = node
            .inputs
            .get(1)
            .and_then(|name| catalog.constant(name))
            .map(|slope| slope.len() > 1)
            .unwrap_or(false);
        let rank = node
            .inputs
            .first()
            .and_then(|name| catalog.shape(name))
            .map(|info| info.rank())
            .unwrap_or(0);
        if per_channel && rank == 4 {
            if let Some(data) = required.first_mut() {
                *data = LayoutTag::ChannelLast;
            }
        }
        required
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let rank = input.rank();
        let slope = ctx.constant(1)?;
        let channels = input.dims.get(1).and_then(|d| d.as_fixed());

        let (shared_axes, alpha) = if slope.len() == 1 {
            // One slope shared across every non-batch axis.
            let shared: Vec<usize> = (1..rank).collect();
            let alpha = slope
                .reshape(vec![1; rank.saturating_sub(1)])
                .ok_or_else(|| ctx.invalid_input("slope tensor is empty"))?;
            (shared, alpha)
        } else if rank == 4 && channels == Some(slope.len()) {
            // Per-channel slopes, shared over the spatial axes. The data is
            // channel-last here, so alpha is (1, 1, C).
            let alpha = slope
                .reshape(vec![1, 1, slope.len()])
                .ok_or_else(|| ctx.invalid_input("slope tensor is empty"))?;
            (vec![1, 2], alpha)
        } else {
            return Err(ctx.invalid_input(format!(
                "slope of {} values does not match input channels {:?}",
                slope.len(),
                channels
            )));
        };

        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx
            .layer_for_output(LayerKind::PRelu { shared_axes }, vec![data], 0)
            .with_weights(vec![alpha]);
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

struct Clip;

impl Clip {
    /// Clip bounds come from attributes (opset < 11) or constant inputs.
    fn bounds(ctx: &TranslateCtx) -> Result<(f32, f32), TranslateError> {
        let attr_min = ctx.node.attr("min").and_then(|a| a.as_float());
        let attr_max = ctx.node.attr("max").and_then(|a| a.as_float());
        let input_scalar = |index: usize| -> Result<Option<f32>, TranslateError> {
            Ok(ctx
                .optional_constant(index)?
                .and_then(Tensor::as_scalar_f32))
        };
        let min = match attr_min {
            Some(min) => min,
            None => input_scalar(1)?.unwrap_or(f32::NEG_INFINITY),
        };
        let max = match attr_max {
            Some(max) => max,
            None => input_scalar(2)?.unwrap_or(f32::INFINITY),
        };
        Ok((min, max))
    }
}

impl OpTranslator for Clip {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let (min, max) = Clip::bounds(ctx)?;
        // A zero lower bound is a capped ReLU; anything else keeps both
        // bounds explicit.
        let kind = if min == 0. {
            LayerKind::Relu {
                max_value: max.is_finite().then_some(max),
            }
        } else {
            LayerKind::Clip { min, max }
        };
        passthrough_layer(ctx, kind)
    }
}
