use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::LayerKind;
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Pad", Box::new(Pad));
}

struct Pad;

impl OpTranslator for Pad {
    fn input_layouts(
        &self,
        _node: &Node,
        current: &[LayoutTag],
        _catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        let mut required = current.to_vec();
        if let Some(data) = required.first_mut() {
            *data = LayoutTag::ChannelLast;
        }
        required
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let node = ctx.node;
        let mode = node.attr_string("mode", "constant");
        if mode != "constant" {
            return Err(ctx.unsupported_attr("mode", format!("\"{}\" padding", mode)));
        }

        // Pads come from the attribute (opset < 11) or a constant input.
        let pads: Vec<i64> = match node.attr_ints("pads") {
            Some(pads) => pads.to_vec(),
            None => ctx
                .optional_constant(1)?
                .and_then(|tensor| tensor.as_i64().map(|v| v.to_vec()))
                .ok_or_else(|| ctx.dynamic("pad amounts are not a compile-time constant"))?,
        };
        let value = match node.attr("value").and_then(|a| a.as_float()) {
            Some(value) => value,
            None => ctx
                .optional_constant(2)?
                .and_then(|tensor| tensor.as_scalar_f32())
                .unwrap_or(0.),
        };
        if value != 0. {
            return Err(ctx.unsupported_attr("value", format!("non-zero fill {}", value)));
        }

        if pads.len() != 8 {
            return Err(ctx.unsupported_attr(
                "pads",
                "only 4-d image padding is supported",
            ));
        }
        // Source order is [n, c, h, w, n, c, h, w]; batch and channel must
        // be unpadded for a spatial padding layer.
        if pads[0] != 0 || pads[1] != 0 || pads[4] != 0 || pads[5] != 0 {
            return Err(ctx.unsupported_attr(
                "pads",
                "padding the batch or channel axis is not supported",
            ));
        }
        if pads.iter().any(|&p| p < 0) {
            return Err(ctx.unsupported_attr("pads", "negative padding"));
        }

        let padding = [
            [pads[2] as usize, pads[6] as usize],
            [pads[3] as usize, pads[7] as usize],
        ];
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::ZeroPadding2d { padding }, vec![data], 0);
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
