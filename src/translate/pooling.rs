use crate::infer_shapes::{conv_pads, LayoutTag, Pads, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{LayerKind, PaddingMode, Pool2dConfig};
use crate::translate::conv::resolve_padding;
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("MaxPool", Box::new(Pool { max: true }));
    registry.register("AveragePool", Box::new(Pool { max: false }));
    registry.register("GlobalAveragePool", Box::new(GlobalAveragePool));
}

fn channel_last_data(current: &[LayoutTag]) -> Vec<LayoutTag> {
    let mut required = current.to_vec();
    if let Some(data) = required.first_mut() {
        *data = LayoutTag::ChannelLast;
    }
    required
}

struct Pool {
    max: bool,
}

impl OpTranslator for Pool {
    fn input_layouts(
        &self,
        _node: &Node,
        current: &[LayoutTag],
        _catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        channel_last_data(current)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let node = ctx.node;

        let kernel = match node.attr_ints("kernel_shape") {
            Some([h, w]) if *h > 0 && *w > 0 => [*h as usize, *w as usize],
            Some(values) => {
                return Err(ctx.unsupported_attr(
                    "kernel_shape",
                    format!("only 2-d pooling is supported, got {:?}", values),
                ));
            }
            None => {
                return Err(ctx.unsupported_attr("kernel_shape", "missing"));
            }
        };
        let strides = match node.attr_ints("strides") {
            None => kernel,
            Some([h, w]) if *h > 0 && *w > 0 => [*h as usize, *w as usize],
            Some(values) => {
                return Err(ctx.unsupported_attr(
                    "strides",
                    format!("expected 2 positive values, got {:?}", values),
                ));
            }
        };
        if node.attr_int("ceil_mode", 0) != 0 {
            return Err(ctx.unsupported_attr("ceil_mode", "ceil rounding is not supported"));
        }

        let pads = conv_pads(node)?;
        let mut layers = Vec::new();
        let (padding, data) = if self.max {
            // ONNX MaxPool implicitly pads with -inf, which matches how TF
            // "same" padding ignores the border but not what ZeroPadding2D
            // produces. Keep the zero-padding fallback the way the source
            // tool did, preferring "same" when it is exactly equivalent.
            resolve_padding(ctx, &mut layers, data, kernel, strides, [1, 1], &pads)?
        } else {
            // Average pooling has no padding mode that excludes the padded
            // elements from the divisor, so only unpadded pooling converts.
            match pads {
                Pads::Fixed([0, 0, 0, 0]) => (PaddingMode::Valid, data),
                _ => {
                    return Err(
                        ctx.unsupported_attr("pads", "padded average pooling is not supported")
                    );
                }
            }
        };

        let config = Pool2dConfig {
            pool_size: kernel,
            strides,
            padding,
        };
        let kind = if self.max {
            LayerKind::MaxPool2d(config)
        } else {
            LayerKind::AvgPool2d(config)
        };
        let layer = ctx.layer_for_output(kind, vec![data], 0);
        let output = layer.outputs[0].clone();
        layers.push(layer);

        Ok(Translation {
            layers,
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout: LayoutTag::ChannelLast,
            }],
        })
    }
}

struct GlobalAveragePool;

impl OpTranslator for GlobalAveragePool {
    fn input_layouts(
        &self,
        _node: &Node,
        current: &[LayoutTag],
        _catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        channel_last_data(current)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        // ONNX GlobalAveragePool keeps the spatial dims as size 1.
        let layer =
            ctx.layer_for_output(LayerKind::GlobalAvgPool2d { keepdims: true }, vec![data], 0);
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
