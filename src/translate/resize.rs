use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::{AttributeValue, Dimension, Node};
use crate::layers::{Interpolation, LayerKind};
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Upsample", Box::new(Resize { upsample: true }));
    registry.register("Resize", Box::new(Resize { upsample: false }));
}

struct Resize {
    upsample: bool,
}

impl Resize {
    /// Integer upsampling factors for the spatial axes, from `scales` or the
    /// explicit output `sizes`.
    fn factors(&self, ctx: &TranslateCtx) -> Result<[usize; 2], TranslateError> {
        let scales_input = if self.upsample { 1 } else { 2 };
        let scales = match ctx.node.attr("scales") {
            Some(AttributeValue::Floats(values)) => Some(values.clone()),
            _ => ctx
                .optional_constant(scales_input)
                .ok()
                .flatten()
                .and_then(|tensor| tensor.as_f32().map(|v| v.to_vec())),
        };

        if let Some(scales) = scales {
            if scales.len() != 4 || scales[0] != 1. || scales[1] != 1. {
                return Err(ctx.unsupported_attr("scales", "expected scales [1, 1, sh, sw]"));
            }
            let mut factors = [0usize; 2];
            for axis in 0..2 {
                let scale = scales[axis + 2];
                if scale < 1. || scale.fract() != 0. {
                    return Err(ctx.unsupported_attr(
                        "scales",
                        format!("non-integer upsampling factor {}", scale),
                    ));
                }
                factors[axis] = scale as usize;
            }
            return Ok(factors);
        }

        // Resize with explicit sizes: derive factors from the input extents.
        let sizes = ctx
            .optional_constant(3)
            .ok()
            .flatten()
            .and_then(|tensor| tensor.as_i64().map(|v| v.to_vec()))
            .ok_or_else(|| ctx.dynamic("neither scales nor sizes are compile-time constants"))?;
        if sizes.len() != 4 {
            return Err(ctx.unsupported_attr("sizes", "expected 4 values"));
        }
        let input = ctx.shape(0)?;
        let mut factors = [0usize; 2];
        for axis in 0..2 {
            let in_size = match &input.dims[axis + 2] {
                Dimension::Fixed(size) => *size,
                Dimension::Symbolic(_) => {
                    return Err(ctx.dynamic("input spatial extent is symbolic"));
                }
            };
            let out_size = sizes[axis + 2].max(0) as usize;
            if in_size == 0 || out_size % in_size != 0 {
                return Err(ctx.unsupported_attr(
                    "sizes",
                    format!("{} is not an integer multiple of {}", out_size, in_size),
                ));
            }
            factors[axis] = out_size / in_size;
        }
        Ok(factors)
    }

    fn interpolation(&self, ctx: &TranslateCtx) -> Result<Interpolation, TranslateError> {
        let mode = ctx.node.attr_string("mode", "nearest");
        let coord = ctx
            .node
            .attr_string("coordinate_transformation_mode", "asymmetric");
        match mode.as_str() {
            "nearest" => {
                // Keras nearest upsampling repeats rows/columns, matching
                // asymmetric coordinates with floor rounding.
                let rounding = ctx.node.attr_string("nearest_mode", "floor");
                if self.upsample || (coord == "asymmetric" && rounding == "floor") {
                    Ok(Interpolation::Nearest)
                } else {
                    Err(ctx.unsupported_attr(
                        "coordinate_transformation_mode",
                        format!("\"{}\" with nearest resize", coord),
                    ))
                }
            }
            "linear" => match coord.as_str() {
                "align_corners" | "pytorch_half_pixel" | "half_pixel" | "asymmetric" => {
                    Ok(Interpolation::Bilinear)
                }
                other => Err(ctx.unsupported_attr(
                    "coordinate_transformation_mode",
                    format!("\"{}\" with linear resize", other),
                )),
            },
            other => Err(ctx.unsupported_attr("mode", format!("\"{}\" interpolation", other))),
        }
    }
}

impl OpTranslator for Resize {
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
        let size = self.factors(ctx)?;
        let interpolation = self.interpolation(ctx)?;
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(
            LayerKind::UpSampling2d {
                size,
                interpolation,
            },
            vec![data],
            0,
        );
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
