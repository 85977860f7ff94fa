use crate::infer_shapes::{conv_pads, LayoutTag, Pads, ShapeCatalog};
use crate::ir::{Dimension, Node};
use crate::layers::{
    Conv2dConfig, Conv2dTransposeConfig, DepthwiseConv2dConfig, Layer, LayerKind, PaddingMode,
};
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};
use crate::weights::{self, WeightRole};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Conv", Box::new(Conv));
    registry.register("ConvTranspose", Box::new(ConvTranspose));
}

/// Whether explicit `[begin, end]` padding on one axis equals what TF "same"
/// padding would produce.
///
/// TF pads a total of `max((ceil(in/s) - 1)*s + (k-1)*d + 1 - in, 0)`, with
/// the extra element (if odd) at the end. When the input extent is unknown,
/// only the stride-1 case can be decided, where the total is independent of
/// the input.
pub(super) fn same_equivalent(
    in_size: &Dimension,
    kernel: usize,
    stride: usize,
    dilation: usize,
    begin: usize,
    end: usize,
) -> bool {
    match in_size {
        Dimension::Fixed(n) => {
            let out = n.div_ceil(stride);
            let needed = ((out - 1) * stride + (kernel - 1) * dilation + 1).saturating_sub(*n);
            begin == needed / 2 && end == needed - needed / 2
        }
        Dimension::Symbolic(_) => stride == 1 && begin == end && begin * 2 == (kernel - 1) * dilation,
    }
}

/// Read the shared Conv/ConvTranspose attributes.
struct ConvAttrs {
    kernel: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
    group: usize,
    pads: Pads,
}

fn conv_attrs(ctx: &TranslateCtx) -> Result<ConvAttrs, TranslateError> {
    let node = ctx.node;
    let pair = |name: &str, default: [usize; 2]| -> Result<[usize; 2], TranslateError> {
        match node.attr_ints(name) {
            None => Ok(default),
            Some([a, b]) if *a > 0 && *b > 0 => Ok([*a as usize, *b as usize]),
            Some(values) => Err(ctx.unsupported_attr(
                name,
                format!("expected 2 positive values, got {:?}", values),
            )),
        }
    };
    let weight_shape = ctx.shape(1)?;
    let kernel = match node.attr_ints("kernel_shape") {
        Some([h, w]) => [*h as usize, *w as usize],
        Some(values) => {
            return Err(ctx.unsupported_attr(
                "kernel_shape",
                format!("only 2-d convolutions are supported, got {:?}", values),
            ));
        }
        None => {
            let dims = weight_shape
                .fixed_dims()
                .ok_or_else(|| ctx.invalid_input("weight tensor has symbolic shape"))?;
            [dims[2], dims[3]]
        }
    };
    Ok(ConvAttrs {
        kernel,
        strides: pair("strides", [1, 1])?,
        dilations: pair("dilations", [1, 1])?,
        group: node.attr_int("group", 1).max(1) as usize,
        pads: conv_pads(node)?,
    })
}

/// Resolve the ONNX padding of a spatial operator into a Keras padding mode,
/// inserting an explicit `ZeroPadding2D` layer when neither "valid" nor
/// "same" expresses it.
///
/// Returns the padding mode and the (possibly re-wired) data tensor.
pub(super) fn resolve_padding(
    ctx: &mut TranslateCtx,
    layers: &mut Vec<Layer>,
    data: String,
    kernel: [usize; 2],
    strides: [usize; 2],
    dilations: [usize; 2],
    pads: &Pads,
) -> Result<(PaddingMode, String), TranslateError> {
    let fixed = match pads {
        Pads::Same => return Ok((PaddingMode::Same, data)),
        Pads::Fixed(fixed) => *fixed,
    };
    if fixed == [0, 0, 0, 0] {
        return Ok((PaddingMode::Valid, data));
    }

    let input = ctx.shape(0)?;
    let matches_same = (0..2).all(|axis| {
        same_equivalent(
            &input.dims[axis + 2],
            kernel[axis],
            strides[axis],
            dilations[axis],
            fixed[axis],
            fixed[axis + 2],
        )
    });
    if matches_same {
        return Ok((PaddingMode::Same, data));
    }

    // ((top, bottom), (left, right))
    let padding = [[fixed[0], fixed[2]], [fixed[1], fixed[3]]];
    let (layer, tensor) =
        ctx.intermediate_layer(LayerKind::ZeroPadding2d { padding }, vec![data]);
    layers.push(layer);
    Ok((PaddingMode::Valid, tensor))
}

struct Conv;

impl OpTranslator for Conv {
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
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let weight = ctx.constant(1)?;
        let bias = ctx.optional_constant(2)?;
        let attrs = conv_attrs(ctx)?;

        if weight.ndim() != 4 {
            return Err(ctx.weight_error(weights::WeightShapeError {
                role: WeightRole::ConvKernel,
                shape: weight.shape().to_vec(),
            }));
        }
        if [weight.shape()[2], weight.shape()[3]] != attrs.kernel {
            return Err(ctx.unsupported_attr(
                "kernel_shape",
                format!(
                    "kernel_shape {:?} does not match weight tensor {:?}",
                    attrs.kernel,
                    weight.shape()
                ),
            ));
        }

        let in_channels = match &ctx.shape(0)?.dims[1] {
            Dimension::Fixed(size) => *size,
            Dimension::Symbolic(_) => {
                return Err(ctx.invalid_input("input channel count is not static"));
            }
        };
        let out_channels = weight.shape()[0];

        let mut layers = Vec::new();
        let (padding, data) = resolve_padding(
            ctx,
            &mut layers,
            data,
            attrs.kernel,
            attrs.strides,
            attrs.dilations,
            &attrs.pads,
        )?;

        // Depthwise convolution is its own layer kind in Keras; grouped
        // convolution maps onto Conv2D's `groups` option.
        let depthwise = attrs.group > 1 && attrs.group == in_channels && weight.shape()[1] == 1;
        let (kind, kernel_role) = if depthwise {
            (
                LayerKind::DepthwiseConv2d(DepthwiseConv2dConfig {
                    kernel_size: attrs.kernel,
                    strides: attrs.strides,
                    dilation_rate: attrs.dilations,
                    padding,
                    use_bias: bias.is_some(),
                }),
                WeightRole::DepthwiseConvKernel,
            )
        } else {
            if out_channels % attrs.group != 0 || in_channels % attrs.group != 0 {
                return Err(ctx.unsupported_attr(
                    "group",
                    format!(
                        "{} groups do not divide {} input / {} output channels",
                        attrs.group, in_channels, out_channels
                    ),
                ));
            }
            (
                LayerKind::Conv2d(Conv2dConfig {
                    filters: out_channels,
                    kernel_size: attrs.kernel,
                    strides: attrs.strides,
                    dilation_rate: attrs.dilations,
                    padding,
                    groups: attrs.group,
                    use_bias: bias.is_some(),
                }),
                WeightRole::ConvKernel,
            )
        };

        let mut layer_weights =
            vec![weights::permute(weight, kernel_role).map_err(|e| ctx.weight_error(e))?];
        if let Some(bias) = bias {
            layer_weights
                .push(weights::permute(bias, WeightRole::Bias).map_err(|e| ctx.weight_error(e))?);
        }

        let layer = ctx
            .layer_for_output(kind, vec![data], 0)
            .with_weights(layer_weights);
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

struct ConvTranspose;

impl OpTranslator for ConvTranspose {
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
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let weight = ctx.constant(1)?;
        let bias = ctx.optional_constant(2)?;
        let attrs = conv_attrs(ctx)?;

        if attrs.group != 1 {
            return Err(ctx.unsupported_attr(
                "group",
                "grouped transposed convolution is not supported",
            ));
        }
        if weight.ndim() != 4 {
            return Err(ctx.weight_error(weights::WeightShapeError {
                role: WeightRole::ConvKernel,
                shape: weight.shape().to_vec(),
            }));
        }

        let fixed = match attrs.pads {
            Pads::Fixed(fixed) => fixed,
            Pads::Same => {
                return Err(ctx.unsupported_attr(
                    "auto_pad",
                    "same auto-padding is not supported for transposed convolution",
                ));
            }
        };

        // Keras only expresses zero padding ("valid") or padding that makes
        // the output exactly stride * input ("same").
        let padding = if fixed == [0, 0, 0, 0] {
            PaddingMode::Valid
        } else {
            let input = ctx.shape(0)?;
            let output = ctx.output_shape(0)?;
            let upsamples_exactly = (0..2).all(|axis| {
                match (&input.dims[axis + 2], &output.dims[axis + 2]) {
                    (Dimension::Fixed(in_size), Dimension::Fixed(out_size)) => {
                        *out_size == in_size * attrs.strides[axis]
                    }
                    _ => false,
                }
            });
            if !upsamples_exactly {
                return Err(ctx.unsupported_attr(
                    "pads",
                    "padding is neither zero nor stride-preserving",
                ));
            }
            PaddingMode::Same
        };

        let output_padding = node_output_padding(ctx.node);
        // ONNX ConvTranspose weights are (in, out, kH, kW); the conv-kernel
        // permutation yields the Keras (kH, kW, out, in) order.
        let kernel = weights::permute(weight, WeightRole::ConvKernel)
            .map_err(|e| ctx.weight_error(e))?;
        let filters = kernel.shape()[2];

        let mut layer_weights = vec![kernel];
        if let Some(bias) = bias {
            layer_weights
                .push(weights::permute(bias, WeightRole::Bias).map_err(|e| ctx.weight_error(e))?);
        }

        let kind = LayerKind::Conv2dTranspose(Conv2dTransposeConfig {
            filters,
            kernel_size: attrs.kernel,
            strides: attrs.strides,
            dilation_rate: attrs.dilations,
            padding,
            output_padding,
            use_bias: bias.is_some(),
        });
        let layer = ctx
            .layer_for_output(kind, vec![data], 0)
            .with_weights(layer_weights);
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

fn node_output_padding(node: &Node) -> Option<[usize; 2]> {
    let padding = node.attr_ints("output_padding")?;
    let padding = [
        padding.first().copied().unwrap_or(0).max(0) as usize,
        padding.get(1).copied().unwrap_or(0).max(0) as usize,
    ];
    (padding != [0, 0]).then_some(padding)
}
