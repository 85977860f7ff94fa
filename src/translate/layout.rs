use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::{Dimension, Node};
use crate::layers::LayerKind;
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Reshape", Box::new(Reshape));
    registry.register("Flatten", Box::new(Flatten));
    registry.register("Transpose", Box::new(Transpose));
    registry.register("Squeeze", Box::new(SqueezeLike));
    registry.register("Unsqueeze", Box::new(SqueezeLike));
    registry.register("Expand", Box::new(Expand));
}

/// Require the source convention for the data input when it has a channel
/// axis. Axis-reordering ops work on source-order axes.
fn source_order_data(node: &Node, current: &[LayoutTag], catalog: &ShapeCatalog) -> Vec<LayoutTag> {
    let mut required = current.to_vec();
    let rank = node
        .inputs
        .first()
        .and_then(|name| catalog.shape(name))
        .map(|info| info.rank())
        .unwrap_or(0);
    if rank >= 3 {
        if let Some(data) = required.first_mut() {
            *data = LayoutTag::ChannelFirst;
        }
    }
    required
}

/// The layout a freshly reshaped value has in the source convention.
fn reshaped_layout(rank: usize) -> LayoutTag {
    if rank >= 3 {
        LayoutTag::ChannelFirst
    } else {
        LayoutTag::Agnostic
    }
}

/// Build a Keras `Reshape` layer from the inferred output dims. The batch
/// dimension is carried implicitly and must be unchanged.
fn reshape_to_output(ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
    let input = ctx.shape(0)?;
    let output = ctx.output_shape(0)?;

    match (input.dims.first(), output.dims.first()) {
        (Some(a), Some(b)) if a == b => {}
        (Some(Dimension::Symbolic(_)), Some(Dimension::Symbolic(_))) => {}
        _ => {
            return Err(ctx.invalid_input(format!(
                "reshape across the batch dimension ({:?} -> {:?}) is not supported",
                input.dims.first(),
                output.dims.first()
            )));
        }
    }

    let target_shape: Vec<usize> = output.dims[1..]
        .iter()
        .map(|dim| {
            dim.as_fixed()
                .ok_or_else(|| ctx.dynamic("non-batch output dimension is symbolic"))
        })
        .collect::<Result<_, _>>()?;

    let (data, _) = ctx.wired(0)?;
    let data = data.to_string();
    let layer = ctx.layer_for_output(LayerKind::Reshape { target_shape }, vec![data], 0);
    let out_name = layer.outputs[0].clone();
    Ok(Translation {
        layers: vec![layer],
        outputs: vec![OutputValue::Tensor {
            name: out_name,
            layout: reshaped_layout(output.rank()),
        }],
    })
}

struct Reshape;

impl OpTranslator for Reshape {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        source_order_data(node, current, catalog)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        reshape_to_output(ctx)
    }
}

/// `Squeeze` and `Unsqueeze` only add or remove unit axes, so both reduce to
/// a reshape onto the inferred output shape.
struct SqueezeLike;

impl OpTranslator for SqueezeLike {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        source_order_data(node, current, catalog)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        reshape_to_output(ctx)
    }
}

struct Flatten;

impl OpTranslator for Flatten {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        // Flattening a (N, 1, 1, C) channel-last value yields the same
        // vector as the (N, C, 1, 1) original, so no conversion is needed;
        // anything with real spatial extent must flatten in source order.
        let trivial_spatial = node
            .inputs
            .first()
            .and_then(|name| catalog.shape(name))
            .map(|info| {
                info.rank() == 4
                    && info.dims[2].as_fixed() == Some(1)
                    && info.dims[3].as_fixed() == Some(1)
            })
            .unwrap_or(false);
        if trivial_spatial {
            current.to_vec()
        } else {
            source_order_data(node, current, catalog)
        }
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let axis = ctx.node.attr_int("axis", 1);
        if axis != 1 {
            return Err(ctx.unsupported_attr("axis", format!("expected 1, got {}", axis)));
        }
        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Flatten, vec![data], 0);
        let output = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output,
                layout: LayoutTag::Agnostic,
            }],
        })
    }
}

struct Transpose;

impl OpTranslator for Transpose {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        source_order_data(node, current, catalog)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let rank = input.rank();
        let perm: Vec<usize> = match ctx.node.attr_ints("perm") {
            Some(perm) => perm
                .iter()
                .map(|&axis| {
                    let axis = if axis < 0 { axis + rank as i64 } else { axis };
                    if axis < 0 || axis >= rank as i64 {
                        Err(ctx.unsupported_attr("perm", format!("axis {} out of range", axis)))
                    } else {
                        Ok(axis as usize)
                    }
                })
                .collect::<Result<_, _>>()?,
            None => (0..rank).rev().collect(),
        };
        if perm.first() != Some(&0) {
            return Err(ctx.unsupported_attr("perm", "permuting the batch axis is not supported"));
        }

        // Identity permutations forward the value untouched.
        if perm.iter().enumerate().all(|(i, &axis)| i == axis) {
            let (data, layout) = ctx.wired(0)?;
            return Ok(Translation {
                layers: Vec::new(),
                outputs: vec![OutputValue::Tensor {
                    name: data.to_string(),
                    layout,
                }],
            });
        }

        // The data is in source order here, so the ONNX permutation applies
        // directly; Keras `Permute` takes 1-based axes without the batch.
        let dims: Vec<usize> = perm[1..].iter().map(|&axis| axis).collect();
        let layout = if perm == [0, 2, 3, 1] {
            LayoutTag::ChannelLast
        } else {
            LayoutTag::Agnostic
        };

        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Permute { dims }, vec![data], 0);
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

struct Expand;

impl OpTranslator for Expand {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        source_order_data(node, current, catalog)
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let input = ctx.shape(0)?;
        let output = ctx.output_shape(0)?;
        if input.rank() != output.rank() {
            return Err(ctx.unsupported_attr(
                "shape",
                "broadcasts that add dimensions are not supported",
            ));
        }

        // Tile by the per-axis ratio between output and input extents.
        let mut repeats = Vec::with_capacity(input.rank());
        for (in_dim, out_dim) in input.dims.iter().zip(&output.dims) {
            let repeat = match (in_dim, out_dim) {
                (a, b) if a == b => 1,
                (Dimension::Fixed(a), Dimension::Fixed(b)) if *a >= 1 && b % a == 0 => b / a,
                _ => {
                    return Err(ctx.unsupported_attr(
                        "shape",
                        format!("cannot tile {} into {}", in_dim, out_dim),
                    ));
                }
            };
            repeats.push(repeat);
        }

        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        let layer = ctx.layer_for_output(LayerKind::Tile { repeats }, vec![data], 0);
        let output_name = layer.outputs[0].clone();
        Ok(Translation {
            layers: vec![layer],
            outputs: vec![OutputValue::Tensor {
                name: output_name,
                layout,
            }],
        })
    }
}
