use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{DenseConfig, LayerKind};
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};
use crate::weights::{self, WeightRole};

pub(super) fn register(registry: &mut Registry) {
    registry.register("Gemm", Box::new(Gemm));
    registry.register("MatMul", Box::new(MatMul));
}

struct Gemm;

impl OpTranslator for Gemm {
    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let node = ctx.node;
        let alpha = node.attr_float("alpha", 1.);
        let beta = node.attr_float("beta", 1.);
        if alpha != 1. {
            return Err(ctx.unsupported_attr("alpha", format!("expected 1.0, got {}", alpha)));
        }
        if beta != 1. {
            return Err(ctx.unsupported_attr("beta", format!("expected 1.0, got {}", beta)));
        }
        if node.attr_int("transA", 0) != 0 {
            return Err(ctx.unsupported_attr("transA", "transposed activations"));
        }

        let (data, _) = ctx.wired(0)?;
        let data = data.to_string();
        let weight = ctx.constant(1)?;
        let bias = ctx.optional_constant(2)?;

        // transB=1 stores the weight as (units, in), which Dense wants
        // transposed; transB=0 is already in Dense's (in, units) order.
        let role = if node.attr_int("transB", 0) != 0 {
            WeightRole::DenseMatrix
        } else {
            WeightRole::None
        };
        if weight.ndim() != 2 {
            return Err(ctx.weight_error(weights::WeightShapeError {
                role: WeightRole::DenseMatrix,
                shape: weight.shape().to_vec(),
            }));
        }
        let kernel = weights::permute(weight, role).map_err(|e| ctx.weight_error(e))?;
        let units = kernel.shape()[1];

        let mut layer_weights = vec![kernel];
        if let Some(bias) = bias {
            let bias = match bias.ndim() {
                1 => bias.clone(),
                2 if bias.shape()[0] == 1 => bias
                    .reshape(vec![bias.shape()[1]])
                    .ok_or_else(|| ctx.invalid_input("bias tensor is empty"))?,
                _ => {
                    return Err(ctx.weight_error(weights::WeightShapeError {
                        role: WeightRole::Bias,
                        shape: bias.shape().to_vec(),
                    }));
                }
            };
            if bias.len() != units {
                return Err(ctx.weight_error(weights::WeightShapeError {
                    role: WeightRole::Bias,
                    shape: bias.shape().to_vec(),
                }));
            }
            layer_weights.push(bias);
        }

        let layer = ctx
            .layer_for_output(
                LayerKind::Dense(DenseConfig {
                    units,
                    use_bias: layer_weights.len() == 2,
                }),
                vec![data],
                0,
            )
            .with_weights(layer_weights);
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

struct MatMul;

impl OpTranslator for MatMul {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        // The multiply happens over the trailing axes of the source shape,
        // so higher-rank activations must be in the source convention.
        current
            .iter()
            .enumerate()
            .map(|(index, &layout)| {
                let rank = node
                    .inputs
                    .get(index)
                    .and_then(|name| catalog.shape(name))
                    .map(|info| info.rank())
                    .unwrap_or(0);
                if rank >= 3 {
                    LayoutTag::ChannelFirst
                } else {
                    layout
                }
            })
            .collect()
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();
        // Only a constant right operand converts, as a bias-free Dense
        // applied over the last axis.
        let weight = match ctx.constant(1) {
            Ok(weight) => weight,
            Err(_) => {
                return Err(ctx.invalid_input(
                    "matrix multiply with a non-constant right operand is not supported",
                ));
            }
        };
        if weight.ndim() != 2 {
            return Err(ctx.weight_error(weights::WeightShapeError {
                role: WeightRole::DenseMatrix,
                shape: weight.shape().to_vec(),
            }));
        }

        let units = weight.shape()[1];
        let layer = ctx
            .layer_for_output(
                LayerKind::Dense(DenseConfig {
                    units,
                    use_bias: false,
                }),
                vec![data],
                0,
            )
            .with_weights(vec![weight.clone()]);
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
