use crate::infer_shapes::{LayoutTag, ShapeCatalog};
use crate::ir::Node;
use crate::layers::{BatchNormConfig, LayerKind};
use crate::translate::{
    OpTranslator, OutputValue, Registry, TranslateCtx, TranslateError, Translation,
};
use crate::weights::{self, WeightRole};

pub(super) fn register(registry: &mut Registry) {
    registry.register("BatchNormalization", Box::new(BatchNormalization));
}

struct BatchNormalization;

impl OpTranslator for BatchNormalization {
    fn input_layouts(
        &self,
        node: &Node,
        current: &[LayoutTag],
        catalog: &ShapeCatalog,
    ) -> Vec<LayoutTag> {
        // The layer normalizes over the last axis, so image batches must be
        // channel-last. Lower-rank inputs already have channels last.
        let mut required = current.to_vec();
        let rank = node
            .inputs
            .first()
            .and_then(|name| catalog.shape(name))
            .map(|info| info.rank())
            .unwrap_or(0);
        if rank >= 3 {
            if let Some(data) = required.first_mut() {
                *data = LayoutTag::ChannelLast;
            }
        }
        required
    }

    fn translate(&self, ctx: &mut TranslateCtx) -> Result<Translation, TranslateError> {
        if ctx.node.outputs.len() > 1 {
            return Err(ctx.invalid_input(
                "training-mode outputs (mean/variance) are not supported",
            ));
        }
        let (data, layout) = ctx.wired(0)?;
        let data = data.to_string();

        // Keras weight order: gamma, beta, moving mean, moving variance.
        let mut layer_weights = Vec::with_capacity(4);
        for index in 1..=4 {
            let param = ctx.constant(index)?;
            layer_weights.push(
                weights::permute(param, WeightRole::BatchNormParam)
                    .map_err(|e| ctx.weight_error(e))?,
            );
        }

        let config = BatchNormConfig {
            axis: -1,
            epsilon: ctx.node.attr_float("epsilon", 1e-5),
            momentum: ctx.node.attr_float("momentum", 0.9),
        };
        let layer = ctx
            .layer_for_output(LayerKind::BatchNorm(config), vec![data], 0)
            .with_weights(layer_weights);
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
