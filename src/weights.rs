use std::error::Error;
use std::fmt;

use crate::tensor::Tensor;

/// Declared axis role of a weight tensor.
///
/// The role determines how [`permute`] rearranges axes from the ONNX
/// convention to the order the corresponding Keras layer stores its weights
/// in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WeightRole {
    /// Convolution kernel, ONNX (out_channels, in_channels, *spatial).
    ///
    /// Also used for transposed convolution: its ONNX layout
    /// (in_channels, out_channels, kH, kW) maps onto the Keras
    /// (kH, kW, out_channels, in_channels) order under the same permutation.
    ConvKernel,

    /// Depthwise convolution kernel, ONNX (channels * multiplier, 1, kH, kW).
    DepthwiseConvKernel,

    /// Fully-connected weight matrix. ONNX `Gemm` with `transB=1` stores
    /// (out_features, in_features); Keras `Dense` stores the transpose.
    DenseMatrix,

    /// Bias vector, unchanged.
    Bias,

    /// Batch-normalization parameter vector (gamma/beta/mean/variance),
    /// unchanged.
    BatchNormParam,

    /// No transformation.
    None,
}

impl fmt::Display for WeightRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightRole::ConvKernel => "conv kernel",
            WeightRole::DepthwiseConvKernel => "depthwise conv kernel",
            WeightRole::DenseMatrix => "dense matrix",
            WeightRole::Bias => "bias",
            WeightRole::BatchNormParam => "batch-norm parameter",
            WeightRole::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// A weight tensor's shape does not match its declared role.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WeightShapeError {
    pub role: WeightRole,
    pub shape: Vec<usize>,
}

impl fmt::Display for WeightShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tensor of shape {:?} cannot be used as a {} weight",
            self.shape, self.role
        )
    }
}

impl Error for WeightShapeError {}

/// Rearrange a weight tensor's axes for its role.
///
/// This is a pure, shape-checked permutation: the same input always produces
/// the same output, and the original tensor is left untouched.
///
/// - `ConvKernel`: (O, I, *spatial) -> (*spatial, I, O)
/// - `DepthwiseConvKernel`: (C, 1, kH, kW) -> (kH, kW, C, 1)
/// - `DenseMatrix`: (rows, cols) -> (cols, rows)
/// - `Bias` / `BatchNormParam` / `None`: unchanged
pub fn permute(tensor: &Tensor, role: WeightRole) -> Result<Tensor, WeightShapeError> {
    let rank = tensor.ndim();
    let shape_error = || WeightShapeError {
        role,
        shape: tensor.shape().to_vec(),
    };

    match role {
        WeightRole::ConvKernel => {
            // Spatial axes first, then in-channels, then out-channels. Rank 3
            // is a 1-d convolution, rank 4 a 2-d one.
            if rank < 3 {
                return Err(shape_error());
            }
            let mut perm: Vec<usize> = (2..rank).collect();
            perm.push(1);
            perm.push(0);
            Ok(tensor.permute(&perm))
        }
        WeightRole::DepthwiseConvKernel => {
            if rank != 4 || tensor.shape()[1] != 1 {
                return Err(shape_error());
            }
            Ok(tensor.permute(&[2, 3, 0, 1]))
        }
        WeightRole::DenseMatrix => {
            if rank != 2 {
                return Err(shape_error());
            }
            Ok(tensor.permute(&[1, 0]))
        }
        WeightRole::Bias | WeightRole::BatchNormParam => {
            if rank != 1 {
                return Err(shape_error());
            }
            Ok(tensor.clone())
        }
        WeightRole::None => Ok(tensor.clone()),
    }
}

#[cfg(test)]
mod tests {
    use keras_import_testing::TestCases;

    use super::{permute, WeightRole, WeightShapeError};
    use crate::tensor::Tensor;

    fn counting_tensor(shape: &[usize]) -> Tensor {
        let len = shape.iter().product();
        Tensor::from_f32(shape.to_vec(), (0..len).map(|x| x as f32).collect())
    }

    #[test]
    fn test_permute_shapes() {
        #[derive(Debug)]
        struct Case {
            role: WeightRole,
            shape: Vec<usize>,
            expected: Vec<usize>,
        }

        let cases = [
            Case {
                role: WeightRole::ConvKernel,
                shape: vec![8, 3, 3, 3],
                expected: vec![3, 3, 3, 8],
            },
            Case {
                role: WeightRole::ConvKernel,
                shape: vec![16, 4, 5],
                expected: vec![5, 4, 16],
            },
            Case {
                role: WeightRole::DepthwiseConvKernel,
                shape: vec![32, 1, 3, 3],
                expected: vec![3, 3, 32, 1],
            },
            Case {
                role: WeightRole::DenseMatrix,
                shape: vec![10, 8],
                expected: vec![8, 10],
            },
            Case {
                role: WeightRole::Bias,
                shape: vec![10],
                expected: vec![10],
            },
            Case {
                role: WeightRole::BatchNormParam,
                shape: vec![32],
                expected: vec![32],
            },
            Case {
                role: WeightRole::None,
                shape: vec![2, 2, 2],
                expected: vec![2, 2, 2],
            },
        ];

        cases.test_each(|case| {
            let tensor = counting_tensor(&case.shape);
            let permuted = permute(&tensor, case.role).unwrap();
            assert_eq!(permuted.shape(), case.expected.as_slice());
        });
    }

    #[test]
    fn test_conv_kernel_round_trip() {
        // (O, I, kH, kW) -> (kH, kW, I, O), then the inverse permutation
        // reproduces the original exactly.
        let kernel = counting_tensor(&[8, 3, 3, 3]);
        let permuted = permute(&kernel, WeightRole::ConvKernel).unwrap();
        assert_eq!(permuted.shape(), &[3, 3, 3, 8]);
        let restored = permuted.permute(&[3, 2, 0, 1]);
        assert_eq!(restored, kernel);
    }

    #[test]
    fn test_rank_mismatch() {
        #[derive(Debug)]
        struct Case {
            role: WeightRole,
            shape: Vec<usize>,
        }

        let cases = [
            Case {
                role: WeightRole::ConvKernel,
                shape: vec![8, 3],
            },
            Case {
                role: WeightRole::DepthwiseConvKernel,
                shape: vec![32, 2, 3, 3],
            },
            Case {
                role: WeightRole::DenseMatrix,
                shape: vec![10, 8, 1],
            },
            Case {
                role: WeightRole::Bias,
                shape: vec![10, 1],
            },
        ];

        cases.test_each(|case| {
            let tensor = counting_tensor(&case.shape);
            let err = permute(&tensor, case.role).err().unwrap();
            assert_eq!(
                err,
                WeightShapeError {
                    role: case.role,
                    shape: case.shape.clone(),
                }
            );
        });
    }

    #[test]
    fn test_permute_is_deterministic() {
        let kernel = counting_tensor(&[4, 2, 3, 3]);
        let first = permute(&kernel, WeightRole::ConvKernel).unwrap();
        let second = permute(&kernel, WeightRole::ConvKernel).unwrap();
        assert_eq!(first, second);
    }
}
