use std::fmt;

/// Element type of a [`Tensor`] or graph value.
///
/// The converter stores weights as f32 and shape/index data as i64. The ONNX
/// loader widens or narrows other element types into one of these (see
/// [`crate::onnx`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElementType {
    Float32,
    Int64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Float32 => write!(f, "float32"),
            ElementType::Int64 => write!(f, "int64"),
        }
    }
}

/// Owned element data of a [`Tensor`].
#[derive(Clone, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    Int64(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(data) => data.len(),
            TensorData::Int64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::Float32(_) => ElementType::Float32,
            TensorData::Int64(_) => ElementType::Int64,
        }
    }
}

/// Truncate long element lists in debug output.
fn trunc<T: fmt::Display>(items: &[T]) -> String {
    const MAX_LEN: usize = 8;
    let mut out = String::from("[");
    for (i, item) in items.iter().take(MAX_LEN).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&item.to_string());
    }
    if items.len() > MAX_LEN {
        out.push_str(", ...");
    }
    out.push(']');
    out
}

impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorData::Float32(data) => write!(f, "Float32({})", trunc(data)),
            TensorData::Int64(data) => write!(f, "Int64({})", trunc(data)),
        }
    }
}

/// An owned, contiguous n-dimensional array.
///
/// This covers what the converter needs from a tensor type: checked
/// construction, axis permutation and reshaping of weight and constant data.
/// There are no views and no arithmetic. Operations return new tensors; a
/// tensor is never mutated after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor from a shape and elements.
    ///
    /// Panics if the number of elements does not match the product of the
    /// dimensions. Use this only with sizes computed from the data; the ONNX
    /// loader validates sizes before construction.
    pub fn from_data(shape: Vec<usize>, data: TensorData) -> Tensor {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} does not match element count {}",
            shape,
            data.len()
        );
        Tensor { shape, data }
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Tensor {
        Tensor::from_data(shape, TensorData::Float32(data))
    }

    pub fn from_i64(shape: Vec<usize>, data: Vec<i64>) -> Tensor {
        Tensor::from_data(shape, TensorData::Int64(data))
    }

    /// Create a zero-dimensional tensor holding a single value.
    pub fn from_scalar_f32(value: f32) -> Tensor {
        Tensor::from_f32(Vec::new(), vec![value])
    }

    pub fn from_scalar_i64(value: i64) -> Tensor {
        Tensor::from_i64(Vec::new(), vec![value])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Return the elements as an f32 slice, if this is a float tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float32(data) => Some(data),
            _ => None,
        }
    }

    /// Return the elements as an i64 slice, if this is an int tensor.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int64(data) => Some(data),
            _ => None,
        }
    }

    /// Return the single element of a 0-d or 1-element tensor.
    pub fn as_scalar_f32(&self) -> Option<f32> {
        match &self.data {
            TensorData::Float32(data) if data.len() == 1 => Some(data[0]),
            _ => None,
        }
    }

    pub fn as_scalar_i64(&self) -> Option<i64> {
        match &self.data {
            TensorData::Int64(data) if data.len() == 1 => Some(data[0]),
            _ => None,
        }
    }

    /// Row-major strides for `shape`.
    fn strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Return a copy of this tensor with its axes reordered.
    ///
    /// `perm[i]` names the source axis that becomes output axis `i`, as in
    /// `numpy.transpose`. Panics if `perm` is not a permutation of the axes;
    /// callers validate ranks before permuting.
    pub fn permute(&self, perm: &[usize]) -> Tensor {
        assert_eq!(perm.len(), self.ndim(), "permutation rank mismatch");
        let mut seen = vec![false; perm.len()];
        for &axis in perm {
            assert!(axis < perm.len() && !seen[axis], "invalid permutation");
            seen[axis] = true;
        }

        let out_shape: Vec<usize> = perm.iter().map(|&axis| self.shape[axis]).collect();
        let in_strides = Tensor::strides(&self.shape);

        // For each output offset (row-major order), compute the source offset
        // by advancing per-axis counters.
        let map_indices = |len: usize, write: &mut dyn FnMut(usize, usize)| {
            let mut index = vec![0usize; out_shape.len()];
            for out_offset in 0..len {
                let mut in_offset = 0;
                for (axis, &idx) in index.iter().enumerate() {
                    in_offset += idx * in_strides[perm[axis]];
                }
                write(out_offset, in_offset);

                for axis in (0..index.len()).rev() {
                    index[axis] += 1;
                    if index[axis] < out_shape[axis] {
                        break;
                    }
                    index[axis] = 0;
                }
            }
        };

        let data = match &self.data {
            TensorData::Float32(src) => {
                let mut dest = vec![0.; src.len()];
                map_indices(src.len(), &mut |out, inp| dest[out] = src[inp]);
                TensorData::Float32(dest)
            }
            TensorData::Int64(src) => {
                let mut dest = vec![0; src.len()];
                map_indices(src.len(), &mut |out, inp| dest[out] = src[inp]);
                TensorData::Int64(dest)
            }
        };

        Tensor {
            shape: out_shape,
            data,
        }
    }

    /// Return a copy of this tensor with a new shape of the same length.
    pub fn reshape(&self, shape: Vec<usize>) -> Option<Tensor> {
        if shape.iter().product::<usize>() != self.len() {
            return None;
        }
        Some(Tensor {
            shape,
            data: self.data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use keras_import_testing::TestCases;

    use super::{Tensor, TensorData};

    #[test]
    fn test_permute() {
        #[derive(Debug)]
        struct Case {
            shape: Vec<usize>,
            perm: Vec<usize>,
            expected_shape: Vec<usize>,
        }

        let cases = [
            Case {
                shape: vec![2, 3],
                perm: vec![1, 0],
                expected_shape: vec![3, 2],
            },
            Case {
                shape: vec![8, 3, 3, 3],
                perm: vec![2, 3, 1, 0],
                expected_shape: vec![3, 3, 3, 8],
            },
            Case {
                shape: vec![2, 1, 4],
                perm: vec![0, 1, 2],
                expected_shape: vec![2, 1, 4],
            },
        ];

        cases.test_each(|case| {
            let len = case.shape.iter().product();
            let data: Vec<f32> = (0..len).map(|x| x as f32).collect();
            let tensor = Tensor::from_f32(case.shape.clone(), data);
            let permuted = tensor.permute(&case.perm);
            assert_eq!(permuted.shape(), case.expected_shape.as_slice());
            assert_eq!(permuted.len(), tensor.len());
        });
    }

    #[test]
    fn test_permute_transpose_2d() {
        let tensor = Tensor::from_f32(vec![2, 3], vec![1., 2., 3., 4., 5., 6.]);
        let transposed = tensor.permute(&[1, 0]);
        assert_eq!(transposed.as_f32().unwrap(), &[1., 4., 2., 5., 3., 6.]);
    }

    #[test]
    fn test_permute_round_trip() {
        let len = 2 * 3 * 4 * 5;
        let tensor = Tensor::from_f32(
            vec![2, 3, 4, 5],
            (0..len).map(|x| x as f32 * 0.5).collect(),
        );
        // Forward permutation followed by its inverse reproduces the input.
        let perm = [2, 3, 1, 0];
        let mut inverse = [0; 4];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i;
        }
        let round_trip = tensor.permute(&perm).permute(&inverse);
        assert_eq!(round_trip, tensor);
    }

    #[test]
    fn test_reshape() {
        let tensor = Tensor::from_i64(vec![2, 3], vec![0, 1, 2, 3, 4, 5]);
        let reshaped = tensor.reshape(vec![3, 2]).unwrap();
        assert_eq!(reshaped.shape(), &[3, 2]);
        assert_eq!(reshaped.as_i64().unwrap(), tensor.as_i64().unwrap());
        assert!(tensor.reshape(vec![4, 2]).is_none());
    }

    #[test]
    fn test_debug_truncates_data() {
        let data = TensorData::Float32((0..100).map(|x| x as f32).collect());
        let debug = format!("{:?}", data);
        assert!(debug.len() < 80);
        assert!(debug.contains("..."));
    }
}
