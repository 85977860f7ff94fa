//! ONNX model loading.
//!
//! [`load`] decodes a serialized `ModelProto` and builds the validated
//! [`Graph`] IR the converter runs on. Weight payloads are accepted from
//! both the typed repeated fields and little-endian `raw_data`; element
//! types outside the converter's f32/i64 storage are widened or narrowed
//! (f16/f64 to f32, int32/bool to i64).

use std::error::Error;
use std::fmt;
use std::path::Path;

use prost::Message;

use crate::ir::{
    AttributeValue, Attributes, Dimension, Graph, MalformedGraphError, Node, ValueInfo,
};
use crate::tensor::{ElementType, Tensor, TensorData};

pub mod proto;

use proto::{AttributeType, DataType};

/// Highest ONNX IR version this crate recognizes.
const MAX_IR_VERSION: i64 = 11;

/// Why a model file could not be loaded.
#[derive(Debug)]
pub enum LoadError {
    ReadFailed(std::io::Error),
    ParseFailed(prost::DecodeError),
    Malformed(MalformedGraphError),

    /// A tensor uses an element type the converter has no storage for.
    UnsupportedDataType { name: String, data_type: i32 },

    /// A tensor's payload is inconsistent with its declared shape, or uses
    /// an unsupported storage scheme.
    InvalidTensor { name: String, detail: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::ReadFailed(e) => write!(f, "read error: {}", e),
            LoadError::ParseFailed(e) => write!(f, "parse error: {}", e),
            LoadError::Malformed(e) => write!(f, "malformed graph: {}", e),
            LoadError::UnsupportedDataType { name, data_type } => {
                write!(
                    f,
                    "tensor \"{}\" has unsupported data type {}",
                    name, data_type
                )
            }
            LoadError::InvalidTensor { name, detail } => {
                write!(f, "tensor \"{}\": {}", name, detail)
            }
        }
    }
}

impl Error for LoadError {}

impl From<MalformedGraphError> for LoadError {
    fn from(e: MalformedGraphError) -> LoadError {
        LoadError::Malformed(e)
    }
}

/// Load a model from a file.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Graph, LoadError> {
    log::info!("loading ONNX model {}", path.as_ref().display());
    let data = std::fs::read(path).map_err(LoadError::ReadFailed)?;
    load(&data)
}

/// Load a model from an in-memory buffer.
pub fn load(data: &[u8]) -> Result<Graph, LoadError> {
    let model = proto::ModelProto::decode(data).map_err(LoadError::ParseFailed)?;
    if model.ir_version < 1 || model.ir_version > MAX_IR_VERSION {
        return Err(MalformedGraphError::UnsupportedVersion {
            ir_version: model.ir_version,
        }
        .into());
    }
    let graph_proto = model.graph.ok_or(MalformedGraphError::MissingGraph)?;
    log::debug!(
        "model: producer \"{}\" {}, {} nodes, {} initializers",
        model.producer_name,
        model.producer_version,
        graph_proto.node.len(),
        graph_proto.initializer.len()
    );

    let mut initializers = rustc_hash::FxHashMap::default();
    for tensor in &graph_proto.initializer {
        initializers.insert(tensor.name.clone(), tensor_from_proto(tensor)?);
    }

    // Inputs shadowed by an initializer are weights, not real inputs.
    let mut inputs = Vec::new();
    for info in &graph_proto.input {
        if initializers.contains_key(&info.name) {
            continue;
        }
        inputs.push(value_info(info)?);
    }

    let outputs = graph_proto
        .output
        .iter()
        .map(|info| info.name.clone())
        .collect();

    let mut nodes = Vec::with_capacity(graph_proto.node.len());
    for (index, node) in graph_proto.node.iter().enumerate() {
        nodes.push(node_from_proto(node, index)?);
    }

    let graph = Graph {
        nodes,
        initializers,
        inputs,
        outputs,
    };
    graph.validate()?;
    Ok(graph)
}

fn element_type(name: &str, data_type: i32) -> Result<ElementType, LoadError> {
    match DataType(data_type) {
        DataType::FLOAT | DataType::FLOAT16 | DataType::DOUBLE => Ok(ElementType::Float32),
        DataType::INT64 | DataType::INT32 | DataType::BOOL | DataType::INT8 | DataType::UINT8 => {
            Ok(ElementType::Int64)
        }
        _ => Err(LoadError::UnsupportedDataType {
            name: name.to_string(),
            data_type,
        }),
    }
}

fn value_info(info: &proto::ValueInfoProto) -> Result<ValueInfo, LoadError> {
    let tensor_type = info
        .r#type
        .as_ref()
        .and_then(|t| t.tensor_type.as_ref())
        .ok_or_else(|| LoadError::InvalidTensor {
            name: info.name.clone(),
            detail: "graph input is not a tensor".to_string(),
        })?;
    let dtype = element_type(&info.name, tensor_type.elem_type)?;
    let dims = tensor_type
        .shape
        .as_ref()
        .map(|shape| {
            shape
                .dim
                .iter()
                .enumerate()
                .map(|(index, dim)| match &dim.value {
                    Some(proto::tensor_dimension_proto::Value::DimValue(size)) if *size > 0 => {
                        Dimension::Fixed(*size as usize)
                    }
                    Some(proto::tensor_dimension_proto::Value::DimParam(name)) => {
                        Dimension::Symbolic(name.clone())
                    }
                    _ => Dimension::Symbolic(format!("{}:{}", info.name, index)),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ValueInfo {
        name: info.name.clone(),
        dtype,
        dims,
    })
}

fn node_from_proto(node: &proto::NodeProto, index: usize) -> Result<Node, LoadError> {
    // Nodes are frequently unnamed in exported models; generate a stable
    // name from the operator and position.
    let name = if node.name.is_empty() {
        format!("{}_{}", node.op_type.to_lowercase(), index)
    } else {
        node.name.clone()
    };

    let mut attrs = Attributes::default();
    for attr in &node.attribute {
        if let Some(value) = attribute_value(attr)? {
            attrs.insert(attr.name.clone(), value);
        }
    }

    Ok(Node {
        op_type: node.op_type.clone(),
        name,
        inputs: node.input.clone(),
        outputs: node.output.clone(),
        attrs,
    })
}

fn attribute_value(attr: &proto::AttributeProto) -> Result<Option<AttributeValue>, LoadError> {
    let string = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
    let value = match AttributeType(attr.r#type) {
        AttributeType::FLOAT => Some(AttributeValue::Float(attr.f)),
        AttributeType::INT => Some(AttributeValue::Int(attr.i)),
        AttributeType::STRING => Some(AttributeValue::String(string(&attr.s))),
        AttributeType::FLOATS => Some(AttributeValue::Floats(attr.floats.clone())),
        AttributeType::INTS => Some(AttributeValue::Ints(attr.ints.clone())),
        AttributeType::STRINGS => Some(AttributeValue::Strings(
            attr.strings.iter().map(|s| string(s)).collect(),
        )),
        AttributeType::TENSOR => match &attr.t {
            Some(tensor) => Some(AttributeValue::Tensor(tensor_from_proto(tensor)?)),
            None => None,
        },
        // Subgraph attributes belong to control-flow operators, which have
        // no translation; the registry rejects those nodes.
        AttributeType::GRAPH => None,
        _ => None,
    };
    Ok(value)
}

fn tensor_from_proto(tensor: &proto::TensorProto) -> Result<Tensor, LoadError> {
    if !tensor.external_data.is_empty() {
        return Err(LoadError::InvalidTensor {
            name: tensor.name.clone(),
            detail: "externally stored tensor data is not supported".to_string(),
        });
    }
    let mut shape = Vec::with_capacity(tensor.dims.len());
    for &dim in &tensor.dims {
        if dim < 0 {
            return Err(LoadError::InvalidTensor {
                name: tensor.name.clone(),
                detail: format!("negative dimension {}", dim),
            });
        }
        shape.push(dim as usize);
    }
    let count: usize = shape.iter().product();

    let invalid = |detail: &str| LoadError::InvalidTensor {
        name: tensor.name.clone(),
        detail: detail.to_string(),
    };

    let data = match DataType(tensor.data_type) {
        DataType::FLOAT => {
            let values = if !tensor.raw_data.is_empty() {
                raw_chunks(&tensor.raw_data, 4, count)
                    .ok_or_else(|| invalid("raw data size mismatch"))?
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            } else {
                tensor.float_data.clone()
            };
            TensorData::Float32(values)
        }
        DataType::FLOAT16 => {
            let values: Vec<f32> = if !tensor.raw_data.is_empty() {
                raw_chunks(&tensor.raw_data, 2, count)
                    .ok_or_else(|| invalid("raw data size mismatch"))?
                    .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect()
            } else {
                tensor
                    .int32_data
                    .iter()
                    .map(|&v| half::f16::from_bits(v as u16).to_f32())
                    .collect()
            };
            TensorData::Float32(values)
        }
        DataType::DOUBLE => {
            let values: Vec<f32> = if !tensor.raw_data.is_empty() {
                raw_chunks(&tensor.raw_data, 8, count)
                    .ok_or_else(|| invalid("raw data size mismatch"))?
                    .map(|b| {
                        f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
                    })
                    .collect()
            } else {
                tensor.double_data.iter().map(|&v| v as f32).collect()
            };
            TensorData::Float32(values)
        }
        DataType::INT64 => {
            let values = if !tensor.raw_data.is_empty() {
                raw_chunks(&tensor.raw_data, 8, count)
                    .ok_or_else(|| invalid("raw data size mismatch"))?
                    .map(|b| {
                        i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
                    })
                    .collect()
            } else {
                tensor.int64_data.clone()
            };
            TensorData::Int64(values)
        }
        DataType::INT32 => {
            let values: Vec<i64> = if !tensor.raw_data.is_empty() {
                raw_chunks(&tensor.raw_data, 4, count)
                    .ok_or_else(|| invalid("raw data size mismatch"))?
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
                    .collect()
            } else {
                tensor.int32_data.iter().map(|&v| v as i64).collect()
            };
            TensorData::Int64(values)
        }
        DataType::BOOL | DataType::INT8 | DataType::UINT8 => {
            let signed = DataType(tensor.data_type) == DataType::INT8;
            let values: Vec<i64> = if !tensor.raw_data.is_empty() {
                if tensor.raw_data.len() != count {
                    return Err(invalid("raw data size mismatch"));
                }
                tensor
                    .raw_data
                    .iter()
                    .map(|&b| if signed { b as i8 as i64 } else { b as i64 })
                    .collect()
            } else {
                tensor.int32_data.iter().map(|&v| v as i64).collect()
            };
            TensorData::Int64(values)
        }
        other => {
            return Err(LoadError::UnsupportedDataType {
                name: tensor.name.clone(),
                data_type: other.0,
            });
        }
    };

    if data.len() != count {
        return Err(invalid(&format!(
            "{} elements for shape {:?}",
            data.len(),
            shape
        )));
    }
    Ok(Tensor::from_data(shape, data))
}

/// Iterate fixed-size chunks of a raw payload, checking the total size.
fn raw_chunks(data: &[u8], width: usize, count: usize) -> Option<std::slice::ChunksExact<'_, u8>> {
    (data.len() == width * count).then(|| data.chunks_exact(width))
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::proto::{
        AttributeProto, AttributeType, DataType, GraphProto, ModelProto, NodeProto,
        TensorDimensionProto, TensorProto, TensorShapeProto, TensorTypeProto, TypeProto,
        ValueInfoProto,
    };
    use super::{load, LoadError};
    use crate::ir::{AttributeValue, Dimension, MalformedGraphError};
    use crate::tensor::ElementType;

    fn float_input(name: &str, dims: &[i64]) -> ValueInfoProto {
        ValueInfoProto {
            name: name.to_string(),
            r#type: Some(TypeProto {
                tensor_type: Some(TensorTypeProto {
                    elem_type: DataType::FLOAT.0,
                    shape: Some(TensorShapeProto {
                        dim: dims
                            .iter()
                            .map(|&d| TensorDimensionProto {
                                value: Some(if d > 0 {
                                    super::proto::tensor_dimension_proto::Value::DimValue(d)
                                } else {
                                    super::proto::tensor_dimension_proto::Value::DimParam(
                                        "batch".to_string(),
                                    )
                                }),
                            })
                            .collect(),
                    }),
                }),
            }),
        }
    }

    fn relu_model() -> ModelProto {
        ModelProto {
            ir_version: 8,
            producer_name: "test".to_string(),
            graph: Some(GraphProto {
                name: "g".to_string(),
                node: vec![NodeProto {
                    input: vec!["x".to_string()],
                    output: vec!["y".to_string()],
                    op_type: "Relu".to_string(),
                    ..Default::default()
                }],
                input: vec![float_input("x", &[-1, 3, 8, 8])],
                output: vec![float_input("y", &[-1, 3, 8, 8])],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_minimal_model() {
        let graph = load(&relu_model().encode_to_vec()).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].op_type, "Relu");
        // Unnamed nodes get stable generated names.
        assert_eq!(graph.nodes[0].name, "relu_0");
        assert_eq!(graph.inputs.len(), 1);
        assert_eq!(graph.inputs[0].dtype, ElementType::Float32);
        assert_eq!(
            graph.inputs[0].dims[0],
            Dimension::Symbolic("batch".to_string())
        );
        assert_eq!(graph.inputs[0].dims[1], Dimension::Fixed(3));
        assert_eq!(graph.outputs, vec!["y".to_string()]);
    }

    #[test]
    fn test_initializer_shadows_input() {
        let mut model = relu_model();
        let graph = model.graph.as_mut().unwrap();
        graph.input.push(float_input("w", &[2]));
        graph.initializer.push(TensorProto {
            name: "w".to_string(),
            dims: vec![2],
            data_type: DataType::FLOAT.0,
            float_data: vec![0.5, 1.5],
            ..Default::default()
        });

        let loaded = load(&model.encode_to_vec()).unwrap();
        assert_eq!(loaded.inputs.len(), 1);
        let weight = &loaded.initializers["w"];
        assert_eq!(weight.as_f32().unwrap(), &[0.5, 1.5]);
    }

    #[test]
    fn test_raw_data_decoding() {
        let mut model = relu_model();
        let graph = model.graph.as_mut().unwrap();
        let values = [1.0f32, -2.0, 0.25];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        graph.initializer.push(TensorProto {
            name: "w".to_string(),
            dims: vec![3],
            data_type: DataType::FLOAT.0,
            raw_data: raw,
            ..Default::default()
        });
        let loaded = load(&model.encode_to_vec()).unwrap();
        assert_eq!(loaded.initializers["w"].as_f32().unwrap(), &values);
    }

    #[test]
    fn test_attribute_decoding() {
        let mut model = relu_model();
        let graph = model.graph.as_mut().unwrap();
        graph.node[0].attribute = vec![
            AttributeProto {
                name: "alpha".to_string(),
                f: 0.2,
                r#type: AttributeType::FLOAT.0,
                ..Default::default()
            },
            AttributeProto {
                name: "pads".to_string(),
                ints: vec![1, 1, 1, 1],
                r#type: AttributeType::INTS.0,
                ..Default::default()
            },
            AttributeProto {
                name: "mode".to_string(),
                s: b"constant".to_vec(),
                r#type: AttributeType::STRING.0,
                ..Default::default()
            },
        ];
        let loaded = load(&model.encode_to_vec()).unwrap();
        let node = &loaded.nodes[0];
        assert_eq!(node.attr("alpha"), Some(&AttributeValue::Float(0.2)));
        assert_eq!(
            node.attr("pads"),
            Some(&AttributeValue::Ints(vec![1, 1, 1, 1]))
        );
        assert_eq!(node.attr_string("mode", ""), "constant");
    }

    #[test]
    fn test_unrecognized_version_rejected() {
        let mut model = relu_model();
        model.ir_version = 99;
        match load(&model.encode_to_vec()) {
            Err(LoadError::Malformed(MalformedGraphError::UnsupportedVersion {
                ir_version,
            })) => {
                assert_eq!(ir_version, 99);
            }
            other => panic!("expected version error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dangling_input_rejected() {
        let mut model = relu_model();
        model.graph.as_mut().unwrap().node[0].input = vec!["missing".to_string()];
        assert!(matches!(
            load(&model.encode_to_vec()),
            Err(LoadError::Malformed(MalformedGraphError::UndefinedInput { .. }))
        ));
    }

    #[test]
    fn test_payload_size_mismatch_rejected() {
        let mut model = relu_model();
        model.graph.as_mut().unwrap().initializer.push(TensorProto {
            name: "w".to_string(),
            dims: vec![4],
            data_type: DataType::FLOAT.0,
            float_data: vec![1.0],
            ..Default::default()
        });
        assert!(matches!(
            load(&model.encode_to_vec()),
            Err(LoadError::InvalidTensor { .. })
        ));
    }
}
