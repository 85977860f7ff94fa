use std::error::Error;
use std::fmt;

// The std HashMap provides DOS resistance. Keys in this module are tensor
// names from a model the user chose to load, so we prefer faster hashing.
use rustc_hash::{FxHashMap, FxHashSet};

use crate::tensor::{ElementType, Tensor};

/// Size of one dimension of a graph value.
///
/// ONNX models leave some dimensions (typically the batch size) unspecified
/// or named. Those become [`Dimension::Symbolic`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Dimension {
    /// A dimension whose size is fixed and specified as part of the model.
    Fixed(usize),

    /// A dimension whose size is determined at runtime. The symbol provides
    /// a name to identify when different values share a size.
    Symbolic(String),
}

impl Dimension {
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(*size),
            Dimension::Symbolic(_) => None,
        }
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Dimension {
        Dimension::Fixed(size)
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Dimension {
        Dimension::Symbolic(name.to_string())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Symbolic(name) => write!(f, "{}", name),
        }
    }
}

/// Value of a single node attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    Tensor(Tensor),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            AttributeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttributeValue::Ints(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            AttributeValue::Tensor(value) => Some(value),
            _ => None,
        }
    }
}

/// Attributes of a [`Node`], keyed by name.
pub type Attributes = FxHashMap<String, AttributeValue>;

/// One operator invocation in the source graph.
///
/// Nodes are immutable once parsed. Input and output order is significant;
/// an empty input name marks an omitted optional input.
#[derive(Clone, Debug)]
pub struct Node {
    /// Operator type tag, eg. "Conv". Kept as the source string so that
    /// unsupported operators can be reported verbatim.
    pub op_type: String,

    /// Stable identifying name. The loader generates one for nodes the model
    /// left unnamed.
    pub name: String,

    /// Names of consumed tensors, in operator-defined order.
    pub inputs: Vec<String>,

    /// Names of produced tensors, in operator-defined order.
    pub outputs: Vec<String>,

    pub attrs: Attributes,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attrs.get(name)
    }

    /// Integer attribute, or `default` if absent.
    pub fn attr_int(&self, name: &str, default: i64) -> i64 {
        self.attr(name).and_then(|a| a.as_int()).unwrap_or(default)
    }

    /// Float attribute, or `default` if absent.
    pub fn attr_float(&self, name: &str, default: f32) -> f32 {
        self.attr(name)
            .and_then(|a| a.as_float())
            .unwrap_or(default)
    }

    /// Integer-list attribute, if present.
    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        self.attr(name).and_then(|a| a.as_ints())
    }

    /// String attribute, or `default` if absent.
    pub fn attr_string(&self, name: &str, default: &str) -> String {
        self.attr(name)
            .and_then(|a| a.as_string())
            .unwrap_or(default)
            .to_string()
    }
}

/// Declared name, type and shape of a graph input.
#[derive(Clone, Debug)]
pub struct ValueInfo {
    pub name: String,
    pub dtype: ElementType,
    pub dims: Vec<Dimension>,
}

/// The parsed source model: pure data, no behavior beyond validation.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    /// Nodes in declaration order. The declaration order is used to break
    /// ties when scheduling, so conversion output is deterministic.
    pub nodes: Vec<Node>,

    /// Constant initializer tensors, keyed by name.
    pub initializers: FxHashMap<String, Tensor>,

    /// Declared graph inputs, in order. Inputs shadowed by an initializer of
    /// the same name are not included.
    pub inputs: Vec<ValueInfo>,

    /// Names of the declared graph outputs, in order.
    pub outputs: Vec<String>,
}

impl Graph {
    /// Check the structural invariants of the graph.
    ///
    /// Every node input and declared graph output must resolve to a graph
    /// input, an initializer or some node's output, and every tensor name
    /// must have a single producer.
    pub fn validate(&self) -> Result<(), MalformedGraphError> {
        let mut produced: FxHashSet<&str> = FxHashSet::default();
        for input in &self.inputs {
            produced.insert(&input.name);
        }
        for name in self.initializers.keys() {
            if !produced.insert(name) {
                return Err(MalformedGraphError::DuplicateTensor { name: name.clone() });
            }
        }
        for node in &self.nodes {
            for output in &node.outputs {
                if !produced.insert(output) {
                    return Err(MalformedGraphError::DuplicateTensor {
                        name: output.clone(),
                    });
                }
            }
        }

        for node in &self.nodes {
            for input in &node.inputs {
                // Empty names mark omitted optional inputs.
                if !input.is_empty() && !produced.contains(input.as_str()) {
                    return Err(MalformedGraphError::UndefinedInput {
                        node: node.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        for output in &self.outputs {
            if !produced.contains(output.as_str()) {
                return Err(MalformedGraphError::UndefinedOutput {
                    output: output.clone(),
                });
            }
        }

        Ok(())
    }

    /// Look up a node by its stable name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

/// Structural problems found while building or validating a [`Graph`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MalformedGraphError {
    /// A node consumes a tensor that no graph input, initializer or node
    /// produces.
    UndefinedInput { node: String, input: String },

    /// A declared graph output that nothing produces.
    UndefinedOutput { output: String },

    /// Two producers declare the same tensor name.
    DuplicateTensor { name: String },

    /// The model's declared format version is not recognized.
    UnsupportedVersion { ir_version: i64 },

    /// The model file contains no graph.
    MissingGraph,
}

impl fmt::Display for MalformedGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedGraphError::UndefinedInput { node, input } => {
                write!(f, "node \"{}\" reads undefined tensor \"{}\"", node, input)
            }
            MalformedGraphError::UndefinedOutput { output } => {
                write!(f, "graph output \"{}\" is not produced by any node", output)
            }
            MalformedGraphError::DuplicateTensor { name } => {
                write!(f, "tensor \"{}\" has multiple producers", name)
            }
            MalformedGraphError::UnsupportedVersion { ir_version } => {
                write!(f, "unrecognized ONNX IR version {}", ir_version)
            }
            MalformedGraphError::MissingGraph => write!(f, "model contains no graph"),
        }
    }
}

impl Error for MalformedGraphError {}

#[cfg(test)]
mod tests {
    use keras_import_testing::TestCases;

    use super::{Graph, MalformedGraphError, Node, ValueInfo};
    use crate::tensor::{ElementType, Tensor};

    fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        Node {
            op_type: op_type.to_string(),
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attrs: Default::default(),
        }
    }

    fn input(name: &str) -> ValueInfo {
        ValueInfo {
            name: name.to_string(),
            dtype: ElementType::Float32,
            dims: vec![1.into(), 3.into()],
        }
    }

    #[test]
    fn test_validate() {
        #[derive(Debug)]
        struct Case {
            graph: Graph,
            expected: Result<(), MalformedGraphError>,
        }

        let valid = Graph {
            nodes: vec![
                node("relu1", "Relu", &["x"], &["relu1_out"]),
                node("add1", "Add", &["relu1_out", "w"], &["y"]),
            ],
            initializers: [("w".to_string(), Tensor::from_scalar_f32(1.))]
                .into_iter()
                .collect(),
            inputs: vec![input("x")],
            outputs: vec!["y".to_string()],
        };

        let dangling = Graph {
            nodes: vec![node("relu1", "Relu", &["missing"], &["y"])],
            inputs: vec![input("x")],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };

        let duplicate = Graph {
            nodes: vec![
                node("relu1", "Relu", &["x"], &["y"]),
                node("relu2", "Relu", &["x"], &["y"]),
            ],
            inputs: vec![input("x")],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };

        let missing_output = Graph {
            nodes: vec![node("relu1", "Relu", &["x"], &["y"])],
            inputs: vec![input("x")],
            outputs: vec!["z".to_string()],
            ..Default::default()
        };

        let cases = [
            Case {
                graph: valid,
                expected: Ok(()),
            },
            Case {
                graph: dangling,
                expected: Err(MalformedGraphError::UndefinedInput {
                    node: "relu1".to_string(),
                    input: "missing".to_string(),
                }),
            },
            Case {
                graph: duplicate,
                expected: Err(MalformedGraphError::DuplicateTensor {
                    name: "y".to_string(),
                }),
            },
            Case {
                graph: missing_output,
                expected: Err(MalformedGraphError::UndefinedOutput {
                    output: "z".to_string(),
                }),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.graph.validate(), case.expected);
        });
    }

    #[test]
    fn test_optional_inputs_skipped() {
        // Empty input names mark omitted optional inputs and are not treated
        // as dangling references.
        let graph = Graph {
            nodes: vec![node("clip1", "Clip", &["x", "", ""], &["y"])],
            inputs: vec![input("x")],
            outputs: vec!["y".to_string()],
            ..Default::default()
        };
        assert_eq!(graph.validate(), Ok(()));
    }
}
