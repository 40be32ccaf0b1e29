//! Kernel vocabulary shared by eager launches and captured graph nodes.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::tensor::{ArraySpec, HostData, Scalar};

use super::backend::BackendResult;
use super::buffer::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Floor,
    Sin,
    Cos,
    /// Logical negation; the result is boolean.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// True division; integer operands produce a float result.
    Div,
    Maximum,
    Minimum,
    Pow,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    All,
    Any,
    CountNonzero,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgReduceOp {
    ArgMin,
    ArgMax,
}

/// Host-evaluated kernel body, used for library routines without a built-in operation.
pub trait HostKernel: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, inputs: &[&HostData], output: &ArraySpec) -> BackendResult<HostData>;
}

/// Shareable handle around a [`HostKernel`].
#[derive(Clone)]
pub struct CustomKernel(Arc<dyn HostKernel>);

impl CustomKernel {
    pub fn new(kernel: impl HostKernel + 'static) -> Self {
        CustomKernel(Arc::new(kernel))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn evaluate(&self, inputs: &[&HostData], output: &ArraySpec) -> BackendResult<HostData> {
        self.0.evaluate(inputs, output)
    }
}

impl fmt::Debug for CustomKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomKernel").field(&self.name()).finish()
    }
}

/// Operation executed by a single kernel. Output spec travels with the launch.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Uploads constant host data.
    Literal(Arc<HostData>),
    Fill(Scalar),
    /// Broadcasts and casts the single input into the output spec.
    Copy,
    Reshape,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Binary op against a host scalar; `reversed` puts the scalar on the left.
    BinaryScalar {
        op: BinaryOp,
        scalar: Scalar,
        reversed: bool,
    },
    Compare(CompareOp),
    CompareScalar {
        op: CompareOp,
        scalar: Scalar,
    },
    /// `where(cond, on_true, on_false)` with broadcasting.
    Select,
    Reduce {
        op: ReduceOp,
        axis: Option<usize>,
    },
    ArgReduce {
        op: ArgReduceOp,
        axis: Option<usize>,
    },
    /// Sub-array at `index` along the leading axis.
    Index(usize),
    /// Rows of the first input selected by the integer indices of the second.
    Take,
    MatMul,
    /// Euclidean norm over all elements, or along `axis`.
    Norm {
        axis: Option<usize>,
    },
    Custom(CustomKernel),
}

impl Operation {
    /// Short label used in graph dumps and error messages.
    pub fn label(&self) -> &str {
        match self {
            Operation::Literal(_) => "literal",
            Operation::Fill(_) => "fill",
            Operation::Copy => "copy",
            Operation::Reshape => "reshape",
            Operation::Unary(_) => "unary",
            Operation::Binary(_) => "binary",
            Operation::BinaryScalar { .. } => "binary_scalar",
            Operation::Compare(_) => "compare",
            Operation::CompareScalar { .. } => "compare_scalar",
            Operation::Select => "select",
            Operation::Reduce { .. } => "reduce",
            Operation::ArgReduce { .. } => "arg_reduce",
            Operation::Index(_) => "index",
            Operation::Take => "take",
            Operation::MatMul => "matmul",
            Operation::Norm { .. } => "norm",
            Operation::Custom(kernel) => kernel.name(),
        }
    }

    /// Operations dispatched to the BLAS-style sub-library.
    ///
    /// Axis norms are elementwise reductions and do not count.
    pub fn requires_blas(&self) -> bool {
        matches!(self, Operation::MatMul | Operation::Norm { axis: None })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Literal(data) => write!(f, "literal<{}x{}>", data.dtype(), data.len()),
            Operation::Fill(value) => write!(f, "fill({value})"),
            Operation::Unary(op) => write!(f, "{op:?}"),
            Operation::Binary(op) => write!(f, "{op:?}"),
            Operation::BinaryScalar {
                op,
                scalar,
                reversed,
            } => {
                if *reversed {
                    write!(f, "{op:?}({scalar}, _)")
                } else {
                    write!(f, "{op:?}(_, {scalar})")
                }
            }
            Operation::Compare(op) => write!(f, "{op:?}"),
            Operation::CompareScalar { op, scalar } => write!(f, "{op:?}(_, {scalar})"),
            Operation::Reduce { op, axis } => match axis {
                Some(axis) => write!(f, "{op:?}(axis={axis})"),
                None => write!(f, "{op:?}"),
            },
            Operation::ArgReduce { op, axis } => match axis {
                Some(axis) => write!(f, "{op:?}(axis={axis})"),
                None => write!(f, "{op:?}"),
            },
            Operation::Index(index) => write!(f, "index[{index}]"),
            Operation::Norm { axis: Some(axis) } => write!(f, "norm(axis={axis})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A kernel bound to concrete device buffers, ready to run or to be recorded.
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    pub op: Operation,
    pub inputs: SmallVec<[Arc<Buffer>; 4]>,
    pub output: Arc<Buffer>,
}
