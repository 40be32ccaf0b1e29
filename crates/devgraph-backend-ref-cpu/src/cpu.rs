use std::sync::Arc;

use devgraph::device::{
    ArgReduceOp, BackendError, BackendResult, BinaryOp, CompareOp, DeviceBackend, HostOperand,
    Operation, ReduceOp, UnaryOp,
};
use devgraph::tensor::{ArraySpec, DType, HostData, Scalar};

/// Hook consulted before the built-in kernels. Returning `Some` short-circuits execution.
pub trait CpuKernelInterceptor: Send + Sync {
    fn try_execute(
        &self,
        op: &Operation,
        inputs: &[HostOperand<'_>],
        output: &ArraySpec,
    ) -> Option<BackendResult<HostData>>;
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(
        &self,
        _op: &Operation,
        _inputs: &[HostOperand<'_>],
        _output: &ArraySpec,
    ) -> Option<BackendResult<HostData>> {
        None
    }
}

/// Reference kernel executor. Every kernel computes in `f64` or wrapping `i64` and rounds once
/// into the output dtype, so eager and replayed execution agree bit for bit.
#[derive(Clone)]
pub struct GenericCpuBackend<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
    conditional_nodes: bool,
}

impl<I: CpuKernelInterceptor> GenericCpuBackend<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self::with_arc(Arc::new(interceptor))
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self {
            interceptor,
            conditional_nodes: true,
        }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }

    /// Reports no support for conditional graph nodes, like a driver too old for them.
    pub fn without_conditional_nodes(mut self) -> Self {
        self.conditional_nodes = false;
        self
    }
}

impl GenericCpuBackend<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuBackend<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuBackend = GenericCpuBackend<NoopInterceptor>;

impl<I: CpuKernelInterceptor> DeviceBackend for GenericCpuBackend<I> {
    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn supports_conditional_nodes(&self) -> bool {
        self.conditional_nodes
    }

    fn execute(
        &self,
        op: &Operation,
        inputs: &[HostOperand<'_>],
        output: &ArraySpec,
    ) -> BackendResult<HostData> {
        if let Some(result) = self.interceptor.try_execute(op, inputs, output) {
            return result;
        }
        execute_operation(op, inputs, output).map_err(|err| augment_backend_error(err, op, inputs))
    }
}

fn execute_operation(
    op: &Operation,
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
) -> BackendResult<HostData> {
    match op {
        Operation::Literal(data) => op_literal(data, output),
        Operation::Fill(value) => Ok(HostData::filled(output.dtype, output.num_elements(), *value)),
        Operation::Copy => op_copy(inputs, output),
        Operation::Reshape => op_reshape(inputs, output),
        Operation::Unary(op) => op_unary(inputs, output, *op),
        Operation::Binary(op) => {
            let [lhs, rhs] = expect_inputs::<2>("binary", inputs)?;
            op_binary(*op, Side::array(lhs, output)?, Side::array(rhs, output)?, output)
        }
        Operation::BinaryScalar {
            op,
            scalar,
            reversed,
        } => {
            let [input] = expect_inputs::<1>("binary_scalar", inputs)?;
            let array = Side::array(input, output)?;
            let scalar = Side::Scalar(*scalar);
            if *reversed {
                op_binary(*op, scalar, array, output)
            } else {
                op_binary(*op, array, scalar, output)
            }
        }
        Operation::Compare(op) => {
            let [lhs, rhs] = expect_inputs::<2>("compare", inputs)?;
            op_compare(*op, Side::array(lhs, output)?, Side::array(rhs, output)?, output)
        }
        Operation::CompareScalar { op, scalar } => {
            let [input] = expect_inputs::<1>("compare_scalar", inputs)?;
            op_compare(*op, Side::array(input, output)?, Side::Scalar(*scalar), output)
        }
        Operation::Select => op_select(inputs, output),
        Operation::Reduce { op, axis } => op_reduce(inputs, output, *op, *axis),
        Operation::ArgReduce { op, axis } => op_arg_reduce(inputs, output, *op, *axis),
        Operation::Index(index) => op_index(inputs, output, *index),
        Operation::Take => op_take(inputs, output),
        Operation::MatMul => op_matmul(inputs, output),
        Operation::Norm { axis } => op_norm(inputs, output, *axis),
        Operation::Custom(kernel) => {
            let data: Vec<&HostData> = inputs.iter().map(|input| input.data).collect();
            kernel.evaluate(&data, output)
        }
    }
}

fn backend_operation_label(op: &Operation) -> &'static str {
    match op {
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
        Operation::Custom(_) => "custom",
    }
}

fn augment_backend_error(
    error: BackendError,
    op: &Operation,
    inputs: &[HostOperand<'_>],
) -> BackendError {
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!(
                "{message} (while executing {op} operands [{}])",
                format_operands(inputs)
            ),
        },
        other => other,
    }
}

fn format_operands(inputs: &[HostOperand<'_>]) -> String {
    if inputs.is_empty() {
        return String::from("<none>");
    }
    inputs
        .iter()
        .map(|input| input.spec.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn expect_inputs<'a, const N: usize>(
    op: &'static str,
    inputs: &[HostOperand<'a>],
) -> BackendResult<[HostOperand<'a>; N]> {
    <[HostOperand<'a>; N]>::try_from(inputs).map_err(|_| {
        BackendError::invalid(op, format!("expected {N} inputs, got {}", inputs.len()))
    })
}

fn op_literal(data: &HostData, output: &ArraySpec) -> BackendResult<HostData> {
    if data.len() != output.num_elements() {
        return Err(BackendError::invalid(
            "literal",
            format!("{} elements for output {output}", data.len()),
        ));
    }
    Ok(data.cast(output.dtype))
}

fn op_copy(inputs: &[HostOperand<'_>], output: &ArraySpec) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("copy", inputs)?;
    let map = broadcast_map(input.dims(), output.shape.dims())?;
    Ok(input.data.gather(&map).cast(output.dtype))
}

fn op_reshape(inputs: &[HostOperand<'_>], output: &ArraySpec) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("reshape", inputs)?;
    if input.data.len() != output.num_elements() {
        return Err(BackendError::invalid(
            "reshape",
            format!("cannot reshape {} into {output}", input.spec),
        ));
    }
    Ok(input.data.cast(output.dtype))
}

/// Operand of an elementwise kernel: an array broadcast to the output, or a host scalar.
enum Side<'a> {
    Array {
        data: &'a HostData,
        map: Option<Vec<usize>>,
    },
    Scalar(Scalar),
}

impl<'a> Side<'a> {
    fn array(input: HostOperand<'a>, output: &ArraySpec) -> BackendResult<Self> {
        let map = if input.dims() == output.shape.dims() {
            None
        } else {
            Some(broadcast_map(input.dims(), output.shape.dims())?)
        };
        Ok(Side::Array {
            data: input.data,
            map,
        })
    }

    fn position(map: &Option<Vec<usize>>, index: usize) -> usize {
        map.as_ref().map_or(index, |map| map[index])
    }

    fn f64(&self, index: usize) -> f64 {
        match self {
            Side::Array { data, map } => data.get_f64(Self::position(map, index)),
            Side::Scalar(value) => value.as_f64(),
        }
    }

    fn i64(&self, index: usize) -> i64 {
        match self {
            Side::Array { data, map } => data.get_i64(Self::position(map, index)),
            Side::Scalar(value) => value.as_i64(),
        }
    }

    fn truthy(&self, index: usize) -> bool {
        match self {
            Side::Array { data, map } => data.is_truthy(Self::position(map, index)),
            Side::Scalar(value) => value.is_truthy(),
        }
    }

    fn is_float(&self) -> bool {
        match self {
            Side::Array { data, .. } => data.dtype().is_float(),
            Side::Scalar(value) => matches!(value, Scalar::Float(_)),
        }
    }
}

fn float_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn float_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn float_binary(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Maximum => float_max(x, y),
        BinaryOp::Minimum => float_min(x, y),
        BinaryOp::Pow => x.powf(y),
        BinaryOp::LogicalAnd => f64::from(u8::from(x != 0.0 && y != 0.0)),
        BinaryOp::LogicalOr => f64::from(u8::from(x != 0.0 || y != 0.0)),
    }
}

fn int_binary(op: BinaryOp, x: i64, y: i64) -> BackendResult<i64> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div => {
            if y == 0 {
                return Err(BackendError::execution("integer division by zero"));
            }
            x.wrapping_div_euclid(y)
        }
        BinaryOp::Maximum => x.max(y),
        BinaryOp::Minimum => x.min(y),
        BinaryOp::Pow => {
            if y < 0 {
                return Err(BackendError::execution(format!(
                    "integers to negative integer powers are not allowed ({x} ** {y})"
                )));
            }
            x.wrapping_pow(u32::try_from(y).unwrap_or(u32::MAX))
        }
        BinaryOp::LogicalAnd => i64::from(x != 0 && y != 0),
        BinaryOp::LogicalOr => i64::from(x != 0 || y != 0),
    })
}

fn op_binary(
    op: BinaryOp,
    lhs: Side<'_>,
    rhs: Side<'_>,
    output: &ArraySpec,
) -> BackendResult<HostData> {
    let len = output.num_elements();
    if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
        let values = (0..len).map(|i| match op {
            BinaryOp::LogicalAnd => lhs.truthy(i) && rhs.truthy(i),
            _ => lhs.truthy(i) || rhs.truthy(i),
        });
        return Ok(HostData::Bool(values.collect()).cast(output.dtype));
    }
    if output.dtype.is_float() {
        let values = (0..len).map(|i| float_binary(op, lhs.f64(i), rhs.f64(i)));
        return Ok(HostData::from_f64_iter(output.dtype, values));
    }
    let values = (0..len)
        .map(|i| int_binary(op, lhs.i64(i), rhs.i64(i)))
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(HostData::from_i64_iter(output.dtype, values))
}

fn op_compare(
    op: CompareOp,
    lhs: Side<'_>,
    rhs: Side<'_>,
    output: &ArraySpec,
) -> BackendResult<HostData> {
    let len = output.num_elements();
    let values: Vec<bool> = if lhs.is_float() || rhs.is_float() {
        (0..len)
            .map(|i| compare(op, lhs.f64(i), rhs.f64(i)))
            .collect()
    } else {
        (0..len)
            .map(|i| compare(op, lhs.i64(i), rhs.i64(i)))
            .collect()
    };
    Ok(HostData::Bool(values).cast(output.dtype))
}

fn compare<T: PartialOrd>(op: CompareOp, x: T, y: T) -> bool {
    match op {
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }
}

fn op_unary(
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
    op: UnaryOp,
) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("unary", inputs)?;
    let data = input.data;
    let len = data.len();
    if op == UnaryOp::Not {
        let values = (0..len).map(|i| !data.is_truthy(i));
        return Ok(HostData::Bool(values.collect()).cast(output.dtype));
    }
    if output.dtype.is_float() {
        let apply = |x: f64| match op {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Not => f64::from(u8::from(x == 0.0)),
        };
        let values = (0..len).map(|i| apply(data.get_f64(i)));
        return Ok(HostData::from_f64_iter(output.dtype, values));
    }
    let values = (0..len)
        .map(|i| {
            let x = data.get_i64(i);
            match op {
                UnaryOp::Neg => Ok(x.wrapping_neg()),
                UnaryOp::Abs => Ok(x.wrapping_abs()),
                UnaryOp::Floor => Ok(x),
                other => Err(BackendError::invalid(
                    "unary",
                    format!("{other:?} needs a float output, got {output}"),
                )),
            }
        })
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(HostData::from_i64_iter(output.dtype, values))
}

fn op_select(inputs: &[HostOperand<'_>], output: &ArraySpec) -> BackendResult<HostData> {
    let [condition, on_true, on_false] = expect_inputs::<3>("select", inputs)?;
    let condition = Side::array(condition, output)?;
    let on_true = Side::array(on_true, output)?;
    let on_false = Side::array(on_false, output)?;
    let len = output.num_elements();
    if output.dtype.is_float() {
        let values = (0..len).map(|i| {
            if condition.truthy(i) {
                on_true.f64(i)
            } else {
                on_false.f64(i)
            }
        });
        return Ok(HostData::from_f64_iter(output.dtype, values));
    }
    let values = (0..len).map(|i| {
        if condition.truthy(i) {
            on_true.i64(i)
        } else {
            on_false.i64(i)
        }
    });
    Ok(HostData::from_i64_iter(output.dtype, values))
}

/// Splits `dims` around `axis` into `(outer, extent, inner)`. No axis means one flat lane.
fn lanes(
    op: &'static str,
    dims: &[usize],
    axis: Option<usize>,
) -> BackendResult<(usize, usize, usize)> {
    match axis {
        None => Ok((1, dims.iter().product(), 1)),
        Some(axis) if axis < dims.len() => Ok((
            dims[..axis].iter().product(),
            dims[axis],
            dims[axis + 1..].iter().product(),
        )),
        Some(axis) => Err(BackendError::invalid(
            op,
            format!("axis {axis} out of range for rank {}", dims.len()),
        )),
    }
}

/// Flat element indices of every lane, in output order.
fn lane_indices(outer: usize, extent: usize, inner: usize) -> impl Iterator<Item = Vec<usize>> {
    (0..outer).flat_map(move |o| {
        (0..inner).map(move |i| {
            (0..extent)
                .map(|k| (o * extent + k) * inner + i)
                .collect::<Vec<_>>()
        })
    })
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Float(f64),
    Int(i64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Float(v) => v,
            Number::Int(v) => v as f64,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Number::Float(v) => v as i64,
            Number::Int(v) => v,
        }
    }
}

fn collect_numbers(dtype: DType, numbers: Vec<Number>) -> HostData {
    if dtype.is_float() {
        HostData::from_f64_iter(dtype, numbers.into_iter().map(Number::as_f64))
    } else {
        HostData::from_i64_iter(dtype, numbers.into_iter().map(Number::as_i64))
    }
}

fn reduce_lane(op: ReduceOp, data: &HostData, lane: &[usize]) -> BackendResult<Number> {
    let float = data.dtype().is_float();
    let number = match op {
        ReduceOp::Sum if float => Number::Float(lane.iter().map(|&i| data.get_f64(i)).sum()),
        ReduceOp::Sum => Number::Int(
            lane.iter()
                .fold(0i64, |acc, &i| acc.wrapping_add(data.get_i64(i))),
        ),
        ReduceOp::Mean => {
            let sum: f64 = lane.iter().map(|&i| data.get_f64(i)).sum();
            Number::Float(sum / lane.len() as f64)
        }
        ReduceOp::Max | ReduceOp::Min => {
            let Some((&first, rest)) = lane.split_first() else {
                return Err(BackendError::execution(
                    "zero-size reduction has no identity for max/min",
                ));
            };
            if float {
                let pick = if op == ReduceOp::Max { float_max } else { float_min };
                Number::Float(
                    rest.iter()
                        .fold(data.get_f64(first), |acc, &i| pick(acc, data.get_f64(i))),
                )
            } else {
                let values = std::iter::once(first)
                    .chain(rest.iter().copied())
                    .map(|i| data.get_i64(i));
                let value = if op == ReduceOp::Max { values.max() } else { values.min() };
                Number::Int(value.unwrap_or_default())
            }
        }
        ReduceOp::All => Number::Int(i64::from(lane.iter().all(|&i| data.is_truthy(i)))),
        ReduceOp::Any => Number::Int(i64::from(lane.iter().any(|&i| data.is_truthy(i)))),
        ReduceOp::CountNonzero => {
            Number::Int(lane.iter().filter(|&&i| data.is_truthy(i)).count() as i64)
        }
    };
    Ok(number)
}

fn op_reduce(
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
    op: ReduceOp,
    axis: Option<usize>,
) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("reduce", inputs)?;
    let (outer, extent, inner) = lanes("reduce", input.dims(), axis)?;
    let numbers = lane_indices(outer, extent, inner)
        .map(|lane| reduce_lane(op, input.data, &lane))
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(collect_numbers(output.dtype, numbers))
}

fn arg_lane(op: ArgReduceOp, data: &HostData, lane: &[usize]) -> BackendResult<i64> {
    if lane.is_empty() {
        return Err(BackendError::execution(
            "attempt to get argmin/argmax of an empty sequence",
        ));
    }
    let better = |candidate: f64, best: f64| match op {
        ArgReduceOp::ArgMax => candidate > best,
        ArgReduceOp::ArgMin => candidate < best,
    };
    let mut best_position = 0usize;
    if data.dtype().is_float() {
        let mut best = data.get_f64(lane[0]);
        for (position, &index) in lane.iter().enumerate().skip(1) {
            if best.is_nan() {
                break;
            }
            let value = data.get_f64(index);
            if value.is_nan() || better(value, best) {
                best = value;
                best_position = position;
            }
        }
    } else {
        let mut best = data.get_i64(lane[0]);
        for (position, &index) in lane.iter().enumerate().skip(1) {
            let value = data.get_i64(index);
            let wins = match op {
                ArgReduceOp::ArgMax => value > best,
                ArgReduceOp::ArgMin => value < best,
            };
            if wins {
                best = value;
                best_position = position;
            }
        }
    }
    Ok(best_position as i64)
}

fn op_arg_reduce(
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
    op: ArgReduceOp,
    axis: Option<usize>,
) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("arg_reduce", inputs)?;
    let (outer, extent, inner) = lanes("arg_reduce", input.dims(), axis)?;
    let positions = lane_indices(outer, extent, inner)
        .map(|lane| arg_lane(op, input.data, &lane))
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(HostData::from_i64_iter(output.dtype, positions))
}

fn op_index(
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
    index: usize,
) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("index", inputs)?;
    let Some((&leading, _)) = input.dims().split_first() else {
        return Err(BackendError::invalid("index", "cannot index a zero-dimensional array"));
    };
    if index >= leading {
        return Err(BackendError::invalid(
            "index",
            format!("index {index} out of bounds for {}", input.spec),
        ));
    }
    let row = output.num_elements();
    let indices: Vec<usize> = (index * row..(index + 1) * row).collect();
    Ok(input.data.gather(&indices).cast(output.dtype))
}

fn op_take(inputs: &[HostOperand<'_>], output: &ArraySpec) -> BackendResult<HostData> {
    let [table, indices] = expect_inputs::<2>("take", inputs)?;
    let Some((&rows, rest)) = table.dims().split_first() else {
        return Err(BackendError::invalid("take", "cannot take rows of a zero-dimensional array"));
    };
    let row: usize = rest.iter().product();
    let mut gathered = Vec::with_capacity(indices.data.len() * row);
    for position in 0..indices.data.len() {
        let raw = indices.data.get_i64(position);
        let resolved = if raw < 0 { raw + rows as i64 } else { raw };
        if resolved < 0 || resolved >= rows as i64 {
            return Err(BackendError::execution(format!(
                "take index {raw} is out of bounds for axis 0 with size {rows}"
            )));
        }
        let start = resolved as usize * row;
        gathered.extend(start..start + row);
    }
    Ok(table.data.gather(&gathered).cast(output.dtype))
}

fn op_matmul(inputs: &[HostOperand<'_>], output: &ArraySpec) -> BackendResult<HostData> {
    let [lhs, rhs] = expect_inputs::<2>("matmul", inputs)?;
    let (m, k) = match lhs.dims() {
        [m, k] => (*m, *k),
        [k] => (1, *k),
        other => {
            return Err(BackendError::invalid(
                "matmul",
                format!("lhs must be rank 1 or 2, got {other:?}"),
            ))
        }
    };
    let (k2, n) = match rhs.dims() {
        [k2, n] => (*k2, *n),
        [k2] => (*k2, 1),
        other => {
            return Err(BackendError::invalid(
                "matmul",
                format!("rhs must be rank 1 or 2, got {other:?}"),
            ))
        }
    };
    if k != k2 || m * n != output.num_elements() {
        return Err(BackendError::invalid(
            "matmul",
            format!("{} x {} does not produce {output}", lhs.spec, rhs.spec),
        ));
    }
    let mut numbers = Vec::with_capacity(m * n);
    for row in 0..m {
        for col in 0..n {
            let number = if output.dtype.is_float() {
                let mut acc = 0.0;
                for inner in 0..k {
                    acc += lhs.data.get_f64(row * k + inner) * rhs.data.get_f64(inner * n + col);
                }
                Number::Float(acc)
            } else {
                let mut acc = 0i64;
                for inner in 0..k {
                    acc = acc.wrapping_add(
                        lhs.data
                            .get_i64(row * k + inner)
                            .wrapping_mul(rhs.data.get_i64(inner * n + col)),
                    );
                }
                Number::Int(acc)
            };
            numbers.push(number);
        }
    }
    Ok(collect_numbers(output.dtype, numbers))
}

fn op_norm(
    inputs: &[HostOperand<'_>],
    output: &ArraySpec,
    axis: Option<usize>,
) -> BackendResult<HostData> {
    let [input] = expect_inputs::<1>("norm", inputs)?;
    let (outer, extent, inner) = lanes("norm", input.dims(), axis)?;
    let values = lane_indices(outer, extent, inner).map(|lane| {
        lane.iter()
            .map(|&i| {
                let x = input.data.get_f64(i);
                x * x
            })
            .sum::<f64>()
            .sqrt()
    });
    Ok(HostData::from_f64_iter(output.dtype, values))
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

/// For every element of `output`, the flat index of the `input` element broadcast onto it.
fn broadcast_map(input: &[usize], output: &[usize]) -> BackendResult<Vec<usize>> {
    let total: usize = output.iter().product();
    if input == output {
        return Ok((0..total).collect());
    }
    if input.len() > output.len() {
        return Err(BackendError::invalid(
            "broadcast",
            format!("cannot broadcast {input:?} to {output:?}"),
        ));
    }
    let offset = output.len() - input.len();
    let input_strides = compute_strides(input);
    let mut strides = vec![0usize; output.len()];
    for (axis, &dim) in input.iter().enumerate() {
        let target = output[offset + axis];
        if dim == target {
            strides[offset + axis] = input_strides[axis];
        } else if dim != 1 {
            return Err(BackendError::invalid(
                "broadcast",
                format!("cannot broadcast {input:?} to {output:?}"),
            ));
        }
    }
    Ok(MultiIndex::new(output)
        .take(total)
        .map(|coords| coords.iter().zip(&strides).map(|(c, s)| c * s).sum())
        .collect())
}

struct MultiIndex {
    shape: Vec<usize>,
    current: Vec<usize>,
    first: bool,
}

impl MultiIndex {
    fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            current: vec![0; shape.len()],
            first: true,
        }
    }
}

impl Iterator for MultiIndex {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;
            return Some(self.current.clone());
        }
        for i in (0..self.current.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.shape[i] {
                return Some(self.current.clone());
            }
            self.current[i] = 0;
        }
        None
    }
}
