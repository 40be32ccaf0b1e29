mod common;

use std::cell::Cell;

use anyhow::Result;
use devgraph::{Branch, DType, DeviceArray, GraphConverter, GraphError};

use common::{capturing, device, f64_scalar, f64s, graph_error, host, i64_scalar, mock};

/// `[x, out]`: writes a piecewise function of `x` into `out` and returns it.
fn classify<C: GraphConverter>(converter: &C, args: &[DeviceArray]) -> Result<Vec<DeviceArray>> {
    converter.multicond(
        args,
        vec![
            Branch::when(|ops| ops[0].lt_scalar(0.0), |ops| ops[1].fill(-1.0)),
            Branch::when(
                |ops| ops[0].lt_scalar(10.0),
                |ops| ops[1].assign(&ops[0].mul_scalar(2.0)?),
            ),
            Branch::when(
                |ops| ops[0].lt_scalar(100.0),
                |ops| ops[1].assign(&ops[0].add_scalar(100.0)?),
            ),
            Branch::otherwise(|ops| ops[1].fill(0.0)),
        ],
    )?;
    Ok(vec![args[1].clone()])
}

#[test]
fn multicond_truth_table_matches_eager() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let graphed = converter.graphify(|args| classify(&converter, args));

    for (x, expected) in [(-5.0, -1.0), (3.0, 6.0), (50.0, 150.0), (500.0, 0.0), (0.0, 0.0)] {
        let captured_args = vec![f64_scalar(&device, x), f64_scalar(&device, f64::NAN)];
        let eager_args = vec![f64_scalar(&device, x), f64_scalar(&device, f64::NAN)];
        let captured = graphed.call(&captured_args)?;
        classify(&eager, &eager_args)?;
        assert_eq!(host(&captured[0]), vec![expected], "x = {x}");
        assert_eq!(host(&eager_args[1]), vec![expected], "x = {x}");
        // The body writes through the operand, exactly as in eager execution.
        assert_eq!(host(&captured_args[1]), vec![expected], "x = {x}");
    }

    let stats = converter.stats();
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.replays, 4);
    assert_eq!(stats.host_invocations, 1);
    assert!(graphed.captured_graphs()[0].has_control_flow());
    Ok(())
}

#[test]
fn cond_and_cond_else() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| {
        converter.cond(
            args,
            |ops| ops[0].gt_scalar(0.0),
            |ops| ops[1].assign(&ops[1].add_scalar(1.0)?),
        )?;
        converter.cond_else(
            args,
            |ops| ops[1].gt_scalar(1.5),
            |ops| ops[2].fill(1.0),
            |ops| ops[2].fill(-1.0),
        )?;
        Ok(vec![args[1].clone(), args[2].clone()])
    });

    let positive = [
        f64_scalar(&device, 1.0),
        f64_scalar(&device, 1.0),
        f64_scalar(&device, 0.0),
    ];
    let outputs = graphed.call(&positive)?;
    assert_eq!(host(&outputs[0]), vec![2.0]);
    assert_eq!(host(&outputs[1]), vec![1.0]);

    let negative = [
        f64_scalar(&device, -1.0),
        f64_scalar(&device, 1.0),
        f64_scalar(&device, 0.0),
    ];
    let outputs = graphed.call(&negative)?;
    assert_eq!(host(&outputs[0]), vec![1.0]);
    assert_eq!(host(&outputs[1]), vec![-1.0]);
    Ok(())
}

#[test]
fn eager_predicates_stop_at_first_hit() -> Result<()> {
    let device = device();
    let eager = mock(&device);
    let evaluated = Cell::new(0);
    let operands = [f64_scalar(&device, 5.0)];
    let count = |threshold: f64| {
        let evaluated = &evaluated;
        move |ops: &[DeviceArray]| {
            evaluated.set(evaluated.get() + 1);
            ops[0].lt_scalar(threshold)
        }
    };
    let taken = Cell::new(None);
    eager.multicond(
        &operands,
        vec![
            Branch::when(count(1.0), |_| {
                taken.set(Some(1));
                Ok(())
            }),
            Branch::when(count(10.0), |_| {
                taken.set(Some(2));
                Ok(())
            }),
            Branch::when(count(100.0), |_| {
                taken.set(Some(3));
                Ok(())
            }),
            Branch::otherwise(|_| {
                taken.set(Some(4));
                Ok(())
            }),
        ],
    )?;
    assert_eq!(taken.get(), Some(2));
    assert_eq!(evaluated.get(), 2);
    Ok(())
}

#[test]
fn replayed_predicates_stop_at_first_hit() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    // The second predicate gathers out of bounds whenever the first one holds, so evaluating it
    // on a replay would fault the device.
    let graphed = converter.graphify(|args| {
        converter.multicond(
            args,
            vec![
                Branch::when(
                    |ops| ops[0].lt_scalar(3),
                    |ops| ops[2].assign(&ops[1].take(&ops[0])?),
                ),
                Branch::when(
                    |ops| ops[1].take(&ops[0].add_scalar(3)?)?.gt_scalar(0.0),
                    |ops| ops[2].fill(1.0),
                ),
                Branch::otherwise(|ops| ops[2].fill(-1.0)),
            ],
        )?;
        Ok(vec![args[2].clone()])
    });

    let table = f64s(&device, &[10.0, 20.0, 30.0]);
    for index in [1, 2, 0] {
        let args = vec![i64_scalar(&device, index), table.clone(), f64_scalar(&device, 0.0)];
        let output = graphed.call(&args)?;
        assert_eq!(host(&output[0]), vec![10.0 * (index + 1) as f64]);
    }
    assert!(device.fault().is_none());
    Ok(())
}

#[test]
fn default_branch_must_come_last() {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let operands = [f64_scalar(&device, 1.0)];
    let misplaced = || {
        vec![
            Branch::otherwise(|_: &[DeviceArray]| Ok(())),
            Branch::when(|ops: &[DeviceArray]| ops[0].gt_scalar(0.0), |_| Ok(())),
        ]
    };
    assert!(matches!(
        graph_error(converter.multicond(&operands, misplaced())),
        GraphError::CaptureStructural(_)
    ));
    assert!(matches!(
        graph_error(eager.multicond(&operands, misplaced())),
        GraphError::CaptureStructural(_)
    ));
    let doubled = vec![
        Branch::otherwise(|_: &[DeviceArray]| Ok(())),
        Branch::otherwise(|_: &[DeviceArray]| Ok(())),
    ];
    assert!(matches!(
        graph_error(eager.multicond(&operands, doubled)),
        GraphError::CaptureStructural(_)
    ));
}

#[test]
fn branch_predicate_must_hold_one_element() {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| {
        converter.cond(args, |ops| ops[0].gt_scalar(0.0), |_| Ok(()))?;
        Ok(Vec::new())
    });
    let args = [f64s(&device, &[1.0, 2.0, 3.0])];
    assert!(matches!(
        graph_error(graphed.call(&args)),
        GraphError::CaptureStructural(_)
    ));
}

#[test]
fn empty_branch_list_is_a_no_op() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| {
        converter.multicond(args, Vec::new())?;
        Ok(vec![args[0].clone()])
    });
    let args = [f64_scalar(&device, 4.0)];
    assert_eq!(host(&graphed.call(&args)?[0]), vec![4.0]);
    Ok(())
}

/// `[flag, out]`: adds `constant` to `out` when `flag` is set.
fn add_constant_if<C: GraphConverter>(
    converter: &C,
    constant: &DeviceArray,
    args: &[DeviceArray],
) -> Result<Vec<DeviceArray>> {
    converter.cond(
        args,
        |ops| Ok(ops[0].clone()),
        |ops| ops[1].assign(&ops[1].add(constant)?),
    )?;
    Ok(vec![args[1].clone()])
}

#[test]
fn cond_adds_constant_only_when_predicate_holds() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let constant = f64s(&device, &[1.5, -2.0, 4.0]);
    let graphed = converter.graphify(|args| add_constant_if(&converter, &constant, args));

    for (flag, expected) in [(true, vec![1.5, -2.0, 4.0]), (false, vec![0.0; 3])] {
        let fresh = || -> Result<Vec<DeviceArray>> {
            Ok(vec![
                DeviceArray::scalar(&device, DType::Bool, flag)?,
                DeviceArray::zeros(&device, [3], DType::F64)?,
            ])
        };
        let captured = graphed.call(&fresh()?)?;
        let reference = add_constant_if(&eager, &constant, &fresh()?)?;
        assert_eq!(host(&captured[0]), expected, "flag = {flag}");
        assert_eq!(host(&reference[0]), expected, "flag = {flag}");
    }
    Ok(())
}

/// `[flags, out]`: the first set flag picks its constant, otherwise the default constant.
fn first_flag_wins<C: GraphConverter>(
    converter: &C,
    args: &[DeviceArray],
) -> Result<Vec<DeviceArray>> {
    let pick = |value: f64| move |ops: &[DeviceArray]| ops[1].fill(value);
    converter.multicond(
        args,
        vec![
            Branch::when(|ops| ops[0].index(0), pick(10.0)),
            Branch::when(|ops| ops[0].index(1), pick(20.0)),
            Branch::when(|ops| ops[0].index(2), pick(30.0)),
            Branch::otherwise(pick(40.0)),
        ],
    )?;
    Ok(vec![args[1].clone()])
}

#[test]
fn multicond_selects_first_true_flag_for_every_combination() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let eager = mock(&device);
    let graphed = converter.graphify(|args| first_flag_wins(&converter, args));

    for bits in 0..8u8 {
        let flags: Vec<bool> = (0..3).map(|k| bits & (1 << k) != 0).collect();
        let expected = match flags.iter().position(|&flag| flag) {
            Some(index) => 10.0 * (index + 1) as f64,
            None => 40.0,
        };
        let fresh = || -> Result<Vec<DeviceArray>> {
            Ok(vec![
                DeviceArray::from_bool(&device, [3], flags.clone())?,
                DeviceArray::zeros(&device, [2], DType::F64)?,
            ])
        };
        let captured = graphed.call(&fresh()?)?;
        let reference = first_flag_wins(&eager, &fresh()?)?;
        assert_eq!(host(&captured[0]), vec![expected; 2], "flags = {flags:?}");
        assert_eq!(host(&reference[0]), vec![expected; 2], "flags = {flags:?}");
    }
    assert_eq!(converter.stats().replays, 7);
    Ok(())
}
