mod common;

use anyhow::Result;
use devgraph::{
    CapturingConverter, ConverterOptions, DeviceArray, FallbackPolicy, GraphConverter,
    GraphError, SignaturePolicy,
};

use common::{capturing, device, f64_scalar, f64s, graph_error, host, hosts, legacy_device};

fn scale_until_large<C: GraphConverter>(
    converter: &C,
    args: &[DeviceArray],
) -> Result<Vec<DeviceArray>> {
    let state = converter.while_loop(
        |state| state[0].sum()?.lt_scalar(100.0),
        |state| Ok(vec![state[0].mul_scalar(3.0)?]),
        [args[0].clone()],
    )?;
    Ok(state.into_vec())
}

#[test]
fn strict_policy_rejects_new_signatures() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| scale_until_large(&converter, args));

    let first = graphed.call(&[f64s(&device, &[1.0, 2.0])])?;
    assert_eq!(hosts(&first), vec![vec![81.0, 162.0]]);
    match graph_error(graphed.call(&[f64s(&device, &[1.0, 2.0, 3.0])])) {
        GraphError::GraphRebind { expected, found } => {
            assert_eq!(expected, "(f64[2])");
            assert_eq!(found, "(f64[3])");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(graphed.captured_graphs().len(), 1);
    Ok(())
}

#[test]
fn aliasing_is_part_of_the_signature() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| Ok(vec![args[0].add(&args[1])?]));

    let (a, b) = (f64s(&device, &[1.0]), f64s(&device, &[2.0]));
    assert_eq!(host(&graphed.call(&[a.clone(), b])?[0]), vec![3.0]);
    assert!(matches!(
        graph_error(graphed.call(&[a.clone(), a])),
        GraphError::GraphRebind { .. }
    ));
    Ok(())
}

#[test]
fn recapture_policy_keeps_an_lru_per_function() -> Result<()> {
    let device = device();
    let options = ConverterOptions::default()
        .with_signature_policy(SignaturePolicy::Recapture)
        .with_cache_capacity(2);
    let converter = CapturingConverter::with_options(&device, options)?;
    let graphed = converter.graphify(|args| scale_until_large(&converter, args));

    for len in [1, 2, 3] {
        let args = [f64s(&device, &vec![1.0; len])];
        let expected = if len == 1 { 243.0 } else { 81.0 };
        assert_eq!(host(&graphed.call(&args)?[0]), vec![expected; len]);
    }
    assert_eq!(graphed.captured_graphs().len(), 2);
    assert_eq!(converter.stats().evictions, 1);

    // Length 3 is cached, length 1 was evicted and is captured again.
    graphed.call(&[f64s(&device, &[1.0, 1.0, 1.0])])?;
    graphed.call(&[f64s(&device, &[5.0])])?;
    let stats = converter.stats();
    assert_eq!(stats.captures, 4);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 4);
    assert_eq!(stats.evictions, 2);
    Ok(())
}

#[test]
fn dropping_a_graphified_function_releases_its_graphs() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    {
        let first = converter.graphify(|args| scale_until_large(&converter, args));
        let second = converter.graphify(|args| Ok(vec![args[0].neg()?]));
        first.call(&[f64s(&device, &[1.0])])?;
        second.call(&[f64s(&device, &[1.0])])?;
        assert_ne!(first.id(), second.id());
        assert_eq!(converter.cached_graph_count(), 2);
        drop(first);
        assert_eq!(converter.cached_graph_count(), 1);
    }
    assert_eq!(converter.cached_graph_count(), 0);
    Ok(())
}

#[test]
fn nested_invocation_is_rejected() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let inner = converter.graphify(|args| Ok(vec![args[0].add_scalar(1.0)?]));
    let outer = converter.graphify(|args| inner.call(args));
    assert!(matches!(
        graph_error(outer.call(&[f64_scalar(&device, 1.0)])),
        GraphError::CaptureInProgress
    ));
    assert!(!converter.capture_stream().is_capturing());
    assert_eq!(host(&inner.call(&[f64_scalar(&device, 1.0)])?[0]), vec![2.0]);
    Ok(())
}

#[test]
fn legacy_devices_fall_back_to_eager_execution() -> Result<()> {
    let device = legacy_device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| scale_until_large(&converter, args));
    for _ in 0..3 {
        let out = graphed.call(&[f64s(&device, &[2.0])])?;
        assert_eq!(host(&out[0]), vec![162.0]);
    }
    let stats = converter.stats();
    assert_eq!(stats.eager_fallbacks, 3);
    assert_eq!(stats.host_invocations, 3);
    assert_eq!(stats.captures, 0);
    assert_eq!(converter.cached_graph_count(), 0);
    Ok(())
}

#[test]
fn legacy_devices_can_refuse_instead() {
    let device = legacy_device();
    let options = ConverterOptions::default().with_fallback(FallbackPolicy::Error);
    let converter = CapturingConverter::with_options(&device, options).expect("converter");
    let graphed = converter.graphify(|args| scale_until_large(&converter, args));
    assert!(matches!(
        graph_error(graphed.call(&[f64s(&device, &[2.0])])),
        GraphError::CaptureUnsupported { .. }
    ));
}

#[test]
fn force_eager_never_captures() -> Result<()> {
    let device = device();
    let options = ConverterOptions::default().with_force_eager(true);
    let converter = CapturingConverter::with_options(&device, options)?;
    let graphed = converter.graphify(|args| scale_until_large(&converter, args));
    graphed.call(&[f64s(&device, &[50.0, 60.0])])?;
    graphed.call(&[f64s(&device, &[1.0])])?;
    let stats = converter.stats();
    assert_eq!(stats.captures, 0);
    assert_eq!(stats.eager_fallbacks, 2);
    Ok(())
}

#[test]
fn straight_line_functions_replay_without_control_flow() -> Result<()> {
    let device = device();
    let converter = capturing(&device);
    let graphed = converter.graphify(|args| {
        let centred = args[0].sub(&args[0].mean()?)?;
        Ok(vec![centred.mul(&centred)?.mean()?])
    });
    assert_eq!(host(&graphed.call(&[f64s(&device, &[1.0, 3.0])])?[0]), vec![1.0]);
    assert_eq!(host(&graphed.call(&[f64s(&device, &[0.0, 4.0])])?[0]), vec![4.0]);
    let graph = &graphed.captured_graphs()[0];
    assert!(!graph.has_control_flow());
    assert_eq!(graph.kernel_count(), 4);
    assert_eq!(graph.signature().arity(), 1);
    Ok(())
}
