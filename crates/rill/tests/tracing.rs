use rill::{Context, Object, RecordingTracer, TraceEvent};

#[test]
fn recording_tracer_sees_balanced_calls() {
    let mut ctx = Context::new();
    let mut tracer = RecordingTracer::new();
    ctx.execute_traced("function f(n) { return n + 1; } f(1); f(2);", &mut tracer)
        .unwrap();

    assert_eq!(tracer.call_count(), 2);
    let returns = tracer
        .events
        .iter()
        .filter(|event| matches!(event, TraceEvent::Return { .. }))
        .count();
    assert_eq!(returns, 2);
    assert!(tracer.events.iter().any(|event| matches!(event, TraceEvent::Statement { .. })));
}

#[test]
fn skipped_branches_are_not_traced_as_calls() {
    let mut ctx = Context::new();
    let mut tracer = RecordingTracer::new();
    ctx.execute_traced("function f() { return 1; } if (false) f();", &mut tracer)
        .unwrap();
    assert_eq!(tracer.call_count(), 0);
}

#[test]
fn native_invocations_are_traced() {
    let mut ctx = Context::new();
    ctx.register_native("function ping()", |frame| frame.set_return(&Object::Int(1)))
        .unwrap();
    let mut tracer = RecordingTracer::new();
    ctx.execute_traced("ping();", &mut tracer).unwrap();
    assert!(
        tracer
            .events
            .iter()
            .any(|event| matches!(event, TraceEvent::Native { name } if name == "ping"))
    );
}

#[test]
fn call_depth_nests() {
    let mut ctx = Context::new();
    let mut tracer = RecordingTracer::new();
    ctx.execute_traced("function inner() { return 1; } function outer() { return inner(); } outer();", &mut tracer)
        .unwrap();
    let depths: Vec<usize> = tracer
        .events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Call { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(depths, vec![2, 3]);
}
