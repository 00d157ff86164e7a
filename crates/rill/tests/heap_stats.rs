use pretty_assertions::assert_eq;
use rill::{Context, Object};

#[test]
fn fresh_context_holds_only_the_root() {
    let ctx = Context::new();
    let stats = ctx.heap_stats();
    assert_eq!(stats.live_objects, 1);
    assert_eq!(stats.objects_by_type.get("Object"), Some(&1));
}

#[test]
fn execution_releases_its_temporaries() {
    let mut ctx = Context::new();
    ctx.execute("1 + 2 * 3;").unwrap();
    // Nothing was declared, so only the root survives.
    assert_eq!(ctx.heap_stats().live_objects, 1);

    ctx.execute("var a = 1;").unwrap();
    assert_eq!(ctx.heap_stats().live_objects, 2);
}

#[test]
fn loops_do_not_grow_the_heap() {
    let mut ctx = Context::new();
    let script = "var s = 0; var i = 0; while (i < 50) { s = s + i; i = i + 1; }";
    ctx.execute(script).unwrap();
    let before = ctx.heap_stats();
    ctx.execute(script).unwrap();
    let after = ctx.heap_stats();
    assert!(before.diff(&after).is_empty(), "{}", before.diff(&after));
}

#[test]
fn call_frames_are_balanced() {
    let mut ctx = Context::new();
    ctx.execute("function f(n) { if (n < 1) return 0; return f(n - 1); }").unwrap();
    let before = ctx.heap_stats();
    ctx.execute("f(10);").unwrap();
    let after = ctx.heap_stats();
    assert!(before.diff(&after).is_empty(), "{}", before.diff(&after));
}

#[test]
fn failed_calls_destroy_their_frames() {
    let mut ctx = Context::new();
    ctx.execute("function f() { var local = 1; return local / 0; }").unwrap();
    let before = ctx.heap_stats();
    assert!(ctx.execute("f();").is_err());
    let after = ctx.heap_stats();
    assert!(before.diff(&after).is_empty(), "{}", before.diff(&after));
}

#[test]
fn failed_statements_release_temporaries() {
    let mut ctx = Context::new();
    let before = ctx.heap_stats();
    assert!(ctx.execute("1 + (2 * (3 / 0));").is_err());
    let after = ctx.heap_stats();
    assert!(before.diff(&after).is_empty(), "{}", before.diff(&after));
}

#[test]
fn globals_account_for_their_trees() {
    let mut ctx = Context::new();
    ctx.execute("var o; o.a = 1; o.b = 2;").unwrap();
    // root, o, and two children
    assert_eq!(ctx.heap_stats().live_objects, 4);
    ctx.remove_global("o").unwrap();
    assert_eq!(ctx.heap_stats().live_objects, 1);
}

#[test]
fn set_global_replaces_without_leaking() {
    let mut ctx = Context::new();
    ctx.set_global("cfg", &Object::Map(vec![("port".to_owned(), Object::Int(1))]))
        .unwrap();
    let before = ctx.heap_stats();
    ctx.set_global("cfg", &Object::Map(vec![("port".to_owned(), Object::Int(2))]))
        .unwrap();
    let after = ctx.heap_stats();
    assert!(before.diff(&after).is_empty(), "{}", before.diff(&after));
    assert_eq!(
        ctx.get_global("cfg"),
        Some(Object::Map(vec![("port".to_owned(), Object::Int(2))]))
    );
}

#[test]
fn freed_slots_are_recycled() {
    let mut ctx = Context::new();
    ctx.execute("var i = 0; while (i < 100) { i = i + 1; }").unwrap();
    let total_after_first = ctx.heap_stats().total_slots;
    ctx.execute("var j = 0; while (j < 100) { j = j + 1; }").unwrap();
    // The second loop reuses the slots the first one freed (plus one new
    // global), rather than growing the arena per iteration.
    let total_after_second = ctx.heap_stats().total_slots;
    assert!(
        total_after_second <= total_after_first + 2,
        "arena grew from {total_after_first} to {total_after_second}"
    );
}

#[test]
fn sharing_survives_by_reference_argument_passing() {
    let mut ctx = Context::new();
    ctx.execute("var o; o.n = 1; function touch(x) { x.n = x.n + 1; } touch(o); touch(o);")
        .unwrap();
    assert_eq!(ctx.evaluate("o.n;").unwrap(), Object::Int(3));
}
