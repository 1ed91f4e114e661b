mod harness;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use harness::{TestGuest, call, linker, try_wbg, wbg};
use proptest::prelude::*;
use wust_bind::{AbiType, Bridge, BridgeError, ClosureAbi, Handle, HostError, JsFunction, JsValue, Val};

const DTOR: u32 = 3;
const ADAPTER: u32 = 11;
const A: u32 = 100;
const B: u32 = 200;

/// Link a guest with one closure constructor taking `abi`.
fn link(abi: ClosureAbi) -> (Rc<TestGuest>, Bridge) {
    let guest = TestGuest::new();
    let mut linker = linker();
    linker.closure_wrapper("__wbindgen_closure_wrapper7", DTOR, ADAPTER, abi);
    let bridge = linker.instantiate(guest.clone());
    (guest, bridge)
}

fn make(bridge: &Bridge) -> anyhow::Result<Handle> {
    let (h,): (Handle,) = wbg(bridge, "__wbindgen_closure_wrapper7", (A, B, 0i32))?;
    Ok(h)
}

fn function(bridge: &Bridge, h: Handle) -> JsFunction {
    match bridge.get_object(h) {
        Ok(JsValue::Function(f)) => f,
        other => panic!("expected a function at {h}, got {other:?}"),
    }
}

#[test]
fn invocation_passes_environment_and_handles() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::new([AbiType::Object, AbiType::Number], None));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    guest.on_invoke(ADAPTER, move |bridge, a, b, args| {
        let [Val::I32(h), Val::F64(n)] = args else {
            panic!("unexpected args {args:?}");
        };
        let event = bridge.take_object(Handle(*h as u32))?;
        log.borrow_mut().push((a, b, event.debug_string(), *n));
        Ok(vec![])
    });

    let h = make(&bridge)?;
    let f = function(&bridge, h);
    call(&f, &[JsValue::from("click"), JsValue::from(2.5)])?;
    call(&f, &[JsValue::from("keyup")])?;

    let seen = seen.borrow();
    assert_eq!(seen[0], (A, B, "\"click\"".to_string(), 2.5));
    assert_eq!(seen[1].2, "\"keyup\"");
    assert!(seen[1].3.is_nan(), "missing number arguments arrive as NaN");
    assert_eq!(guest.destroyed_count(), 0);
    assert_eq!(bridge.live_objects(), 1);
    Ok(())
}

#[test]
fn results_are_lifted() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::new([AbiType::Number], Some(AbiType::Number)));
    guest.on_invoke(ADAPTER, |_, _, _, args| match args {
        [Val::F64(n)] => Ok(vec![Val::F64(n * 2.0)]),
        _ => Err(BridgeError::Guest("bad args".into()).into()),
    });
    let f = function(&bridge, make(&bridge)?);
    assert_eq!(call(&f, &[JsValue::from(21.0)])?, JsValue::from(42.0));
    Ok(())
}

#[test]
fn dropping_an_idle_closure_releases_it_once() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    guest.on_invoke(ADAPTER, |_, _, _, _| Ok(vec![]));
    let h = make(&bridge)?;
    let f = function(&bridge, h);

    let (released,): (bool,) = wbg(&bridge, "__wbindgen_cb_drop", (h,))?;
    assert!(released);
    assert_eq!(*guest.destroyed.borrow(), vec![(DTOR, A, B)]);
    assert!(!bridge.is_live(h));

    assert!(matches!(
        f.call(&[]),
        Err(HostError::Bridge(BridgeError::ClosureReentered))
    ));
    assert_eq!(guest.destroyed_count(), 1);
    Ok(())
}

#[test]
fn drop_inside_the_body_defers_release_to_completion() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    let handle = Rc::new(Cell::new(Handle::NONE));
    let during = Rc::new(Cell::new(None));
    let (h_cell, during_cell) = (Rc::clone(&handle), Rc::clone(&during));
    let probe = Rc::clone(&guest);
    guest.on_invoke(ADAPTER, move |bridge, a, _, _| {
        assert_eq!(a, A);
        let (released,): (bool,) = try_wbg(bridge, "__wbindgen_cb_drop", (h_cell.get(),))?;
        during_cell.set(Some((released, probe.destroyed_count())));
        Ok(vec![])
    });

    let h = make(&bridge)?;
    handle.set(h);
    call(&function(&bridge, h), &[])?;

    assert_eq!(during.get(), Some((false, 0)), "released while the body was running");
    assert_eq!(*guest.destroyed.borrow(), vec![(DTOR, A, B)]);
    Ok(())
}

#[test]
fn recursive_invocation_is_refused() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    let handle = Rc::new(Cell::new(Handle::NONE));
    let inner = Rc::new(RefCell::new(None));
    let (h_cell, inner_cell) = (Rc::clone(&handle), Rc::clone(&inner));
    guest.on_invoke(ADAPTER, move |bridge, _, _, _| {
        if inner_cell.borrow().is_none() {
            let f = function(bridge, h_cell.get());
            let outcome = f.call(&[]).map(|_| ()).map_err(HostError::into_bridge);
            *inner_cell.borrow_mut() = Some(outcome);
        }
        Ok(vec![])
    });

    let h = make(&bridge)?;
    handle.set(h);
    let f = function(&bridge, h);
    call(&f, &[])?;
    assert_eq!(*inner.borrow(), Some(Err(BridgeError::ClosureReentered)));
    // The outer call restored the environment.
    call(&f, &[])?;
    assert_eq!(guest.destroyed_count(), 0);
    Ok(())
}

#[test]
fn body_faults_still_settle_the_count() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    let handle = Rc::new(Cell::new(Handle::NONE));
    let h_cell = Rc::clone(&handle);
    guest.on_invoke(ADAPTER, move |bridge, _, _, _| {
        bridge.drop_closure(h_cell.get())?;
        Err(HostError::error("body failed"))
    });
    let h = make(&bridge)?;
    handle.set(h);
    let err = function(&bridge, h).call(&[]).unwrap_err();
    assert!(matches!(err, HostError::Thrown(_)));
    assert_eq!(guest.destroyed_count(), 1);
    Ok(())
}

#[test]
fn retained_references_release_on_the_last_drop() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    let h = make(&bridge)?;
    let h2 = bridge.retain_closure(h)?;
    assert!(!bridge.drop_closure(h)?);
    assert_eq!(guest.destroyed_count(), 0);
    assert!(bridge.drop_closure(h2)?);
    assert_eq!(guest.destroyed_count(), 1);
    Ok(())
}

#[test]
fn only_closures_can_be_dropped_as_closures() {
    let (_guest, bridge) = link(ClosureAbi::default());
    let h = bridge.add_object(JsValue::from(JsFunction::native("f", |_| Ok(JsValue::Null))));
    assert_eq!(bridge.drop_closure(h), Err(BridgeError::InvalidHandle(h.0)));
    assert!(bridge.is_live(h));
}

#[test]
fn trampolines_outliving_the_link_fail() -> Result<(), anyhow::Error> {
    let (guest, bridge) = link(ClosureAbi::default());
    guest.on_invoke(ADAPTER, |_, _, _, _| Ok(vec![]));
    let f = function(&bridge, make(&bridge)?);
    bridge.unlink();
    assert!(matches!(f.call(&[]), Err(HostError::Bridge(BridgeError::Unlinked))));
    drop(bridge);
    assert!(matches!(f.call(&[]), Err(HostError::Bridge(BridgeError::Unlinked))));
    assert_eq!(guest.destroyed_count(), 0);
    Ok(())
}

#[derive(Debug, Clone)]
enum Step {
    Invoke(usize),
    /// Invoke, and drop one reference from inside the body.
    InvokeDropping(usize),
    Retain(usize),
    Drop(usize),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            any::<usize>().prop_map(Step::Invoke),
            any::<usize>().prop_map(Step::InvokeDropping),
            any::<usize>().prop_map(Step::Retain),
            any::<usize>().prop_map(Step::Drop),
        ],
        1..40,
    )
}

proptest! {
    #[test]
    fn destructor_fires_exactly_once(steps in steps()) {
        let (guest, bridge) = link(ClosureAbi::default());
        let handles = Rc::new(RefCell::new(Vec::new()));
        let drop_in_body = Rc::new(Cell::new(false));
        let (shared, flag) = (Rc::clone(&handles), Rc::clone(&drop_in_body));
        guest.on_invoke(ADAPTER, move |bridge, a, _, _| {
            assert_ne!(a, 0, "body saw a checked-out environment");
            if flag.get() {
                let h = shared.borrow_mut().pop();
                if let Some(h) = h {
                    let released = bridge.drop_closure(h)?;
                    assert!(!released, "released under a running body");
                }
            }
            Ok(vec![])
        });

        let first = make(&bridge).map_err(|e| TestCaseError::fail(e.to_string()))?;
        handles.borrow_mut().push(first);

        for step in steps {
            let len = handles.borrow().len();
            if len == 0 {
                break;
            }
            match step {
                Step::Invoke(i) | Step::InvokeDropping(i) => {
                    drop_in_body.set(matches!(step, Step::InvokeDropping(_)));
                    let h = handles.borrow()[i % len];
                    let f = function(&bridge, h);
                    prop_assert!(f.call(&[]).is_ok());
                }
                Step::Retain(i) => {
                    let h = handles.borrow()[i % len];
                    let copy = bridge.retain_closure(h)?;
                    handles.borrow_mut().push(copy);
                }
                Step::Drop(i) => {
                    let h = handles.borrow_mut().remove(i % len);
                    let released = bridge.drop_closure(h)?;
                    prop_assert_eq!(released, handles.borrow().is_empty());
                }
            }
            let expected = usize::from(handles.borrow().is_empty());
            prop_assert_eq!(guest.destroyed_count(), expected);
        }
        if handles.borrow().is_empty() {
            prop_assert_eq!(&*guest.destroyed.borrow(), &vec![(DTOR, A, B)]);
        }
    }
}
