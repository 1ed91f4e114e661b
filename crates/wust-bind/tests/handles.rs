mod harness;

use harness::{setup, wbg};
use proptest::prelude::*;
use wust_bind::{BridgeError, Handle, HandleTable, JsObject, JsValue};

#[test]
fn objects_round_trip_through_handles() -> Result<(), anyhow::Error> {
    let (_guest, bridge) = setup();
    let obj = JsValue::from(JsObject::new("WebGLBuffer"));
    let h = bridge.add_object(obj.clone());
    assert!(h.index() >= 36);
    assert_eq!(bridge.get_object(h)?, obj);

    let h2: (Handle,) = wbg(&bridge, "__wbindgen_object_clone_ref", (h,))?;
    assert_ne!(h2.0, h);
    assert_eq!(bridge.get_object(h2.0)?, obj);

    wbg::<_, ()>(&bridge, "__wbindgen_object_drop_ref", (h,))?;
    assert_eq!(bridge.get_object(h), Err(BridgeError::InvalidHandle(h.0)));
    assert_eq!(bridge.get_object(h2.0)?, obj);
    Ok(())
}

#[test]
fn dropping_a_free_slot_is_an_error() {
    let (_guest, bridge) = setup();
    let h = bridge.add_object(JsValue::from(1.0));
    bridge.drop_object(h).unwrap();
    assert_eq!(bridge.drop_object(h), Err(BridgeError::InvalidHandle(h.0)));
}

#[test]
fn constants_survive_module_drops() -> Result<(), anyhow::Error> {
    let (_guest, bridge) = setup();
    for h in [Handle::UNDEFINED, Handle::NULL, Handle::TRUE, Handle::FALSE] {
        for _ in 0..3 {
            wbg::<_, ()>(&bridge, "__wbindgen_object_drop_ref", (h,))?;
        }
    }
    assert_eq!(bridge.get_object(Handle::UNDEFINED)?, JsValue::Undefined);
    assert_eq!(bridge.get_object(Handle::NULL)?, JsValue::Null);
    assert_eq!(bridge.get_object(Handle::TRUE)?, JsValue::Bool(true));
    assert_eq!(bridge.get_object(Handle::FALSE)?, JsValue::Bool(false));
    assert_eq!(bridge.live_objects(), 0);
    Ok(())
}

#[test]
fn unlink_releases_everything() {
    let (_guest, bridge) = setup();
    let h = bridge.add_object(JsValue::from("x"));
    bridge.unlink();
    assert!(!bridge.is_live(h));
    assert_eq!(bridge.live_objects(), 0);
    assert!(matches!(
        bridge.call_import("__wbindgen_object_drop_ref", &[wust_bind::Val::I32(h.0 as i32)]),
        Err(wust_bind::HostError::Bridge(BridgeError::Unlinked))
    ));
}

#[derive(Debug, Clone)]
enum Op {
    Store(f64),
    Drop(usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![any::<f64>().prop_map(Op::Store), any::<usize>().prop_map(Op::Drop)],
        0..200,
    )
}

proptest! {
    #[test]
    fn table_matches_a_model(ops in ops()) {
        let mut table = HandleTable::new();
        let mut model: Vec<(Handle, JsValue)> = Vec::new();
        for op in ops {
            match op {
                Op::Store(n) => {
                    let h = table.store(JsValue::Number(n));
                    prop_assert!(model.iter().all(|(live, _)| *live != h), "reused occupied slot {h}");
                    model.push((h, JsValue::Number(n)));
                }
                Op::Drop(i) if !model.is_empty() => {
                    let (h, _) = model.remove(i % model.len());
                    prop_assert!(table.drop(h).is_ok());
                    prop_assert_eq!(table.load(h), Err(BridgeError::InvalidHandle(h.0)));
                }
                Op::Drop(_) => {}
            }
            for (h, v) in &model {
                prop_assert_eq!(&table.load(*h)?, v);
            }
            prop_assert_eq!(table.live(), model.len());
        }
    }

    #[test]
    fn refilling_never_passes_the_high_water_mark(n in 1usize..100, seed in any::<u64>()) {
        let mut table = HandleTable::new();
        let mut handles: Vec<Handle> = (0..n).map(|i| table.store(JsValue::from(i as i32))).collect();
        let high_water = table.len();

        // Deterministic shuffle from the seed.
        let mut state = seed | 1;
        for i in (1..handles.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            handles.swap(i, (state % (i as u64 + 1)) as usize);
        }
        for h in handles {
            table.drop(h)?;
        }
        for i in 0..n {
            table.store(JsValue::from(i as i32));
        }
        prop_assert_eq!(table.len(), high_water);
        prop_assert_eq!(table.live(), n);
    }
}
