//! Timeouts and animation frames in the "submit now, callback later" model.
//!
//! Nothing fires on its own: the embedder drives time with
//! [`Timers::advance`] and [`Timers::frame`]. Callbacks run with no borrow
//! of the timer state held, so they may schedule or cancel freely.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::bridge::Bridge;
use crate::error::HostError;
use crate::heap::Handle;
use crate::host::{JsFunction, JsValue};
use crate::linker::Linker;

struct Timeout {
    id: i32,
    due: f64,
    callback: JsFunction,
}

#[derive(Default)]
struct TimerState {
    now: f64,
    next_id: i32,
    // Kept in submission order; ties on `due` fire in that order.
    timeouts: Vec<Timeout>,
    frames: Vec<(i32, JsFunction)>,
    errors: Vec<HostError>,
}

impl TimerState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn pop_due(&mut self, until: f64) -> Option<Timeout> {
        let mut best: Option<usize> = None;
        for (i, t) in self.timeouts.iter().enumerate() {
            if t.due <= until && best.is_none_or(|b| t.due < self.timeouts[b].due) {
                best = Some(i);
            }
        }
        best.map(|i| self.timeouts.remove(i))
    }
}

/// Host timer queue shared between the registered imports and the embedder.
#[derive(Clone, Default)]
pub struct Timers {
    state: Rc<RefCell<TimerState>>,
}

impl std::fmt::Debug for Timers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Timers")
            .field("now", &state.now)
            .field("timeouts", &state.timeouts.len())
            .field("frames", &state.frames.len())
            .finish()
    }
}

fn callback(bridge: &Bridge, h: Handle, op: &str) -> Result<JsFunction, HostError> {
    match bridge.get_object(h)? {
        JsValue::Function(f) => Ok(f),
        other => Err(HostError::type_error(format!(
            "{op}: callback must be a function, got {}",
            other.type_of()
        ))),
    }
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the timer imports in the linker's import module.
    pub fn register(&self, linker: &mut Linker) {
        let m = linker.import_module().to_string();

        let timers = self.clone();
        linker.fallible(&m, "set_timeout", move |bridge, (h, delay): (Handle, i32)| {
            let f = callback(bridge, h, "setTimeout")?;
            Ok((timers.set_timeout(f, delay),))
        });
        let timers = self.clone();
        linker.func_wrap(&m, "clear_timeout", move |_, (id,): (i32,)| {
            timers.clear_timeout(id);
            Ok(())
        });
        let timers = self.clone();
        linker.fallible(&m, "request_animation_frame", move |bridge, (h,): (Handle,)| {
            let f = callback(bridge, h, "requestAnimationFrame")?;
            Ok((timers.request_animation_frame(f),))
        });
        let timers = self.clone();
        linker.func_wrap(&m, "cancel_animation_frame", move |_, (id,): (i32,)| {
            timers.cancel_animation_frame(id);
            Ok(())
        });
    }

    /// Schedule `callback` to run `delay_ms` from now. Negative delays
    /// count as zero.
    pub fn set_timeout(&self, callback: JsFunction, delay_ms: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        let due = state.now + f64::from(delay_ms.max(0));
        state.timeouts.push(Timeout { id, due, callback });
        trace!(id, due, "timeout scheduled");
        id
    }

    /// Cancel a pending timeout. Unknown or already fired ids are ignored.
    pub fn clear_timeout(&self, id: i32) {
        self.state.borrow_mut().timeouts.retain(|t| t.id != id);
    }

    pub fn request_animation_frame(&self, callback: JsFunction) -> i32 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.frames.push((id, callback));
        id
    }

    pub fn cancel_animation_frame(&self, id: i32) {
        self.state.borrow_mut().frames.retain(|(frame, _)| *frame != id);
    }

    /// Move the clock forward by `ms`, firing every timeout that comes due
    /// in due order, including ones scheduled by callbacks along the way.
    pub fn advance(&self, ms: f64) -> usize {
        let target = self.state.borrow().now + ms.max(0.0);
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let next = state.pop_due(target);
                if let Some(t) = &next {
                    state.now = t.due;
                }
                next
            };
            let Some(timeout) = next else { break };
            trace!(id = timeout.id, at = timeout.due, "timeout fired");
            self.run(&timeout.callback, &[]);
            fired += 1;
        }
        self.state.borrow_mut().now = target;
        fired
    }

    /// Run one animation frame at `timestamp`. Callbacks requested while
    /// the frame runs wait for the next one.
    pub fn frame(&self, timestamp: f64) -> usize {
        let frames = std::mem::take(&mut self.state.borrow_mut().frames);
        debug!(timestamp, callbacks = frames.len(), "animation frame");
        for (_, callback) in &frames {
            self.run(callback, &[JsValue::Number(timestamp)]);
        }
        frames.len()
    }

    fn run(&self, callback: &JsFunction, args: &[JsValue]) {
        if let Err(err) = callback.call(args) {
            debug!(%err, "timer callback failed");
            self.state.borrow_mut().errors.push(err);
        }
    }

    /// Current clock in milliseconds.
    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    pub fn pending_timeouts(&self) -> usize {
        self.state.borrow().timeouts.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.state.borrow().frames.len()
    }

    /// Drain the failures raised by callbacks so far.
    pub fn take_errors(&self) -> Vec<HostError> {
        std::mem::take(&mut self.state.borrow_mut().errors)
    }
}
