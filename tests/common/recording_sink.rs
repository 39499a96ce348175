use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use tenderbft::{
    consensus::{
        context::{ContextFault, DecisionSink},
        types::Decision,
    },
    types::data_types::Height,
};

/// A [`DecisionSink`] that remembers everything it is handed.
#[derive(Default)]
pub(crate) struct RecordingSink {
    decisions: Mutex<Vec<Decision>>,
    faults: Mutex<Vec<(Height, ContextFault)>>,
}

impl RecordingSink {
    pub(crate) fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().unwrap().clone()
    }

    pub(crate) fn faults(&self) -> Vec<(Height, ContextFault)> {
        self.faults.lock().unwrap().clone()
    }
}

impl DecisionSink for RecordingSink {
    fn decide(&self, decision: Decision) {
        self.decisions.lock().unwrap().push(decision);
    }

    fn report(&self, height: Height, fault: ContextFault) {
        self.faults.lock().unwrap().push((height, fault));
    }
}

/// Poll `condition` every millisecond until it holds, panicking after `timeout`.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(1));
    }
}
