//! Auto-reset events backing every blocking point between the ingest caller,
//! the coordinator thread and the pipeline workers. Stopping an event wakes
//! all waiters permanently; waiters turn that into a clean thread exit.

use std::sync::{Condvar, Mutex};

#[derive(Debug)]
struct EventState {
    raised: bool,
    stopped: bool,
}

#[derive(Debug)]
pub(crate) struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    pub fn new(raised: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                raised,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Raise the event, releasing exactly one future or pending wait.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.raised = true;
        self.cond.notify_all();
    }

    /// Block until the event is raised, then consume it. Returns `false`
    /// once the event has been stopped.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while !state.raised && !state.stopped {
            state = self.cond.wait(state).unwrap();
        }
        if state.stopped {
            return false;
        }
        state.raised = false;
        true
    }

    /// Wake every current and future waiter with a stopped outcome.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_consumed() {
        let ev = Event::new(false);
        ev.signal();
        assert!(ev.wait());

        // Auto-reset: a second wait must block until the next signal.
        let ev = Arc::new(ev);
        let ev2 = Arc::clone(&ev);
        let waiter = thread::spawn(move || ev2.wait());
        thread::sleep(std::time::Duration::from_millis(10));
        ev.signal();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn initially_raised_event_passes_first_wait() {
        let ev = Event::new(true);
        assert!(ev.wait());
    }

    #[test]
    fn stop_wakes_waiters() {
        let ev = Arc::new(Event::new(false));
        let ev2 = Arc::clone(&ev);
        let waiter = thread::spawn(move || ev2.wait());
        thread::sleep(std::time::Duration::from_millis(10));
        ev.stop();
        assert!(!waiter.join().unwrap());
        // Stopped events stay stopped.
        assert!(!ev.wait());
    }
}
