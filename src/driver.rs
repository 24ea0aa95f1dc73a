//! Background simulation thread.
//!
//! The [`Driver`] runs [`Simulator::tick`] in a loop on a dedicated thread.
//! After every tick the caller's `on_tick` callback runs on that thread with
//! the simulator locked, so it must stay cheap: it gates the next tick.
//! Stopping is cooperative; the cancellation flag is checked before each
//! tick and a tick always runs to completion.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::circuit::ComponentId;
use crate::error::ErrorCode;
use crate::solver::Simulator;

/// Lifecycle of the simulation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl DriverState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DriverState::Running,
            2 => DriverState::Stopping,
            _ => DriverState::Idle,
        }
    }
}

/// Owns the simulator and the thread ticking it.
#[derive(Debug)]
pub struct Driver {
    simulator: Arc<Mutex<Simulator>>,
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn lock(simulator: &Mutex<Simulator>) -> MutexGuard<'_, Simulator> {
    // A panicking callback poisons the lock; the simulator itself is intact
    simulator.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Driver {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator: Arc::new(Mutex::new(simulator)),
            state: Arc::new(AtomicU8::new(DriverState::Idle as u8)),
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == DriverState::Running
    }

    /// Lock the simulator, e.g. to edit the circuit between ticks.
    ///
    /// While the driver is running this waits for the current tick to
    /// finish; the thread yields after every tick so callers are not starved.
    pub fn lock(&self) -> MutexGuard<'_, Simulator> {
        lock(&self.simulator)
    }

    /// Shared handle to the simulator.
    pub fn simulator(&self) -> Arc<Mutex<Simulator>> {
        Arc::clone(&self.simulator)
    }

    /// Start ticking on a new thread, stopping any previous run first.
    ///
    /// `on_tick` runs after every successful tick; returning
    /// `ControlFlow::Break` ends the run. On a simulation error `on_error`
    /// is called once with the error code and offending component, then
    /// the run ends.
    pub fn start<T, E>(&mut self, mut on_tick: T, mut on_error: E)
    where
        T: FnMut(&Simulator) -> ControlFlow<()> + Send + 'static,
        E: FnMut(ErrorCode, Option<ComponentId>) + Send + 'static,
    {
        self.stop();

        self.cancel.store(false, Ordering::Release);
        self.state
            .store(DriverState::Running as u8, Ordering::Release);

        let simulator = Arc::clone(&self.simulator);
        let state = Arc::clone(&self.state);
        let cancel = Arc::clone(&self.cancel);

        self.handle = Some(thread::spawn(move || {
            debug!("simulation thread started");
            while !cancel.load(Ordering::Acquire) {
                let flow = {
                    let mut sim = lock(&simulator);
                    match sim.tick() {
                        Ok(()) => on_tick(&sim),
                        Err(err) => {
                            error!("simulation stopped at t={}: {err}", sim.time());
                            if let Some(code) = err.code() {
                                on_error(code, err.component());
                            }
                            ControlFlow::Break(())
                        }
                    }
                };
                if flow.is_break() {
                    break;
                }
                // The mutex is not fair; give a waiting `Driver::lock` a turn
                thread::yield_now();
            }
            state.store(DriverState::Idle as u8, Ordering::Release);
            debug!("simulation thread finished");
        }));
    }

    /// Ask the thread to stop after the current tick and join it.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.is_running() {
                self.state
                    .store(DriverState::Stopping as u8, Ordering::Release);
            }
            self.cancel.store(true, Ordering::Release);
            if handle.join().is_err() {
                error!("simulation thread panicked");
            }
        }
        self.state.store(DriverState::Idle as u8, Ordering::Release);
    }

    /// Join a run that ends by itself (callback break or error).
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("simulation thread panicked");
            }
        }
        self.state.store(DriverState::Idle as u8, Ordering::Release);
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
