//! The emulator worker thread.
//!
//! Two threads exist at the system boundary: the host/UI thread and this
//! worker. They share one mutex-protected core plus a few atomics for
//! fire-and-forget signals. All mutations of CPU state, memory and video
//! happen on the worker; the UI takes a short lock to snapshot state and edit
//! breakpoints, and the audio callback pulls samples through the same mutex.

use crate::core::{EmulationCore, EmulatorHost};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The input/output signals shared between UI thread and worker without taking
/// the core lock.
#[derive(Default)]
pub struct SharedSignals {
    /// Bit n set = CHIP-8 key n currently held.
    pub key_states: AtomicU16,
    /// Most recently pressed key + 1 (0 = none); consumed by `Fx0A`.
    key_event: AtomicU8,
    /// Live sound-timer mirror for UI indicators.
    pub sound_timer: AtomicU8,
    /// Set when the display content changed; the UI clears it after redrawing.
    pub screen_dirty: AtomicBool,
    shutdown: AtomicBool,
}

impl SharedSignals {
    pub fn new() -> Arc<SharedSignals> {
        Arc::new(SharedSignals::default())
    }

    pub fn press_key(&self, key: u8) {
        let mask = self.key_states.load(Ordering::Relaxed) | (1 << (key & 0xF));
        self.key_states.store(mask, Ordering::Relaxed);
        self.key_event.store((key & 0xF) + 1, Ordering::Relaxed);
    }

    pub fn release_key(&self, key: u8) {
        let mask = self.key_states.load(Ordering::Relaxed) & !(1 << (key & 0xF));
        self.key_states.store(mask, Ordering::Relaxed);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The host adapter the worker hands to the core: key state comes from the
/// shared atomics, display callbacks are recorded as dirty flags.
struct WorkerHost {
    signals: Arc<SharedSignals>,
}

impl EmulatorHost for WorkerHost {
    fn is_headless(&self) -> bool {
        true
    }

    fn key_down(&self, key: u8) -> bool {
        self.signals.key_states.load(Ordering::Relaxed) & (1 << (key & 0xF)) != 0
    }

    fn key_states(&self) -> u16 {
        self.signals.key_states.load(Ordering::Relaxed)
    }

    fn key_pressed(&mut self) -> Option<u8> {
        let event = self.signals.key_event.swap(0, Ordering::Relaxed);
        if event == 0 {
            None
        } else {
            Some(event - 1)
        }
    }

    fn update_screen(&mut self) {
        self.signals.screen_dirty.store(true, Ordering::Relaxed);
    }
}

/// A running emulator worker. Dropping it (or calling [CoreWorker::shutdown])
/// stops the thread within about one frame period.
pub struct CoreWorker {
    core: Arc<Mutex<Box<dyn EmulationCore + Send>>>,
    signals: Arc<SharedSignals>,
    handle: Option<JoinHandle<()>>,
}

impl CoreWorker {
    /// Spawns the worker, ticking the core once per frame period against a
    /// monotonic schedule. If the worker falls two or more periods behind, the
    /// schedule skips ahead instead of trying to catch up without bound.
    pub fn spawn(core: Box<dyn EmulationCore + Send>, frame_rate: u32) -> CoreWorker {
        let core = Arc::new(Mutex::new(core));
        let signals = SharedSignals::new();
        let thread_core = Arc::clone(&core);
        let thread_signals = Arc::clone(&signals);
        let period = Duration::from_micros(1_000_000 / frame_rate.max(1) as u64);
        let handle = std::thread::Builder::new()
            .name("cadmium-worker".into())
            .spawn(move || {
                let mut host = WorkerHost { signals: Arc::clone(&thread_signals) };
                let mut next_tick = Instant::now();
                loop {
                    if thread_signals.shutdown_requested() {
                        break;
                    }
                    {
                        let mut core = thread_core.lock().expect("core mutex poisoned");
                        core.execute_frame(&mut host);
                        if let Some(unit) = core.execution_unit(0) {
                            let st = unit.register(18).value as u8;
                            thread_signals.sound_timer.store(st, Ordering::Relaxed);
                        }
                    }
                    next_tick += period;
                    let now = Instant::now();
                    if now > next_tick + period {
                        // More than one period behind: skip ahead.
                        next_tick = now;
                    } else if next_tick > now {
                        std::thread::sleep(next_tick - now);
                    }
                }
            })
            .expect("failed to spawn the emulator worker");
        CoreWorker { core, signals, handle: Some(handle) }
    }

    /// The shared signal block for key input and UI indicators.
    pub fn signals(&self) -> &Arc<SharedSignals> {
        &self.signals
    }

    /// Short-lock access to the core for snapshots and breakpoint edits; the
    /// closure must not perform I/O while holding the lock.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut dyn EmulationCore) -> R) -> R {
        let mut core = self.core.lock().expect("core mutex poisoned");
        f(core.as_mut())
    }

    /// Renders audio through the same mutex (short critical section on the
    /// audio callback thread).
    pub fn render_audio(&self, samples: &mut [i16], sample_rate: u32) {
        let mut core = self.core.lock().expect("core mutex poisoned");
        core.render_audio(samples, sample_rate);
    }

    /// Signals the worker and joins it.
    pub fn shutdown(mut self) {
        self.shutdown_impl();
    }

    fn shutdown_impl(&mut self) {
        self.signals.request_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CoreWorker {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip8::{Chip8GenericCore, Chip8Options, Chip8Preset};
    use crate::core::HeadlessHost;
    use crate::properties::PropertyRegistry;

    fn setup_running_core(code: &[u8]) -> Box<dyn EmulationCore + Send> {
        let mut registry = PropertyRegistry::new();
        let mut options = Chip8Options::for_preset(Chip8Preset::Chip8);
        options.instructions_per_frame = 10;
        let mut core = Chip8GenericCore::with_options(&mut registry, options);
        let mut host = HeadlessHost;
        core.load_binary(&mut host, "test", code, None).unwrap();
        Box::new(core)
    }

    #[test]
    fn test_worker_advances_and_shuts_down() {
        // A busy loop that never terminates: v0 += 1; jump back.
        let worker = CoreWorker::spawn(setup_running_core(&[0x70, 0x01, 0x12, 0x00]), 240);
        std::thread::sleep(Duration::from_millis(50));
        let frames = worker.with_core(|core| core.frames());
        assert!(frames > 0, "worker should have ticked at least one frame");
        worker.shutdown();
    }

    #[test]
    fn test_key_signals_reach_the_core() {
        let signals;
        {
            // Fx0A at 0x200: waits for a key, stores it in V4.
            let worker = CoreWorker::spawn(setup_running_core(&[0xF4, 0x0A, 0x12, 0x02]), 240);
            signals = Arc::clone(worker.signals());
            std::thread::sleep(Duration::from_millis(20));
            signals.press_key(0xA);
            std::thread::sleep(Duration::from_millis(30));
            let v4 = worker.with_core(|core| {
                core.execution_unit(0).map(|unit| unit.register(4).value).unwrap_or(0)
            });
            assert_eq!(v4, 0xA);
        }
        // Dropping the worker joined the thread; shutdown flag is set.
        assert!(signals.shutdown_requested());
    }
}
