//! AS3935 IRQ line.
//!
//! ## Hardware
//!
//! Falling edge on the IRQ GPIO (pulled up).  The ISR only notifies a
//! dedicated handler task, which runs the attached [`EdgeHandler`] and
//! then re-arms the GPIO interrupt.  Register reads never happen in ISR
//! context.
//!
//! On host targets [`SimIrqLine::fire`] stands in for the edge.

#[cfg(not(target_os = "espidf"))]
use parking_lot::Mutex;

#[cfg(not(target_os = "espidf"))]
use crate::app::ports::{EdgeHandler, InterruptLine};
#[cfg(not(target_os = "espidf"))]
use crate::error::Result;

// ── ESP-IDF implementation ────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::GpioInterruptLine;

#[cfg(target_os = "espidf")]
mod esp {
    use core::num::NonZeroU32;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use esp_idf_hal::delay::TickType;
    use esp_idf_hal::gpio::{AnyInputPin, Input, InterruptType, PinDriver, Pull};
    use esp_idf_hal::task::notification::Notification;
    use log::{error, info, warn};
    use parking_lot::Mutex;

    use crate::app::ports::{EdgeHandler, InterruptLine};
    use crate::drivers::task_pin::{Core, spawn_on_core};
    use crate::error::{Error, InitError, Result};

    struct Shared {
        pin: Mutex<PinDriver<'static, AnyInputPin, Input>>,
        handler: Mutex<Option<EdgeHandler>>,
        attached: AtomicBool,
        /// Bumped on every subscribe; stale handler tasks exit.
        generation: AtomicU32,
    }

    pub struct GpioInterruptLine {
        gpio: u8,
        shared: Arc<Shared>,
    }

    impl GpioInterruptLine {
        /// Configure `gpio` as a pulled-up falling-edge input and start the
        /// handler task.  The ISR is subscribed on [`InterruptLine::attach`].
        pub fn new(gpio: u8) -> Result<Self> {
            // SAFETY: the pin number comes from `pins` and is owned by this
            // line alone for the life of the firmware.
            let pin = unsafe { AnyInputPin::new(gpio as i32) };
            let mut driver = PinDriver::input(pin).map_err(|_| Error::Init(InitError::BusUnavailable))?;
            driver
                .set_pull(Pull::Up)
                .and_then(|_| driver.set_interrupt_type(InterruptType::NegEdge))
                .map_err(|_| Error::Init(InitError::BusUnavailable))?;

            let shared = Arc::new(Shared {
                pin: Mutex::new(driver),
                handler: Mutex::new(None),
                attached: AtomicBool::new(false),
                generation: AtomicU32::new(0),
            });
            Ok(Self { gpio, shared })
        }

        fn subscribe(&self) -> Result<()> {
            let (tx, rx) = std::sync::mpsc::sync_channel(1);
            let shared = Arc::clone(&self.shared);
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;

            spawn_on_core(Core::App, 10, 8, "as3935-irq\0", move || {
                let notification = Notification::new();
                if tx.send(notification.notifier()).is_err() {
                    return;
                }
                let wait = TickType::new_millis(250).ticks();
                while shared.attached.load(Ordering::Acquire)
                    && shared.generation.load(Ordering::Acquire) == generation
                {
                    if notification.wait(wait).is_none() {
                        continue;
                    }
                    let handler = shared.handler.lock().clone();
                    if let Some(handler) = handler {
                        handler();
                    }
                    if shared.attached.load(Ordering::Acquire) {
                        if let Err(e) = shared.pin.lock().enable_interrupt() {
                            error!("irq: re-arm failed: {:?}", e);
                        }
                    }
                }
            })?;

            let notifier = rx.recv().map_err(|_| Error::Spawn("as3935-irq"))?;
            let mut pin = self.shared.pin.lock();
            // SAFETY: the callback only signals a task notification, which
            // is ISR-safe and allocation-free.
            unsafe {
                pin.subscribe(move || {
                    notifier.notify_and_yield(NonZeroU32::MIN);
                })
            }
            .and_then(|_| pin.enable_interrupt())
            .map_err(|_| Error::Init(InitError::BusUnavailable))
        }
    }

    impl InterruptLine for GpioInterruptLine {
        fn pin(&self) -> u8 {
            self.gpio
        }

        fn attach(&self, handler: EdgeHandler) -> Result<()> {
            *self.shared.handler.lock() = Some(handler);
            if self.shared.attached.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            if let Err(e) = self.subscribe() {
                self.shared.attached.store(false, Ordering::Release);
                return Err(e);
            }
            info!("irq: GPIO{} attached (falling edge)", self.gpio);
            Ok(())
        }

        fn detach(&self) {
            if !self.shared.attached.swap(false, Ordering::AcqRel) {
                return;
            }
            let mut pin = self.shared.pin.lock();
            if pin.disable_interrupt().and_then(|_| pin.unsubscribe()).is_err() {
                warn!("irq: GPIO{} detach incomplete", self.gpio);
            }
            *self.shared.handler.lock() = None;
            info!("irq: GPIO{} detached", self.gpio);
        }

        fn is_attached(&self) -> bool {
            self.shared.attached.load(Ordering::Acquire)
        }

        fn release(&self) {
            self.detach();
            if self.shared.pin.lock().set_pull(Pull::Up).is_err() {
                warn!("irq: GPIO{} pull-up restore failed", self.gpio);
            }
        }
    }
}

// ── Host simulation ───────────────────────────────────────────

/// Host stand-in for the IRQ GPIO.
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct SimIrqLine {
    gpio: u8,
    handler: Mutex<Option<EdgeHandler>>,
    counters: Mutex<SimIrqCounters>,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimIrqCounters {
    pub attaches: u32,
    pub detaches: u32,
    pub releases: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SimIrqLine {
    pub fn new(gpio: u8) -> Self {
        Self {
            gpio,
            ..Self::default()
        }
    }

    /// Simulate one falling edge.  Returns `false` when nothing is attached.
    pub fn fire(&self) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(h) => {
                h();
                true
            }
            None => false,
        }
    }

    pub fn counters(&self) -> SimIrqCounters {
        *self.counters.lock()
    }

    pub fn release_count(&self) -> u32 {
        self.counters.lock().releases
    }
}

#[cfg(not(target_os = "espidf"))]
impl InterruptLine for SimIrqLine {
    fn pin(&self) -> u8 {
        self.gpio
    }

    fn attach(&self, handler: EdgeHandler) -> Result<()> {
        *self.handler.lock() = Some(handler);
        self.counters.lock().attaches += 1;
        Ok(())
    }

    fn detach(&self) {
        if self.handler.lock().take().is_some() {
            self.counters.lock().detaches += 1;
        }
    }

    fn is_attached(&self) -> bool {
        self.handler.lock().is_some()
    }

    fn release(&self) {
        self.detach();
        self.counters.lock().releases += 1;
    }
}
