//! Sensor driver, IRQ line and thread helpers.

pub mod as3935;
pub mod irq;
pub mod task_pin;
