//! SPI bus factory for the AS3935.
//!
//! The SPI host driver is created once at boot; every initialisation
//! attempt opens a fresh device handle (CS pin, mode 1, configured
//! baud rate) on top of it.

#[cfg(target_os = "espidf")]
pub use esp::EspSpiFactory;

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::Arc;

    use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin};
    use esp_idf_hal::spi::config::{Config, MODE_1};
    use esp_idf_hal::spi::{SPI2, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
    use esp_idf_hal::units::Hertz;
    use log::{error, info};

    use crate::app::ports::BusFactory;
    use crate::error::{Error, InitError, Result};
    use crate::pins;

    pub struct EspSpiFactory {
        driver: Arc<SpiDriver<'static>>,
        cs_gpio: u8,
        baudrate_hz: u32,
    }

    impl EspSpiFactory {
        /// Bring up SPI2 on the board's SCLK/MOSI/MISO pins.
        pub fn new(spi: SPI2, cs_gpio: u8, baudrate_hz: u32) -> Result<Self> {
            // SAFETY: the bus pins come from `pins` and belong to this
            // driver alone for the life of the firmware.
            let (sclk, mosi, miso) = unsafe {
                (
                    AnyOutputPin::new(i32::from(pins::SPI_SCLK_GPIO)),
                    AnyOutputPin::new(i32::from(pins::SPI_MOSI_GPIO)),
                    AnyIOPin::new(i32::from(pins::SPI_MISO_GPIO)),
                )
            };
            let driver = SpiDriver::new(spi, sclk, mosi, Some(miso), &SpiDriverConfig::new()).map_err(|e| {
                error!("spi: host init failed: {:?}", e);
                Error::Init(InitError::BusUnavailable)
            })?;
            info!("spi: SPI2 up, CS={} at {} Hz", cs_gpio, baudrate_hz);
            Ok(Self {
                driver: Arc::new(driver),
                cs_gpio,
                baudrate_hz,
            })
        }
    }

    impl BusFactory for EspSpiFactory {
        type Bus = SpiDeviceDriver<'static, Arc<SpiDriver<'static>>>;

        fn open(&self) -> Result<Self::Bus> {
            // SAFETY: the previous device handle, if any, was dropped by the
            // driver cleanup before a new one is opened.
            let cs = unsafe { AnyOutputPin::new(i32::from(self.cs_gpio)) };
            let config = Config::new()
                .baudrate(Hertz(self.baudrate_hz))
                .data_mode(MODE_1);
            SpiDeviceDriver::new(Arc::clone(&self.driver), Some(cs), &config).map_err(|e| {
                error!("spi: device open failed: {:?}", e);
                Error::Init(InitError::BusUnavailable)
            })
        }
    }
}

/// Host factory over the simulated chip; every open shares one chip.
#[cfg(not(target_os = "espidf"))]
pub use sim::SimBusFactory;

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::app::ports::BusFactory;
    use crate::drivers::as3935::sim::SimAs3935;
    use crate::error::{Error, InitError, Result};

    #[derive(Clone, Default)]
    pub struct SimBusFactory {
        chip: SimAs3935,
        unavailable: Arc<AtomicBool>,
        opens: Arc<AtomicU32>,
    }

    impl SimBusFactory {
        pub fn new(chip: SimAs3935) -> Self {
            Self {
                chip,
                ..Self::default()
            }
        }

        pub fn chip(&self) -> &SimAs3935 {
            &self.chip
        }

        /// Make `open` fail until cleared.
        pub fn set_unavailable(&self, on: bool) {
            self.unavailable.store(on, Ordering::Release);
        }

        pub fn opens(&self) -> u32 {
            self.opens.load(Ordering::Acquire)
        }
    }

    impl BusFactory for SimBusFactory {
        type Bus = SimAs3935;

        fn open(&self) -> Result<SimAs3935> {
            self.opens.fetch_add(1, Ordering::AcqRel);
            if self.unavailable.load(Ordering::Acquire) {
                return Err(Error::Init(InitError::BusUnavailable));
            }
            Ok(self.chip.clone())
        }
    }
}
