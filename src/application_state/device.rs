//! # Device
//!
//! Platform facts the engine queries at startup. The task scheduler only needs
//! the CPU core count to size its worker pools.

/// Platform abstraction over the device the engine runs on.
pub trait Device: Send + Sync {
    /// Number of CPU cores available to the process.
    fn number_of_cpu_cores(&self) -> usize;
}

/// The device the process is actually running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevice;

impl Device for SystemDevice {
    fn number_of_cpu_cores(&self) -> usize {
        match std::thread::available_parallelism() {
            Ok(cores) => cores.get(),
            Err(error) => {
                log::warn!("Could not query available parallelism, assuming 1 core: {error}");
                1
            }
        }
    }
}

/// A device reporting a fixed core count. Used by configuration overrides and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedDevice {
    cores: usize,
}

impl FixedDevice {
    /// Creates a device that reports `cores` CPU cores.
    pub fn new(cores: usize) -> Self {
        Self { cores }
    }
}

impl Device for FixedDevice {
    fn number_of_cpu_cores(&self) -> usize {
        self.cores
    }
}
