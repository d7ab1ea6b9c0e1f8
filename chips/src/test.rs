// Helpers shared by unit tests
use crate::{config::KernelConfig, logger, Kernel};
use alloc::sync::Arc;
use log::LevelFilter;

/// Boot a kernel with the default configuration on the calling test thread
pub fn boot() -> Arc<Kernel> {
    boot_with(KernelConfig::default())
}

/// Boot a kernel with `config` on the calling test thread
pub fn boot_with(config: KernelConfig) -> Arc<Kernel> {
    logger::init(LevelFilter::Warn);
    Kernel::boot(config)
}
