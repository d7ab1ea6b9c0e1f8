//! Kernel configuration
//!
//! Configuration files are plain `key = value` lines. Blank lines and lines starting with `#` are
//! ignored.
use crate::{KernelError, KernelResult};
use log::LevelFilter;
use std::str::FromStr;

/// Tunables for a kernel instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of physical frames in simulated memory
    pub num_phys_pages: usize,
    /// Pages of stack given to every user process
    pub stack_pages: usize,
    /// Ticks between timer interrupts
    pub timer_period: u64,
    /// Ticks added each time interrupts are re-enabled in kernel mode
    pub kernel_tick: u64,
    /// Ticks added per user system call
    pub user_tick: u64,
    /// Capacity of each process's file table
    pub max_open_files: usize,
    /// Longest string the kernel reads out of user memory
    pub max_string_length: usize,
    /// Suffix every executable name must carry
    pub executable_suffix: String,
    /// Maximum log level
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: 64,
            stack_pages: 8,
            timer_period: 500,
            kernel_tick: 10,
            user_tick: 1,
            max_open_files: 16,
            max_string_length: 256,
            executable_suffix: String::from(".coff"),
            log_level: LevelFilter::Info,
        }
    }
}

impl KernelConfig {
    /// Parse a configuration file on top of the defaults
    pub fn parse(text: &str) -> KernelResult<Self> {
        let mut config = Self::default();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| KernelError::InvalidConfig(line_number, line.into()))?;
            config.set(key.trim(), value.trim(), line_number)?;
        }

        if config.num_phys_pages == 0 || config.timer_period == 0 || config.max_open_files < 2 {
            return Err(KernelError::InvalidConfig(0, "value out of range".into()));
        }

        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str, line_number: usize) -> KernelResult {
        fn number<T: FromStr>(value: &str, line_number: usize) -> KernelResult<T> {
            value
                .parse()
                .map_err(|_| KernelError::InvalidConfig(line_number, format!("bad number {value}")))
        }

        match key {
            "processor.numPhysPages" => self.num_phys_pages = number(value, line_number)?,
            "processor.stackPages" => self.stack_pages = number(value, line_number)?,
            "timer.period" => self.timer_period = number(value, line_number)?,
            "kernel.maxOpenFiles" => self.max_open_files = number(value, line_number)?,
            "kernel.maxStringLength" => self.max_string_length = number(value, line_number)?,
            "kernel.executableSuffix" => self.executable_suffix = value.into(),
            "kernel.log" => {
                self.log_level = value.parse().map_err(|_| {
                    KernelError::InvalidConfig(line_number, format!("bad log level {value}"))
                })?
            }
            _ => {
                return Err(KernelError::InvalidConfig(
                    line_number,
                    format!("unknown key {key}"),
                ))
            }
        }
        Ok(())
    }
}
