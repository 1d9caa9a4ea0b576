//! # Kernel Tracing helpers

use crate::memory::KernelMemory;
use kernel_uart::{UartLogger, UartSink, uart_trace};
use kernel_vmem::PhysMapper;
use log::LevelFilter;

static LOGGER: UartLogger = UartLogger::new(if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
});

/// Routes the `log` facade to the UART. Later calls are no-ops.
pub fn init_logging() {
    if LOGGER.init().is_err() {
        uart_trace!("logger already installed\n");
    }
}

/// Writes the frame map, frame grid and heap buckets to the UART.
pub fn trace_memory<M: PhysMapper + Copy>(memory: &KernelMemory<M>) {
    // Best effort; the sink never fails.
    let _ = memory.print(&mut UartSink);
}
