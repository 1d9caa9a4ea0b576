//! # PL011 UART Diagnostics
//!
//! Best-effort text output for the memory subsystem's diagnostics and for
//! the `log` facade, written straight to the PL011 UART0 data register
//! without allocating. It works before the heap exists and keeps working
//! after the heap is exhausted, which is exactly when the frame map and
//! bucket dumps are most useful.
//!
//! ```text
//! log::info!() / uart_trace!()
//!     ↓
//! UartSink (fmt::Write, "\n" → "\r\n")
//!     ↓
//! PL011 DR @ IO_BASE + 0x20_1000 (spins while FR.TXFF)
//! ```
//!
//! ## Features
//!
//! * `enabled` (default): real UART writes on `target_arch = "arm"`.
//!   Without it, or on any other architecture, every write is discarded.
//!
//! The UART is assumed to be configured (baud rate, line control) by the
//! firmware or an earlier boot stage.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::UartLogger;

/// Calls `put` for every byte of `s`, expanding `\n` to `\r\n`.
#[inline]
pub fn for_each_wire_byte(s: &str, mut put: impl FnMut(u8)) {
    for b in s.bytes() {
        if b == b'\n' {
            put(b'\r');
        }
        put(b);
    }
}

#[cfg(all(feature = "enabled", target_arch = "arm"))]
#[doc(hidden)]
pub mod uart_fmt {
    use core::fmt::{self, Write};
    use kernel_info::memory::IO_BASE;

    /// PL011 UART0 base.
    const UART0_BASE: usize = IO_BASE as usize + 0x0020_1000;
    /// Data register.
    const UART0_DR: usize = UART0_BASE;
    /// Flag register.
    const UART0_FR: usize = UART0_BASE + 0x18;
    /// FR bit 5: transmit FIFO full.
    const FR_TXFF: u32 = 1 << 5;

    /// Write a single byte, waiting for room in the transmit FIFO.
    #[inline]
    pub fn putc(c: u8) {
        unsafe {
            while core::ptr::read_volatile(UART0_FR as *const u32) & FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile(UART0_DR as *mut u32, u32::from(c));
        }
    }

    pub struct UartSink;

    impl Write for UartSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            crate::for_each_wire_byte(s, putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn uart_write(args: fmt::Arguments) {
        // Ignore errors; this is best-effort debug output.
        let _ = fmt::write(&mut UartSink, args);
    }
}

#[cfg(not(all(feature = "enabled", target_arch = "arm")))]
#[doc(hidden)]
pub mod uart_fmt {
    use core::fmt;

    /// Discards everything.
    pub struct UartSink;

    impl fmt::Write for UartSink {
        #[inline]
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn uart_write(_: fmt::Arguments) {}
}

pub use uart_fmt::UartSink;

#[macro_export]
macro_rules! uart_trace {
    ($($arg:tt)*) => {{
        // No allocation: `format_args!` builds a lightweight `Arguments`.
        $crate::uart_fmt::uart_write(core::format_args!($($arg)*));
    }};
}
