//! Halts the core after reporting on the UART.

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kernel_uart::uart_trace!("{info}\n");
    loop {
        core::hint::spin_loop();
    }
}
