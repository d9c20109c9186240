// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Panic output on the debug UART.

use core::fmt::Write;
use core::panic::PanicInfo;

use kernel::debug::IoWrite;
use pollux::uart::{Uart, UART0_BASE};

/// Writes straight to the UART, bypassing whatever the debug writer was
/// doing when the panic hit.
struct Writer {
    uart: Uart,
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> ::core::fmt::Result {
        self.uart.write(s.as_bytes());
        Ok(())
    }
}

/// Panic handler.
#[panic_handler]
pub fn panic_fmt(pi: &PanicInfo) -> ! {
    let mut writer = Writer {
        uart: Uart::new(UART0_BASE),
    };
    let _ = writeln!(writer, "\r\nKernel panic: {}\r", pi);
    writer.uart.flush();
    loop {
        core::hint::spin_loop();
    }
}
