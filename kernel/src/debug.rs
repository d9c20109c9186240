// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for in-kernel debugging.
//!
//! For printing, this module uses an [`IoWrite`] installed by the board with
//! [`set_debug_writer`], usually a polled UART. Until a writer is installed
//! every message is discarded, so drivers can log before the board has set
//! up its console and host tests run without one.
//!
//! ```rust,ignore
//! use kernel::debug;
//!
//! debug!("Yes the code gets here with value {}", i);
//! debug_verbose!("got here"); // Includes file and line number
//! ```
//!
//! Output is synchronous: `debug!` returns once the writer has accepted the
//! whole message. Keep it off paths that run once per packet.

use core::fmt::{write, Arguments, Result, Write};
use core::ptr::addr_of_mut;

/// A blocking byte sink for debug output.
pub trait IoWrite {
    /// Write all of `buf`, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> usize;
}

static mut DEBUG_WRITER: Option<&'static mut dyn IoWrite> = None;

/// Install the sink used by `debug!`.
///
/// # Safety
///
/// Must be called from the single thread of control before any concurrent
/// use of `debug!` is possible, normally once during board setup.
pub unsafe fn set_debug_writer(writer: &'static mut dyn IoWrite) {
    *addr_of_mut!(DEBUG_WRITER) = Some(writer);
}

struct DebugWriter<'a> {
    out: &'a mut dyn IoWrite,
}

impl Write for DebugWriter<'_> {
    fn write_str(&mut self, s: &str) -> Result {
        self.out.write(s.as_bytes());
        Ok(())
    }
}

fn with_writer<F: FnOnce(&mut DebugWriter)>(f: F) {
    // There is exactly one thread of control, and the writer is only replaced
    // during board setup.
    let writer = unsafe { &mut *addr_of_mut!(DEBUG_WRITER) };
    if let Some(out) = writer.as_deref_mut() {
        f(&mut DebugWriter { out });
    }
}

fn emit(writer: &mut DebugWriter, args: Arguments, file_line: Option<&(&'static str, u32)>) {
    if let Some((file, line)) = file_line {
        let _ = writer.write_fmt(format_args!("{}:{}: ", file, line));
    }
    let _ = write(writer, args);
    let _ = writer.write_str("\r\n");
}

/// Write a formatted line to the debug writer. Called by `debug!`.
pub fn debug_println(args: Arguments) {
    with_writer(|writer| emit(writer, args, None));
}

/// Write a formatted line prefixed with its source location. Called by
/// `debug_verbose!`.
pub fn debug_verbose_println(args: Arguments, file_line: &(&'static str, u32)) {
    with_writer(|writer| emit(writer, args, Some(file_line)));
}

/// In-kernel `println()` debugging.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        $crate::debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_println(format_args!("{}", $msg))
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_println(format_args!($fmt, $($arg)+))
    });
}

/// In-kernel `println()` debugging that includes the file and line.
#[macro_export]
macro_rules! debug_verbose {
    () => ({
        $crate::debug_verbose!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::debug_verbose_println(format_args!("{}", $msg), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::debug_verbose_println(format_args!($fmt, $($arg)+), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
}

#[cfg(test)]
mod test {
    use super::{emit, DebugWriter, IoWrite};

    struct Capture {
        buf: [u8; 64],
        len: usize,
    }

    impl IoWrite for Capture {
        fn write(&mut self, buf: &[u8]) -> usize {
            let n = buf.len().min(self.buf.len() - self.len);
            self.buf[self.len..self.len + n].copy_from_slice(&buf[..n]);
            self.len += n;
            n
        }
    }

    #[test]
    fn emit_terminates_lines() {
        let mut cap = Capture { buf: [0; 64], len: 0 };
        emit(&mut DebugWriter { out: &mut cap }, format_args!("ep{} stall", 2), None);
        assert_eq!(&cap.buf[..cap.len], b"ep2 stall\r\n");
    }

    #[test]
    fn emit_prefixes_location() {
        let mut cap = Capture { buf: [0; 64], len: 0 };
        emit(
            &mut DebugWriter { out: &mut cap },
            format_args!("x"),
            Some(&("udc.rs", 7)),
        );
        assert_eq!(&cap.buf[..cap.len], b"udc.rs:7: x\r\n");
    }

    #[test]
    fn macros_without_writer_are_silent() {
        crate::debug!("nothing installed {}", 1);
        crate::debug_verbose!();
    }
}
