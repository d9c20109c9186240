// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Polled transmit-only UART, used as the debug console.
//!
//! Line settings and the baud rate are left as the boot stub configured
//! them.

use kernel::debug::IoWrite;
use kernel::utilities::registers::interfaces::{Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadOnly, ReadWrite};
use kernel::utilities::StaticRef;

register_structs! {
    pub UartRegisters {
        (0x000 => _reserved0),
        /// Transmit/receive status
        (0x008 => trstatus: ReadOnly<u16, TRSTATUS::Register>),
        (0x00a => _reserved1),
        /// Transmit holding buffer
        (0x010 => thb: ReadWrite<u16, THB::Register>),
        (0x012 => @END),
    }
}

register_bitfields![u16,
    TRSTATUS [
        RX_READY OFFSET(0) NUMBITS(1) [],
        TX_BUFFER_EMPTY OFFSET(1) NUMBITS(1) [],
        TX_EMPTY OFFSET(2) NUMBITS(1) []
    ],
    THB [
        DATA OFFSET(0) NUMBITS(8) []
    ]
];

pub const UART0_BASE: StaticRef<UartRegisters> =
    unsafe { StaticRef::new(0xC001_6000 as *const UartRegisters) };

pub struct Uart {
    registers: StaticRef<UartRegisters>,
}

impl Uart {
    pub const fn new(base: StaticRef<UartRegisters>) -> Uart {
        Uart { registers: base }
    }

    pub fn transmit_sync(&self, bytes: &[u8]) {
        let regs = self.registers;
        for b in bytes.iter() {
            while !regs.trstatus.is_set(TRSTATUS::TX_BUFFER_EMPTY) {}
            regs.thb.write(THB::DATA.val(u16::from(*b)));
        }
    }

    /// Block until the last byte has left the shift register.
    pub fn flush(&self) {
        while !self.registers.trstatus.is_set(TRSTATUS::TX_EMPTY) {}
    }
}

impl IoWrite for Uart {
    fn write(&mut self, buf: &[u8]) -> usize {
        self.transmit_sync(buf);
        buf.len()
    }
}
