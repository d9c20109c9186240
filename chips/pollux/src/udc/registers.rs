// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! POLLUX USB device controller register map.
//!
//! All controller registers are 16 bits wide. `ESR`, `ECR`, `BRCR`, `BWCR`
//! and `MPR` are banked: they refer to the endpoint selected by the index
//! register `IR`. Status registers are write-one-to-clear.

use kernel::utilities::registers::interfaces::{Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadOnly, ReadWrite};
use kernel::utilities::StaticRef;

pub const UDC_BASE: StaticRef<UdcRegisters> =
    unsafe { StaticRef::new(0xC001_8000 as *const UdcRegisters) };

/// Endpoint FIFO windows, one per hardware endpoint.
pub const NUM_FIFOS: usize = 16;

register_structs! {
    pub UdcRegisters {
        /// Endpoint index
        (0x000 => ir: ReadWrite<u16>),
        /// Endpoint interrupt status, one bit per endpoint
        (0x002 => eir: ReadWrite<u16>),
        /// Endpoint interrupt enable, one bit per endpoint
        (0x004 => eier: ReadWrite<u16>),
        (0x006 => _reserved0),
        /// Endpoint direction, set for IN
        (0x00a => edr: ReadWrite<u16>),
        /// Test mode
        (0x00c => tr: ReadWrite<u16>),
        /// System status
        (0x00e => ssr: ReadWrite<u16, SSR::Register>),
        /// System control
        (0x010 => scr: ReadWrite<u16, SCR::Register>),
        /// Endpoint 0 status
        (0x012 => ep0sr: ReadWrite<u16, EP0SR::Register>),
        /// Endpoint 0 control
        (0x014 => ep0cr: ReadWrite<u16, ECR::Register>),
        /// Banked endpoint status
        (0x016 => esr: ReadWrite<u16, ESR::Register>),
        /// Banked endpoint control
        (0x018 => ecr: ReadWrite<u16, ECR::Register>),
        /// Banked received word count
        (0x01a => brcr: ReadOnly<u16>),
        /// Banked byte count of the packet being written
        (0x01c => bwcr: ReadWrite<u16>),
        /// Banked maximum packet size
        (0x01e => mpr: ReadWrite<u16>),
        (0x020 => _reserved1),
        /// Endpoint FIFOs
        (0x060 => br: [ReadWrite<u16>; NUM_FIFOS]),
        (0x080 => _reserved2),
        /// PHY control
        (0x0a0 => pcr: ReadWrite<u16, PCR::Register>),
        (0x0a2 => _reserved3),
        (0x0a4 => user1: ReadWrite<u16, USER1::Register>),
        (0x0a6 => _reserved4),
        (0x8c0 => clkenb: ReadWrite<u32, CLKENB::Register>),
        (0x8c4 => clkgen: ReadWrite<u32, CLKGEN::Register>),
        (0x8c8 => @END),
    }
}

register_bitfields![u16,
    pub SSR [
        RESET OFFSET(0) NUMBITS(1) [],
        SUSPEND OFFSET(1) NUMBITS(1) [],
        RESUME OFFSET(2) NUMBITS(1) [],
        /// Speed detection finished
        SDE OFFSET(3) NUMBITS(1) [],
        /// Negotiated high speed; a level, not an event
        HSP OFFSET(4) NUMBITS(1) [],
        VBUSON OFFSET(8) NUMBITS(1) [],
        VBUSOFF OFFSET(9) NUMBITS(1) [],
        /// Transaction error flags
        ERR OFFSET(10) NUMBITS(6) []
    ],
    pub SCR [
        RST_EN OFFSET(0) NUMBITS(1) [],
        SUS_EN OFFSET(1) NUMBITS(1) [],
        RRD_EN OFFSET(5) NUMBITS(1) [],
        DTZIEN_EN OFFSET(14) NUMBITS(1) []
    ],
    pub EP0SR [
        RX_SUCCESS OFFSET(0) NUMBITS(1) [],
        TX_SUCCESS OFFSET(1) NUMBITS(1) [],
        STALL OFFSET(4) NUMBITS(1) [],
        /// Last word of the received packet holds a single byte
        LWO OFFSET(6) NUMBITS(1) [],
        /// Undocumented. Set by the controller at the end of a control OUT
        /// data stage on this silicon.
        LAST_DATA_LO OFFSET(12) NUMBITS(1) [],
        /// Undocumented, see `LAST_DATA_LO`.
        LAST_DATA_HI OFFSET(15) NUMBITS(1) []
    ],
    pub ESR [
        RX_SUCCESS OFFSET(0) NUMBITS(1) [],
        TX_SUCCESS OFFSET(1) NUMBITS(1) [],
        /// Packets staged in the dual FIFO
        PSIF OFFSET(2) NUMBITS(2) [
            None = 0,
            One = 1,
            Two = 2
        ],
        LWO OFFSET(4) NUMBITS(1) [],
        STALL OFFSET(5) NUMBITS(1) [],
        /// Host requested a FIFO flush
        FLUSH OFFSET(6) NUMBITS(1) []
    ],
    pub ECR [
        /// Interrupt endpoint mode
        IEMS OFFSET(0) NUMBITS(1) [],
        STALL OFFSET(1) NUMBITS(1) [],
        /// Clear data PID
        CDP OFFSET(2) NUMBITS(1) [],
        FLUSH OFFSET(6) NUMBITS(1) [],
        /// Dual FIFO enable
        DUEN OFFSET(7) NUMBITS(1) []
    ],
    pub PCR [
        PCE OFFSET(0) NUMBITS(1) []
    ],
    pub USER1 [
        VBUSENB OFFSET(15) NUMBITS(1) []
    ]
];

register_bitfields![u32,
    pub CLKENB [
        USBD OFFSET(0) NUMBITS(2) [
            Disabled = 0,
            Always = 3
        ],
        CLKGENENB OFFSET(2) NUMBITS(1) [],
        PCLK_ALWAYS OFFSET(3) NUMBITS(1) []
    ],
    pub CLKGEN [
        CLKSRC OFFSET(1) NUMBITS(3) [
            Pll0 = 0,
            Pll1 = 1,
            External = 3
        ],
        CLKDIV OFFSET(4) NUMBITS(6) []
    ]
];

/// Controller registers reachable through [`UdcRegisterBank`]. The clock
/// registers are 32 bits wide and handled by
/// [`UdcRegisterBank::enable_clock`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Ir,
    Eir,
    Eier,
    Edr,
    Tr,
    Ssr,
    Scr,
    Ep0sr,
    Ep0cr,
    Esr,
    Ecr,
    Brcr,
    Bwcr,
    Mpr,
    Pcr,
    User1,
}

/// Raw access to the controller.
///
/// The driver logic only talks to the hardware through this trait, so the
/// same state machine drives the memory mapped block on the target and an
/// emulated controller in unit tests.
pub trait UdcRegisterBank {
    fn read(&self, reg: Reg) -> u16;

    fn write(&self, reg: Reg, value: u16);

    /// Pop one 16-bit word from the FIFO of endpoint `ep`.
    fn read_fifo(&self, ep: usize) -> u16;

    /// Push one 16-bit word into the FIFO of endpoint `ep`.
    fn write_fifo(&self, ep: usize, word: u16);

    /// Run the controller from the external clock, undivided.
    fn enable_clock(&self);
}

impl UdcRegisterBank for StaticRef<UdcRegisters> {
    fn read(&self, reg: Reg) -> u16 {
        match reg {
            Reg::Ir => self.ir.get(),
            Reg::Eir => self.eir.get(),
            Reg::Eier => self.eier.get(),
            Reg::Edr => self.edr.get(),
            Reg::Tr => self.tr.get(),
            Reg::Ssr => self.ssr.get(),
            Reg::Scr => self.scr.get(),
            Reg::Ep0sr => self.ep0sr.get(),
            Reg::Ep0cr => self.ep0cr.get(),
            Reg::Esr => self.esr.get(),
            Reg::Ecr => self.ecr.get(),
            Reg::Brcr => self.brcr.get(),
            Reg::Bwcr => self.bwcr.get(),
            Reg::Mpr => self.mpr.get(),
            Reg::Pcr => self.pcr.get(),
            Reg::User1 => self.user1.get(),
        }
    }

    fn write(&self, reg: Reg, value: u16) {
        match reg {
            Reg::Ir => self.ir.set(value),
            Reg::Eir => self.eir.set(value),
            Reg::Eier => self.eier.set(value),
            Reg::Edr => self.edr.set(value),
            Reg::Tr => self.tr.set(value),
            Reg::Ssr => self.ssr.set(value),
            Reg::Scr => self.scr.set(value),
            Reg::Ep0sr => self.ep0sr.set(value),
            Reg::Ep0cr => self.ep0cr.set(value),
            Reg::Esr => self.esr.set(value),
            Reg::Ecr => self.ecr.set(value),
            // Read-only
            Reg::Brcr => {}
            Reg::Bwcr => self.bwcr.set(value),
            Reg::Mpr => self.mpr.set(value),
            Reg::Pcr => self.pcr.set(value),
            Reg::User1 => self.user1.set(value),
        }
    }

    fn read_fifo(&self, ep: usize) -> u16 {
        self.br[ep % NUM_FIFOS].get()
    }

    fn write_fifo(&self, ep: usize, word: u16) {
        self.br[ep % NUM_FIFOS].set(word);
    }

    fn enable_clock(&self) {
        self.clkgen
            .write(CLKGEN::CLKSRC::External + CLKGEN::CLKDIV.val(0));
        self.clkenb
            .write(CLKENB::PCLK_ALWAYS::SET + CLKENB::CLKGENENB::SET + CLKENB::USBD::Always);
    }
}
