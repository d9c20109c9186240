// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Board file for POLLUX based devices running usbtool.
//!
//! The boot stub sets up clocks and SDRAM, copies the image to RAM and jumps
//! to [`board_main`]. There are no interrupts and no scheduler: after
//! bring-up the board polls the USB device controller forever.

#![no_std]

use core::ptr::addr_of_mut;

use capsules_usbtool::usbtool::{
    UsbTool, COMMAND_BUFFER_LEN, MAX_BUFFER_LEN, RESPONSE_BUFFER_LEN,
};
use kernel::hil::nand::{NandFlash, MAX_CHIPS};
use kernel::hil::usb::UsbDevice;
use kernel::utilities::StaticRef;
use kernel::{debug, static_init};
use pollux::nand::{Nand, PolluxNandBus, MCUS_BASE, NAND_BASE};
use pollux::uart::{Uart, UART0_BASE};
use pollux::udc::{Udc, UdcRegisters, UDC_BASE};

#[cfg(all(not(test), target_os = "none"))]
mod io;

/// SDRAM window lent to the host as the transfer buffer. The firmware image
/// and its stack live below it.
const TRANSFER_BUFFER_BASE: usize = 0x0100_0000;

type UdcHw = Udc<'static, StaticRef<UdcRegisters>>;
type NandHw = Nand<PolluxNandBus>;
type UsbToolDriver = UsbTool<'static, UdcHw, NandHw>;

static mut COMMAND_BUFFER: [u8; COMMAND_BUFFER_LEN] = [0; COMMAND_BUFFER_LEN];
static mut RESPONSE_BUFFER: [u8; RESPONSE_BUFFER_LEN] = [0; RESPONSE_BUFFER_LEN];

/// Main function called by the boot stub.
///
/// # Safety
///
/// Must be called exactly once, with SDRAM initialized and nothing else
/// using the peripherals or the transfer buffer window.
#[no_mangle]
pub unsafe extern "C" fn board_main() -> ! {
    let uart = static_init!(Uart, Uart::new(UART0_BASE));
    kernel::debug::set_debug_writer(uart);

    let nand = static_init!(NandHw, Nand::new(PolluxNandBus::new(MCUS_BASE, NAND_BASE)));
    let found = nand.identify_all_chips();
    debug!("NAND: {} chip(s) found", found);
    for chip in 0..MAX_CHIPS {
        if let Some(info) = nand.info(chip).filter(|info| info.known) {
            debug!(
                "NAND {}: {} MiB, {} byte pages, {} KiB blocks",
                chip,
                info.chip_size,
                info.page_size,
                info.block_size
            );
        }
    }
    // The host selects a chip before touching NAND.
    let _ = nand.select(None);

    let udc = static_init!(UdcHw, Udc::new(UDC_BASE));

    let transfer_buffer =
        core::slice::from_raw_parts_mut(TRANSFER_BUFFER_BASE as *mut u8, MAX_BUFFER_LEN);
    let usbtool = static_init!(
        UsbToolDriver,
        UsbTool::new(
            udc,
            nand,
            &mut *addr_of_mut!(COMMAND_BUFFER),
            transfer_buffer,
            &mut *addr_of_mut!(RESPONSE_BUFFER),
        )
    );
    udc.set_client(usbtool);

    if let Err(err) = udc.init() {
        debug!("UDC init failed: {:?}", err);
    }
    debug!("Ready!");

    loop {
        udc.task();
    }
}
