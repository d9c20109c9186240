// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USB class driver for the usbtool host utility.
//!
//! The host sends one text command (see [`crate::command`]) per transfer on
//! the bulk OUT endpoint. Commands either move a window of a RAM buffer over
//! the bulk endpoints, or operate on NAND flash using that same buffer as the
//! staging area for block images. Short replies go out on the bulk IN
//! endpoint.
//!
//! Only one command is in progress at a time: the command request is handed
//! back to the controller once the transfer or reply the command started has
//! finished. A transfer that fails (bus reset, disable, stall) leaves the
//! command request idle until the host selects a configuration again.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let usbtool = static_init!(
//!     UsbTool<'static, Udc<'static, StaticRef<UdcRegisters>>, Nand<PolluxNandBus>>,
//!     UsbTool::new(udc, nand, command_buffer, ram_buffer, response_buffer)
//! );
//! udc.set_client(usbtool);
//! ```

use kernel::debug;
use kernel::hil::nand::{BadBlockTable, NandFlash, MAX_CHIPS};
use kernel::hil::usb::{
    ClassDriver, DescriptorType, Recipient, Request, RequestStatus, RequestType, SetupData, Speed,
    StandardRequest, UsbDevice,
};
use kernel::utilities::cells::MapCell;
use kernel::ErrorCode;

use crate::command::Command;
use crate::descriptors::{self, IN_ENDPOINT, NUM_CONFIGURATIONS, OUT_ENDPOINT};

/// Size of the buffer commands are received into.
pub const COMMAND_BUFFER_LEN: usize = 512;
/// Longest command accepted in one transfer.
pub const COMMAND_LEN: usize = 510;
/// Size of the reply buffer, enough for a bad-block table.
pub const RESPONSE_BUFFER_LEN: usize = BadBlockTable::SIZE;
/// Largest RAM buffer `buffer` and `nand` commands can address.
pub const MAX_BUFFER_LEN: usize = 0x100_0000;

const COMMAND_ID: u16 = 1;
const DATA_ID: u16 = 2;
const RESPONSE_ID: u16 = 3;

static CONFIGURATION_VALUES: [u8; 2] = [0, 1];
static ALTERNATE_SETTING: [u8; 1] = [0];

/// Reply to `nand write` and `nand erase`: the chip status, or -1 if the
/// operation could not be issued.
fn status_reply(result: Result<u8, ErrorCode>) -> [u8; 2] {
    result.map_or(-1, i16::from).to_le_bytes()
}

pub struct UsbTool<'a, U: UsbDevice<'a>, N: NandFlash> {
    usb: &'a U,
    nand: &'a N,
    /// Each request is held here while idle and owned by the controller
    /// while queued.
    command: MapCell<Request>,
    data: MapCell<Request>,
    response: MapCell<Request>,
    buffer_len: usize,
}

impl<'a, U: UsbDevice<'a>, N: NandFlash> UsbTool<'a, U, N> {
    pub fn new(
        usb: &'a U,
        nand: &'a N,
        command_buffer: &'static mut [u8],
        buffer: &'static mut [u8],
        response_buffer: &'static mut [u8],
    ) -> Self {
        let buffer_len = buffer.len().min(MAX_BUFFER_LEN);
        UsbTool {
            usb,
            nand,
            command: MapCell::new(Request::with_buffer(command_buffer, COMMAND_ID)),
            data: MapCell::new(Request::with_buffer(buffer, DATA_ID)),
            response: MapCell::new(Request::with_buffer(response_buffer, RESPONSE_ID)),
            buffer_len,
        }
    }

    /// Clamp a host supplied window to the RAM buffer. Both ends are kept
    /// even.
    fn window(&self, offset: u32, length: u32) -> (usize, usize) {
        let offset = (offset as usize & (MAX_BUFFER_LEN - 2)).min(self.buffer_len);
        let length = (length as usize & !1).min(self.buffer_len - offset);
        (offset, length)
    }

    fn descriptor(
        &self,
        descriptor_type: Option<DescriptorType>,
        index: u8,
    ) -> Result<&'static [u8], ErrorCode> {
        let high_speed = self.usb.speed() == Speed::High;
        let table: &'static [u8] = match descriptor_type {
            Some(DescriptorType::Device) if high_speed => &descriptors::HS_DEVICE,
            Some(DescriptorType::Device) => &descriptors::FS_DEVICE,
            Some(DescriptorType::DeviceQualifier) if high_speed => &descriptors::HS_QUALIFIER,
            Some(DescriptorType::DeviceQualifier) => &descriptors::FS_QUALIFIER,
            Some(DescriptorType::Configuration) if high_speed => &descriptors::HS_CONFIGURATION,
            Some(DescriptorType::Configuration) => &descriptors::FS_CONFIGURATION,
            Some(DescriptorType::OtherSpeedConfiguration) if high_speed => {
                &descriptors::FS_OTHER_SPEED
            }
            Some(DescriptorType::OtherSpeedConfiguration) => &descriptors::HS_OTHER_SPEED,
            Some(DescriptorType::String) => descriptors::STRINGS
                .get(usize::from(index))
                .copied()
                .ok_or(ErrorCode::INVAL)?,
            _ => return Err(ErrorCode::NOSUPPORT),
        };
        Ok(table)
    }

    /// Send `data` in the data stage of the current control transfer.
    fn reply(&self, data: &'static [u8], requested: u16) -> Result<(), ErrorCode> {
        let len = data.len().min(usize::from(requested));
        self.usb
            .queue(0, Request::oneshot(&data[..len]))
            .map_err(|(err, _)| err)
    }

    fn set_configuration(&self, value: u16) -> Result<(), ErrorCode> {
        if value > u16::from(NUM_CONFIGURATIONS) {
            return Err(ErrorCode::INVAL);
        }
        self.usb.disable(IN_ENDPOINT)?;
        self.usb.disable(OUT_ENDPOINT)?;
        self.usb.set_configuration(value as u8)?;
        if value == 0 {
            return Ok(());
        }

        let configuration: &[u8] = if self.usb.speed() == Speed::High {
            &descriptors::HS_CONFIGURATION
        } else {
            &descriptors::FS_CONFIGURATION
        };
        for endpoint in descriptors::endpoints(configuration) {
            if let Err(err) = self.usb.enable(endpoint.number(), &endpoint) {
                self.usb.set_configuration(0)?;
                return Err(err);
            }
        }
        self.usb.fifo_flush(IN_ENDPOINT);
        self.usb.fifo_flush(OUT_ENDPOINT);
        self.queue_command();
        Ok(())
    }

    /// Wait for the next command. Does nothing if the command request is
    /// already queued.
    fn queue_command(&self) {
        let Some(mut request) = self.command.take() else {
            return;
        };
        request.set_window(0, COMMAND_LEN);
        if let Err((err, request)) = self.usb.queue(OUT_ENDPOINT, request) {
            debug!("usbtool: cannot queue command request: {:?}", err);
            self.command.put(request);
        }
    }

    fn command_received(&self, request: Request) {
        match request.status {
            RequestStatus::Complete => {}
            RequestStatus::Error(ErrorCode::OVERFLOW) => {
                debug!("usbtool: command longer than {} bytes", COMMAND_LEN);
                self.command.put(request);
                self.queue_command();
                return;
            }
            _ => {
                self.command.put(request);
                return;
            }
        }

        let command = Command::parse(request.transferred());
        self.command.put(request);
        match command {
            Ok(command) => self.execute(command),
            Err(err) => {
                debug!("usbtool: ignoring command ({:?})", err);
                self.queue_command();
            }
        }
    }

    fn execute(&self, command: Command) {
        match command {
            Command::BufferRead { offset, length } => {
                self.start_transfer(IN_ENDPOINT, offset, length)
            }
            Command::BufferWrite { offset, length } => {
                self.start_transfer(OUT_ENDPOINT, offset, length)
            }
            Command::NandSelect { chip } => {
                let chip = Some(chip as usize).filter(|&chip| chip < MAX_CHIPS);
                if let Err(err) = self.nand.select(chip) {
                    debug!("usbtool: select failed: {:?}", err);
                }
                self.queue_command();
            }
            Command::NandInfo { chip } => {
                let info = chip
                    .map(|chip| chip as usize)
                    .or_else(|| self.nand.selected())
                    .and_then(|chip| self.nand.info(chip));
                match info {
                    Some(info) => self.respond(&info.to_bytes()),
                    None => {
                        debug!("usbtool: no such chip");
                        self.queue_command();
                    }
                }
            }
            Command::NandBad => self.respond_with(|out| {
                let chip = self.nand.selected().ok_or(ErrorCode::NODEVICE)?;
                self.nand.bad_block_table(chip, out)
            }),
            Command::NandRead { block, offset } => {
                let result = self.with_buffer(offset, |buf| self.nand.read_block(block as usize, buf));
                if let Err(err) = result {
                    debug!("usbtool: reading block {} failed: {:?}", block, err);
                }
                self.queue_command();
            }
            Command::NandWrite { block, offset } => {
                let result =
                    self.with_buffer(offset, |buf| self.nand.write_block(block as usize, buf));
                self.respond(&status_reply(result));
            }
            Command::NandErase { block } => {
                self.respond(&status_reply(self.nand.erase_block(block as usize)));
            }
            Command::NandMark { block, mark } => {
                if let Err(err) = self.nand.mark_block(block as usize, mark as u8) {
                    debug!("usbtool: marking block {} failed: {:?}", block, err);
                }
                self.queue_command();
            }
        }
    }

    /// Move a window of the RAM buffer over `endpoint`.
    fn start_transfer(&self, endpoint: usize, offset: u32, length: u32) {
        let Some(mut request) = self.data.take() else {
            debug!("usbtool: buffer transfer already in progress");
            self.queue_command();
            return;
        };
        let (offset, length) = self.window(offset, length);
        request.set_window(offset, length);
        if let Err((err, request)) = self.usb.queue(endpoint, request) {
            debug!("usbtool: cannot start buffer transfer: {:?}", err);
            self.data.put(request);
            self.queue_command();
        }
    }

    /// Run `f` on the RAM buffer from `offset` to its end.
    fn with_buffer<T, F>(&self, offset: u32, f: F) -> Result<T, ErrorCode>
    where
        F: FnOnce(&mut [u8]) -> Result<T, ErrorCode>,
    {
        let (offset, _) = self.window(offset, 0);
        self.data
            .map(|request| {
                request.reset_window();
                let buffer = request.data_mut().ok_or(ErrorCode::FAIL)?;
                f(&mut buffer[offset..self.buffer_len])
            })
            .unwrap_or(Err(ErrorCode::BUSY))
    }

    fn respond(&self, bytes: &[u8]) {
        self.respond_with(|out| {
            let len = bytes.len().min(out.len());
            out[..len].copy_from_slice(&bytes[..len]);
            Ok(len)
        })
    }

    /// Fill the reply buffer with `fill` and send the bytes it reports. If
    /// nothing can be sent the next command is awaited instead.
    fn respond_with<F>(&self, fill: F)
    where
        F: FnOnce(&mut [u8]) -> Result<usize, ErrorCode>,
    {
        let Some(mut request) = self.response.take() else {
            debug!("usbtool: reply already in progress");
            self.queue_command();
            return;
        };
        request.reset_window();
        match request.data_mut().ok_or(ErrorCode::FAIL).and_then(fill) {
            Ok(len) => {
                request.set_window(0, len);
                if let Err((err, request)) = self.usb.queue(IN_ENDPOINT, request) {
                    debug!("usbtool: cannot send reply: {:?}", err);
                    self.response.put(request);
                    self.queue_command();
                }
            }
            Err(err) => {
                debug!("usbtool: command failed: {:?}", err);
                self.response.put(request);
                self.queue_command();
            }
        }
    }

    /// A buffer transfer or reply finished. Only a successful one lets the
    /// next command in.
    fn transfer_done(&self, slot: &MapCell<Request>, request: Request) {
        let status = request.status;
        slot.put(request);
        if status.is_ok() {
            self.queue_command();
        } else {
            debug!("usbtool: transfer ended with {:?}", status);
        }
    }
}

impl<'a, U: UsbDevice<'a>, N: NandFlash> ClassDriver for UsbTool<'a, U, N> {
    fn init(&self) {}

    fn setup(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        if setup.request_type.request_type() != RequestType::Standard {
            return Err(ErrorCode::NOSUPPORT);
        }
        let request = setup.get_standard_request().ok_or(ErrorCode::NOSUPPORT)?;
        match (request, setup.request_type.recipient()) {
            (
                StandardRequest::GetDescriptor {
                    descriptor_type,
                    descriptor_index,
                    requested_length,
                    ..
                },
                Recipient::Device,
            ) => {
                let table = self.descriptor(descriptor_type, descriptor_index)?;
                self.reply(table, requested_length)
            }
            (StandardRequest::GetConfiguration, Recipient::Device) => {
                let value = usize::from(self.usb.configuration()).min(1);
                self.reply(&CONFIGURATION_VALUES[value..=value], setup.length)
            }
            (
                StandardRequest::SetConfiguration {
                    configuration_value,
                },
                Recipient::Device,
            ) => self.set_configuration(configuration_value),
            (StandardRequest::GetInterface { .. }, Recipient::Interface) => {
                self.reply(&ALTERNATE_SETTING, setup.length)
            }
            (
                StandardRequest::SetInterface {
                    interface: 0,
                    alternate: 0,
                },
                Recipient::Interface,
            ) => Ok(()),
            (StandardRequest::SetInterface { .. }, Recipient::Interface) => Err(ErrorCode::INVAL),
            _ => Err(ErrorCode::NOSUPPORT),
        }
    }

    fn vbus_off(&self) {
        debug!("usbtool: host disconnected");
    }

    fn request_complete(&self, _endpoint: usize, request: Request) {
        match request.id {
            COMMAND_ID => self.command_received(request),
            DATA_ID => self.transfer_done(&self.data, request),
            RESPONSE_ID => self.transfer_done(&self.response, request),
            _ => {}
        }
    }
}
