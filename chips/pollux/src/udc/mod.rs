// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USB device controller driver for the POLLUX SoC.
//!
//! The controller has three endpoints: endpoint 0 for control transfers and
//! two configurable bulk/interrupt endpoints with dual-packet FIFOs. There is
//! no DMA; every packet is moved through a 16-bit FIFO window by the CPU.
//!
//! The driver does not take interrupts. The board calls [`Udc::task`] from
//! its main loop and everything, including completion callbacks to the
//! class driver, happens from inside that call or from inside
//! [`UsbDevice::queue`].
//!
//! Each endpoint keeps an ordered queue of [`Request`]s. Only the request at
//! the head of a queue is ever being transferred; it is removed and handed
//! back to the class driver once its last packet has gone through the FIFO.
//!
//! Endpoint zero is handled here as far as the bus state machine needs it:
//! `SET_ADDRESS`, `GET_STATUS` and `SET_FEATURE`/`CLEAR_FEATURE` of the
//! endpoint halt feature are answered directly, everything else is passed
//! to the class driver, and a request the class driver refuses stalls the
//! endpoint.

use core::cell::{Cell, RefCell};

use kernel::collections::queue::Queue;
use kernel::collections::ring_buffer::RingBuffer;
use kernel::debug;
use kernel::hil::usb::{
    ClassDriver, ControlState, DescriptorType, DeviceState, EndpointDescriptor, FeatureSelector,
    Recipient, Request, RequestStatus, RequestType, SetupData, Speed, StandardRequest,
    TransferDirection, TransferType, UsbDevice, ENDPOINT_NUMBER_MASK, USB_DIR_IN,
};
use kernel::utilities::cells::OptionalCell;
use kernel::utilities::registers::{FieldValue, LocalRegisterCopy, RegisterLongName};
use kernel::ErrorCode;

#[cfg(test)]
mod emulated;
pub mod registers;

use registers::{Reg, UdcRegisterBank, ECR, EP0SR, ESR, PCR, SCR, SSR, USER1};

pub use registers::{UdcRegisters, UDC_BASE};

pub const NUM_ENDPOINTS: usize = 3;

/// Requests an endpoint can hold at once.
pub const QUEUE_DEPTH: usize = 4;

/// Spins the PHY enable is held for during bring-up.
const PHY_RESET_SPINS: usize = 100_000;

const SETUP_PACKET_WORDS: usize = 4;

static STATUS_ZERO: [u8; 2] = [0, 0];
/// Bit 0 is "self powered" for the device and "halted" for an endpoint.
static STATUS_BIT0: [u8; 2] = [1, 0];

/// Endpoint status as far as the transfer code cares. Endpoint 0 and the
/// other endpoints report it through differently laid out registers.
#[derive(Copy, Clone, Debug, Default)]
struct EndpointStatus {
    rx_success: bool,
    tx_success: bool,
    stall: bool,
    flush: bool,
    /// The last FIFO word carries one byte.
    odd: bool,
    /// A second packet is staged behind the current one.
    two_packets: bool,
    /// Endpoint 0 only: the controller flagged the end of an OUT data stage.
    last_data: bool,
}

struct Endpoint {
    address: Cell<u8>,
    maxpacket: Cell<u16>,
    stopped: Cell<bool>,
    enabled: Cell<bool>,
    queue: RefCell<RingBuffer<Request, QUEUE_DEPTH>>,
}

impl Endpoint {
    const fn new(number: u8) -> Endpoint {
        Endpoint {
            address: Cell::new(number),
            maxpacket: Cell::new(0),
            stopped: Cell::new(false),
            enabled: Cell::new(false),
            queue: RefCell::new(RingBuffer::new()),
        }
    }

    fn is_in(&self) -> bool {
        self.address.get() & USB_DIR_IN != 0
    }

    fn set_in(&self, is_in: bool) {
        let number = self.address.get() & ENDPOINT_NUMBER_MASK;
        self.address
            .set(if is_in { number | USB_DIR_IN } else { number });
    }

    fn has_requests(&self) -> bool {
        self.queue.borrow().has_elements()
    }

    fn pop(&self) -> Option<Request> {
        self.queue.borrow_mut().dequeue()
    }
}

pub struct Udc<'a, R: UdcRegisterBank> {
    regs: R,
    endpoints: [Endpoint; NUM_ENDPOINTS],
    client: OptionalCell<&'a dyn ClassDriver>,
    state: Cell<DeviceState>,
    speed: Cell<Speed>,
    config: Cell<u8>,
    ep0_state: Cell<ControlState>,
}

impl<'a, R: UdcRegisterBank> Udc<'a, R> {
    pub const fn new(regs: R) -> Self {
        Udc {
            regs,
            endpoints: [Endpoint::new(0), Endpoint::new(1), Endpoint::new(2)],
            client: OptionalCell::empty(),
            state: Cell::new(DeviceState::NotAttached),
            speed: Cell::new(Speed::Unknown),
            config: Cell::new(0),
            ep0_state: Cell::new(ControlState::WaitForSetup),
        }
    }

    /// Bring the controller up. The class driver must have been registered
    /// with `set_client` first; its `init` is called once the controller is
    /// ready to see VBUS.
    pub fn init(&self) -> Result<(), ErrorCode> {
        if self.client.is_none() {
            return Err(ErrorCode::INVAL);
        }

        self.speed.set(Speed::Unknown);
        self.state.set(DeviceState::NotAttached);
        self.regs.enable_clock();

        // Pulse the PHY enable to reset the transceiver.
        self.modify(Reg::Pcr, PCR::PCE::SET);
        for _ in 0..PHY_RESET_SPINS {
            core::hint::spin_loop();
        }
        self.modify(Reg::Pcr, PCR::PCE::CLEAR);

        self.reconfig();
        self.regs.write(Reg::User1, USER1::VBUSENB::SET.value);

        self.client.map(|client| client.init());
        Ok(())
    }

    /// Service every pending controller event. Must be called regularly by
    /// the board's main loop.
    pub fn task(&self) {
        let ssr = LocalRegisterCopy::<u16, SSR::Register>::new(self.regs.read(Reg::Ssr));
        let eir = self.regs.read(Reg::Eir);
        if eir == 0 && !ssr.any_matching_bits_set(Self::system_events()) {
            return;
        }

        if ssr.is_set(SSR::VBUSON) {
            self.ack(Reg::Ssr, SSR::VBUSON::SET);
            self.state.set(DeviceState::Attached);
            self.client.map(|client| client.vbus_on());
        }

        if ssr.is_set(SSR::VBUSOFF) {
            self.ack(Reg::Ssr, SSR::VBUSOFF::SET);
            self.disconnect();
            self.client.map(|client| client.vbus_off());
        }

        if ssr.read(SSR::ERR) != 0 {
            debug!("udc: bus error {:#x}", ssr.read(SSR::ERR));
            self.ack(Reg::Ssr, SSR::ERR::SET);
        }

        if ssr.is_set(SSR::RESET) {
            self.ack(Reg::Ssr, SSR::RESET::SET);
            self.bus_reset();
        }

        if ssr.is_set(SSR::SDE) {
            self.ack(Reg::Ssr, SSR::SDE::SET);
            self.speed.set(if ssr.is_set(SSR::HSP) {
                Speed::High
            } else {
                Speed::Full
            });
            self.init_endpoint(0);
            self.state.set(DeviceState::Default);
        }

        if ssr.is_set(SSR::SUSPEND) {
            self.ack(Reg::Ssr, SSR::SUSPEND::SET);
        }
        if ssr.is_set(SSR::RESUME) {
            self.ack(Reg::Ssr, SSR::RESUME::SET);
        }

        if eir & 1 != 0 {
            self.regs.write(Reg::Eir, 1);
            self.ep0_interrupt();
        }

        for ep in 1..NUM_ENDPOINTS {
            let bit = 1 << ep;
            if eir & bit == 0 {
                continue;
            }
            self.regs.write(Reg::Eir, bit);
            if self.endpoints[ep].is_in() {
                self.in_interrupt(ep);
            } else {
                self.out_interrupt(ep);
            }
        }
    }

    fn system_events() -> FieldValue<u16, SSR::Register> {
        SSR::RESET::SET
            + SSR::SUSPEND::SET
            + SSR::RESUME::SET
            + SSR::SDE::SET
            + SSR::VBUSON::SET
            + SSR::VBUSOFF::SET
            + SSR::ERR::SET
    }

    // Register helpers.

    /// Write-one-to-clear acknowledge.
    fn ack<F: RegisterLongName>(&self, reg: Reg, field: FieldValue<u16, F>) {
        self.regs.write(reg, field.value);
    }

    fn modify<F: RegisterLongName>(&self, reg: Reg, field: FieldValue<u16, F>) {
        let mut value = LocalRegisterCopy::<u16, F>::new(self.regs.read(reg));
        value.modify(field);
        self.regs.write(reg, value.get());
    }

    fn set_bits(&self, reg: Reg, bits: u16) {
        self.regs.write(reg, self.regs.read(reg) | bits);
    }

    fn clear_bits(&self, reg: Reg, bits: u16) {
        self.regs.write(reg, self.regs.read(reg) & !bits);
    }

    fn select(&self, ep: usize) {
        self.regs.write(Reg::Ir, ep as u16 & 0xf);
    }

    fn control_reg(ep: usize) -> Reg {
        if ep == 0 {
            Reg::Ep0cr
        } else {
            Reg::Ecr
        }
    }

    fn endpoint_status(&self, ep: usize) -> EndpointStatus {
        if ep == 0 {
            let sr = LocalRegisterCopy::<u16, EP0SR::Register>::new(self.regs.read(Reg::Ep0sr));
            EndpointStatus {
                rx_success: sr.is_set(EP0SR::RX_SUCCESS),
                tx_success: sr.is_set(EP0SR::TX_SUCCESS),
                stall: sr.is_set(EP0SR::STALL),
                odd: sr.is_set(EP0SR::LWO),
                last_data: sr.is_set(EP0SR::LAST_DATA_LO) || sr.is_set(EP0SR::LAST_DATA_HI),
                ..EndpointStatus::default()
            }
        } else {
            self.select(ep);
            let sr = LocalRegisterCopy::<u16, ESR::Register>::new(self.regs.read(Reg::Esr));
            EndpointStatus {
                rx_success: sr.is_set(ESR::RX_SUCCESS),
                tx_success: sr.is_set(ESR::TX_SUCCESS),
                stall: sr.is_set(ESR::STALL),
                flush: sr.is_set(ESR::FLUSH),
                odd: sr.is_set(ESR::LWO),
                two_packets: sr.read(ESR::PSIF) >= 2,
                last_data: false,
            }
        }
    }

    // Bring-up and bus events.

    fn reconfig(&self) {
        self.regs.write(Reg::Eier, 1);
        self.regs.write(Reg::Tr, 0);
        self.regs.write(
            Reg::Scr,
            (SCR::DTZIEN_EN::SET + SCR::RRD_EN::SET + SCR::SUS_EN::SET + SCR::RST_EN::SET).value,
        );
        self.regs.write(Reg::Ep0cr, 0);
        for ep in 0..NUM_ENDPOINTS {
            self.init_endpoint(ep);
        }
        self.ep0_state.set(ControlState::WaitForSetup);
        self.speed.set(Speed::Unknown);
    }

    /// Largest packet endpoint `ep` supports at the current bus speed.
    fn hw_maxpacket(&self, ep: usize) -> u16 {
        match (ep, self.speed.get() == Speed::High) {
            (0, true) => 64,
            (0, false) => 8,
            (_, true) => 512,
            (_, false) => 64,
        }
    }

    fn init_endpoint(&self, ep: usize) {
        let endpoint = &self.endpoints[ep];
        let maxpacket = self.hw_maxpacket(ep);
        endpoint.address.set(ep as u8);
        endpoint.maxpacket.set(maxpacket);
        endpoint.stopped.set(false);
        if ep != 0 {
            endpoint.enabled.set(false);
        }
        self.select(ep);
        self.regs.write(Reg::Mpr, maxpacket);
    }

    fn bus_reset(&self) {
        // Refuse requeues from the completion callbacks below.
        self.speed.set(Speed::Unknown);
        self.config.set(0);
        for endpoint in &self.endpoints[1..] {
            endpoint.enabled.set(false);
        }
        for ep in 0..NUM_ENDPOINTS {
            self.nuke(ep, ErrorCode::CONNRESET);
        }
        self.reconfig();
        self.state.set(DeviceState::Attached);
    }

    fn disconnect(&self) {
        for ep in 1..NUM_ENDPOINTS {
            if self.endpoints[ep].enabled.get() {
                self.shutdown_endpoint(ep);
            }
        }
        self.nuke(0, ErrorCode::SHUTDOWN);
        self.config.set(0);
        self.speed.set(Speed::Unknown);
        self.state.set(DeviceState::NotAttached);
    }

    fn shutdown_endpoint(&self, ep: usize) {
        let endpoint = &self.endpoints[ep];
        self.clear_bits(Reg::Eier, 1 << ep);
        endpoint.enabled.set(false);
        self.nuke(ep, ErrorCode::SHUTDOWN);
        endpoint.stopped.set(true);
    }

    // Requests.

    /// Hand `req` back with `result` as its final status.
    fn complete(&self, ep: usize, mut req: Request, result: Result<(), ErrorCode>) {
        req.status = match result {
            Ok(()) => RequestStatus::Complete,
            Err(e) => RequestStatus::Error(e),
        };
        if ep == 0 {
            self.ep0_state.set(ControlState::WaitForSetup);
            self.endpoints[0].set_in(false);
        }
        if req.callback {
            self.client.map(move |client| client.request_complete(ep, req));
        }
    }

    /// Complete a request whose last packet went through, keeping an error
    /// recorded on the way (an overflow).
    fn finish(&self, ep: usize, req: Request) {
        let result = match req.status {
            RequestStatus::Error(e) => Err(e),
            _ => Ok(()),
        };
        self.complete(ep, req, result);
    }

    /// Cancel everything queued on `ep`. Requests queued again from the
    /// completion callbacks are left alone.
    fn nuke(&self, ep: usize, error: ErrorCode) {
        let pending = self.endpoints[ep].queue.borrow().len();
        for _ in 0..pending {
            match self.endpoints[ep].pop() {
                Some(req) => self.complete(ep, req, Err(error)),
                None => break,
            }
        }
    }

    /// Write the next packet of `req` into the FIFO. Returns whether it was
    /// the last packet of the request.
    fn write_packet(&self, ep: usize, req: &mut Request) -> bool {
        let maxpacket = usize::from(self.endpoints[ep].maxpacket.get());
        let len = {
            let data = req.data();
            let start = req.actual.min(data.len());
            let packet = &data[start..];
            let packet = &packet[..packet.len().min(maxpacket)];

            self.select(ep);
            self.regs.write(Reg::Bwcr, packet.len() as u16);
            for pair in packet.chunks(2) {
                let hi = pair.get(1).copied().unwrap_or(0);
                self.regs.write_fifo(ep, u16::from_le_bytes([pair[0], hi]));
            }
            packet.len()
        };
        req.actual += len;

        if len != maxpacket {
            true
        } else {
            // A full packet ends the request only when everything was sent
            // and no terminating zero-length packet was asked for.
            req.actual == req.length() && !req.zero
        }
    }

    /// Move one received packet into `req`. Returns `None` when nothing was
    /// waiting, otherwise whether the request is finished. Bytes that do not
    /// fit are drained from the FIFO and the request is marked overflowed.
    fn read_packet(&self, ep: usize, req: &mut Request) -> Option<bool> {
        let status = self.endpoint_status(ep);
        if !status.rx_success {
            return None;
        }

        self.select(ep);
        let words = usize::from(self.regs.read(Reg::Brcr));
        let mut count = words * 2;
        if status.odd {
            count = count.saturating_sub(1);
        }

        let start = req.actual;
        let mut stored = 0;
        {
            let mut window = req.data_mut();
            let room = window.as_ref().map_or(0, |w| w.len().saturating_sub(start));
            for word in 0..words {
                let bytes = self.regs.read_fifo(ep).to_le_bytes();
                for (i, byte) in bytes.iter().enumerate() {
                    let pos = word * 2 + i;
                    if pos >= count || pos >= room {
                        continue;
                    }
                    if let Some(ref mut w) = window {
                        w[start + pos] = *byte;
                        stored += 1;
                    }
                }
            }
        }
        req.actual += stored;
        if stored < count {
            req.status = RequestStatus::Error(ErrorCode::OVERFLOW);
        }

        let maxpacket = usize::from(self.endpoints[ep].maxpacket.get());
        let mut last = count < maxpacket || req.actual >= req.length();
        if ep == 0 {
            self.ack(Reg::Ep0sr, EP0SR::RX_SUCCESS::SET);
            last |= status.last_data;
        }
        Some(last || stored < count)
    }

    /// Send the next packet of the request at the head of `ep`'s queue and
    /// complete it if that was its last one. Returns `None` for an empty
    /// queue, otherwise whether the head request completed.
    fn write_head(&self, ep: usize) -> Option<bool> {
        let last = self.endpoints[ep]
            .queue
            .borrow_mut()
            .front_mut()
            .map(|req| self.write_packet(ep, req))?;
        if last {
            if let Some(req) = self.endpoints[ep].pop() {
                self.finish(ep, req);
            }
        }
        Some(last)
    }

    /// Receive the next packet into the request at the head of `ep`'s
    /// queue. Returns `None` when there was no request or no packet.
    fn read_head(&self, ep: usize) -> Option<bool> {
        let last = self.endpoints[ep]
            .queue
            .borrow_mut()
            .front_mut()
            .and_then(|req| self.read_packet(ep, req))?;
        if last {
            if let Some(req) = self.endpoints[ep].pop() {
                self.finish(ep, req);
            }
        }
        Some(last)
    }

    // Endpoint interrupts.

    fn in_interrupt(&self, ep: usize) {
        let status = self.endpoint_status(ep);
        if status.stall {
            self.ack(Reg::Esr, ESR::STALL::SET);
            return;
        }
        if status.tx_success {
            self.ack(Reg::Esr, ESR::TX_SUCCESS::SET);
            if self.write_head(ep) == Some(false) && status.two_packets {
                self.write_head(ep);
            }
        }
    }

    fn out_interrupt(&self, ep: usize) {
        let status = self.endpoint_status(ep);
        if status.stall {
            self.ack(Reg::Esr, ESR::STALL::SET);
            return;
        }
        if status.flush {
            self.modify(Reg::Ecr, ECR::FLUSH::SET);
        }
        if status.rx_success && self.read_head(ep) == Some(false) && status.two_packets {
            self.read_head(ep);
        }
    }

    fn ep0_interrupt(&self) {
        let ep0 = &self.endpoints[0];
        let status = self.endpoint_status(0);
        self.select(0);

        if status.stall {
            self.modify(Reg::Ep0cr, ECR::STALL::CLEAR + ECR::FLUSH::CLEAR);
            self.ack(Reg::Ep0sr, EP0SR::STALL::SET);
            ep0.stopped.set(false);
            self.nuke(0, ErrorCode::CONNABORTED);
            self.ep0_state.set(ControlState::WaitForSetup);
            ep0.set_in(false);
            return;
        }

        if status.tx_success {
            self.ack(Reg::Ep0sr, EP0SR::TX_SUCCESS::SET);
            if ep0.is_in() {
                self.write_head(0);
            }
        }

        if status.rx_success {
            if self.ep0_state.get() == ControlState::WaitForSetup || ep0.is_in() {
                // Anything received outside an OUT data stage starts a new
                // control transfer.
                self.nuke(0, ErrorCode::PROTO);
                self.ep0_state.set(ControlState::WaitForSetup);
                ep0.set_in(false);
                if let Some(setup) = self.read_setup() {
                    self.process_setup(&setup);
                }
            } else {
                self.read_head(0);
            }
        }
    }

    fn read_setup(&self) -> Option<SetupData> {
        self.select(0);
        let words = usize::from(self.regs.read(Reg::Brcr));
        let mut raw = [0u8; SETUP_PACKET_WORDS * 2];
        for i in 0..words {
            let word = self.regs.read_fifo(0).to_le_bytes();
            if i < SETUP_PACKET_WORDS {
                raw[i * 2..i * 2 + 2].copy_from_slice(&word);
            }
        }
        self.ack(Reg::Ep0sr, EP0SR::RX_SUCCESS::SET);
        if words < SETUP_PACKET_WORDS {
            return None;
        }
        SetupData::get(&raw)
    }

    fn process_setup(&self, setup: &SetupData) {
        let ep0 = &self.endpoints[0];
        match setup.request_type.transfer_direction() {
            TransferDirection::DeviceToHost => {
                ep0.set_in(true);
                self.ep0_state.set(ControlState::DataXmit);
            }
            TransferDirection::HostToDevice => {
                ep0.set_in(false);
                self.ep0_state.set(ControlState::DataRecv);
            }
        }

        let device = setup.request_type.recipient() == Recipient::Device;
        let result = match setup.get_standard_request() {
            Some(StandardRequest::SetAddress { .. }) if device => {
                // The controller latches the address itself.
                if self.config.get() == 0 {
                    self.state.set(DeviceState::Address);
                }
                Ok(())
            }
            Some(StandardRequest::GetStatus { .. }) => self.get_status(setup),
            Some(StandardRequest::SetFeature { feature, .. }) => {
                self.halt_feature(setup, feature, true)
            }
            Some(StandardRequest::ClearFeature { feature, .. }) => {
                self.halt_feature(setup, feature, false)
            }
            _ => self.forward_setup(setup),
        };

        match result {
            Err(e) => {
                debug!(
                    "udc: stall request {:#04x} type {:?}: {:?}",
                    setup.request_code, setup.request_type, e
                );
                // A reply the class driver queued before failing is dropped.
                self.nuke(0, ErrorCode::PROTO);
                self.stall_ep0();
                ep0.set_in(false);
                self.ep0_state.set(ControlState::WaitForSetup);
            }
            Ok(()) => {
                if setup.length == 0 {
                    ep0.set_in(false);
                    self.ep0_state.set(ControlState::WaitForSetup);
                }
            }
        }
    }

    fn stall_ep0(&self) {
        self.select(0);
        self.modify(Reg::Ep0cr, ECR::STALL::SET);
        self.endpoints[0].stopped.set(true);
    }

    fn forward_setup(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        let result = self
            .client
            .map_or(Err(ErrorCode::NODEVICE), |client| client.setup(setup));
        let set_configuration = setup.request_type.request_type() == RequestType::Standard
            && setup.request_type.recipient() == Recipient::Device
            && matches!(
                setup.get_standard_request(),
                Some(StandardRequest::SetConfiguration { .. })
            );
        if set_configuration && result.is_ok() {
            self.nuke(0, ErrorCode::CONNRESET);
            self.state.set(if self.config.get() != 0 {
                DeviceState::Configured
            } else {
                DeviceState::Address
            });
        }
        result
    }

    fn get_status(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        let reply: &'static [u8; 2] = match setup.request_type.recipient() {
            Recipient::Device => &STATUS_BIT0,
            Recipient::Interface => &STATUS_ZERO,
            Recipient::Endpoint => {
                let ep = usize::from(setup.index as u8 & ENDPOINT_NUMBER_MASK);
                let endpoint = self.endpoints.get(ep).ok_or(ErrorCode::INVAL)?;
                if endpoint.stopped.get() {
                    &STATUS_BIT0
                } else {
                    &STATUS_ZERO
                }
            }
            _ => return Err(ErrorCode::INVAL),
        };
        let len = usize::from(setup.length).min(reply.len());
        let mut req = Request::oneshot(&reply[..len]);
        req.status = RequestStatus::InProgress;
        self.write_packet(0, &mut req);
        self.complete(0, req, Ok(()));
        Ok(())
    }

    fn halt_feature(
        &self,
        setup: &SetupData,
        feature: FeatureSelector,
        halt: bool,
    ) -> Result<(), ErrorCode> {
        if setup.request_type.recipient() != Recipient::Endpoint {
            return Err(ErrorCode::INVAL);
        }
        match feature {
            FeatureSelector::EndpointHalt => {
                let ep = usize::from(setup.index as u8 & ENDPOINT_NUMBER_MASK);
                if ep >= NUM_ENDPOINTS {
                    return Err(ErrorCode::INVAL);
                }
                self.set_halt(ep, halt)?;
                self.ep0_state.set(ControlState::WaitForSetup);
                Ok(())
            }
            _ => Err(ErrorCode::NOSUPPORT),
        }
    }
}

impl<'a, R: UdcRegisterBank> UsbDevice<'a> for Udc<'a, R> {
    fn set_client(&self, client: &'a dyn ClassDriver) {
        self.client.set(client);
    }

    fn state(&self) -> DeviceState {
        self.state.get()
    }

    fn speed(&self) -> Speed {
        self.speed.get()
    }

    fn control_state(&self) -> ControlState {
        self.ep0_state.get()
    }

    fn configuration(&self) -> u8 {
        self.config.get()
    }

    fn set_configuration(&self, value: u8) -> Result<(), ErrorCode> {
        if self.state.get() < DeviceState::Address {
            return Err(ErrorCode::SHUTDOWN);
        }
        self.config.set(value);
        self.state.set(if value != 0 {
            DeviceState::Configured
        } else {
            DeviceState::Address
        });
        Ok(())
    }

    fn endpoint_count(&self) -> usize {
        NUM_ENDPOINTS
    }

    fn enable(&self, ep: usize, desc: &EndpointDescriptor) -> Result<(), ErrorCode> {
        let endpoint = self.endpoints.get(ep).ok_or(ErrorCode::INVAL)?;
        let limit = self.hw_maxpacket(ep);
        if ep == 0
            || desc.descriptor_type != DescriptorType::Endpoint as u8
            || desc.number() != ep
            || desc.max_packet_size > limit
        {
            return Err(ErrorCode::INVAL);
        }
        let bulk = desc.transfer_type() == TransferType::Bulk;
        if desc.max_packet_size == 0 || (bulk && desc.max_packet_size != limit) {
            return Err(ErrorCode::RANGE);
        }
        if self.client.is_none()
            || self.speed.get() == Speed::Unknown
            || self.state.get() < DeviceState::Address
        {
            return Err(ErrorCode::SHUTDOWN);
        }

        self.select(ep);
        if desc.is_in() {
            self.set_bits(Reg::Edr, 1 << ep);
        } else {
            self.clear_bits(Reg::Edr, 1 << ep);
        }
        endpoint.set_in(desc.is_in());

        let mode = if desc.transfer_type() == TransferType::Interrupt {
            ECR::IEMS::SET
        } else {
            ECR::DUEN::SET
        };
        self.regs.write(Reg::Ecr, (mode + ECR::CDP::SET).value);

        endpoint.maxpacket.set(desc.max_packet_size);
        self.regs.write(Reg::Mpr, desc.max_packet_size);
        endpoint.enabled.set(true);
        self.set_halt(ep, false)?;
        self.set_bits(Reg::Eier, 1 << ep);
        Ok(())
    }

    fn disable(&self, ep: usize) -> Result<(), ErrorCode> {
        if ep == 0 || ep >= NUM_ENDPOINTS {
            return Err(ErrorCode::INVAL);
        }
        self.select(ep);
        self.shutdown_endpoint(ep);
        Ok(())
    }

    fn queue(&self, ep: usize, mut req: Request) -> Result<(), (ErrorCode, Request)> {
        let Some(endpoint) = self.endpoints.get(ep) else {
            return Err((ErrorCode::INVAL, req));
        };
        if !req.has_buffer() || req.status == RequestStatus::InProgress {
            return Err((ErrorCode::INVAL, req));
        }
        if self.client.is_none() || self.speed.get() == Speed::Unknown {
            return Err((ErrorCode::SHUTDOWN, req));
        }
        if ep != 0 && (!endpoint.enabled.get() || self.state.get() != DeviceState::Configured) {
            return Err((ErrorCode::SHUTDOWN, req));
        }

        self.select(ep);
        req.status = RequestStatus::InProgress;
        req.actual = 0;

        // Status stage of a control transfer.
        if ep == 0 && req.length() == 0 {
            endpoint.set_in(false);
            self.ep0_state.set(ControlState::WaitForSetup);
            self.complete(0, req, Ok(()));
            return Ok(());
        }

        if !endpoint.is_in() && !req.is_writable() {
            req.status = RequestStatus::Idle;
            return Err((ErrorCode::INVAL, req));
        }
        if endpoint.queue.borrow().is_full() {
            req.status = RequestStatus::Idle;
            return Err((ErrorCode::BUSY, req));
        }

        if !endpoint.has_requests() && !endpoint.stopped.get() {
            let done = if endpoint.is_in() {
                !self.endpoint_status(ep).tx_success && self.write_packet(ep, &mut req)
            } else {
                self.read_packet(ep, &mut req) == Some(true)
            };
            if done {
                self.finish(ep, req);
                return Ok(());
            }
        }

        endpoint
            .queue
            .borrow_mut()
            .enqueue(req)
            .map_err(|req| (ErrorCode::BUSY, req))
    }

    fn dequeue(&self, ep: usize, id: u16) -> Result<Request, ErrorCode> {
        let endpoint = self.endpoints.get(ep).ok_or(ErrorCode::INVAL)?;
        let mut req = endpoint
            .queue
            .borrow_mut()
            .remove_first(|r| r.id == id)
            .ok_or(ErrorCode::INVAL)?;
        req.status = RequestStatus::Idle;
        Ok(req)
    }

    fn set_halt(&self, ep: usize, halt: bool) -> Result<(), ErrorCode> {
        let endpoint = self.endpoints.get(ep).ok_or(ErrorCode::INVAL)?;
        if halt && endpoint.is_in() && endpoint.has_requests() {
            return Err(ErrorCode::AGAIN);
        }

        self.select(ep);
        let reg = Self::control_reg(ep);
        if halt {
            if ep == 0 {
                self.modify(reg, ECR::STALL::SET);
            } else {
                self.modify(reg, ECR::STALL::SET + ECR::FLUSH::SET);
            }
        } else {
            self.modify(reg, ECR::STALL::CLEAR);
        }
        endpoint.stopped.set(halt);

        if !halt && endpoint.is_in() {
            self.write_head(ep);
        }
        Ok(())
    }

    fn is_halted(&self, ep: usize) -> bool {
        self.endpoints.get(ep).is_some_and(|e| e.stopped.get())
    }

    fn fifo_flush(&self, ep: usize) {
        let Some(endpoint) = self.endpoints.get(ep) else {
            return;
        };
        self.select(ep);
        if endpoint.is_in() {
            self.modify(Self::control_reg(ep), ECR::FLUSH::SET);
            return;
        }
        loop {
            let esr = LocalRegisterCopy::<u16, ESR::Register>::new(self.regs.read(Reg::Esr));
            if esr.matches_all(ESR::PSIF::None) {
                break;
            }
            let words = self.regs.read(Reg::Brcr);
            if words == 0 {
                break;
            }
            for _ in 0..words {
                self.regs.read_fifo(ep);
            }
        }
    }

    fn queued(&self, ep: usize) -> usize {
        self.endpoints.get(ep).map_or(0, |e| e.queue.borrow().len())
    }
}
