// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Behavioural model of the controller used by the unit tests.
//!
//! Only the parts the driver relies on are modelled: the index register
//! banking, write-one-to-clear status bits, packet based FIFOs in both
//! directions, the PSIF/LWO/BRCR view of the receive side and the PSIF
//! count of packets the host collected on the transmit side.

extern crate std;

use core::cell::RefCell;
use std::collections::VecDeque;
use std::vec::Vec;

use super::registers::{Reg, UdcRegisterBank, EP0SR, ESR, SSR};
use super::NUM_ENDPOINTS;

#[derive(Default)]
struct EndpointModel {
    /// Packets sent by the host, oldest first.
    rx: VecDeque<Vec<u8>>,
    /// Words of the oldest packet already read.
    rx_words_read: usize,
    /// Packets written by the driver.
    tx: Vec<Vec<u8>>,
    /// Packet being written: announced length and bytes so far.
    tx_pending: Option<(usize, Vec<u8>)>,
    /// Packets the host collected since TX_SUCCESS was last acknowledged.
    tx_collected: u16,
    /// Latched write-one-to-clear status bits.
    status: u16,
    control: u16,
    bwcr: u16,
    mpr: u16,
}

#[derive(Default)]
struct Model {
    index: usize,
    eir: u16,
    eier: u16,
    edr: u16,
    tr: u16,
    ssr: u16,
    scr: u16,
    pcr: u16,
    pcr_pulses: usize,
    user1: u16,
    clock_enabled: bool,
    last_data: bool,
    endpoints: [EndpointModel; NUM_ENDPOINTS],
}

pub(crate) struct EmulatedUdc {
    model: RefCell<Model>,
}

impl EmulatedUdc {
    pub(crate) fn new() -> EmulatedUdc {
        EmulatedUdc {
            model: RefCell::new(Model::default()),
        }
    }

    fn rx_view(ep: &EndpointModel) -> (bool, bool, u16, u16) {
        let rx_success = !ep.rx.is_empty();
        let odd = ep.rx.front().is_some_and(|p| p.len() % 2 == 1);
        let staged = ep.rx.len().min(2) as u16;
        let words = ep.rx.front().map_or(0, |p| p.len().div_ceil(2)) as u16;
        (rx_success, odd, staged, words)
    }

    // Host side.

    pub(crate) fn vbus_on(&self) {
        self.model.borrow_mut().ssr |= SSR::VBUSON::SET.value;
    }

    pub(crate) fn vbus_off(&self) {
        self.model.borrow_mut().ssr |= SSR::VBUSOFF::SET.value;
    }

    /// Bus reset followed by speed detection.
    pub(crate) fn bus_reset(&self, high_speed: bool) {
        let mut model = self.model.borrow_mut();
        let hsp = if high_speed { SSR::HSP::SET } else { SSR::HSP::CLEAR };
        model.ssr = (model.ssr & !SSR::HSP::SET.value)
            | (SSR::RESET::SET + SSR::SDE::SET + hsp).value;
    }

    pub(crate) fn raise(&self, event: u16) {
        self.model.borrow_mut().ssr |= event;
    }

    pub(crate) fn host_setup(&self, packet: [u8; 8]) {
        self.host_out(0, &packet);
    }

    pub(crate) fn host_out(&self, ep: usize, data: &[u8]) {
        let mut model = self.model.borrow_mut();
        model.endpoints[ep].rx.push_back(data.to_vec());
        model.eir |= 1 << ep;
    }

    /// The host collected the last IN packet of `ep`.
    pub(crate) fn host_in_ack(&self, ep: usize) {
        self.host_collects(ep, 1);
    }

    /// The host collected both staged IN packets of `ep` before the driver
    /// looked.
    pub(crate) fn host_in_ack_both(&self, ep: usize) {
        self.host_collects(ep, 2);
    }

    fn host_collects(&self, ep: usize, packets: u16) {
        let mut model = self.model.borrow_mut();
        let bit = if ep == 0 {
            EP0SR::TX_SUCCESS::SET.value
        } else {
            ESR::TX_SUCCESS::SET.value
        };
        let endpoint = &mut model.endpoints[ep];
        endpoint.status |= bit;
        endpoint.tx_collected = (endpoint.tx_collected + packets).min(2);
        model.eir |= 1 << ep;
    }

    pub(crate) fn host_stall_event(&self, ep: usize) {
        let mut model = self.model.borrow_mut();
        let bit = if ep == 0 {
            EP0SR::STALL::SET.value
        } else {
            ESR::STALL::SET.value
        };
        model.endpoints[ep].status |= bit;
        model.eir |= 1 << ep;
    }

    pub(crate) fn set_last_data(&self, last: bool) {
        self.model.borrow_mut().last_data = last;
    }

    // Inspection.

    pub(crate) fn take_sent(&self, ep: usize) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.model.borrow_mut().endpoints[ep].tx)
    }

    pub(crate) fn pending_rx(&self, ep: usize) -> usize {
        self.model.borrow().endpoints[ep].rx.len()
    }

    pub(crate) fn control(&self, ep: usize) -> u16 {
        self.model.borrow().endpoints[ep].control
    }

    pub(crate) fn max_packet(&self, ep: usize) -> u16 {
        self.model.borrow().endpoints[ep].mpr
    }

    pub(crate) fn peek(&self, reg: Reg) -> u16 {
        let model = self.model.borrow();
        match reg {
            Reg::Eier => model.eier,
            Reg::Edr => model.edr,
            Reg::Scr => model.scr,
            Reg::Ssr => model.ssr,
            Reg::User1 => model.user1,
            Reg::Eir => model.eir,
            _ => 0,
        }
    }

    pub(crate) fn clock_enabled(&self) -> bool {
        self.model.borrow().clock_enabled
    }

    pub(crate) fn phy_resets(&self) -> usize {
        self.model.borrow().pcr_pulses
    }
}

impl UdcRegisterBank for EmulatedUdc {
    fn read(&self, reg: Reg) -> u16 {
        let model = self.model.borrow();
        let index = model.index;
        let ep = &model.endpoints[index];
        match reg {
            Reg::Ir => index as u16,
            Reg::Eir => model.eir,
            Reg::Eier => model.eier,
            Reg::Edr => model.edr,
            Reg::Tr => model.tr,
            Reg::Ssr => model.ssr,
            Reg::Scr => model.scr,
            Reg::Pcr => model.pcr,
            Reg::User1 => model.user1,
            Reg::Ep0sr => {
                let ep0 = &model.endpoints[0];
                let (rx, odd, _, _) = Self::rx_view(ep0);
                let mut value = ep0.status;
                if rx {
                    value |= EP0SR::RX_SUCCESS::SET.value;
                    if model.last_data {
                        value |= EP0SR::LAST_DATA_HI::SET.value;
                    }
                }
                if odd {
                    value |= EP0SR::LWO::SET.value;
                }
                value
            }
            Reg::Ep0cr => model.endpoints[0].control,
            Reg::Esr => {
                let (rx, odd, rx_staged, _) = Self::rx_view(ep);
                let staged = if model.edr & (1 << index) != 0 {
                    ep.tx_collected
                } else {
                    rx_staged
                };
                let mut value = ep.status | ESR::PSIF.val(staged).value;
                if rx {
                    value |= ESR::RX_SUCCESS::SET.value;
                }
                if odd {
                    value |= ESR::LWO::SET.value;
                }
                value
            }
            Reg::Ecr => ep.control,
            Reg::Brcr => Self::rx_view(ep).3,
            Reg::Bwcr => ep.bwcr,
            Reg::Mpr => ep.mpr,
        }
    }

    fn write(&self, reg: Reg, value: u16) {
        let mut model = self.model.borrow_mut();
        let index = model.index;
        match reg {
            Reg::Ir => model.index = usize::from(value & 0xf) % NUM_ENDPOINTS,
            Reg::Eir => model.eir &= !value,
            Reg::Eier => model.eier = value,
            Reg::Edr => model.edr = value,
            Reg::Tr => model.tr = value,
            Reg::Ssr => model.ssr &= !(value & !SSR::HSP::SET.value),
            Reg::Scr => model.scr = value,
            Reg::Pcr => {
                if value & 1 == 0 && model.pcr & 1 == 1 {
                    model.pcr_pulses += 1;
                }
                model.pcr = value;
            }
            Reg::User1 => model.user1 = value,
            Reg::Ep0sr => {
                let ep0 = &mut model.endpoints[0];
                ep0.status &= !value;
                // Acknowledging reception retires a zero-length packet.
                if value & EP0SR::RX_SUCCESS::SET.value != 0
                    && ep0.rx_words_read == 0
                    && ep0.rx.front().is_some_and(|p| p.is_empty())
                {
                    ep0.rx.pop_front();
                }
            }
            Reg::Ep0cr => model.endpoints[0].control = value,
            Reg::Esr => {
                let ep = &mut model.endpoints[index];
                ep.status &= !value;
                if value & ESR::TX_SUCCESS::SET.value != 0 {
                    ep.tx_collected = 0;
                }
            }
            Reg::Ecr => model.endpoints[index].control = value,
            Reg::Brcr => {}
            Reg::Bwcr => {
                let ep = &mut model.endpoints[index];
                ep.bwcr = value;
                if value == 0 {
                    ep.tx.push(Vec::new());
                    ep.tx_pending = None;
                } else {
                    ep.tx_pending = Some((usize::from(value), Vec::new()));
                }
            }
            Reg::Mpr => model.endpoints[index].mpr = value,
        }
    }

    fn read_fifo(&self, ep: usize) -> u16 {
        let mut model = self.model.borrow_mut();
        let ep = &mut model.endpoints[ep];
        let Some(packet) = ep.rx.front() else {
            return 0;
        };
        let at = ep.rx_words_read * 2;
        let lo = packet.get(at).copied().unwrap_or(0);
        let hi = packet.get(at + 1).copied().unwrap_or(0);
        ep.rx_words_read += 1;
        if ep.rx_words_read * 2 >= packet.len() {
            ep.rx.pop_front();
            ep.rx_words_read = 0;
        }
        u16::from_le_bytes([lo, hi])
    }

    fn write_fifo(&self, ep: usize, word: u16) {
        let mut model = self.model.borrow_mut();
        let ep = &mut model.endpoints[ep];
        if let Some((len, mut bytes)) = ep.tx_pending.take() {
            bytes.extend_from_slice(&word.to_le_bytes());
            if bytes.len() >= len {
                bytes.truncate(len);
                ep.tx.push(bytes);
            } else {
                ep.tx_pending = Some((len, bytes));
            }
        }
    }

    fn enable_clock(&self) {
        self.model.borrow_mut().clock_enabled = true;
    }
}
