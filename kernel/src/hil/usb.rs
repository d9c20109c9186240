// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface to USB device controller hardware.
//!
//! The controller side ([`UsbDevice`]) owns the bus state machine, endpoint
//! zero and one ordered queue of [`Request`]s per endpoint. The class driver
//! side ([`ClassDriver`]) is consulted for every control request the
//! controller does not answer itself and gets every finished request back
//! through [`ClassDriver::request_complete`].
//!
//! Completions are delivered synchronously from inside the call that
//! finished the transfer: from `UsbDevice::queue` when the FIFO could take the
//! whole request at once, otherwise from the controller's polling task. The
//! class driver may queue new requests, including the one it was just handed,
//! from inside the callback.

use core::fmt;

use crate::utilities::leasable_buffer::{SubSlice, SubSliceMut, SubSliceMutImmut};
use crate::ErrorCode;

/// Direction bit of an endpoint address.
pub const USB_DIR_IN: u8 = 0x80;
/// Endpoint number bits of an endpoint address.
pub const ENDPOINT_NUMBER_MASK: u8 = 0x0f;

/// The data structure sent in a SETUP handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetupData {
    pub request_type: DeviceRequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupData {
    /// Create a `SetupData` structure from a packet received from the wire.
    pub fn get(p: &[u8]) -> Option<Self> {
        if p.len() < 8 {
            return None;
        }
        Some(SetupData {
            request_type: DeviceRequestType(p[0]),
            request_code: p[1],
            value: u16::from_le_bytes([p[2], p[3]]),
            index: u16::from_le_bytes([p[4], p[5]]),
            length: u16::from_le_bytes([p[6], p[7]]),
        })
    }

    /// If the `SetupData` represents a standard device request, return it.
    pub fn get_standard_request(&self) -> Option<StandardRequest> {
        match self.request_type.request_type() {
            RequestType::Standard => match self.request_code {
                0 => Some(StandardRequest::GetStatus {
                    recipient_index: self.index,
                }),
                1 => Some(StandardRequest::ClearFeature {
                    feature: FeatureSelector::get(self.value),
                    recipient_index: self.index,
                }),
                3 => Some(StandardRequest::SetFeature {
                    feature: FeatureSelector::get(self.value),
                    recipient_index: self.index & 0xff,
                }),
                5 => Some(StandardRequest::SetAddress {
                    device_address: self.value,
                }),
                6 => Some(StandardRequest::GetDescriptor {
                    descriptor_type: DescriptorType::get((self.value >> 8) as u8),
                    descriptor_index: (self.value & 0xff) as u8,
                    lang_id: self.index,
                    requested_length: self.length,
                }),
                8 => Some(StandardRequest::GetConfiguration),
                9 => Some(StandardRequest::SetConfiguration {
                    configuration_value: self.value,
                }),
                10 => Some(StandardRequest::GetInterface {
                    interface: self.index,
                }),
                11 => Some(StandardRequest::SetInterface {
                    interface: (self.index & 0xff) as u8,
                    alternate: (self.value & 0xff) as u8,
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus {
        recipient_index: u16,
    },
    ClearFeature {
        feature: FeatureSelector,
        recipient_index: u16,
    },
    SetFeature {
        feature: FeatureSelector,
        recipient_index: u16,
    },
    SetAddress {
        device_address: u16,
    },
    GetDescriptor {
        descriptor_type: Option<DescriptorType>,
        descriptor_index: u8,
        lang_id: u16,
        requested_length: u16,
    },
    GetConfiguration,
    SetConfiguration {
        configuration_value: u16,
    },
    GetInterface {
        interface: u16,
    },
    SetInterface {
        interface: u8,
        alternate: u8,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration,
    String,
    Interface,
    Endpoint,
    DeviceQualifier,
    OtherSpeedConfiguration,
    InterfacePower,
}

impl DescriptorType {
    pub fn get(byte: u8) -> Option<DescriptorType> {
        match byte {
            1 => Some(DescriptorType::Device),
            2 => Some(DescriptorType::Configuration),
            3 => Some(DescriptorType::String),
            4 => Some(DescriptorType::Interface),
            5 => Some(DescriptorType::Endpoint),
            6 => Some(DescriptorType::DeviceQualifier),
            7 => Some(DescriptorType::OtherSpeedConfiguration),
            8 => Some(DescriptorType::InterfacePower),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceRequestType(pub u8);

impl DeviceRequestType {
    pub fn transfer_direction(self) -> TransferDirection {
        match self.0 & USB_DIR_IN {
            0 => TransferDirection::HostToDevice,
            _ => TransferDirection::DeviceToHost,
        }
    }

    pub fn request_type(self) -> RequestType {
        match (self.0 & (0b11 << 5)) >> 5 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

impl fmt::Debug for DeviceRequestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{{:?}, {:?}, {:?}}}",
            self.transfer_direction(),
            self.request_type(),
            self.recipient()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSelector {
    DeviceRemoteWakeup,
    EndpointHalt,
    TestMode,
    Unknown,
}

impl FeatureSelector {
    fn get(value: u16) -> Self {
        match value {
            1 => FeatureSelector::DeviceRemoteWakeup,
            0 => FeatureSelector::EndpointHalt,
            2 => FeatureSelector::TestMode,
            _ => FeatureSelector::Unknown,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous,
    Bulk,
    Interrupt,
}

/// An endpoint descriptor as it appears inside a configuration descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const SIZE: usize = 7;

    /// Parse the 7-byte wire form. The descriptor type is kept as found so
    /// that the controller can reject anything that is not an endpoint.
    pub fn get(p: &[u8]) -> Option<Self> {
        if p.len() < Self::SIZE || usize::from(p[0]) < Self::SIZE {
            return None;
        }
        Some(EndpointDescriptor {
            descriptor_type: p[1],
            endpoint_address: p[2],
            attributes: p[3],
            max_packet_size: u16::from_le_bytes([p[4], p[5]]),
            interval: p[6],
        })
    }

    pub fn number(&self) -> usize {
        usize::from(self.endpoint_address & ENDPOINT_NUMBER_MASK)
    }

    pub fn is_in(&self) -> bool {
        self.endpoint_address & USB_DIR_IN != 0
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & 0b11 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// Negotiated bus speed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Speed {
    Unknown,
    Full,
    High,
}

/// USB device state, in the order a device normally passes through them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    NotAttached,
    Attached,
    Default,
    Address,
    Configured,
}

/// Endpoint zero sub-state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlState {
    WaitForSetup,
    DataXmit,
    DataRecv,
}

/// Outcome of a [`Request`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not queued anywhere.
    Idle,
    /// Owned by an endpoint queue.
    InProgress,
    /// Finished without error.
    Complete,
    /// Finished, cancelled or truncated.
    Error(ErrorCode),
}

impl RequestStatus {
    pub fn is_ok(self) -> bool {
        self == RequestStatus::Complete
    }
}

/// A single buffer transfer queued on an endpoint.
///
/// The transfer covers the current window of the leased buffer; `length()`
/// is the window length. For IN transfers the window is sent, for OUT
/// transfers it is filled, and `actual` counts the bytes moved so far.
pub struct Request {
    buffer: Option<SubSliceMutImmut<'static, u8>>,
    /// Bytes transferred so far.
    pub actual: usize,
    /// Terminate an exact multiple of the packet size with a zero-length
    /// packet.
    pub zero: bool,
    pub status: RequestStatus,
    /// Chosen by the creator, used to tell requests apart on completion and
    /// to find one again with `dequeue`.
    pub id: u16,
    /// Whether completion is reported to the class driver. Requests without
    /// a callback are dropped once finished.
    pub callback: bool,
}

impl Request {
    /// A request with no buffer attached yet.
    pub const fn new(id: u16) -> Request {
        Request {
            buffer: None,
            actual: 0,
            zero: false,
            status: RequestStatus::Idle,
            id,
            callback: true,
        }
    }

    /// A request over a mutable buffer, usable in both directions.
    pub fn with_buffer(buffer: &'static mut [u8], id: u16) -> Request {
        let mut req = Request::new(id);
        req.buffer = Some(SubSliceMutImmut::Mutable(SubSliceMut::new(buffer)));
        req
    }

    /// A request sending read-only data, such as a descriptor table.
    pub fn with_static(buffer: &'static [u8], id: u16) -> Request {
        let mut req = Request::new(id);
        req.buffer = Some(SubSliceMutImmut::Immutable(SubSlice::new(buffer)));
        req
    }

    /// A fire-and-forget reply: sent from `data`, dropped on completion.
    pub fn oneshot(data: &'static [u8]) -> Request {
        let mut req = Request::with_static(data, 0);
        req.callback = false;
        req
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether the buffer can be received into.
    pub fn is_writable(&self) -> bool {
        matches!(self.buffer, Some(SubSliceMutImmut::Mutable(_)))
    }

    /// Requested transfer length.
    pub fn length(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    /// The transfer window.
    pub fn data(&self) -> &[u8] {
        match self.buffer {
            Some(ref b) => b.as_slice(),
            None => &[],
        }
    }

    /// The transfer window for writing, `None` for read-only buffers.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.buffer.as_mut().and_then(|b| b.as_mut_slice())
    }

    /// The bytes transferred so far.
    pub fn transferred(&self) -> &[u8] {
        let data = self.data();
        &data[..self.actual.min(data.len())]
    }

    /// Restrict the transfer to `length` bytes at `offset` of the whole
    /// buffer. The window is clamped to the buffer.
    pub fn set_window(&mut self, offset: usize, length: usize) {
        if let Some(ref mut b) = self.buffer {
            b.reset();
            b.slice(offset..offset.saturating_add(length));
        }
    }

    /// Make the whole buffer the transfer window again.
    pub fn reset_window(&mut self) {
        if let Some(ref mut b) = self.buffer {
            b.reset();
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("length", &self.length())
            .field("actual", &self.actual)
            .field("zero", &self.zero)
            .field("status", &self.status)
            .finish()
    }
}

/// Class driver interface, implemented by the application layer.
pub trait ClassDriver {
    /// Called once after the controller has been brought up.
    fn init(&self);

    /// Handle a control request the controller did not answer itself. An
    /// error stalls endpoint zero.
    fn setup(&self, setup: &SetupData) -> Result<(), ErrorCode>;

    fn vbus_on(&self) {}

    fn vbus_off(&self) {}

    /// A request finished, was cancelled or was flushed. Ownership of the
    /// request returns to the class driver.
    fn request_complete(&self, endpoint: usize, request: Request);
}

/// USB device controller interface.
///
/// Endpoints are addressed by number. Endpoint zero is the control endpoint
/// and is owned by the controller; its data stage direction follows the
/// current setup packet.
pub trait UsbDevice<'a> {
    fn set_client(&self, client: &'a dyn ClassDriver);

    fn state(&self) -> DeviceState;

    fn speed(&self) -> Speed;

    fn control_state(&self) -> ControlState;

    /// Currently selected configuration, 0 when unconfigured.
    fn configuration(&self) -> u8;

    /// Record the configuration selected by the class driver. A non-zero
    /// value moves the device to `Configured`, zero back to `Address`.
    /// Fails with `SHUTDOWN` before the host has addressed the device.
    fn set_configuration(&self, value: u8) -> Result<(), ErrorCode>;

    /// Number of endpoints, including endpoint zero.
    fn endpoint_count(&self) -> usize;

    /// Bind `endpoint` to the direction, type and packet size in `desc` and
    /// clear its halt.
    fn enable(&self, endpoint: usize, desc: &EndpointDescriptor) -> Result<(), ErrorCode>;

    /// Mask the endpoint, cancel its requests with `SHUTDOWN` and mark it
    /// halted.
    fn disable(&self, endpoint: usize) -> Result<(), ErrorCode>;

    /// Submit a request. On error the request is handed back untouched.
    fn queue(&self, endpoint: usize, request: Request) -> Result<(), (ErrorCode, Request)>;

    /// Remove the first queued request with `id` without touching hardware.
    fn dequeue(&self, endpoint: usize, id: u16) -> Result<Request, ErrorCode>;

    /// Enter or leave the stall condition.
    fn set_halt(&self, endpoint: usize, halt: bool) -> Result<(), ErrorCode>;

    fn is_halted(&self, endpoint: usize) -> bool;

    /// Discard whatever the endpoint FIFO currently holds.
    fn fifo_flush(&self, endpoint: usize);

    /// Number of requests queued on `endpoint`.
    fn queued(&self, endpoint: usize) -> usize;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_get_descriptor() {
        let setup = SetupData::get(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]);
        let setup = setup.unwrap();
        assert_eq!(
            setup.request_type.transfer_direction(),
            TransferDirection::DeviceToHost
        );
        assert_eq!(setup.request_type.recipient(), Recipient::Device);
        assert_eq!(
            setup.get_standard_request(),
            Some(StandardRequest::GetDescriptor {
                descriptor_type: Some(DescriptorType::Device),
                descriptor_index: 0,
                lang_id: 0,
                requested_length: 64,
            })
        );
    }

    #[test]
    fn class_and_vendor_requests_are_not_standard() {
        let setup = SetupData::get(&[0x41, 0x09, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(setup.request_type.request_type(), RequestType::Vendor);
        assert_eq!(setup.get_standard_request(), None);
        assert!(SetupData::get(&[0; 7]).is_none());
    }

    #[test]
    fn endpoint_descriptor_fields() {
        let desc = EndpointDescriptor::get(&[7, 5, 0x81, 0x02, 0x00, 0x02, 0]).unwrap();
        assert_eq!(desc.number(), 1);
        assert!(desc.is_in());
        assert_eq!(desc.transfer_type(), TransferType::Bulk);
        assert_eq!(desc.max_packet_size, 512);
        assert!(EndpointDescriptor::get(&[6, 5, 0x81, 0x02, 0x00, 0x02, 0]).is_none());
    }

    #[test]
    fn request_window() {
        static DATA: [u8; 6] = [1, 2, 3, 4, 5, 6];
        let mut req = Request::with_static(&DATA, 3);
        assert_eq!(req.length(), 6);
        assert!(!req.is_writable());
        assert!(req.data_mut().is_none());
        req.set_window(4, 10);
        assert_eq!(req.data(), &[5, 6]);
        req.actual = 1;
        assert_eq!(req.transferred(), &[5]);
        req.reset_window();
        assert_eq!(req.length(), 6);
        assert!(!Request::new(0).has_buffer());
        assert!(!Request::oneshot(&DATA).callback);
    }

    #[test]
    fn device_states_are_ordered() {
        assert!(DeviceState::Default < DeviceState::Address);
        assert!(DeviceState::Configured > DeviceState::Attached);
    }
}
