// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Descriptor tables for the usbtool function.
//!
//! Replies on endpoint zero are sent straight out of `'static` memory, so
//! every descriptor is serialized at compile time. Each table exists once
//! per bus speed: the device and endpoint zero packet sizes differ, and so
//! does the bulk packet size inside the configuration.

use kernel::hil::usb::{DescriptorType, EndpointDescriptor, TransferType, USB_DIR_IN};

/// Device-to-host bulk endpoint.
pub const IN_ENDPOINT: usize = 1;
/// Host-to-device bulk endpoint.
pub const OUT_ENDPOINT: usize = 2;

pub const NUM_CONFIGURATIONS: u8 = 1;
pub const CONFIGURATION_VALUE: u8 = 1;

pub const VENDOR_ID: u16 = 0x0000;
pub const PRODUCT_ID: u16 = 0x7f21;

const LANGUAGE_EN_US: u16 = 0x0409;
const MANUFACTURER: &str = "usbtool";
const PRODUCT: &str = "POLLUX usbtool";

pub struct DeviceDescriptor {
    /// 0x0200 for USB 2.0.
    pub usb_release: u16,
    /// 0 means each interface defines its own class.
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// 8, 16, 32 or 64.
    pub max_packet_size_ep0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Binary coded decimal.
    pub device_release: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_number_string: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const SIZE: usize = 18;

    pub const fn into_bytes(self) -> [u8; Self::SIZE] {
        let release = self.usb_release.to_le_bytes();
        let vendor = self.vendor_id.to_le_bytes();
        let product = self.product_id.to_le_bytes();
        let device = self.device_release.to_le_bytes();
        [
            Self::SIZE as u8,
            DescriptorType::Device as u8,
            release[0],
            release[1],
            self.class,
            self.subclass,
            self.protocol,
            self.max_packet_size_ep0,
            vendor[0],
            vendor[1],
            product[0],
            product[1],
            device[0],
            device[1],
            self.manufacturer_string,
            self.product_string,
            self.serial_number_string,
            self.num_configurations,
        ]
    }
}

/// What a high-speed capable device would look like at the other speed.
pub struct QualifierDescriptor {
    pub usb_release: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size_ep0: u8,
    pub num_configurations: u8,
}

impl QualifierDescriptor {
    pub const SIZE: usize = 10;

    pub const fn into_bytes(self) -> [u8; Self::SIZE] {
        let release = self.usb_release.to_le_bytes();
        [
            Self::SIZE as u8,
            DescriptorType::DeviceQualifier as u8,
            release[0],
            release[1],
            self.class,
            self.subclass,
            self.protocol,
            self.max_packet_size_ep0,
            self.num_configurations,
            0,
        ]
    }
}

/// The single configuration: one vendor interface with a bulk IN and a bulk
/// OUT endpoint.
pub struct Configuration {
    /// `Configuration` or `OtherSpeedConfiguration`.
    pub descriptor_type: DescriptorType,
    pub configuration_value: u8,
    /// Bit 7 is reserved and must be set, bit 6 is self powered.
    pub attributes: u8,
    /// In 2 mA units.
    pub max_power: u8,
    pub interface_class: u8,
    pub bulk_max_packet: u16,
}

impl Configuration {
    const HEADER: usize = 9;
    const INTERFACE: usize = 9;
    pub const SIZE: usize = Self::HEADER + Self::INTERFACE + 2 * EndpointDescriptor::SIZE;

    pub const fn into_bytes(self) -> [u8; Self::SIZE] {
        let total = (Self::SIZE as u16).to_le_bytes();
        let packet = (self.bulk_max_packet & 0x7ff).to_le_bytes();
        [
            Self::HEADER as u8,
            self.descriptor_type as u8,
            total[0],
            total[1],
            1, // interfaces
            self.configuration_value,
            0,
            self.attributes,
            self.max_power,
            Self::INTERFACE as u8,
            DescriptorType::Interface as u8,
            0, // interface number
            0, // alternate setting
            2, // endpoints
            self.interface_class,
            0,
            0,
            0,
            EndpointDescriptor::SIZE as u8,
            DescriptorType::Endpoint as u8,
            USB_DIR_IN | IN_ENDPOINT as u8,
            TransferType::Bulk as u8,
            packet[0],
            packet[1],
            0,
            EndpointDescriptor::SIZE as u8,
            DescriptorType::Endpoint as u8,
            OUT_ENDPOINT as u8,
            TransferType::Bulk as u8,
            packet[0],
            packet[1],
            0,
        ]
    }
}

const DEVICE: DeviceDescriptor = DeviceDescriptor {
    usb_release: 0x0200,
    class: 0,
    subclass: 0,
    protocol: 0,
    max_packet_size_ep0: 64,
    vendor_id: VENDOR_ID,
    product_id: PRODUCT_ID,
    device_release: 0x0000,
    manufacturer_string: 1,
    product_string: 2,
    serial_number_string: 0,
    num_configurations: NUM_CONFIGURATIONS,
};

const QUALIFIER: QualifierDescriptor = QualifierDescriptor {
    usb_release: 0x0200,
    class: 0,
    subclass: 0,
    protocol: 0,
    max_packet_size_ep0: 64,
    num_configurations: NUM_CONFIGURATIONS,
};

const CONFIGURATION: Configuration = Configuration {
    descriptor_type: DescriptorType::Configuration,
    configuration_value: CONFIGURATION_VALUE,
    attributes: 0xc0,
    max_power: 0,
    interface_class: 0xff,
    bulk_max_packet: 512,
};

pub static HS_DEVICE: [u8; DeviceDescriptor::SIZE] = DeviceDescriptor {
    max_packet_size_ep0: 64,
    ..DEVICE
}
.into_bytes();

pub static FS_DEVICE: [u8; DeviceDescriptor::SIZE] = DeviceDescriptor {
    max_packet_size_ep0: 8,
    ..DEVICE
}
.into_bytes();

/// Sent while running at high speed, so it describes full speed.
pub static HS_QUALIFIER: [u8; QualifierDescriptor::SIZE] = QualifierDescriptor {
    max_packet_size_ep0: 8,
    ..QUALIFIER
}
.into_bytes();

pub static FS_QUALIFIER: [u8; QualifierDescriptor::SIZE] = QualifierDescriptor {
    max_packet_size_ep0: 64,
    ..QUALIFIER
}
.into_bytes();

pub static HS_CONFIGURATION: [u8; Configuration::SIZE] = Configuration {
    bulk_max_packet: 512,
    ..CONFIGURATION
}
.into_bytes();

pub static FS_CONFIGURATION: [u8; Configuration::SIZE] = Configuration {
    bulk_max_packet: 64,
    ..CONFIGURATION
}
.into_bytes();

/// The high-speed configuration as reported while running at full speed.
pub static HS_OTHER_SPEED: [u8; Configuration::SIZE] = Configuration {
    descriptor_type: DescriptorType::OtherSpeedConfiguration,
    bulk_max_packet: 512,
    ..CONFIGURATION
}
.into_bytes();

/// The full-speed configuration as reported while running at high speed.
pub static FS_OTHER_SPEED: [u8; Configuration::SIZE] = Configuration {
    descriptor_type: DescriptorType::OtherSpeedConfiguration,
    bulk_max_packet: 64,
    ..CONFIGURATION
}
.into_bytes();

/// Serialize an ASCII string as a UTF-16LE string descriptor. `N` must be
/// `2 + 2 * s.len()`.
const fn string_descriptor<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    assert!(N == 2 + 2 * bytes.len());
    let mut out = [0; N];
    out[0] = N as u8;
    out[1] = DescriptorType::String as u8;
    let mut i = 0;
    while i < bytes.len() {
        out[2 + 2 * i] = bytes[i];
        i += 1;
    }
    out
}

static LANGUAGES: [u8; 4] = {
    let lang = LANGUAGE_EN_US.to_le_bytes();
    [4, DescriptorType::String as u8, lang[0], lang[1]]
};
static STRING_MANUFACTURER: [u8; 2 + 2 * MANUFACTURER.len()] = string_descriptor(MANUFACTURER);
static STRING_PRODUCT: [u8; 2 + 2 * PRODUCT.len()] = string_descriptor(PRODUCT);

/// String descriptors by index. Index 0 is the language table.
pub static STRINGS: [&[u8]; 3] = [&LANGUAGES, &STRING_MANUFACTURER, &STRING_PRODUCT];

/// Iterator over the endpoint descriptors inside a configuration blob.
pub struct Endpoints<'a> {
    remaining: &'a [u8],
}

impl Iterator for Endpoints<'_> {
    type Item = EndpointDescriptor;

    fn next(&mut self) -> Option<EndpointDescriptor> {
        loop {
            let len = usize::from(*self.remaining.first()?);
            if len < 2 || len > self.remaining.len() {
                self.remaining = &[];
                return None;
            }
            let (desc, rest) = self.remaining.split_at(len);
            self.remaining = rest;
            if desc[1] == DescriptorType::Endpoint as u8 {
                if let Some(endpoint) = EndpointDescriptor::get(desc) {
                    return Some(endpoint);
                }
            }
        }
    }
}

pub fn endpoints(configuration: &[u8]) -> Endpoints<'_> {
    Endpoints {
        remaining: configuration,
    }
}
