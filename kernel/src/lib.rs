// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Core usbtool kernel.
//!
//! The kernel crate holds the code shared by the chip, capsule and board
//! crates: the error type, the `debug!` logging facility, the Hardware
//! Interface Layer (HIL) traits that separate the USB device controller from
//! the class driver and the class driver from NAND storage, and the small
//! collections and utilities they are built on.
//!
//! Most `unsafe` code is in this kernel crate or in the board crate.

#![no_std]

pub mod collections;
pub mod debug;
pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use crate::errorcode::ErrorCode;
