// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The usbtool USB function: exposes NAND flash and a RAM buffer to a host
//! over a vendor interface with one bulk endpoint in each direction.

#![no_std]

pub mod command;
pub mod descriptors;
pub mod usbtool;
