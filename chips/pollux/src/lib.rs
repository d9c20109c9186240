// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Peripheral drivers for the POLLUX SoC.

#![no_std]

pub mod nand;
pub mod uart;
pub mod udc;
