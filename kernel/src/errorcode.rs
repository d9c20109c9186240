// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Standard error enum for invoking operations

/// Standard errors.
///
/// Synchronous operations return these directly. Transfers that finish
/// asynchronously record one in their request status instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying system is busy; retry
    BUSY = 2,
    /// An invalid parameter was passed
    INVAL = 3,
    /// Parameter is outside the range the hardware supports
    RANGE = 4,
    /// Operation or command is unsupported
    NOSUPPORT = 5,
    /// Device does not exist
    NODEVICE = 6,
    /// The device or endpoint is shut down or not yet usable
    SHUTDOWN = 7,
    /// The operation cannot be performed now; retry later
    AGAIN = 8,
    /// Protocol sequence violated by the other side
    PROTO = 9,
    /// Connection reset, pending work was cancelled
    CONNRESET = 10,
    /// Connection aborted, pending work was cancelled
    CONNABORTED = 11,
    /// More data arrived than the buffer could hold
    OVERFLOW = 12,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}
