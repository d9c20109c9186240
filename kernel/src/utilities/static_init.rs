// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for statically initializing objects in memory.

/// Allocates a statically-sized global region of memory for a value,
/// initializes it and returns a `&'static mut` reference to it.
///
/// Because this instantiates a static object, you generally cannot pass a
/// type with generic parameters that depend on the enclosing function.
///
/// # Safety
///
/// As this macro writes directly to a global area without acquiring a lock
/// or similar, calling it is inherently unsafe. The caller must never run the
/// same invocation twice, as doing so would hand out a second mutable
/// reference to the same memory.
#[macro_export]
macro_rules! static_init {
    ($T:ty, $e:expr $(,)?) => {{
        static mut BUF: core::mem::MaybeUninit<$T> = core::mem::MaybeUninit::uninit();
        let buf: &'static mut core::mem::MaybeUninit<$T> = &mut *core::ptr::addr_of_mut!(BUF);
        buf.write($e)
    }};
}
