//! Rust-friendly PEI Read-Only Variable Wrapper
//!
//! Provides safe and unsafe easy-to-use wrappers for the PEI Read-Only Variable 2 PPI. During PEI the variable
//! store can only be read, so only `GetVariable()` and `NextVariableName()` are exposed.
//!
//! ```ignore
//! pub static VARIABLE_SERVICES: StandardReadOnlyVariable =
//!     StandardReadOnlyVariable::new(&(*read_only_variable_ppi_ptr));
//! let (data, attributes) = VARIABLE_SERVICES.get_variable(&name, &namespace)?;
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

#![cfg_attr(all(not(test), not(feature = "mockall")), no_std)]

extern crate alloc;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use alloc::vec::Vec;
use core::{
    ffi::c_void,
    fmt::Debug,
    mem, ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use r_efi::efi;

/// GUID of the PEI Read-Only Variable 2 PPI.
// { 0x2ab86ef5, 0xecb5, 0x4134, { 0xb5, 0x56, 0x38, 0x54, 0xca, 0x1f, 0xe1, 0xb4 } }
pub const READ_ONLY_VARIABLE2_PPI_GUID: efi::Guid =
    efi::Guid::from_fields(0x2ab86ef5, 0xecb5, 0x4134, 0xb5, 0x56, &[0x38, 0x54, 0xca, 0x1f, 0xe1, 0xb4]);

/// `EFI_PEI_GET_VARIABLE2`
pub type GetVariable2 = extern "efiapi" fn(
    this: *const ReadOnlyVariable2Ppi,
    variable_name: *const u16,
    variable_guid: *const efi::Guid,
    attributes: *mut u32,
    data_size: *mut usize,
    data: *mut c_void,
) -> efi::Status;

/// `EFI_PEI_GET_NEXT_VARIABLE_NAME2`
pub type GetNextVariableName2 = extern "efiapi" fn(
    this: *const ReadOnlyVariable2Ppi,
    variable_name_size: *mut usize,
    variable_name: *mut u16,
    variable_guid: *mut efi::Guid,
) -> efi::Status;

/// The C layout of `EFI_PEI_READ_ONLY_VARIABLE2_PPI`.
#[repr(C)]
pub struct ReadOnlyVariable2Ppi {
    pub get_variable: GetVariable2,
    pub next_variable_name: GetNextVariableName2,
}

/// Outcome of a raw `GetVariable()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetVariableStatus {
    /// The variable was copied into the provided buffer.
    Success { data_size: usize, attributes: u32 },
    /// The provided buffer (if any) cannot hold the variable; `data_size` is the size required.
    BufferTooSmall { data_size: usize, attributes: u32 },
    /// Any other failure reported by the PPI.
    Error(efi::Status),
}

/// Wrapper around [`ReadOnlyVariable2Ppi`].
pub struct StandardReadOnlyVariable {
    ppi: AtomicPtr<ReadOnlyVariable2Ppi>,
}

impl StandardReadOnlyVariable {
    /// Create a new StandardReadOnlyVariable with the provided [ReadOnlyVariable2Ppi].
    pub fn new(ppi: &ReadOnlyVariable2Ppi) -> Self {
        let this = StandardReadOnlyVariable::new_uninit();
        this.init(ppi);
        this
    }

    /// Create a new StandardReadOnlyVariable that is not initialized.
    pub const fn new_uninit() -> Self {
        Self { ppi: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Initialize the StandardReadOnlyVariable once the PPI has been located.
    pub fn init(&self, ppi: &ReadOnlyVariable2Ppi) {
        self.ppi.store(ppi as *const _ as *mut _, Ordering::Relaxed);
    }

    /// Return true if StandardReadOnlyVariable is initialized.
    pub fn is_init(&self) -> bool {
        !self.ppi.load(Ordering::Relaxed).is_null()
    }

    fn ppi(&self) -> Option<&ReadOnlyVariable2Ppi> {
        // SAFETY: The PPI descriptor is expected to stay installed for the rest of PEI.
        unsafe { self.ppi.load(Ordering::Relaxed).as_ref() }
    }
}

impl Clone for StandardReadOnlyVariable {
    fn clone(&self) -> Self {
        Self { ppi: AtomicPtr::new(self.ppi.load(Ordering::Relaxed)) }
    }
}

impl Debug for StandardReadOnlyVariable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.ppi() {
            None => f.debug_struct("StandardReadOnlyVariable").field("ppi", &"Not Initialized").finish(),
            Some(ppi) => f
                .debug_struct("StandardReadOnlyVariable")
                .field("get_variable", &(ppi.get_variable as usize))
                .field("next_variable_name", &(ppi.next_variable_name as usize))
                .finish(),
        }
    }
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
#[allow(clippy::needless_lifetimes)] //https://github.com/rust-lang/rust-clippy/issues/6622
/// Interface for Rust-friendly wrappers of the PEI Read-Only Variable 2 PPI.
pub trait ReadOnlyVariableServices {
    /// Gets a variable.
    ///
    /// Returns a tuple of (data, attributes). Performs the size query first and then the fetch into a buffer of
    /// the reported size.
    ///
    /// PI Spec Documentation: Volume 1, EFI_PEI_READ_ONLY_VARIABLE2_PPI.GetVariable()
    ///
    fn get_variable(&self, name: &[u16], namespace: &efi::Guid) -> Result<(Vec<u8>, u32), efi::Status> {
        if !name.iter().any(|&c| c == 0) {
            return Err(efi::Status::INVALID_PARAMETER);
        }

        let mut data = Vec::<u8>::new();

        // Do at most two calls to get_variable_unchecked. The first one (without a buffer) reports the size of the
        // buffer to allocate for the second one.
        let mut first_attempt = true;
        loop {
            let status = unsafe {
                self.get_variable_unchecked(name, namespace, if data.is_empty() { None } else { Some(&mut data) })
            };

            match status {
                GetVariableStatus::Success { data_size, attributes } => {
                    data.truncate(data_size);
                    return Ok((data, attributes));
                }
                GetVariableStatus::BufferTooSmall { data_size, attributes } => {
                    if data_size == 0 {
                        return Ok((Vec::new(), attributes));
                    }
                    if first_attempt {
                        first_attempt = false;
                        data.resize(data_size, 0);
                    } else {
                        return Err(efi::Status::BUFFER_TOO_SMALL);
                    }
                }
                GetVariableStatus::Error(e) => {
                    return Err(e);
                }
            }
        }
    }

    /// Helper function to get a variable's size and attributes
    fn get_variable_size_and_attributes(
        &self,
        name: &[u16],
        namespace: &efi::Guid,
    ) -> Result<(usize, u32), efi::Status> {
        if !name.iter().any(|&c| c == 0) {
            return Err(efi::Status::INVALID_PARAMETER);
        }

        match unsafe { self.get_variable_unchecked(name, namespace, None) } {
            GetVariableStatus::BufferTooSmall { data_size, attributes } => Ok((data_size, attributes)),
            GetVariableStatus::Success { data_size, attributes } => Ok((data_size, attributes)),
            GetVariableStatus::Error(e) => Err(e),
        }
    }

    /// Gets the name and namespace of the variable after the one provided.
    ///
    /// Returns a tuple of (name, namespace). An empty (single NUL) name starts the enumeration; `NOT_FOUND`
    /// marks its end.
    ///
    fn get_next_variable_name(
        &self,
        prev_name: &[u16],
        prev_namespace: &efi::Guid,
    ) -> Result<(Vec<u16>, efi::Guid), efi::Status> {
        if prev_name.is_empty() || !prev_name.iter().any(|&c| c == 0) {
            return Err(efi::Status::INVALID_PARAMETER);
        }

        let mut next_name = Vec::<u16>::new();
        let mut next_namespace: efi::Guid = efi::Guid::from_bytes(&[0x0; 16]);

        unsafe {
            self.get_next_variable_name_unchecked(prev_name, prev_namespace, &mut next_name, &mut next_namespace)?;
        };

        Ok((next_name, next_namespace))
    }

    /// Gets a variable.
    ///
    /// # Safety
    ///
    /// Ensure name is null-terminated
    unsafe fn get_variable_unchecked<'a>(
        &self,
        name: &[u16],
        namespace: &efi::Guid,
        data: Option<&'a mut [u8]>,
    ) -> GetVariableStatus;

    /// Gets the variable name after the one provided.
    ///
    /// Will populate next_name and next_namespace.
    ///
    /// # Safety
    ///
    /// Ensure prev_name is null-terminated.
    unsafe fn get_next_variable_name_unchecked(
        &self,
        prev_name: &[u16],
        prev_namespace: &efi::Guid,
        next_name: &mut Vec<u16>,
        next_namespace: &mut efi::Guid,
    ) -> Result<(), efi::Status>;
}

impl ReadOnlyVariableServices for StandardReadOnlyVariable {
    unsafe fn get_variable_unchecked(
        &self,
        name: &[u16],
        namespace: &efi::Guid,
        data: Option<&mut [u8]>,
    ) -> GetVariableStatus {
        let Some(ppi) = self.ppi() else {
            return GetVariableStatus::Error(efi::Status::NOT_READY);
        };

        let mut data_size: usize = match data {
            Some(ref d) => d.len(),
            None => 0,
        };
        let mut attributes: u32 = 0;

        let status = (ppi.get_variable)(
            ppi as *const _,
            name.as_ptr(),
            namespace as *const _,
            ptr::addr_of_mut!(attributes),
            ptr::addr_of_mut!(data_size),
            match data {
                Some(d) => d.as_mut_ptr() as *mut c_void,
                None => ptr::null_mut(),
            },
        );

        if status == efi::Status::BUFFER_TOO_SMALL {
            return GetVariableStatus::BufferTooSmall { data_size, attributes };
        } else if status.is_error() {
            return GetVariableStatus::Error(status);
        }

        GetVariableStatus::Success { data_size, attributes }
    }

    unsafe fn get_next_variable_name_unchecked(
        &self,
        prev_name: &[u16],
        prev_namespace: &efi::Guid,
        next_name: &mut Vec<u16>,
        next_namespace: &mut efi::Guid,
    ) -> Result<(), efi::Status> {
        let Some(ppi) = self.ppi() else {
            return Err(efi::Status::NOT_READY);
        };

        // Copy prev_name and namespace into next name and namespace
        if next_name.len() < prev_name.len() {
            next_name.resize(prev_name.len(), 0);
        }
        next_name[..prev_name.len()].clone_from_slice(prev_name);
        next_namespace.clone_from(prev_namespace);

        // The PPI reports the name size in bytes.
        let mut next_name_size: usize = next_name.len() * mem::size_of::<u16>();

        // Loop at most two times. The first call reports the size the name buffer must be resized to when the
        // previous name is too short to hold the next one.
        let mut first_try: bool = true;
        loop {
            let status = (ppi.next_variable_name)(
                ppi as *const _,
                ptr::addr_of_mut!(next_name_size),
                next_name.as_mut_ptr(),
                next_namespace,
            );

            if status == efi::Status::BUFFER_TOO_SMALL && first_try {
                first_try = false;

                let required = next_name_size.div_ceil(mem::size_of::<u16>());
                if required <= next_name.len() {
                    return Err(efi::Status::BUFFER_TOO_SMALL);
                }

                next_name.resize(required, 0);

                // Reset fields which may have been overwritten
                next_name[..prev_name.len()].clone_from_slice(prev_name);
                next_namespace.clone_from(prev_namespace);
            } else if status.is_error() {
                return Err(status);
            } else {
                next_name.truncate(next_name_size / mem::size_of::<u16>());
                return Ok(());
            }
        }
    }
}
