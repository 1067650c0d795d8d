//! The `PCD_PPI` service surface.
//!
//! [`PcdPpi`] exposes typed accessors over a [`PcdDatabase`] for the flat namespace and for Dynamic-Ex token spaces.
//! [`PcdService`] is the implementation published to PEIMs; it serializes access to the database and rejects calls
//! made from inside a set callback instead of deadlocking.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::fmt::Debug;

use patina_read_only_variable::ReadOnlyVariableServices;
use r_efi::efi;
use spin::{Mutex, MutexGuard};

use crate::{
    callback::PcdCallback,
    error::{Error, Result},
    PcdDatabase,
};

/// GUID of the PEI PCD PPI.
// { 0x06e81c58, 0x4ad7, 0x44bc, { 0x83, 0x90, 0xf1, 0x02, 0x65, 0xf7, 0x24, 0x80 } }
pub const PCD_PPI_GUID: efi::Guid =
    efi::Guid::from_fields(0x06e81c58, 0x4ad7, 0x44bc, 0x83, 0x90, &[0xf1, 0x02, 0x65, 0xf7, 0x24, 0x80]);

/// Typed access to PCD tokens.
///
/// Flat accessors take a token number of the local token table. The `_ex` accessors take a token space GUID and
/// the token number within that space.
pub trait PcdPpi {
    /// Selects the SKU used by SKU-enabled tokens.
    fn set_sku(&self, sku_id: u8) -> Result<()>;

    fn get8(&self, token_number: usize) -> Result<u8>;
    fn get16(&self, token_number: usize) -> Result<u16>;
    fn get32(&self, token_number: usize) -> Result<u32>;
    fn get64(&self, token_number: usize) -> Result<u64>;
    /// Copy of a pointer token at its current size.
    fn get_ptr(&self, token_number: usize) -> Result<Vec<u8>>;
    fn get_bool(&self, token_number: usize) -> Result<bool>;
    fn get_size(&self, token_number: usize) -> Result<usize>;

    fn get8_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u8>;
    fn get16_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u16>;
    fn get32_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u32>;
    fn get64_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u64>;
    fn get_ptr_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<Vec<u8>>;
    fn get_bool_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<bool>;
    fn get_size_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<usize>;

    fn set8(&self, token_number: usize, value: u8) -> Result<()>;
    fn set16(&self, token_number: usize, value: u16) -> Result<()>;
    fn set32(&self, token_number: usize, value: u32) -> Result<()>;
    fn set64(&self, token_number: usize, value: u64) -> Result<()>;
    /// Sets a pointer token. Values longer than the declared maximum fail with [`Error::BufferTooLarge`], which
    /// carries the maximum.
    fn set_ptr(&self, token_number: usize, value: &[u8]) -> Result<()>;
    fn set_bool(&self, token_number: usize, value: bool) -> Result<()>;

    fn set8_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u8) -> Result<()>;
    fn set16_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u16) -> Result<()>;
    fn set32_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u32) -> Result<()>;
    fn set64_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u64) -> Result<()>;
    fn set_ptr_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: &[u8]) -> Result<()>;
    fn set_bool_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: bool) -> Result<()>;

    /// Registers a callback run before every set of the token.
    fn callback_on_set(&self, guid: Option<&efi::Guid>, token_number: usize, callback: PcdCallback) -> Result<()>;
    fn cancel_callback(&self, guid: Option<&efi::Guid>, token_number: usize, callback: PcdCallback) -> Result<()>;

    /// Next token of the flat namespace or of a token space; `0` starts the walk and `None` ends it.
    fn get_next_token(&self, guid: Option<&efi::Guid>, token_number: usize) -> Result<Option<usize>>;
    /// Next Dynamic-Ex token space; `None` starts the walk and `Ok(None)` ends it.
    fn get_next_token_space(&self, guid: Option<&efi::Guid>) -> Result<Option<efi::Guid>>;
}

/// [`PcdPpi`] implementation over a shared [`PcdDatabase`].
pub struct PcdService<V> {
    database: Mutex<PcdDatabase<V>>,
}

impl<V: ReadOnlyVariableServices> PcdService<V> {
    pub const fn new(database: PcdDatabase<V>) -> Self {
        Self { database: Mutex::new(database) }
    }

    pub fn into_inner(self) -> PcdDatabase<V> {
        self.database.into_inner()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PcdDatabase<V>>> {
        self.database.try_lock().ok_or_else(|| {
            log::error!(target: "pcd", "PCD service re-entered while the database is in use.");
            Error::Reentrant
        })
    }

    fn get_scalar<const N: usize>(&self, token_number: usize) -> Result<[u8; N]> {
        let database = self.lock()?;
        let value = database.get_worker(token_number, N)?;
        <[u8; N]>::try_from(&*value).map_err(|_| Error::SizeMismatch { expected: N, actual: value.len() })
    }

    fn get_scalar_ex<const N: usize>(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<[u8; N]> {
        let database = self.lock()?;
        let value = database.ex_get_worker(guid, ex_token_number, N)?;
        <[u8; N]>::try_from(&*value).map_err(|_| Error::SizeMismatch { expected: N, actual: value.len() })
    }

    fn set(&self, token_number: usize, data: &[u8], ptr_type: bool) -> Result<()> {
        self.lock()?.set_worker(token_number, data, ptr_type)
    }

    fn set_ex(&self, guid: &efi::Guid, ex_token_number: usize, data: &[u8], ptr_type: bool) -> Result<()> {
        self.lock()?.ex_set_worker(guid, ex_token_number, data, ptr_type)
    }
}

impl<V: ReadOnlyVariableServices> PcdPpi for PcdService<V> {
    fn set_sku(&self, sku_id: u8) -> Result<()> {
        self.lock()?.set_sku(sku_id)
    }

    fn get8(&self, token_number: usize) -> Result<u8> {
        self.get_scalar(token_number).map(u8::from_le_bytes)
    }

    fn get16(&self, token_number: usize) -> Result<u16> {
        self.get_scalar(token_number).map(u16::from_le_bytes)
    }

    fn get32(&self, token_number: usize) -> Result<u32> {
        self.get_scalar(token_number).map(u32::from_le_bytes)
    }

    fn get64(&self, token_number: usize) -> Result<u64> {
        self.get_scalar(token_number).map(u64::from_le_bytes)
    }

    fn get_ptr(&self, token_number: usize) -> Result<Vec<u8>> {
        Ok(self.lock()?.get_worker(token_number, 0)?.into_owned())
    }

    fn get_bool(&self, token_number: usize) -> Result<bool> {
        self.get8(token_number).map(|value| value != 0)
    }

    fn get_size(&self, token_number: usize) -> Result<usize> {
        self.lock()?.get_size(token_number)
    }

    fn get8_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u8> {
        self.get_scalar_ex(guid, ex_token_number).map(u8::from_le_bytes)
    }

    fn get16_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u16> {
        self.get_scalar_ex(guid, ex_token_number).map(u16::from_le_bytes)
    }

    fn get32_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u32> {
        self.get_scalar_ex(guid, ex_token_number).map(u32::from_le_bytes)
    }

    fn get64_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<u64> {
        self.get_scalar_ex(guid, ex_token_number).map(u64::from_le_bytes)
    }

    fn get_ptr_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<Vec<u8>> {
        Ok(self.lock()?.ex_get_worker(guid, ex_token_number, 0)?.into_owned())
    }

    fn get_bool_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<bool> {
        self.get8_ex(guid, ex_token_number).map(|value| value != 0)
    }

    fn get_size_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<usize> {
        self.lock()?.get_size_ex(guid, ex_token_number)
    }

    fn set8(&self, token_number: usize, value: u8) -> Result<()> {
        self.set(token_number, &value.to_le_bytes(), false)
    }

    fn set16(&self, token_number: usize, value: u16) -> Result<()> {
        self.set(token_number, &value.to_le_bytes(), false)
    }

    fn set32(&self, token_number: usize, value: u32) -> Result<()> {
        self.set(token_number, &value.to_le_bytes(), false)
    }

    fn set64(&self, token_number: usize, value: u64) -> Result<()> {
        self.set(token_number, &value.to_le_bytes(), false)
    }

    fn set_ptr(&self, token_number: usize, value: &[u8]) -> Result<()> {
        self.set(token_number, value, true)
    }

    fn set_bool(&self, token_number: usize, value: bool) -> Result<()> {
        self.set8(token_number, u8::from(value))
    }

    fn set8_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u8) -> Result<()> {
        self.set_ex(guid, ex_token_number, &value.to_le_bytes(), false)
    }

    fn set16_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u16) -> Result<()> {
        self.set_ex(guid, ex_token_number, &value.to_le_bytes(), false)
    }

    fn set32_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u32) -> Result<()> {
        self.set_ex(guid, ex_token_number, &value.to_le_bytes(), false)
    }

    fn set64_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: u64) -> Result<()> {
        self.set_ex(guid, ex_token_number, &value.to_le_bytes(), false)
    }

    fn set_ptr_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: &[u8]) -> Result<()> {
        self.set_ex(guid, ex_token_number, value, true)
    }

    fn set_bool_ex(&self, guid: &efi::Guid, ex_token_number: usize, value: bool) -> Result<()> {
        self.set8_ex(guid, ex_token_number, u8::from(value))
    }

    fn callback_on_set(&self, guid: Option<&efi::Guid>, token_number: usize, callback: PcdCallback) -> Result<()> {
        self.lock()?.callback_on_set(guid, token_number, callback)
    }

    fn cancel_callback(&self, guid: Option<&efi::Guid>, token_number: usize, callback: PcdCallback) -> Result<()> {
        self.lock()?.cancel_callback(guid, token_number, callback)
    }

    fn get_next_token(&self, guid: Option<&efi::Guid>, token_number: usize) -> Result<Option<usize>> {
        self.lock()?.get_next_token(guid, token_number)
    }

    fn get_next_token_space(&self, guid: Option<&efi::Guid>) -> Result<Option<efi::Guid>> {
        self.lock()?.get_next_token_space(guid)
    }
}

impl<V> Debug for PcdService<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.database.try_lock() {
            Some(database) => f.debug_struct("PcdService").field("database", &*database).finish(),
            None => f.debug_struct("PcdService").field("database", &"<locked>").finish(),
        }
    }
}
