//! Callback-on-set registry.
//!
//! Every local token owns a fixed slice of `max_callbacks_per_token` slots. Registration takes the first empty slot
//! and unregistration clears the matching one without compacting, so callbacks run in slot order.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};
use core::fmt::Debug;

use patina_read_only_variable::ReadOnlyVariableServices;
use r_efi::efi;

use crate::{
    error::{Error, Result},
    PcdDatabase,
};

/// Notification run when a token is set (`PCD_PPI_CALLBACK`).
///
/// Receives the token space GUID (`None` for the flat namespace), the token number the callback was registered
/// with, and the data being written.
pub type PcdCallback = fn(guid: Option<&efi::Guid>, token_number: usize, data: &[u8]);

fn same_callback(a: PcdCallback, b: PcdCallback) -> bool {
    a as usize == b as usize
}

/// Fixed capacity callback slots for every local token.
pub struct CallbackTable {
    slots: Vec<Option<PcdCallback>>,
    per_token: usize,
}

impl CallbackTable {
    pub fn new(token_count: usize, per_token: usize) -> Self {
        Self { slots: vec![None; token_count * per_token], per_token }
    }

    fn entries_mut(&mut self, local_index: usize) -> Result<&mut [Option<PcdCallback>]> {
        let start = local_index * self.per_token;
        self.slots.get_mut(start..start + self.per_token).ok_or(Error::InvalidToken(local_index + 1))
    }

    /// Installs `callback` in the first free slot of the token.
    pub fn register(&mut self, local_index: usize, callback: PcdCallback) -> Result<()> {
        let slot =
            self.entries_mut(local_index)?.iter_mut().find(|slot| slot.is_none()).ok_or(Error::CallbackTableFull)?;
        *slot = Some(callback);
        Ok(())
    }

    /// Clears the slot holding `callback`.
    pub fn unregister(&mut self, local_index: usize, callback: PcdCallback) -> Result<()> {
        let slot = self
            .entries_mut(local_index)?
            .iter_mut()
            .find(|slot| slot.is_some_and(|registered| same_callback(registered, callback)))
            .ok_or(Error::CallbackNotFound)?;
        *slot = None;
        Ok(())
    }

    /// Registered callbacks of the token in slot order.
    pub fn callbacks(&self, local_index: usize) -> impl Iterator<Item = PcdCallback> + '_ {
        let start = local_index * self.per_token;
        self.slots.get(start..start + self.per_token).unwrap_or_default().iter().flatten().copied()
    }
}

impl Debug for CallbackTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("per_token", &self.per_token)
            .field("registered", &self.slots.iter().filter(|slot| slot.is_some()).count())
            .finish()
    }
}

impl<V: ReadOnlyVariableServices> PcdDatabase<V> {
    /// Registers `callback` on a flat token (`guid == None`) or a Dynamic-Ex token.
    pub fn callback_on_set(
        &mut self,
        guid: Option<&efi::Guid>,
        token_number: usize,
        callback: PcdCallback,
    ) -> Result<()> {
        self.register_callback_worker(guid, token_number, callback, true)
    }

    /// Removes a callback installed by [`callback_on_set`](Self::callback_on_set).
    pub fn cancel_callback(
        &mut self,
        guid: Option<&efi::Guid>,
        token_number: usize,
        callback: PcdCallback,
    ) -> Result<()> {
        self.register_callback_worker(guid, token_number, callback, false)
    }

    fn register_callback_worker(
        &mut self,
        guid: Option<&efi::Guid>,
        token_number: usize,
        callback: PcdCallback,
        register: bool,
    ) -> Result<()> {
        if !self.config.callback_on_set_enabled {
            return Err(Error::Unsupported);
        }

        let internal = match guid {
            None if token_number == 0 || token_number > self.image.nex_token_count() => {
                return Err(Error::InvalidToken(token_number));
            }
            None => token_number,
            Some(guid) => self.ex_token_number(guid, token_number)?,
        };

        let local_index = internal - 1;
        if self.image.local_token(local_index)?.kind.is_read_only() {
            log::error!(target: "pcd", "Callbacks cannot be registered on VPD or HII token {internal}.");
            return Err(Error::ReadOnly);
        }

        if register {
            self.callbacks.register(local_index, callback)?;
        } else {
            self.callbacks.unregister(local_index, callback)?;
        }
        log::debug!(
            target: "pcd",
            "{} callback on token {token_number:#x} ({guid:?}).",
            if register { "Registered" } else { "Cancelled" }
        );
        Ok(())
    }

    /// Runs the callbacks of the token at 1-based `internal` with the token number they were registered with
    /// (`InvokeCallbackOnSet`).
    pub(crate) fn invoke_callbacks(
        &self,
        guid: Option<&efi::Guid>,
        token_number: usize,
        internal: usize,
        data: &[u8],
    ) {
        if !self.config.callback_on_set_enabled {
            return;
        }
        for callback in self.callbacks.callbacks(internal - 1) {
            callback(guid, token_number, data);
        }
    }
}
