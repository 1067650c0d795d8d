//! The PCD database context and its initialization.
//!
//! [`build_pcd_database`] publishes the build-time image as a GUID HOB once per boot (`BuildPcdDatabase`), and
//! [`PcdDatabase::from_hob_list`] materializes it again for the service. The database owns the image, the decoded
//! token table, the callback table and the variable service used by HII tokens; every operation goes through it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};
use core::{ffi::c_void, fmt::Debug, mem};

use patina_read_only_variable::ReadOnlyVariableServices;
use scroll::{Pread, LE};

use crate::{
    callback::CallbackTable,
    config::PcdConfig,
    error::{Error, Result},
    hob::{
        copy_guid_hob_data, find_guid_hob_data, HobListBuilder, PCD_DATABASE_HOB_GUID,
        PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID,
    },
    image::{PcdDatabaseHeader, PcdImage},
};

/// Validates `image` and publishes it as the PCD database HOB, followed by the zeroed callback table HOB.
pub fn build_pcd_database(hob_list: &mut HobListBuilder, image: &[u8], config: &PcdConfig) -> Result<()> {
    config.validate()?;
    let parsed = PcdImage::parse(image.to_vec())?;

    hob_list.add_guid_hob(&PCD_DATABASE_HOB_GUID, image)?;
    let table_size = callback_table_size(parsed.local_token_count(), config);
    hob_list.add_guid_hob(&PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID, &vec![0u8; table_size])?;

    log::info!(
        target: "pcd",
        "Published PCD database: {} bytes, {} tokens ({} Dynamic-Ex).",
        image.len(),
        parsed.local_token_count(),
        parsed.ex_map().len()
    );
    Ok(())
}

fn callback_table_size(local_token_count: usize, config: &PcdConfig) -> usize {
    local_token_count * config.max_callbacks_per_token * mem::size_of::<usize>()
}

/// A loaded PCD database.
pub struct PcdDatabase<V> {
    pub(crate) image: PcdImage,
    pub(crate) callbacks: CallbackTable,
    pub(crate) config: PcdConfig,
    pub(crate) variables: V,
}

impl<V: ReadOnlyVariableServices> PcdDatabase<V> {
    /// Loads the database from image bytes.
    pub fn new(image: Vec<u8>, config: PcdConfig, variables: V) -> Result<Self> {
        config.validate()?;
        let image = PcdImage::parse(image)?;
        let per_token = if config.callback_on_set_enabled { config.max_callbacks_per_token } else { 0 };
        let callbacks = CallbackTable::new(image.local_token_count(), per_token);

        log::debug!(
            target: "pcd",
            "Loaded PCD database: {} local tokens, {} Dynamic-Ex, {} token spaces, SKU {:#x}.",
            image.local_token_count(),
            image.ex_map().len(),
            image.guids().len(),
            image.system_sku_id()
        );

        Ok(Self { image, callbacks, config, variables })
    }

    /// Loads the database published in the HOB list by [`build_pcd_database`].
    pub fn from_hob_list(hob_list: &[u8], config: PcdConfig, variables: V) -> Result<Self> {
        let database = find_guid_hob_data(hob_list, &PCD_DATABASE_HOB_GUID)?;
        let callback_table = find_guid_hob_data(hob_list, &PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID)?;
        Self::from_hob_data(database, callback_table, config, variables)
    }

    /// Loads the database from the physical HOB list handed over by the PEI foundation.
    ///
    /// # Safety
    ///
    /// `physical_hob_list` must be null or point at a PI HOB list that starts with the PHIT HOB and is terminated by
    /// an end-of-HOB-list entry.
    pub unsafe fn from_physical_hob_list(
        physical_hob_list: *const c_void,
        config: PcdConfig,
        variables: V,
    ) -> Result<Self> {
        // SAFETY: The caller upholds the HOB list requirements.
        let database = unsafe { copy_guid_hob_data(physical_hob_list, &PCD_DATABASE_HOB_GUID) };
        let callback_table = unsafe { copy_guid_hob_data(physical_hob_list, &PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID) };
        Self::from_hob_data(database.as_deref(), callback_table.as_deref(), config, variables)
    }

    fn from_hob_data(
        database: Option<&[u8]>,
        callback_table: Option<&[u8]>,
        config: PcdConfig,
        variables: V,
    ) -> Result<Self> {
        let Some(data) = database else {
            log::error!(target: "pcd", "PCD database HOB not found.");
            return Err(Error::MalformedDatabase("PCD database HOB not found"));
        };

        // The HOB body is padded to 8 bytes; the header knows the image length.
        let header: PcdDatabaseHeader = data.pread_with(0, LE)?;
        let image = data
            .get(..header.length as usize)
            .ok_or(Error::MalformedDatabase("image length exceeds the database HOB"))?;
        let database = Self::new(image.to_vec(), config, variables)?;

        let required = callback_table_size(database.image.local_token_count(), &database.config);
        match callback_table {
            None => {
                log::error!(target: "pcd", "PCD callback table HOB not found.");
                Err(Error::MalformedDatabase("PCD callback table HOB not found"))
            }
            Some(table) if table.len() < required => {
                log::error!(
                    target: "pcd",
                    "PCD callback table HOB holds {} bytes, {} required.",
                    table.len(),
                    required
                );
                Err(Error::MalformedDatabase("PCD callback table HOB is too small"))
            }
            Some(_) => Ok(database),
        }
    }

    /// Selects the SKU used by SKU-enabled tokens (`PeiPcdSetSku`).
    pub fn set_sku(&mut self, sku_id: u8) -> Result<()> {
        log::debug!(target: "pcd", "System SKU set to {sku_id:#x}.");
        self.image.set_system_sku_id(sku_id)
    }

    pub fn system_sku_id(&self) -> u8 {
        self.image.system_sku_id()
    }

    pub fn image(&self) -> &PcdImage {
        &self.image
    }

    pub fn config(&self) -> &PcdConfig {
        &self.config
    }
}

impl<V> Debug for PcdDatabase<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PcdDatabase")
            .field("header", self.image.header())
            .field("callbacks", &self.callbacks)
            .field("config", &self.config)
            .finish()
    }
}
