//! Size table bookkeeping for pointer tokens.
//!
//! Only pointer tokens own size table entries, in local token order. A VPD token owns only its maximum size; every
//! other pointer token owns its maximum size followed by the current size of each SKU row (one row when the token
//! is not SKU-enabled).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::{
    error::{Error, Result},
    image::PcdImage,
    sku,
    token::{LocalToken, StorageKind},
};

/// Number of size table entries owned by `token`.
fn entry_count(image: &PcdImage, token: &LocalToken) -> Result<usize> {
    if !token.datum.is_pointer() {
        return Ok(0);
    }
    Ok(match (token.kind, token.sku_enabled) {
        (StorageKind::Vpd, _) => 1,
        (_, false) => 2,
        (_, true) => 1 + sku::sku_id_array(image, token)?.len(),
    })
}

/// Index of the first size table entry of the token at 0-based `local_index` (`GetSizeTableIndex`).
pub(crate) fn size_table_index(image: &PcdImage, local_index: usize) -> Result<usize> {
    image
        .local_tokens()
        .get(..local_index)
        .ok_or(Error::InvalidToken(local_index + 1))?
        .iter()
        .try_fold(0, |index, token| -> Result<usize> { Ok(index + entry_count(image, token)?) })
}

/// Declared maximum size of a pointer token.
pub(crate) fn max_size(image: &PcdImage, local_index: usize) -> Result<usize> {
    Ok(image.size_entry(size_table_index(image, local_index)?)? as usize)
}

/// Entry holding the current size of the active SKU row, `None` for VPD tokens which have a fixed size.
fn current_size_entry(image: &PcdImage, local_index: usize) -> Result<Option<usize>> {
    let token = image.local_token(local_index)?;
    let index = size_table_index(image, local_index)?;
    Ok(match (token.kind, token.sku_enabled) {
        (StorageKind::Vpd, _) => None,
        (_, false) => Some(index + 1),
        (_, true) => Some(index + 1 + sku::active_row(image, &token)?.unwrap_or(0)),
    })
}

/// Current size of a pointer token (`GetPtrTypeSize`).
pub(crate) fn ptr_type_size(image: &PcdImage, local_index: usize) -> Result<usize> {
    match current_size_entry(image, local_index)? {
        Some(entry) => Ok(image.size_entry(entry)? as usize),
        None => max_size(image, local_index),
    }
}

/// Records `size` as the current size of a pointer token (`SetPtrTypeSize`).
pub(crate) fn set_ptr_type_size(image: &mut PcdImage, local_index: usize, size: usize) -> Result<()> {
    let max = max_size(image, local_index)?;
    if size > max {
        return Err(Error::BufferTooLarge { max });
    }
    match current_size_entry(image, local_index)? {
        Some(entry) => image.set_size_entry(entry, size as u16),
        None => Ok(()),
    }
}
