//! SKU row resolution.
//!
//! A SKU-enabled local token points at a `SKU_HEAD` instead of its value. The head locates the SKU ID array (a count
//! byte followed by the IDs) and the first data row; rows are laid out back to back in the order of the ID array.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::{
    error::{Error, Result},
    image::{PcdImage, SkuHead},
    token::LocalToken,
};

/// The SKU IDs a SKU-enabled token has rows for.
pub(crate) fn sku_id_array<'a>(image: &'a PcdImage, token: &LocalToken) -> Result<&'a [u8]> {
    let head: SkuHead = image.read(token.offset)?;
    let table = head.sku_id_table_offset as usize;
    let count: u8 = image.read(table)?;
    if count == 0 {
        return Err(Error::MalformedDatabase("SKU-enabled token without SKU rows"));
    }
    image.slice(table + 1, count as usize)
}

/// Row of the active system SKU, `None` when the token has no row for it.
pub(crate) fn active_row(image: &PcdImage, token: &LocalToken) -> Result<Option<usize>> {
    let system_sku_id = image.system_sku_id();
    Ok(sku_id_array(image, token)?.iter().position(|&id| id == system_sku_id))
}

/// Re-resolves a SKU-enabled token to the head or value of the active row (`GetSkuEnabledTokenNumber`).
///
/// `data_stride` is the row size of plain data tokens: the datum size, or the maximum size of pointer tokens. A
/// system SKU without a row falls back to row 0, the default SKU.
pub(crate) fn resolve(image: &PcdImage, token: LocalToken, data_stride: usize) -> Result<LocalToken> {
    if !token.sku_enabled {
        return Ok(token);
    }

    let head: SkuHead = image.read(token.offset)?;
    let row = match active_row(image, &token)? {
        Some(row) => row,
        None => {
            log::warn!(
                target: "pcd",
                "No row for SKU {:#x} in the token at {:#x}, using the default SKU row.",
                image.system_sku_id(),
                token.offset
            );
            0
        }
    };

    let stride = token.kind.head_size().unwrap_or(data_stride);
    Ok(LocalToken { sku_enabled: false, offset: head.sku_data_start_offset as usize + stride * row, ..token })
}
