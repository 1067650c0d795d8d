//! Local token descriptors.
//!
//! Every token owns one 32-bit `LocalTokenNumber` in the database image. The upper nibble selects the storage kind
//! (plus the SKU bit), the next nibble the datum type, and the low 24 bits hold an image offset. The table is decoded
//! once into [`LocalToken`] values when the image is loaded.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{Error, Result};

pub const PCD_TYPE_SHIFT: u32 = 28;

pub const PCD_TYPE_DATA: u32 = 0x0 << PCD_TYPE_SHIFT;
pub const PCD_TYPE_STRING: u32 = 0x1 << PCD_TYPE_SHIFT;
pub const PCD_TYPE_SKU_ENABLED: u32 = 0x2 << PCD_TYPE_SHIFT;
pub const PCD_TYPE_VPD: u32 = 0x4 << PCD_TYPE_SHIFT;
pub const PCD_TYPE_HII: u32 = 0x8 << PCD_TYPE_SHIFT;
pub const PCD_TYPE_ALL_SET: u32 = PCD_TYPE_DATA | PCD_TYPE_STRING | PCD_TYPE_SKU_ENABLED | PCD_TYPE_VPD | PCD_TYPE_HII;

pub const PCD_DATUM_TYPE_SHIFT: u32 = 24;

pub const PCD_DATUM_TYPE_POINTER: u32 = 0x0 << PCD_DATUM_TYPE_SHIFT;
pub const PCD_DATUM_TYPE_UINT8: u32 = 0x1 << PCD_DATUM_TYPE_SHIFT;
pub const PCD_DATUM_TYPE_UINT16: u32 = 0x2 << PCD_DATUM_TYPE_SHIFT;
pub const PCD_DATUM_TYPE_UINT32: u32 = 0x4 << PCD_DATUM_TYPE_SHIFT;
pub const PCD_DATUM_TYPE_UINT64: u32 = 0x8 << PCD_DATUM_TYPE_SHIFT;
pub const PCD_DATUM_TYPE_ALL_SET: u32 = 0xF << PCD_DATUM_TYPE_SHIFT;

pub const PCD_DATABASE_OFFSET_MASK: u32 = !(PCD_TYPE_ALL_SET | PCD_DATUM_TYPE_ALL_SET);

/// Token number 0 is reserved; it starts and ends every enumeration.
pub const PCD_INVALID_TOKEN_NUMBER: usize = 0;

/// The backing store of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// The value lives in the database image.
    Data,
    /// The image holds a `STRING_HEAD` indexing the shared string table.
    String,
    /// The image holds a `VPD_HEAD` offset into the VPD region.
    Vpd,
    /// The image holds a `VARIABLE_HEAD` naming a UEFI variable.
    Hii,
}

impl StorageKind {
    /// Size of the per-SKU head stored in the image, `None` for plain data.
    pub const fn head_size(self) -> Option<usize> {
        match self {
            StorageKind::Data => None,
            StorageKind::String => Some(2),
            StorageKind::Vpd => Some(4),
            StorageKind::Hii => Some(8),
        }
    }

    pub const fn is_read_only(self) -> bool {
        matches!(self, StorageKind::Vpd | StorageKind::Hii)
    }

    const fn bits(self) -> u32 {
        match self {
            StorageKind::Data => PCD_TYPE_DATA,
            StorageKind::String => PCD_TYPE_STRING,
            StorageKind::Vpd => PCD_TYPE_VPD,
            StorageKind::Hii => PCD_TYPE_HII,
        }
    }
}

/// The declared width of a token value. `BOOLEAN` tokens are stored as [`DatumType::Uint8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatumType {
    Pointer,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
}

impl DatumType {
    /// Width in bytes; 0 for pointer tokens whose size lives in the size table.
    pub const fn size(self) -> usize {
        match self {
            DatumType::Pointer => 0,
            DatumType::Uint8 => 1,
            DatumType::Uint16 => 2,
            DatumType::Uint32 => 4,
            DatumType::Uint64 => 8,
        }
    }

    pub const fn from_size(size: usize) -> Option<Self> {
        match size {
            0 => Some(DatumType::Pointer),
            1 => Some(DatumType::Uint8),
            2 => Some(DatumType::Uint16),
            4 => Some(DatumType::Uint32),
            8 => Some(DatumType::Uint64),
            _ => None,
        }
    }

    pub const fn is_pointer(self) -> bool {
        matches!(self, DatumType::Pointer)
    }

    const fn bits(self) -> u32 {
        (self.size() as u32) << PCD_DATUM_TYPE_SHIFT
    }
}

/// A decoded `LocalTokenNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalToken {
    pub kind: StorageKind,
    pub datum: DatumType,
    pub sku_enabled: bool,
    /// Image offset of the value, the storage head, or the `SKU_HEAD` when `sku_enabled` is set.
    pub offset: usize,
}

impl LocalToken {
    pub const fn new(kind: StorageKind, datum: DatumType, offset: usize) -> Self {
        Self { kind, datum, sku_enabled: false, offset }
    }

    pub const fn with_sku(mut self) -> Self {
        self.sku_enabled = true;
        self
    }

    /// Decodes a raw `LocalTokenNumber`.
    pub fn decode(raw: u32) -> Result<Self> {
        let kind = match raw & PCD_TYPE_ALL_SET & !PCD_TYPE_SKU_ENABLED {
            PCD_TYPE_DATA => StorageKind::Data,
            PCD_TYPE_STRING => StorageKind::String,
            PCD_TYPE_VPD => StorageKind::Vpd,
            PCD_TYPE_HII => StorageKind::Hii,
            _ => return Err(Error::MalformedDatabase("local token has more than one storage kind")),
        };

        let datum = DatumType::from_size(((raw & PCD_DATUM_TYPE_ALL_SET) >> PCD_DATUM_TYPE_SHIFT) as usize)
            .ok_or(Error::MalformedDatabase("local token has an unknown datum type"))?;

        if kind == StorageKind::String && !datum.is_pointer() {
            return Err(Error::MalformedDatabase("string token with a scalar datum type"));
        }

        Ok(Self {
            kind,
            datum,
            sku_enabled: raw & PCD_TYPE_SKU_ENABLED != 0,
            offset: (raw & PCD_DATABASE_OFFSET_MASK) as usize,
        })
    }

    /// Encodes the descriptor back into its raw form.
    pub fn encode(&self) -> Result<u32> {
        let offset = u32::try_from(self.offset)
            .ok()
            .filter(|offset| offset & !PCD_DATABASE_OFFSET_MASK == 0)
            .ok_or(Error::InvalidConfig("token offset does not fit the offset mask"))?;
        let sku = if self.sku_enabled { PCD_TYPE_SKU_ENABLED } else { 0 };
        Ok(self.kind.bits() | sku | self.datum.bits() | offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sku_enabled_hii() {
        let raw = PCD_TYPE_HII | PCD_TYPE_SKU_ENABLED | PCD_DATUM_TYPE_UINT32 | 0x120;
        let token = LocalToken::decode(raw).unwrap();
        assert_eq!(token.kind, StorageKind::Hii);
        assert_eq!(token.datum, DatumType::Uint32);
        assert!(token.sku_enabled);
        assert_eq!(token.offset, 0x120);
        assert_eq!(token.encode().unwrap(), raw);
    }

    #[test]
    fn test_decode_rejects_multiple_storage_kinds() {
        assert!(LocalToken::decode(PCD_TYPE_VPD | PCD_TYPE_HII | 0x40).is_err());
        assert!(LocalToken::decode(PCD_TYPE_STRING | PCD_TYPE_VPD | 0x40).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_datum() {
        assert!(LocalToken::decode((0x3 << PCD_DATUM_TYPE_SHIFT) | 0x40).is_err());
    }

    #[test]
    fn test_decode_rejects_scalar_string() {
        assert!(LocalToken::decode(PCD_TYPE_STRING | PCD_DATUM_TYPE_UINT16 | 0x40).is_err());
    }

    #[test]
    fn test_encode_rejects_offset_overflow() {
        let token = LocalToken::new(StorageKind::Data, DatumType::Uint8, 0x0100_0000);
        assert!(token.encode().is_err());
    }

    #[test]
    fn test_offset_mask_covers_low_24_bits() {
        assert_eq!(PCD_DATABASE_OFFSET_MASK, 0x00FF_FFFF);
    }
}
