//! PCD database image layout.
//!
//! The database is a single position independent blob produced by offline tooling. It starts with a fixed 64 byte
//! header that locates every table; all integers are little-endian.
//!
//! ```text
//! +--------------------------+ 0
//! | PcdDatabaseHeader        |
//! +--------------------------+ local_token_number_table_offset
//! | u32 x local_token_count  |
//! +--------------------------+ ex_map_table_offset
//! | ExMapEntry x ex_count    |
//! +--------------------------+ guid_table_offset
//! | GUID x guid_table_count  |
//! +--------------------------+ string_table_offset
//! | CHAR16 pool              |
//! +--------------------------+ size_table_offset
//! | u16 x size_table_count   |
//! +--------------------------+
//! | values, heads, SKU rows  |
//! +--------------------------+ length
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;

use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::{
    error::{Error, Result},
    token::LocalToken,
};

/// Signature GUID at the start of every database image.
// { 0x3c7d193c, 0x682c, 0x4c14, { 0xa6, 0x8f, 0x55, 0x2d, 0xea, 0x4f, 0x43, 0x7e } }
pub const PCD_DATABASE_SIGNATURE: efi::Guid =
    efi::Guid::from_fields(0x3c7d193c, 0x682c, 0x4c14, 0xa6, 0x8f, &[0x55, 0x2d, 0xea, 0x4f, 0x43, 0x7e]);

pub const PCD_DATABASE_VERSION: u32 = 1;

pub const GUID_SIZE: usize = 16;

pub(crate) fn read_guid(bytes: &[u8], offset: &mut usize) -> core::result::Result<efi::Guid, scroll::Error> {
    let raw: &[u8] = bytes.gread_with(offset, GUID_SIZE)?;
    let mut guid = [0u8; GUID_SIZE];
    guid.copy_from_slice(raw);
    Ok(efi::Guid::from_bytes(&guid))
}

pub(crate) fn write_guid(
    bytes: &mut [u8],
    guid: &efi::Guid,
    offset: &mut usize,
) -> core::result::Result<(), scroll::Error> {
    bytes.gwrite_with(&guid.as_bytes()[..], offset, ())?;
    Ok(())
}

/// The fixed header of a database image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcdDatabaseHeader {
    pub signature: efi::Guid,
    pub build_version: u32,
    pub length: u32,
    pub system_sku_id: u8,
    pub local_token_number_table_offset: u32,
    pub ex_map_table_offset: u32,
    pub guid_table_offset: u32,
    pub string_table_offset: u32,
    pub size_table_offset: u32,
    pub local_token_count: u16,
    pub ex_token_count: u16,
    pub guid_table_count: u16,
    pub size_table_count: u16,
    pub string_table_size: u32,
}

impl PcdDatabaseHeader {
    pub const SIZE: usize = 64;

    /// Offset of `system_sku_id` within the header.
    pub const SYSTEM_SKU_ID_OFFSET: usize = 24;
}

impl<'a> TryFromCtx<'a, Endian> for PcdDatabaseHeader {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], endian: Endian) -> core::result::Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let signature = read_guid(src, offset)?;
        let build_version = src.gread_with(offset, endian)?;
        let length = src.gread_with(offset, endian)?;
        let system_sku_id = src.gread_with(offset, endian)?;
        *offset += 3; // Padding
        let header = Self {
            signature,
            build_version,
            length,
            system_sku_id,
            local_token_number_table_offset: src.gread_with(offset, endian)?,
            ex_map_table_offset: src.gread_with(offset, endian)?,
            guid_table_offset: src.gread_with(offset, endian)?,
            string_table_offset: src.gread_with(offset, endian)?,
            size_table_offset: src.gread_with(offset, endian)?,
            local_token_count: src.gread_with(offset, endian)?,
            ex_token_count: src.gread_with(offset, endian)?,
            guid_table_count: src.gread_with(offset, endian)?,
            size_table_count: src.gread_with(offset, endian)?,
            string_table_size: src.gread_with(offset, endian)?,
        };
        *offset += 4; // Reserved
        Ok((header, *offset))
    }
}

impl TryIntoCtx<Endian> for &PcdDatabaseHeader {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], endian: Endian) -> core::result::Result<usize, Self::Error> {
        let offset = &mut 0;
        write_guid(dst, &self.signature, offset)?;
        dst.gwrite_with(self.build_version, offset, endian)?;
        dst.gwrite_with(self.length, offset, endian)?;
        dst.gwrite_with(self.system_sku_id, offset, endian)?;
        for _ in 0..3 {
            dst.gwrite_with(0u8, offset, endian)?;
        }
        dst.gwrite_with(self.local_token_number_table_offset, offset, endian)?;
        dst.gwrite_with(self.ex_map_table_offset, offset, endian)?;
        dst.gwrite_with(self.guid_table_offset, offset, endian)?;
        dst.gwrite_with(self.string_table_offset, offset, endian)?;
        dst.gwrite_with(self.size_table_offset, offset, endian)?;
        dst.gwrite_with(self.local_token_count, offset, endian)?;
        dst.gwrite_with(self.ex_token_count, offset, endian)?;
        dst.gwrite_with(self.guid_table_count, offset, endian)?;
        dst.gwrite_with(self.size_table_count, offset, endian)?;
        dst.gwrite_with(self.string_table_size, offset, endian)?;
        dst.gwrite_with(0u32, offset, endian)?;
        Ok(*offset)
    }
}

/// `DYNAMICEX_MAPPING`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExMapEntry {
    pub ex_token_number: u32,
    /// 0-based index into the local token table.
    pub local_token_index: u16,
    pub ex_guid_index: u16,
}

impl ExMapEntry {
    pub const SIZE: usize = 8;

    /// The 1-based internal token number the entry maps to.
    pub const fn token_number(&self) -> usize {
        self.local_token_index as usize + 1
    }
}

/// `SKU_HEAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkuHead {
    pub sku_data_start_offset: u32,
    pub sku_id_table_offset: u32,
}

impl SkuHead {
    pub const SIZE: usize = 8;
}

/// `VARIABLE_HEAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableHead {
    pub guid_table_index: u16,
    /// Index of the variable name in the string table, in CHAR16 units.
    pub string_index: u16,
    /// Offset of the value within the variable data.
    pub offset: u16,
    /// Image offset of the value used when the variable does not exist.
    pub default_value_offset: u16,
}

impl VariableHead {
    pub const SIZE: usize = 8;
}

/// `VPD_HEAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpdHead {
    pub offset: u32,
}

impl VpdHead {
    pub const SIZE: usize = 4;
}

/// `STRING_HEAD`: index into the string table in CHAR16 units.
pub type StringHead = u16;

macro_rules! impl_table_entry {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        impl<'a> TryFromCtx<'a, Endian> for $name {
            type Error = scroll::Error;

            fn try_from_ctx(src: &'a [u8], endian: Endian) -> core::result::Result<(Self, usize), Self::Error> {
                let offset = &mut 0;
                $(let $field = src.gread_with(offset, endian)?;)+
                Ok((Self { $($field),+ }, *offset))
            }
        }

        impl TryIntoCtx<Endian> for $name {
            type Error = scroll::Error;

            fn try_into_ctx(self, dst: &mut [u8], endian: Endian) -> core::result::Result<usize, Self::Error> {
                let offset = &mut 0;
                $(dst.gwrite_with(self.$field, offset, endian)?;)+
                Ok(*offset)
            }
        }
    };
}

impl_table_entry!(ExMapEntry { ex_token_number, local_token_index, ex_guid_index });
impl_table_entry!(SkuHead { sku_data_start_offset, sku_id_table_offset });
impl_table_entry!(VariableHead { guid_table_index, string_index, offset, default_value_offset });
impl_table_entry!(VpdHead { offset });

/// A validated, mutable database image with its tables decoded.
#[derive(Debug, Clone)]
pub struct PcdImage {
    bytes: Vec<u8>,
    header: PcdDatabaseHeader,
    tokens: Vec<LocalToken>,
    ex_map: Vec<ExMapEntry>,
    guids: Vec<efi::Guid>,
}

impl PcdImage {
    /// Validates `bytes` as a database image and decodes its index tables.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let header: PcdDatabaseHeader = bytes.as_slice().pread_with(0, LE)?;

        if header.signature != PCD_DATABASE_SIGNATURE {
            return Err(Error::MalformedDatabase("bad signature"));
        }
        if header.build_version != PCD_DATABASE_VERSION {
            return Err(Error::MalformedDatabase("unsupported build version"));
        }
        if header.length as usize != bytes.len() {
            return Err(Error::MalformedDatabase("image length does not match the header"));
        }
        if header.ex_token_count > header.local_token_count {
            return Err(Error::MalformedDatabase("more Ex tokens than local tokens"));
        }

        let tables = [
            (header.local_token_number_table_offset, header.local_token_count as usize * 4),
            (header.ex_map_table_offset, header.ex_token_count as usize * ExMapEntry::SIZE),
            (header.guid_table_offset, header.guid_table_count as usize * GUID_SIZE),
            (header.string_table_offset, header.string_table_size as usize),
            (header.size_table_offset, header.size_table_count as usize * 2),
        ];
        for (offset, size) in tables {
            let end = (offset as usize).checked_add(size);
            if (offset as usize) < PcdDatabaseHeader::SIZE || end.map_or(true, |end| end > bytes.len()) {
                return Err(Error::MalformedDatabase("table outside of the image"));
            }
        }

        let mut offset = header.local_token_number_table_offset as usize;
        let tokens = (0..header.local_token_count)
            .map(|_| {
                let raw: u32 = bytes.as_slice().gread_with(&mut offset, LE)?;
                let token = LocalToken::decode(raw)?;
                if token.offset >= bytes.len() {
                    return Err(Error::MalformedDatabase("token offset outside of the image"));
                }
                Ok(token)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut offset = header.guid_table_offset as usize;
        let guids = (0..header.guid_table_count)
            .map(|_| read_guid(&bytes, &mut offset).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        let nex = (header.local_token_count - header.ex_token_count) as usize;
        let mut offset = header.ex_map_table_offset as usize;
        let ex_map = (0..header.ex_token_count)
            .map(|_| {
                let entry: ExMapEntry = bytes.as_slice().gread_with(&mut offset, LE)?;
                if (entry.local_token_index as usize) < nex || entry.local_token_index >= header.local_token_count {
                    return Err(Error::MalformedDatabase("Ex mapping outside of the Ex token range"));
                }
                if entry.ex_guid_index >= header.guid_table_count {
                    return Err(Error::MalformedDatabase("Ex mapping names an unknown GUID"));
                }
                Ok(entry)
            })
            .collect::<Result<Vec<_>>>()?;

        let sorted = ex_map.windows(2).all(|pair| {
            (pair[0].ex_guid_index, pair[0].ex_token_number) < (pair[1].ex_guid_index, pair[1].ex_token_number)
        });
        if !sorted {
            return Err(Error::MalformedDatabase("Ex mapping table is not sorted by GUID then token"));
        }

        Ok(Self { bytes, header, tokens, ex_map, guids })
    }

    pub fn header(&self) -> &PcdDatabaseHeader {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of tokens in the local token table (`PEI_LOCAL_TOKEN_NUMBER`).
    pub fn local_token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Number of tokens of the flat namespace (`PEI_NEX_TOKEN_NUMBER`).
    pub fn nex_token_count(&self) -> usize {
        self.tokens.len() - self.ex_map.len()
    }

    /// Decoded descriptor of the token at 0-based `index`.
    pub fn local_token(&self, index: usize) -> Result<LocalToken> {
        self.tokens.get(index).copied().ok_or(Error::InvalidToken(index + 1))
    }

    pub fn local_tokens(&self) -> &[LocalToken] {
        &self.tokens
    }

    pub fn ex_map(&self) -> &[ExMapEntry] {
        &self.ex_map
    }

    pub fn guids(&self) -> &[efi::Guid] {
        &self.guids
    }

    /// Linear scan of the GUID table.
    pub fn find_guid(&self, guid: &efi::Guid) -> Option<usize> {
        self.guids.iter().position(|candidate| candidate == guid)
    }

    pub fn system_sku_id(&self) -> u8 {
        self.header.system_sku_id
    }

    pub fn set_system_sku_id(&mut self, sku_id: u8) -> Result<()> {
        self.write(PcdDatabaseHeader::SYSTEM_SKU_ID_OFFSET, sku_id)?;
        self.header.system_sku_id = sku_id;
        Ok(())
    }

    /// Reads a value of the size table.
    pub fn size_entry(&self, index: usize) -> Result<u16> {
        if index >= self.header.size_table_count as usize {
            return Err(Error::MalformedDatabase("size table index out of range"));
        }
        self.read(self.header.size_table_offset as usize + index * 2)
    }

    pub fn set_size_entry(&mut self, index: usize, value: u16) -> Result<()> {
        if index >= self.header.size_table_count as usize {
            return Err(Error::MalformedDatabase("size table index out of range"));
        }
        self.write(self.header.size_table_offset as usize + index * 2, value)
    }

    /// Image offset of the string table entry at `index` (CHAR16 units), checked to hold `len` bytes.
    pub fn string_offset(&self, index: StringHead, len: usize) -> Result<usize> {
        let start = index as usize * 2;
        if start.checked_add(len).map_or(true, |end| end > self.header.string_table_size as usize) {
            return Err(Error::MalformedDatabase("string table access out of range"));
        }
        Ok(self.header.string_table_offset as usize + start)
    }

    /// The NUL terminated CHAR16 string at `index`, terminator included.
    pub fn utf16_string(&self, index: StringHead) -> Result<Vec<u16>> {
        let mut offset = self.string_offset(index, 0)?;
        let end = self.header.string_table_offset as usize + self.header.string_table_size as usize;
        let mut name = Vec::new();
        while offset < end {
            let c: u16 = self.bytes.as_slice().gread_with(&mut offset, LE)?;
            name.push(c);
            if c == 0 {
                return Ok(name);
            }
        }
        Err(Error::MalformedDatabase("unterminated string in the string table"))
    }

    pub fn read<'a, T>(&'a self, offset: usize) -> Result<T>
    where
        T: TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        Ok(self.bytes.as_slice().pread_with(offset, LE)?)
    }

    pub fn write<T>(&mut self, offset: usize, value: T) -> Result<()>
    where
        T: TryIntoCtx<Endian, Error = scroll::Error>,
    {
        self.bytes.as_mut_slice().pwrite_with(value, offset, LE)?;
        Ok(())
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(Error::MalformedDatabase("value outside of the image"))
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(Error::MalformedDatabase("value outside of the image"))
    }
}
