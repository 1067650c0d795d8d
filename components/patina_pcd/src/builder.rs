//! Offline construction of PCD database images.
//!
//! Firmware builds produce the database image with host tooling; [`PcdDatabaseBuilder`] is that tooling side of the
//! image format. It numbers the flat tokens in insertion order, places the Dynamic-Ex tokens after them sorted by
//! token space then Ex token number, and lays out every table.
//!
//! ```rust
//! use patina_pcd::builder::{PcdDatabaseBuilder, PcdDefinition};
//!
//! let mut builder = PcdDatabaseBuilder::new();
//! let token = builder.add_token(PcdDefinition::uint32(0xDEADBEEF));
//! let image = builder.build().unwrap();
//! assert_eq!(token, 1);
//! assert!(!image.is_empty());
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};

use r_efi::efi;
use scroll::{Pwrite, LE};

use crate::{
    error::{Error, Result},
    image::{
        write_guid, ExMapEntry, PcdDatabaseHeader, SkuHead, VariableHead, GUID_SIZE, PCD_DATABASE_SIGNATURE,
        PCD_DATABASE_VERSION,
    },
    token::{DatumType, LocalToken, StorageKind},
};

const fn align8(value: usize) -> usize {
    (value + 7) & !7
}

/// One SKU row of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowValue {
    Data(Vec<u8>),
    String(Vec<u8>),
    Vpd { offset: u32 },
    Hii { guid: efi::Guid, name: Vec<u16>, offset: u16, default: Vec<u8> },
}

impl RowValue {
    fn kind(&self) -> StorageKind {
        match self {
            RowValue::Data(_) => StorageKind::Data,
            RowValue::String(_) => StorageKind::String,
            RowValue::Vpd { .. } => StorageKind::Vpd,
            RowValue::Hii { .. } => StorageKind::Hii,
        }
    }

    /// The value length a pointer token starts out with.
    fn current_size(&self, max_size: usize) -> usize {
        match self {
            RowValue::Data(value) | RowValue::String(value) => value.len(),
            RowValue::Hii { default, .. } => default.len(),
            RowValue::Vpd { .. } => max_size,
        }
    }
}

/// The build-time definition of a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcdDefinition {
    kind: StorageKind,
    datum: DatumType,
    max_size: usize,
    sku_enabled: bool,
    rows: Vec<(u8, RowValue)>,
}

impl PcdDefinition {
    fn new(datum: DatumType, max_size: usize, row: RowValue) -> Self {
        Self { kind: row.kind(), datum, max_size, sku_enabled: false, rows: vec![(0, row)] }
    }

    pub fn uint8(value: u8) -> Self {
        Self::new(DatumType::Uint8, 0, RowValue::Data(value.to_le_bytes().to_vec()))
    }

    pub fn uint16(value: u16) -> Self {
        Self::new(DatumType::Uint16, 0, RowValue::Data(value.to_le_bytes().to_vec()))
    }

    pub fn uint32(value: u32) -> Self {
        Self::new(DatumType::Uint32, 0, RowValue::Data(value.to_le_bytes().to_vec()))
    }

    pub fn uint64(value: u64) -> Self {
        Self::new(DatumType::Uint64, 0, RowValue::Data(value.to_le_bytes().to_vec()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::uint8(value as u8)
    }

    /// A VOID* token stored in the image, `max_size` bytes reserved.
    pub fn pointer(max_size: usize, value: &[u8]) -> Self {
        Self::new(DatumType::Pointer, max_size, RowValue::Data(value.to_vec()))
    }

    /// A VOID* token stored in the shared string table, `max_size` bytes reserved.
    pub fn string(max_size: usize, value: &[u8]) -> Self {
        Self::new(DatumType::Pointer, max_size, RowValue::String(value.to_vec()))
    }

    /// A scalar token read from the VPD region at `offset`.
    pub fn vpd(datum: DatumType, offset: u32) -> Self {
        Self::new(datum, 0, RowValue::Vpd { offset })
    }

    /// A VOID* token of `max_size` bytes read from the VPD region at `offset`.
    pub fn vpd_pointer(max_size: usize, offset: u32) -> Self {
        Self::new(DatumType::Pointer, max_size, RowValue::Vpd { offset })
    }

    /// A token backed by the UEFI variable `name` in `guid`, at `offset` within the variable data. `default` is used
    /// while the variable does not exist and also sizes pointer tokens.
    pub fn hii(datum: DatumType, guid: efi::Guid, name: &str, offset: u16, default: &[u8]) -> Self {
        let name = name.encode_utf16().chain(Some(0)).collect();
        let max_size = if datum.is_pointer() { default.len() } else { 0 };
        Self::new(datum, max_size, RowValue::Hii { guid, name, offset, default: default.to_vec() })
    }

    /// Adds the first row of `row` as the value of `sku_id` and turns the token SKU-enabled. The value defined by
    /// the constructor stays the row of the default SKU 0.
    pub fn with_sku(mut self, sku_id: u8, row: PcdDefinition) -> Self {
        self.sku_enabled = true;
        self.rows.extend(row.rows.into_iter().take(1).map(|(_, value)| (sku_id, value)));
        self
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn datum(&self) -> DatumType {
        self.datum
    }

    /// Bytes one row occupies in the data region.
    fn stride(&self) -> usize {
        self.kind.head_size().unwrap_or(if self.datum.is_pointer() { self.max_size } else { self.datum.size() })
    }

    fn validate(&self) -> Result<()> {
        if self.max_size > u16::MAX as usize {
            return Err(Error::InvalidConfig("maximum size does not fit the size table"));
        }
        if self.rows.len() > u8::MAX as usize {
            return Err(Error::InvalidConfig("too many SKU rows"));
        }
        for (i, (sku_id, row)) in self.rows.iter().enumerate() {
            if self.rows[..i].iter().any(|(other, _)| other == sku_id) {
                return Err(Error::InvalidConfig("duplicate SKU id"));
            }
            if row.kind() != self.kind {
                return Err(Error::InvalidConfig("SKU row of a different storage kind"));
            }
            let fits = |len: usize| match self.datum {
                DatumType::Pointer => len <= self.max_size,
                datum => len == datum.size(),
            };
            match row {
                RowValue::Data(value) | RowValue::String(value) if !fits(value.len()) => {
                    return Err(Error::InvalidConfig("value does not match the declared size"));
                }
                RowValue::Hii { default, .. } if !fits(default.len()) => {
                    return Err(Error::InvalidConfig("HII default does not match the declared size"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Lays out a database image from token definitions.
#[derive(Debug, Default)]
pub struct PcdDatabaseBuilder {
    system_sku_id: u8,
    tokens: Vec<PcdDefinition>,
    ex_tokens: Vec<(efi::Guid, u32, PcdDefinition)>,
}

impl PcdDatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The SKU selected when the image is loaded.
    pub fn with_system_sku_id(mut self, sku_id: u8) -> Self {
        self.system_sku_id = sku_id;
        self
    }

    /// Adds a token to the flat namespace and returns its token number.
    pub fn add_token(&mut self, definition: PcdDefinition) -> usize {
        self.tokens.push(definition);
        self.tokens.len()
    }

    /// Adds a Dynamic-Ex token to the `guid` token space.
    pub fn add_ex_token(&mut self, guid: efi::Guid, ex_token_number: u32, definition: PcdDefinition) -> &mut Self {
        self.ex_tokens.push((guid, ex_token_number, definition));
        self
    }

    /// Produces the image bytes.
    pub fn build(&self) -> Result<Vec<u8>> {
        fn intern(guids: &mut Vec<efi::Guid>, guid: &efi::Guid) -> usize {
            match guids.iter().position(|candidate| candidate == guid) {
                Some(index) => index,
                None => {
                    guids.push(*guid);
                    guids.len() - 1
                }
            }
        }

        let mut guids = Vec::new();
        let mut ex_tokens = self
            .ex_tokens
            .iter()
            .map(|(guid, number, definition)| (intern(&mut guids, guid), *number, definition))
            .collect::<Vec<_>>();
        ex_tokens.sort_by_key(|(guid_index, number, _)| (*guid_index, *number));
        if ex_tokens.windows(2).any(|pair| (pair[0].0, pair[0].1) == (pair[1].0, pair[1].1)) {
            return Err(Error::InvalidConfig("duplicate Ex token in a token space"));
        }

        let definitions =
            self.tokens.iter().chain(ex_tokens.iter().map(|(_, _, definition)| *definition)).collect::<Vec<_>>();
        let nex = self.tokens.len();
        let local_token_count =
            u16::try_from(definitions.len()).map_err(|_| Error::InvalidConfig("too many tokens"))?;

        for definition in &definitions {
            definition.validate()?;
            for (_, row) in &definition.rows {
                if let RowValue::Hii { guid, .. } = row {
                    intern(&mut guids, guid);
                }
            }
        }
        let guid_table_count = u16::try_from(guids.len()).map_err(|_| Error::InvalidConfig("too many GUIDs"))?;

        // String table: one slot per string row, one name per HII row.
        let mut strings = Vec::<u8>::new();
        let mut string_indices = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let mut indices = Vec::with_capacity(definition.rows.len());
            for (_, row) in &definition.rows {
                let index = u16::try_from(strings.len() / 2)
                    .map_err(|_| Error::InvalidConfig("string table too large"))?;
                match row {
                    RowValue::String(value) => {
                        let start = strings.len();
                        strings.extend_from_slice(value);
                        strings.resize(start + ((definition.max_size + 1) & !1), 0);
                    }
                    RowValue::Hii { name, .. } => strings.extend(name.iter().flat_map(|c| c.to_le_bytes())),
                    _ => {}
                }
                indices.push(index);
            }
            string_indices.push(indices);
        }

        let mut sizes = Vec::<u16>::new();
        for definition in definitions.iter().filter(|definition| definition.datum.is_pointer()) {
            sizes.push(definition.max_size as u16);
            if definition.kind != StorageKind::Vpd {
                sizes.extend(definition.rows.iter().map(|(_, row)| row.current_size(definition.max_size) as u16));
            }
        }
        let size_table_count = u16::try_from(sizes.len()).map_err(|_| Error::InvalidConfig("size table too large"))?;

        let local_token_number_table_offset = align8(PcdDatabaseHeader::SIZE);
        let ex_map_table_offset = align8(local_token_number_table_offset + definitions.len() * 4);
        let guid_table_offset = align8(ex_map_table_offset + ex_tokens.len() * ExMapEntry::SIZE);
        let string_table_offset = align8(guid_table_offset + guids.len() * GUID_SIZE);
        let size_table_offset = align8(string_table_offset + strings.len());
        let data_offset = align8(size_table_offset + sizes.len() * 2);

        let mut out = vec![0u8; data_offset];
        let mut local_tokens = Vec::with_capacity(definitions.len());
        for (definition, indices) in definitions.iter().zip(&string_indices) {
            let offset = emit_token(&mut out, definition, indices, &guids)?;
            let mut token = LocalToken::new(definition.kind, definition.datum, offset);
            if definition.sku_enabled {
                token = token.with_sku();
            }
            local_tokens.push(token.encode()?);
        }

        let length = u32::try_from(out.len()).map_err(|_| Error::InvalidConfig("image too large"))?;
        let bytes = out.as_mut_slice();

        for (i, raw) in local_tokens.iter().enumerate() {
            bytes.pwrite_with(*raw, local_token_number_table_offset + i * 4, LE)?;
        }
        for (i, (guid_index, number, _)) in ex_tokens.iter().enumerate() {
            let entry = ExMapEntry {
                ex_token_number: *number,
                local_token_index: (nex + i) as u16,
                ex_guid_index: *guid_index as u16,
            };
            bytes.pwrite_with(entry, ex_map_table_offset + i * ExMapEntry::SIZE, LE)?;
        }
        let mut offset = guid_table_offset;
        for guid in &guids {
            write_guid(bytes, guid, &mut offset)?;
        }
        bytes[string_table_offset..string_table_offset + strings.len()].copy_from_slice(&strings);
        for (i, size) in sizes.iter().enumerate() {
            bytes.pwrite_with(*size, size_table_offset + i * 2, LE)?;
        }

        let header = PcdDatabaseHeader {
            signature: PCD_DATABASE_SIGNATURE,
            build_version: PCD_DATABASE_VERSION,
            length,
            system_sku_id: self.system_sku_id,
            local_token_number_table_offset: local_token_number_table_offset as u32,
            ex_map_table_offset: ex_map_table_offset as u32,
            guid_table_offset: guid_table_offset as u32,
            string_table_offset: string_table_offset as u32,
            size_table_offset: size_table_offset as u32,
            local_token_count,
            ex_token_count: ex_tokens.len() as u16,
            guid_table_count,
            size_table_count,
            string_table_size: strings.len() as u32,
        };
        bytes.pwrite_with(&header, 0, LE)?;

        Ok(out)
    }
}

/// Appends `bytes` at the next 8 byte boundary and returns its offset.
fn append(out: &mut Vec<u8>, bytes: &[u8]) -> usize {
    let offset = align8(out.len());
    out.resize(offset, 0);
    out.extend_from_slice(bytes);
    offset
}

/// Writes the rows of one token into the data region and returns the offset its local token points at.
fn emit_token(
    out: &mut Vec<u8>,
    definition: &PcdDefinition,
    string_indices: &[u16],
    guids: &[efi::Guid],
) -> Result<usize> {
    let stride = definition.stride();
    let mut rows = Vec::with_capacity(stride * definition.rows.len());

    for ((_, row), string_index) in definition.rows.iter().zip(string_indices) {
        let mut slot = vec![0u8; stride];
        match row {
            RowValue::Data(value) => slot[..value.len()].copy_from_slice(value),
            RowValue::String(_) => {
                slot.pwrite_with(*string_index, 0, LE)?;
            }
            RowValue::Vpd { offset } => {
                slot.pwrite_with(*offset, 0, LE)?;
            }
            RowValue::Hii { guid, offset, default, .. } => {
                let mut value = default.clone();
                value.resize(definition.max_size.max(definition.datum.size()), 0);
                let default_value_offset = u16::try_from(append(out, &value))
                    .map_err(|_| Error::InvalidConfig("HII default value beyond the 16-bit offset range"))?;
                let head = VariableHead {
                    guid_table_index: guids.iter().position(|candidate| candidate == guid).unwrap_or_default() as u16,
                    string_index: *string_index,
                    offset: *offset,
                    default_value_offset,
                };
                slot.pwrite_with(head, 0, LE)?;
            }
        }
        rows.extend_from_slice(&slot);
    }

    if !definition.sku_enabled {
        return Ok(append(out, &rows));
    }

    let head_offset = align8(out.len());
    let sku_id_table_offset = head_offset + SkuHead::SIZE;
    let sku_data_start_offset = align8(sku_id_table_offset + 1 + definition.rows.len());
    let head = SkuHead {
        sku_data_start_offset: sku_data_start_offset as u32,
        sku_id_table_offset: sku_id_table_offset as u32,
    };

    out.resize(sku_data_start_offset, 0);
    out.as_mut_slice().pwrite_with(head, head_offset, LE)?;
    out[sku_id_table_offset] = definition.rows.len() as u8;
    for (i, (sku_id, _)) in definition.rows.iter().enumerate() {
        out[sku_id_table_offset + 1 + i] = *sku_id;
    }
    out.extend_from_slice(&rows);

    Ok(head_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{image::PcdImage, token::PCD_DATABASE_OFFSET_MASK};
    use scroll::Pread;

    const SPACE_A: efi::Guid =
        efi::Guid::from_fields(0xaaaaaaaa, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]);
    const SPACE_B: efi::Guid =
        efi::Guid::from_fields(0xbbbbbbbb, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]);

    #[test]
    fn test_ex_map_is_sorted_by_space_then_number() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint8(1));
        builder.add_ex_token(SPACE_A, 9, PcdDefinition::uint8(2));
        builder.add_ex_token(SPACE_B, 1, PcdDefinition::uint8(3));
        builder.add_ex_token(SPACE_A, 2, PcdDefinition::uint8(4));

        let image = PcdImage::parse(builder.build().unwrap()).unwrap();
        let map = image.ex_map();
        assert_eq!(
            map.iter().map(|entry| (entry.ex_guid_index, entry.ex_token_number)).collect::<Vec<_>>(),
            vec![(0, 2), (0, 9), (1, 1)]
        );
        assert_eq!(map.iter().map(|entry| entry.local_token_index).collect::<Vec<_>>(), vec![1, 2, 3]);
        // The value 4 (SPACE_A, 2) lands on the first Ex local token.
        let token = image.local_token(1).unwrap();
        assert_eq!(image.slice(token.offset, 1).unwrap(), &[4]);
    }

    #[test]
    fn test_duplicate_ex_token_rejected() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_ex_token(SPACE_A, 1, PcdDefinition::uint8(1)).add_ex_token(SPACE_A, 1, PcdDefinition::uint8(2));
        assert!(matches!(builder.build(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_pointer_value_rejected() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::pointer(2, &[1, 2, 3]));
        assert!(matches!(builder.build(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_mismatched_sku_row_rejected() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint32(1).with_sku(3, PcdDefinition::uint8(1)));
        assert!(matches!(builder.build(), Err(Error::InvalidConfig(_))));

        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint32(1).with_sku(0, PcdDefinition::uint32(2)));
        assert!(matches!(builder.build(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_size_table_layout() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::pointer(8, &[1, 2]));
        builder.add_token(PcdDefinition::uint16(7));
        builder.add_token(PcdDefinition::vpd_pointer(6, 0));
        builder.add_token(PcdDefinition::string(4, &[1]).with_sku(1, PcdDefinition::string(4, &[1, 2, 3])));

        let image = PcdImage::parse(builder.build().unwrap()).unwrap();
        let sizes = (0..image.header().size_table_count as usize)
            .map(|i| image.size_entry(i).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![8, 2, 6, 4, 1, 3]);
    }

    #[test]
    fn test_sku_layout() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint16(0x10).with_sku(5, PcdDefinition::uint16(0x50)));

        let bytes = builder.build().unwrap();
        let image = PcdImage::parse(bytes.clone()).unwrap();
        let token = image.local_token(0).unwrap();
        assert!(token.sku_enabled);
        assert_eq!(token.offset & !(PCD_DATABASE_OFFSET_MASK as usize), 0);

        let head: SkuHead = image.read(token.offset).unwrap();
        let table = head.sku_id_table_offset as usize;
        assert_eq!(&bytes[table..table + 3], &[2, 0, 5]);
        let data = head.sku_data_start_offset as usize;
        assert_eq!(bytes.pread_with::<u16>(data, LE).unwrap(), 0x10);
        assert_eq!(bytes.pread_with::<u16>(data + 2, LE).unwrap(), 0x50);
    }

    #[test]
    fn test_hii_head_and_name() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::hii(DatumType::Uint32, SPACE_B, "Setup", 4, &7u32.to_le_bytes()));

        let image = PcdImage::parse(builder.build().unwrap()).unwrap();
        let token = image.local_token(0).unwrap();
        assert_eq!(token.kind, StorageKind::Hii);

        let head: VariableHead = image.read(token.offset).unwrap();
        assert_eq!(image.guids()[head.guid_table_index as usize], SPACE_B);
        assert_eq!(image.utf16_string(head.string_index).unwrap(), "Setup\0".encode_utf16().collect::<Vec<_>>());
        assert_eq!(head.offset, 4);
        assert_eq!(image.read::<u32>(head.default_value_offset as usize).unwrap(), 7);
    }
}
