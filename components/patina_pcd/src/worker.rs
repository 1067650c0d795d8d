//! Typed reads and writes through the local token descriptors.
//!
//! A token number is resolved to its local token, SKU-enabled tokens are re-resolved to the active SKU row, and the
//! storage kind then decides where the value lives:
//!
//! - `DATA`: in the image at the token offset.
//! - `STRING`: in the shared string table, at the index stored in the image.
//! - `VPD`: in the configured VPD region, at the offset stored in the image.
//! - `HII`: in a UEFI variable named by the GUID and string tables, or the image default when it does not exist.
//!
//! Writes are validated completely before the set callbacks run, and committed only after them, so a rejected write
//! neither notifies nor modifies anything.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::borrow::Cow;

use patina_read_only_variable::ReadOnlyVariableServices;
use r_efi::efi;

use crate::{
    error::{Error, Result},
    image::{ExMapEntry, StringHead, VariableHead, VpdHead},
    size_table, sku,
    token::{LocalToken, StorageKind},
    PcdDatabase,
};

impl<V: ReadOnlyVariableServices> PcdDatabase<V> {
    /// 0-based local index of a 1-based token number.
    fn local_index(&self, token_number: usize) -> Result<usize> {
        match token_number.checked_sub(1) {
            Some(index) if index < self.image.local_token_count() => Ok(index),
            _ => Err(Error::InvalidToken(token_number)),
        }
    }

    /// The descriptor of a token with its SKU row already resolved (`GetLocalTokenNumber`).
    pub fn local_token(&self, token_number: usize) -> Result<LocalToken> {
        let index = self.local_index(token_number)?;
        let token = self.image.local_token(index)?;
        let data_stride = match token.datum.size() {
            0 => size_table::max_size(&self.image, index)?,
            size => size,
        };
        sku::resolve(&self.image, token, data_stride)
    }

    /// Maps a Dynamic-Ex token to its internal token number (`GetExPcdTokenNumber`).
    pub fn ex_token_number(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<usize> {
        if !self.config.ex_enabled {
            return Err(Error::Unsupported);
        }

        let guid_index = self.image.find_guid(guid).ok_or(Error::ExTokenNotFound)?;
        self.image
            .ex_map()
            .iter()
            .find(|entry| {
                entry.ex_guid_index as usize == guid_index && entry.ex_token_number as usize == ex_token_number
            })
            .map(ExMapEntry::token_number)
            .ok_or_else(|| {
                log::error!(target: "pcd", "Ex token {ex_token_number:#x} not found in {guid:?}.");
                Error::ExTokenNotFound
            })
    }

    /// Current size of a token: the datum size, or the size table entry of the active SKU row for pointer tokens.
    pub fn get_size(&self, token_number: usize) -> Result<usize> {
        let index = self.local_index(token_number)?;
        let token = self.image.local_token(index)?;
        match token.datum.size() {
            0 => size_table::ptr_type_size(&self.image, index),
            size => Ok(size),
        }
    }

    pub fn get_size_ex(&self, guid: &efi::Guid, ex_token_number: usize) -> Result<usize> {
        self.get_size(self.ex_token_number(guid, ex_token_number)?)
    }

    /// Reads a token (`GetWorker`).
    ///
    /// `size` is the access width; 0 reads the value at its current size, as pointer accessors do. DATA, STRING and
    /// VPD values are borrowed from their backing store, HII values are copied out of the variable.
    pub fn get_worker(&self, token_number: usize, size: usize) -> Result<Cow<'_, [u8]>> {
        let current = self.get_size(token_number)?;
        if size != 0 && size != current {
            return Err(Error::SizeMismatch { expected: current, actual: size });
        }

        let token = self.local_token(token_number)?;
        log::trace!(target: "pcd", "Get token {token_number:#x}: {:?}, {current} bytes.", token.kind);

        match token.kind {
            StorageKind::Data => Ok(Cow::Borrowed(self.image.slice(token.offset, current)?)),
            StorageKind::String => {
                let index: StringHead = self.image.read(token.offset)?;
                let offset = self.image.string_offset(index, current)?;
                Ok(Cow::Borrowed(self.image.slice(offset, current)?))
            }
            StorageKind::Vpd => {
                let head: VpdHead = self.image.read(token.offset)?;
                let region = self.config.vpd_region.ok_or(Error::VpdRegionMissing)?;
                let start = head.offset as usize;
                start
                    .checked_add(current)
                    .and_then(|end| region.get(start..end))
                    .map(Cow::Borrowed)
                    .ok_or(Error::MalformedDatabase("VPD value outside of the VPD region"))
            }
            StorageKind::Hii => self.get_hii_value(&token, current),
        }
    }

    /// Reads a Dynamic-Ex token (`ExGetWorker`).
    pub fn ex_get_worker(&self, guid: &efi::Guid, ex_token_number: usize, size: usize) -> Result<Cow<'_, [u8]>> {
        self.get_worker(self.ex_token_number(guid, ex_token_number)?, size)
    }

    fn get_hii_value(&self, token: &LocalToken, size: usize) -> Result<Cow<'_, [u8]>> {
        let head: VariableHead = self.image.read(token.offset)?;
        let guid = self
            .image
            .guids()
            .get(head.guid_table_index as usize)
            .ok_or(Error::MalformedDatabase("HII variable GUID outside of the GUID table"))?;
        let name = self.image.utf16_string(head.string_index)?;

        match self.variables.get_variable(&name, guid) {
            Ok((data, _attributes)) => {
                let start = head.offset as usize;
                let end = start + size;
                match data.get(start..end) {
                    Some(value) => Ok(Cow::Owned(value.to_vec())),
                    None => {
                        log::error!(
                            target: "pcd",
                            "HII variable {guid:?} holds {} bytes, token needs {end}.",
                            data.len()
                        );
                        Err(Error::HiiVariableTooSmall { required: end, actual: data.len() })
                    }
                }
            }
            Err(status) if status == efi::Status::NOT_FOUND => {
                log::warn!(target: "pcd", "HII variable {guid:?} not found, using the default value.");
                Ok(Cow::Borrowed(self.image.slice(head.default_value_offset as usize, size)?))
            }
            Err(status) => {
                log::error!(target: "pcd", "Failed to read HII variable {guid:?}: {status:?}.");
                Err(Error::Variable(status))
            }
        }
    }

    /// Checks a write and returns the image offset it lands at.
    fn validate_set(&self, token_number: usize, data: &[u8], ptr_type: bool) -> Result<usize> {
        let index = self.local_index(token_number)?;
        let token = self.local_token(token_number)?;

        if token.kind.is_read_only() {
            log::error!(target: "pcd", "Token {token_number:#x} is {:?} backed and cannot be set.", token.kind);
            return Err(Error::ReadOnly);
        }

        if ptr_type && token.datum.is_pointer() {
            let max = size_table::max_size(&self.image, index)?;
            if data.len() > max {
                return Err(Error::BufferTooLarge { max });
            }
        } else if ptr_type || data.len() != token.datum.size() {
            return Err(Error::SizeMismatch { expected: self.get_size(token_number)?, actual: data.len() });
        }

        let offset = match token.kind {
            StorageKind::String => self.image.string_offset(self.image.read::<StringHead>(token.offset)?, data.len())?,
            _ => token.offset,
        };
        self.image.slice(offset, data.len())?;
        Ok(offset)
    }

    fn commit(&mut self, token_number: usize, offset: usize, data: &[u8], ptr_type: bool) -> Result<()> {
        if ptr_type {
            size_table::set_ptr_type_size(&mut self.image, token_number - 1, data.len())?;
        }
        self.image.slice_mut(offset, data.len())?.copy_from_slice(data);
        log::trace!(target: "pcd", "Set token {token_number:#x}: {} bytes.", data.len());
        Ok(())
    }

    /// Writes a token (`SetWorker`).
    ///
    /// `ptr_type` selects the pointer path, where `data` may be shorter than the declared maximum; scalar writes
    /// must match the datum width exactly. Callbacks registered through the flat namespace run for non-Ex tokens.
    pub fn set_worker(&mut self, token_number: usize, data: &[u8], ptr_type: bool) -> Result<()> {
        let offset = self.validate_set(token_number, data, ptr_type)?;
        if token_number <= self.image.nex_token_count() {
            self.invoke_callbacks(None, token_number, token_number, data);
        }
        self.commit(token_number, offset, data, ptr_type)
    }

    /// Writes a Dynamic-Ex token (`ExSetWorker`).
    pub fn ex_set_worker(
        &mut self,
        guid: &efi::Guid,
        ex_token_number: usize,
        data: &[u8],
        ptr_type: bool,
    ) -> Result<()> {
        let token_number = self.ex_token_number(guid, ex_token_number)?;
        let offset = self.validate_set(token_number, data, ptr_type)?;
        self.invoke_callbacks(Some(guid), ex_token_number, token_number, data);
        self.commit(token_number, offset, data, ptr_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{PcdDatabaseBuilder, PcdDefinition},
        config::PcdConfig,
        token::DatumType,
    };
    use alloc::vec::Vec;
    use mockall::predicate::always;
    use patina_read_only_variable::{MockReadOnlyVariableServices, StandardReadOnlyVariable};

    const SPACE: efi::Guid =
        efi::Guid::from_fields(0x12345678, 0x9abc, 0xdef0, 0x01, 0x02, &[0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    const VARIABLE_GUID: efi::Guid =
        efi::Guid::from_fields(0x87654321, 0x0fed, 0xcba9, 0x10, 0x20, &[0x30, 0x40, 0x50, 0x60, 0x70, 0x80]);

    static VPD: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

    // Flat tokens: 1 u32, 2 pointer, 3 string, 4 VPD u16, 5 HII u32, 6 SKU u8, 7 bool. Ex token 0x30 in SPACE is 8.
    fn build_image() -> Vec<u8> {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint32(0xDEADBEEF));
        builder.add_token(PcdDefinition::pointer(8, b"abcd"));
        builder.add_token(PcdDefinition::string(6, b"hi"));
        builder.add_token(PcdDefinition::vpd(DatumType::Uint16, 2));
        builder.add_token(PcdDefinition::hii(DatumType::Uint32, VARIABLE_GUID, "Setup", 4, &0x55u32.to_le_bytes()));
        builder.add_token(PcdDefinition::uint8(1).with_sku(2, PcdDefinition::uint8(2)));
        builder.add_token(PcdDefinition::boolean(true));
        builder.add_ex_token(SPACE, 0x30, PcdDefinition::uint64(0x0102030405060708));
        builder.build().unwrap()
    }

    fn database() -> PcdDatabase<StandardReadOnlyVariable> {
        let config = PcdConfig::new().with_vpd_region(&VPD);
        PcdDatabase::new(build_image(), config, StandardReadOnlyVariable::new_uninit()).unwrap()
    }

    fn database_with_variables(variables: MockReadOnlyVariableServices) -> PcdDatabase<MockReadOnlyVariableServices> {
        PcdDatabase::new(build_image(), PcdConfig::new(), variables).unwrap()
    }

    #[test]
    fn test_get_data_scalar() {
        let database = database();
        assert_eq!(&*database.get_worker(1, 4).unwrap(), &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(database.get_worker(1, 2), Err(Error::SizeMismatch { expected: 4, actual: 2 }));
        assert_eq!(&*database.get_worker(7, 1).unwrap(), &[1]);
    }

    #[test]
    fn test_token_number_bounds() {
        let database = database();
        assert_eq!(database.get_worker(0, 0), Err(Error::InvalidToken(0)));
        assert_eq!(database.get_worker(9, 0), Err(Error::InvalidToken(9)));
        assert_eq!(database.get_size(9), Err(Error::InvalidToken(9)));
    }

    #[test]
    fn test_get_pointer_uses_current_size() {
        let mut database = database();
        assert_eq!(database.get_size(2).unwrap(), 4);
        assert_eq!(&*database.get_worker(2, 0).unwrap(), b"abcd");

        database.set_worker(2, b"xy", true).unwrap();
        assert_eq!(database.get_size(2).unwrap(), 2);
        assert_eq!(&*database.get_worker(2, 0).unwrap(), b"xy");
    }

    #[test]
    fn test_string_table_token() {
        let mut database = database();
        assert_eq!(&*database.get_worker(3, 0).unwrap(), b"hi");

        database.set_worker(3, b"hello!", true).unwrap();
        assert_eq!(&*database.get_worker(3, 0).unwrap(), b"hello!");
        assert_eq!(database.set_worker(3, b"hello!!", true), Err(Error::BufferTooLarge { max: 6 }));
    }

    #[test]
    fn test_vpd_token() {
        let database = database();
        assert_eq!(&*database.get_worker(4, 2).unwrap(), &[0x33, 0x44]);
        assert!(matches!(database.get_worker(4, 2).unwrap(), Cow::Borrowed(_)));

        let no_vpd = PcdDatabase::new(build_image(), PcdConfig::new(), StandardReadOnlyVariable::new_uninit()).unwrap();
        assert_eq!(no_vpd.get_worker(4, 2), Err(Error::VpdRegionMissing));
    }

    #[test]
    fn test_read_only_tokens_reject_set() {
        let mut database = database();
        let before = database.image().as_bytes().to_vec();
        assert_eq!(database.set_worker(4, &[0, 0], false), Err(Error::ReadOnly));
        assert_eq!(database.set_worker(5, &[0; 4], false), Err(Error::ReadOnly));
        assert_eq!(database.image().as_bytes(), &before[..]);
    }

    #[test]
    fn test_scalar_set_requires_exact_width() {
        let mut database = database();
        assert_eq!(database.set_worker(1, &[1, 2], false), Err(Error::SizeMismatch { expected: 4, actual: 2 }));
        assert_eq!(database.set_worker(1, &[1, 2, 3, 4], true), Err(Error::SizeMismatch { expected: 4, actual: 4 }));
        database.set_worker(1, &0x01020304u32.to_le_bytes(), false).unwrap();
        assert_eq!(&*database.get_worker(1, 4).unwrap(), &[4, 3, 2, 1]);
    }

    #[test]
    fn test_sku_rows_are_isolated() {
        let mut database = database();
        assert_eq!(&*database.get_worker(6, 1).unwrap(), &[1]);

        database.set_sku(2).unwrap();
        assert_eq!(&*database.get_worker(6, 1).unwrap(), &[2]);
        database.set_worker(6, &[0x20], false).unwrap();

        database.set_sku(0).unwrap();
        assert_eq!(&*database.get_worker(6, 1).unwrap(), &[1]);
        database.set_sku(2).unwrap();
        assert_eq!(&*database.get_worker(6, 1).unwrap(), &[0x20]);
    }

    #[test]
    fn test_ex_token_access() {
        let mut database = database();
        assert_eq!(database.ex_token_number(&SPACE, 0x30).unwrap(), 8);
        assert_eq!(database.ex_token_number(&SPACE, 0x31), Err(Error::ExTokenNotFound));
        assert_eq!(database.ex_token_number(&VARIABLE_GUID, 0x30), Err(Error::ExTokenNotFound));
        assert_eq!(database.get_size_ex(&SPACE, 0x30).unwrap(), 8);

        database.ex_set_worker(&SPACE, 0x30, &7u64.to_le_bytes(), false).unwrap();
        assert_eq!(&*database.ex_get_worker(&SPACE, 0x30, 8).unwrap(), &7u64.to_le_bytes());
        // The Ex token is reachable through its internal number too.
        assert_eq!(&*database.get_worker(8, 8).unwrap(), &7u64.to_le_bytes());
    }

    #[test]
    fn test_ex_disabled() {
        let config = PcdConfig::new().with_ex(false);
        let database = PcdDatabase::new(build_image(), config, StandardReadOnlyVariable::new_uninit()).unwrap();
        assert_eq!(database.ex_get_worker(&SPACE, 0x30, 8), Err(Error::Unsupported));
    }

    #[test]
    fn test_hii_reads_variable_at_offset() {
        let mut variables = MockReadOnlyVariableServices::new();
        variables
            .expect_get_variable()
            .once()
            .withf(|name, guid| {
                name.iter().eq("Setup\0".encode_utf16().collect::<Vec<_>>().iter())
                    && guid.as_bytes() == VARIABLE_GUID.as_bytes()
            })
            .returning(|_, _| Ok((vec![0, 0, 0, 0, 0x78, 0x56, 0x34, 0x12], 0)));

        let database = database_with_variables(variables);
        let value = database.get_worker(5, 4).unwrap();
        assert!(matches!(value, Cow::Owned(_)));
        assert_eq!(&*value, &0x12345678u32.to_le_bytes());
    }

    #[test]
    fn test_hii_missing_variable_uses_default() {
        let mut variables = MockReadOnlyVariableServices::new();
        variables.expect_get_variable().with(always(), always()).returning(|_, _| Err(efi::Status::NOT_FOUND));

        let database = database_with_variables(variables);
        assert_eq!(&*database.get_worker(5, 4).unwrap(), &0x55u32.to_le_bytes());
    }

    #[test]
    fn test_hii_short_variable() {
        let mut variables = MockReadOnlyVariableServices::new();
        variables.expect_get_variable().returning(|_, _| Ok((vec![0; 6], 0)));

        let database = database_with_variables(variables);
        assert_eq!(database.get_worker(5, 4), Err(Error::HiiVariableTooSmall { required: 8, actual: 6 }));
    }

    #[test]
    fn test_hii_variable_service_failure() {
        let mut variables = MockReadOnlyVariableServices::new();
        variables.expect_get_variable().returning(|_, _| Err(efi::Status::DEVICE_ERROR));

        let database = database_with_variables(variables);
        assert_eq!(database.get_worker(5, 4), Err(Error::Variable(efi::Status::DEVICE_ERROR)));
    }
}
