//! Token and token space enumeration.
//!
//! The flat namespace is walked in token number order over the non-Ex tokens. Dynamic-Ex token spaces are walked in
//! the order of the Ex mapping table, which is sorted by GUID table index then Ex token number, so every space is a
//! contiguous run. Token number 0 starts every walk and `None` ends it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use patina_read_only_variable::ReadOnlyVariableServices;
use r_efi::efi;

use crate::{
    error::{Error, Result},
    image::ExMapEntry,
    token::PCD_INVALID_TOKEN_NUMBER,
    PcdDatabase,
};

impl<V: ReadOnlyVariableServices> PcdDatabase<V> {
    fn check_traverse(&self) -> Result<()> {
        if self.config.traverse_enabled {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    fn check_ex(&self) -> Result<()> {
        if self.config.ex_enabled {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    /// Entries of the Ex mapping table belonging to the token space at `guid_index`.
    fn token_space(&self, guid_index: usize) -> impl Iterator<Item = &ExMapEntry> + '_ {
        self.image.ex_map().iter().filter(move |entry| entry.ex_guid_index as usize == guid_index)
    }

    /// Returns the token after `token_number` in the flat namespace (`guid == None`) or in a Dynamic-Ex token space
    /// (`PeiPcdGetNextToken`).
    ///
    /// Pass [`PCD_INVALID_TOKEN_NUMBER`] to get the first token; `Ok(None)` marks the end of the walk.
    pub fn get_next_token(&self, guid: Option<&efi::Guid>, token_number: usize) -> Result<Option<usize>> {
        self.check_traverse()?;

        let Some(guid) = guid else {
            let nex = self.image.nex_token_count();
            if token_number > nex {
                return Err(Error::TokenNotFound(token_number));
            }
            let next = token_number + 1;
            return Ok((next <= nex).then_some(next));
        };
        self.check_ex()?;

        if self.image.ex_map().is_empty() {
            return match token_number {
                PCD_INVALID_TOKEN_NUMBER => Ok(None),
                _ => Err(Error::ExTokenNotFound),
            };
        }

        let guid_index = self.image.find_guid(guid).ok_or(Error::UnknownTokenSpace)?;
        let mut space = self.token_space(guid_index);
        let first = self.token_space(guid_index).next().ok_or(Error::UnknownTokenSpace)?;

        if token_number == PCD_INVALID_TOKEN_NUMBER {
            return Ok(Some(first.ex_token_number as usize));
        }

        space
            .by_ref()
            .find(|entry| entry.ex_token_number as usize == token_number)
            .ok_or(Error::ExTokenNotFound)?;
        Ok(space.next().map(|entry| entry.ex_token_number as usize))
    }

    /// Returns the token space after `guid` (`PeiPcdGetNextTokenSpace`).
    ///
    /// `None` starts the walk at the first Dynamic-Ex token space; `Ok(None)` marks the end of the walk.
    pub fn get_next_token_space(&self, guid: Option<&efi::Guid>) -> Result<Option<efi::Guid>> {
        self.check_traverse()?;
        self.check_ex()?;

        let ex_map = self.image.ex_map();
        let guids = self.image.guids();
        let space_guid = |entry: &ExMapEntry| {
            guids
                .get(entry.ex_guid_index as usize)
                .copied()
                .ok_or(Error::MalformedDatabase("Ex mapping names an unknown GUID"))
        };

        let Some(guid) = guid else {
            return ex_map.first().map(space_guid).transpose();
        };

        let guid_index = self.image.find_guid(guid).ok_or(Error::UnknownTokenSpace)?;
        let last = ex_map
            .iter()
            .rposition(|entry| entry.ex_guid_index as usize == guid_index)
            .ok_or(Error::UnknownTokenSpace)?;
        ex_map.get(last + 1).map(space_guid).transpose()
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
    use patina_read_only_variable::StandardReadOnlyVariable;

    const SPACE_A: efi::Guid =
        efi::Guid::from_fields(0x0000000A, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]);
    const SPACE_B: efi::Guid =
        efi::Guid::from_fields(0x0000000B, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0b]);
    const HII_GUID: efi::Guid =
        efi::Guid::from_fields(0x0000000C, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0c]);

    fn database(config: PcdConfig) -> PcdDatabase<StandardReadOnlyVariable> {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint8(1));
        builder.add_token(PcdDefinition::uint16(2));
        builder.add_token(PcdDefinition::hii(DatumType::Uint8, HII_GUID, "Var", 0, &[0]));
        builder
            .add_ex_token(SPACE_B, 0x20, PcdDefinition::uint8(3))
            .add_ex_token(SPACE_A, 0x11, PcdDefinition::uint8(4))
            .add_ex_token(SPACE_A, 0x10, PcdDefinition::uint8(5));
        PcdDatabase::new(builder.build().unwrap(), config, StandardReadOnlyVariable::new_uninit()).unwrap()
    }

    fn walk(database: &PcdDatabase<StandardReadOnlyVariable>, guid: Option<&efi::Guid>) -> Vec<usize> {
        let mut tokens = Vec::new();
        let mut token = PCD_INVALID_TOKEN_NUMBER;
        while let Some(next) = database.get_next_token(guid, token).unwrap() {
            tokens.push(next);
            token = next;
        }
        tokens
    }

    #[test]
    fn test_flat_walk_stops_before_ex_tokens() {
        let database = database(PcdConfig::new());
        assert_eq!(walk(&database, None), vec![1, 2, 3]);
        assert_eq!(database.get_next_token(None, 4), Err(Error::TokenNotFound(4)));
        assert_eq!(efi::Status::from(Error::TokenNotFound(4)), efi::Status::NOT_FOUND);
    }

    #[test]
    fn test_ex_walk_is_scoped_to_its_space() {
        let database = database(PcdConfig::new());
        assert_eq!(walk(&database, Some(&SPACE_A)), vec![0x10, 0x11]);
        assert_eq!(walk(&database, Some(&SPACE_B)), vec![0x20]);
        assert_eq!(database.get_next_token(Some(&SPACE_A), 0x20), Err(Error::ExTokenNotFound));
    }

    #[test]
    fn test_unknown_token_space() {
        let database = database(PcdConfig::new());
        let unknown =
            efi::Guid::from_fields(0xFFFFFFFF, 0x0001, 0x0002, 0x03, 0x04, &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0d]);
        assert_eq!(database.get_next_token(Some(&unknown), 0), Err(Error::UnknownTokenSpace));
        assert_eq!(database.get_next_token_space(Some(&unknown)), Err(Error::UnknownTokenSpace));
        // Known to the GUID table, but not a token space.
        assert_eq!(database.get_next_token(Some(&HII_GUID), 0), Err(Error::UnknownTokenSpace));
        assert_eq!(database.get_next_token_space(Some(&HII_GUID)), Err(Error::UnknownTokenSpace));
    }

    #[test]
    fn test_token_space_walk() {
        let database = database(PcdConfig::new());
        let first = database.get_next_token_space(None).unwrap().unwrap();
        let second = database.get_next_token_space(Some(&first)).unwrap().unwrap();
        assert_ne!(first, second);
        assert!([SPACE_A, SPACE_B].contains(&first));
        assert!([SPACE_A, SPACE_B].contains(&second));
        assert_eq!(database.get_next_token_space(Some(&second)).unwrap(), None);
    }

    #[test]
    fn test_no_ex_tokens() {
        let mut builder = PcdDatabaseBuilder::new();
        builder.add_token(PcdDefinition::uint8(1));
        let database =
            PcdDatabase::new(builder.build().unwrap(), PcdConfig::new(), StandardReadOnlyVariable::new_uninit())
                .unwrap();
        assert_eq!(database.get_next_token_space(None).unwrap(), None);
        assert_eq!(database.get_next_token(Some(&SPACE_A), 0).unwrap(), None);
        assert_eq!(database.get_next_token(Some(&SPACE_A), 1), Err(Error::ExTokenNotFound));
    }

    #[test]
    fn test_traverse_disabled() {
        let database = database(PcdConfig::new().with_traverse(false));
        assert_eq!(database.get_next_token(None, 0), Err(Error::Unsupported));
        assert_eq!(database.get_next_token_space(None), Err(Error::Unsupported));
    }

    #[test]
    fn test_ex_disabled_hides_token_spaces() {
        let database = database(PcdConfig::new().with_ex(false));
        assert_eq!(walk(&database, None), vec![1, 2, 3]);
        assert_eq!(database.get_next_token(Some(&SPACE_A), 0), Err(Error::Unsupported));
        assert_eq!(database.get_next_token_space(None), Err(Error::Unsupported));
        assert_eq!(database.get_next_token_space(Some(&SPACE_A)), Err(Error::Unsupported));
    }
}
