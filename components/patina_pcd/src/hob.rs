//! PI HOB list support for publishing and locating the PCD database.
//!
//! Header layouts and HOB type values come from [`mu_pi::hob`]. A physical HOB list handed over by the PEI
//! foundation is walked with the `mu_pi` iterator; HOB lists held in a byte buffer, such as the ones produced by
//! [`HobListBuilder`], are read field by field so that a truncated or corrupt buffer is an error rather than an
//! out-of-bounds access.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::{ffi::c_void, mem::size_of};

use mu_pi::hob::{self, header, GuidHob, Hob, PhaseHandoffInformationTable};
use r_efi::efi;
use scroll::{Pread, Pwrite, LE};

use crate::{
    error::{Error, Result},
    image::{read_guid, write_guid},
};

const HOB_HEADER_SIZE: usize = size_of::<header::Hob>();
const GUID_HOB_SIZE: usize = size_of::<GuidHob>();

/// GUID HOB holding the PCD database image.
// { 0xEA296D92, 0x0B69, 0x423C, { 0x8C, 0x28, 0x33, 0xB4, 0xE0, 0xA9, 0x12, 0x68 } }
pub const PCD_DATABASE_HOB_GUID: efi::Guid =
    efi::Guid::from_fields(0xEA296D92, 0x0B69, 0x423C, 0x8C, 0x28, &[0x33, 0xB4, 0xE0, 0xA9, 0x12, 0x68]);

/// GUID HOB reserving the PEI callback table.
// { 0xC625F4B2, 0xEA09, 0x4675, { 0x82, 0xD7, 0xBA, 0x36, 0x82, 0x15, 0x7A, 0x14 } }
pub const PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID: efi::Guid =
    efi::Guid::from_fields(0xC625F4B2, 0xEA09, 0x4675, 0x82, 0xD7, &[0xBA, 0x36, 0x82, 0x15, 0x7A, 0x14]);

pub const fn align_hob(length: usize) -> usize {
    (length + 7) & !7
}

fn read_header(hob_list: &[u8], mut offset: usize) -> Result<header::Hob> {
    Ok(header::Hob {
        r#type: hob_list.gread_with(&mut offset, LE)?,
        length: hob_list.gread_with(&mut offset, LE)?,
        reserved: hob_list.gread_with(&mut offset, LE)?,
    })
}

fn write_header(dst: &mut [u8], offset: &mut usize, header: &header::Hob) -> Result<()> {
    dst.gwrite_with(header.r#type, offset, LE)?;
    dst.gwrite_with(header.length, offset, LE)?;
    dst.gwrite_with(header.reserved, offset, LE)?;
    Ok(())
}

fn read_guid_hob(hob_list: &[u8], offset: usize) -> Result<GuidHob> {
    let header = read_header(hob_list, offset)?;
    let mut name_offset = offset + HOB_HEADER_SIZE;
    Ok(GuidHob { header, name: read_guid(hob_list, &mut name_offset)? })
}

/// Returns the data of the first GUID extension HOB named `guid` in a HOB list held in `hob_list`
/// (`GetFirstGuidHob`).
///
/// The returned slice spans the whole HOB body and may include alignment padding after the data.
pub fn find_guid_hob_data<'a>(hob_list: &'a [u8], guid: &efi::Guid) -> Result<Option<&'a [u8]>> {
    let mut offset = 0;
    loop {
        let header = read_header(hob_list, offset)?;
        let length = header.length as usize;
        if header.r#type == hob::END_OF_HOB_LIST {
            return Ok(None);
        }
        if length < HOB_HEADER_SIZE {
            return Err(Error::MalformedDatabase("HOB shorter than its header"));
        }

        if header.r#type == hob::GUID_EXTENSION {
            let guid_hob = read_guid_hob(hob_list, offset)?;
            if guid_hob.name == *guid {
                let data_len = length
                    .checked_sub(GUID_HOB_SIZE)
                    .ok_or(Error::MalformedDatabase("GUID HOB shorter than its header"))?;
                let data: &[u8] = hob_list.pread_with(offset + GUID_HOB_SIZE, data_len)?;
                return Ok(Some(data));
            }
        }

        offset += align_hob(length);
    }
}

/// Copies the data of the first GUID extension HOB named `guid` out of the physical HOB list.
///
/// # Safety
///
/// `physical_hob_list` must be null or point at a PI HOB list that starts with the PHIT HOB and is terminated by an
/// end-of-HOB-list entry.
pub unsafe fn copy_guid_hob_data(physical_hob_list: *const c_void, guid: &efi::Guid) -> Option<Vec<u8>> {
    // SAFETY: The caller guarantees a null pointer or a HOB list starting with the PHIT HOB.
    let hob_list_info = unsafe { (physical_hob_list as *const PhaseHandoffInformationTable).as_ref() }?;
    let hob_list = Hob::Handoff(hob_list_info);
    for hob in &hob_list {
        if let Hob::GuidHob(guid_hob, data) = hob {
            if guid_hob.name == *guid {
                return Some(data.to_vec());
            }
        }
    }
    None
}

/// Appends HOBs to a HOB list under construction.
#[derive(Debug, Default, Clone)]
pub struct HobListBuilder {
    bytes: Vec<u8>,
}

impl HobListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a GUID extension HOB carrying `data` (`BuildGuidDataHob`).
    pub fn add_guid_hob(&mut self, guid: &efi::Guid, data: &[u8]) -> Result<&mut Self> {
        let length = align_hob(GUID_HOB_SIZE + data.len());
        let guid_hob = GuidHob {
            header: header::Hob {
                r#type: hob::GUID_EXTENSION,
                length: u16::try_from(length).map_err(|_| Error::InvalidConfig("GUID HOB exceeds the 16-bit length"))?,
                reserved: 0,
            },
            name: *guid,
        };

        let start = self.bytes.len();
        self.bytes.resize(start + length, 0);
        let hob = &mut self.bytes[start..];
        let mut offset = 0;
        write_header(hob, &mut offset, &guid_hob.header)?;
        write_guid(hob, &guid_hob.name, &mut offset)?;
        hob[offset..offset + data.len()].copy_from_slice(data);
        Ok(self)
    }

    /// Terminates the list.
    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.extend_from_slice(&hob::END_OF_HOB_LIST.to_le_bytes());
        self.bytes.extend_from_slice(&(HOB_HEADER_SIZE as u16).to_le_bytes());
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER_GUID: efi::Guid =
        efi::Guid::from_fields(0x01020304, 0x0506, 0x0708, 0x09, 0x0a, &[0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10]);

    /// Copies a HOB list into 8-byte aligned storage, as HOB lists are in memory.
    fn aligned(hob_list: &[u8]) -> Vec<u64> {
        hob_list.chunks_exact(8).map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap())).collect()
    }

    #[test]
    fn test_layout_matches_pi_headers() {
        assert_eq!(HOB_HEADER_SIZE, 8);
        assert_eq!(GUID_HOB_SIZE, 24);
    }

    #[test]
    fn test_find_guid_hob_skips_other_hobs() {
        let mut builder = HobListBuilder::new();
        builder.add_guid_hob(&OTHER_GUID, &[1, 2, 3]).unwrap().add_guid_hob(&PCD_DATABASE_HOB_GUID, &[9; 8]).unwrap();
        let hob_list = builder.finish();

        assert_eq!(find_guid_hob_data(&hob_list, &PCD_DATABASE_HOB_GUID).unwrap(), Some(&[9u8; 8][..]));
        // Data is padded to the HOB alignment.
        assert_eq!(find_guid_hob_data(&hob_list, &OTHER_GUID).unwrap().unwrap().len(), 8);
        assert_eq!(find_guid_hob_data(&hob_list, &PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID).unwrap(), None);
    }

    #[test]
    fn test_hob_lengths_are_aligned() {
        let mut builder = HobListBuilder::new();
        builder.add_guid_hob(&OTHER_GUID, &[0xAA; 5]).unwrap();
        let hob_list = builder.finish();

        let guid_hob = read_guid_hob(&hob_list, 0).unwrap();
        assert_eq!(guid_hob.header.r#type, hob::GUID_EXTENSION);
        assert_eq!(guid_hob.header.length, 32);
        assert_eq!(guid_hob.name, OTHER_GUID);
        let end = read_header(&hob_list, 32).unwrap();
        assert_eq!(end.r#type, hob::END_OF_HOB_LIST);
        assert_eq!(end.length, 8);
        assert_eq!(hob_list.len(), 40);
    }

    #[test]
    fn test_unterminated_list_is_an_error() {
        let mut builder = HobListBuilder::new();
        builder.add_guid_hob(&OTHER_GUID, &[]).unwrap();
        let mut hob_list = builder.finish();
        hob_list.truncate(24);
        assert!(matches!(find_guid_hob_data(&hob_list, &PCD_DATABASE_HOB_GUID), Err(Error::MalformedDatabase(_))));
    }

    #[test]
    fn test_zero_length_hob_is_an_error() {
        let mut hob_list = [0u8; 16];
        write_header(&mut hob_list, &mut 0, &header::Hob { r#type: hob::CPU, length: 0, reserved: 0 }).unwrap();
        assert!(find_guid_hob_data(&hob_list, &PCD_DATABASE_HOB_GUID).is_err());
    }

    #[test]
    fn test_oversized_hob_rejected() {
        let mut builder = HobListBuilder::new();
        assert!(builder.add_guid_hob(&OTHER_GUID, &[0; 0x10000]).is_err());
    }

    #[test]
    fn test_copy_from_physical_hob_list() {
        let mut builder = HobListBuilder::new();
        builder
            .add_guid_hob(&OTHER_GUID, &[0x5A; 64])
            .unwrap()
            .add_guid_hob(&PCD_DATABASE_HOB_GUID, &[1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        let hob_list = aligned(&builder.finish());
        let physical_hob_list = hob_list.as_ptr() as *const c_void;

        let data = unsafe { copy_guid_hob_data(physical_hob_list, &PCD_DATABASE_HOB_GUID) };
        assert_eq!(data, Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        let data = unsafe { copy_guid_hob_data(physical_hob_list, &OTHER_GUID) };
        assert_eq!(data, Some(vec![0x5A; 64]));
        assert_eq!(unsafe { copy_guid_hob_data(physical_hob_list, &PCD_PEI_CALLBACK_FN_TABLE_HOB_GUID) }, None);
        assert_eq!(unsafe { copy_guid_hob_data(core::ptr::null(), &PCD_DATABASE_HOB_GUID) }, None);
    }
}
