//! Human readable dump of a PCD database image, for use in the standard environment.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::io::{self, Write};

use r_efi::efi;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    image::{PcdImage, StringHead, VariableHead, VpdHead},
    size_table, sku,
    token::{DatumType, LocalToken, StorageKind},
};

fn invalid_data(error: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Registry format: `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub fn format_guid(guid: &efi::Guid) -> String {
    Uuid::from_bytes_le(*guid.as_bytes()).to_string()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

fn kind_name(kind: StorageKind) -> &'static str {
    match kind {
        StorageKind::Data => "DATA",
        StorageKind::String => "STRING",
        StorageKind::Vpd => "VPD",
        StorageKind::Hii => "HII",
    }
}

fn datum_name(datum: DatumType) -> &'static str {
    match datum {
        DatumType::Pointer => "VOID*",
        DatumType::Uint8 => "UINT8",
        DatumType::Uint16 => "UINT16",
        DatumType::Uint32 => "UINT32",
        DatumType::Uint64 => "UINT64",
    }
}

/// Dumper for a database image.
pub struct PcdDump {
    image: PcdImage,
}

impl PcdDump {
    /// Validates `data` as a database image.
    pub fn open(data: &[u8]) -> Result<Self> {
        Ok(Self { image: PcdImage::parse(data.to_vec())? })
    }

    pub fn write_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{:#x?}", self.image.header())
    }

    /// Writes one line per local token, showing the row of the system SKU recorded in the image.
    pub fn write_tokens<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let nex = self.image.nex_token_count();
        for (index, token) in self.image.local_tokens().iter().enumerate() {
            let size = self.size(index, token).map_err(invalid_data)?;
            let value = self.describe(index, token, size).map_err(invalid_data)?;
            writeln!(
                out,
                "{:>5} {} {:<6} {:<6} size={:<4} {}{}",
                index + 1,
                if index < nex { "    " } else { " ex " },
                kind_name(token.kind),
                datum_name(token.datum),
                size,
                if token.sku_enabled { "[sku] " } else { "" },
                value
            )?;
        }
        Ok(())
    }

    /// Writes the Dynamic-Ex token spaces in the order of the Ex mapping table.
    pub fn write_token_spaces<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let guids = self.image.guids();
        for entry in self.image.ex_map() {
            let guid = guids
                .get(entry.ex_guid_index as usize)
                .ok_or_else(|| invalid_data(Error::MalformedDatabase("Ex mapping names an unknown GUID")))?;
            writeln!(out, "{} {:#010x} -> token {}", format_guid(guid), entry.ex_token_number, entry.token_number())?;
        }
        Ok(())
    }

    pub fn write_all<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.write_header(out)?;
        writeln!(out, "Tokens:")?;
        self.write_tokens(out)?;
        writeln!(out, "Token spaces:")?;
        self.write_token_spaces(out)
    }

    fn size(&self, index: usize, token: &LocalToken) -> Result<usize> {
        match token.datum.size() {
            0 => size_table::ptr_type_size(&self.image, index),
            size => Ok(size),
        }
    }

    fn describe(&self, index: usize, token: &LocalToken, size: usize) -> Result<String> {
        let stride = match token.datum.size() {
            0 => size_table::max_size(&self.image, index)?,
            size => size,
        };
        let token = sku::resolve(&self.image, *token, stride)?;

        Ok(match token.kind {
            StorageKind::Data => hex(self.image.slice(token.offset, size)?),
            StorageKind::String => {
                let string_index: StringHead = self.image.read(token.offset)?;
                let offset = self.image.string_offset(string_index, size)?;
                format!("string[{string_index}] {}", hex(self.image.slice(offset, size)?))
            }
            StorageKind::Vpd => {
                let head: VpdHead = self.image.read(token.offset)?;
                format!("vpd+{:#x}", head.offset)
            }
            StorageKind::Hii => {
                let head: VariableHead = self.image.read(token.offset)?;
                let guid = self
                    .image
                    .guids()
                    .get(head.guid_table_index as usize)
                    .ok_or(Error::MalformedDatabase("HII variable GUID outside of the GUID table"))?;
                let mut name = self.image.utf16_string(head.string_index)?;
                name.pop();
                format!(
                    "{}:{}+{:#x} default {}",
                    format_guid(guid),
                    String::from_utf16_lossy(&name),
                    head.offset,
                    hex(self.image.slice(head.default_value_offset as usize, size)?)
                )
            }
        })
    }
}
