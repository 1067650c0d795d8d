//! PEI Platform Configuration Database (PCD) Service
//!
//! This crate implements the PEI phase PCD service: typed get and set access to the dynamic configuration values of
//! a platform, stored in a build-time database image.
//!
//! Tokens are addressed either by their number in the flat namespace or, for Dynamic-Ex tokens, by a token space GUID
//! and a token number within that space. Each token is backed by one of four stores:
//!
//! - the database image itself,
//! - the shared string table of the image,
//! - the read-only VPD region of the flash image,
//! - a UEFI variable read through the Read-Only Variable 2 PPI (HII tokens), falling back to a default value.
//!
//! SKU-enabled tokens hold one value per SKU and resolve to the row of the active system SKU. Callbacks registered
//! on a token run before every set of that token.
//!
//! ## Examples and Usage
//!
//! The database is published once per boot as a GUID HOB, then loaded by the service and wrapped in a
//! [`PcdService`] implementing [`PcdPpi`]:
//!
//! ```
//! use patina_pcd::{
//!     build_pcd_database,
//!     builder::{PcdDatabaseBuilder, PcdDefinition},
//!     hob::HobListBuilder,
//!     PcdConfig, PcdDatabase, PcdPpi, PcdService,
//! };
//! use patina_read_only_variable::StandardReadOnlyVariable;
//!
//! let mut builder = PcdDatabaseBuilder::new();
//! let token = builder.add_token(PcdDefinition::uint32(0xDEADBEEF));
//! let image = builder.build().unwrap();
//!
//! let config = PcdConfig::new();
//! let mut hob_list = HobListBuilder::new();
//! build_pcd_database(&mut hob_list, &image, &config).unwrap();
//! let hob_list = hob_list.finish();
//!
//! let database = PcdDatabase::from_hob_list(&hob_list, config, StandardReadOnlyVariable::new_uninit()).unwrap();
//! let pcd = PcdService::new(database);
//!
//! assert_eq!(pcd.get32(token).unwrap(), 0xDEADBEEF);
//! pcd.set32(token, 0x1).unwrap();
//! assert_eq!(pcd.get32(token).unwrap(), 0x1);
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod builder;
pub mod callback;
pub mod config;
pub mod error;
pub mod hob;
pub mod image;
pub mod ppi;
pub mod token;

#[cfg(feature = "std")]
pub mod dump;

mod database;
mod enumeration;
mod size_table;
mod sku;
mod worker;

pub use callback::PcdCallback;
pub use config::PcdConfig;
pub use database::{build_pcd_database, PcdDatabase};
pub use error::{Error, Result};
pub use ppi::{PcdPpi, PcdService, PCD_PPI_GUID};
