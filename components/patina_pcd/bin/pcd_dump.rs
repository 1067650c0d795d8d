//! Executable for dumping PCD database images.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use clap::Parser;
use patina_pcd::dump::PcdDump;
use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

#[derive(Parser, Debug)]
struct Args {
    /// Path for the input file containing the raw PCD database image.
    input_path: PathBuf,
    /// Optional path for the output file. If not specified, the output will be printed to stdout.
    #[arg(short, long)]
    output_path: Option<PathBuf>,
    /// Only print the database header.
    #[arg(long, default_value_t = false)]
    header_only: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let mut file = File::open(Path::new(&args.input_path))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let dump = PcdDump::open(&buffer).map_err(|e| {
        eprintln!("Error opening PCD database: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e)
    })?;

    match args.output_path {
        Some(path) => write_dump(args.header_only, &dump, &mut File::create(path)?),
        None => write_dump(args.header_only, &dump, &mut io::stdout()),
    }
}

fn write_dump<W: Write>(header_only: bool, dump: &PcdDump, out: &mut W) -> io::Result<()> {
    if header_only {
        dump.write_header(out)
    } else {
        dump.write_all(out)
    }
}
