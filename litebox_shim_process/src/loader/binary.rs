// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Binary header sniffing
//!
//! Recognises:
//! - PE images (`MZ` stub followed by `PE\0\0`), split into executables and DLLs
//! - NE (16-bit Windows) and LE/LX (OS/2, VxD) images
//! - plain DOS executables
//! - ELF images
//! - `#!` scripts

use std::io::{self, Read, Seek, SeekFrom};

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// DOS header magic number "MZ"
pub const DOS_SIGNATURE: u16 = 0x5A4D;
/// PE signature "PE\0\0"
pub const PE_SIGNATURE: u32 = 0x0000_4550;
/// NE signature "NE"
pub const NE_SIGNATURE: u16 = 0x454E;
/// LE signature "LE"
pub const LE_SIGNATURE: u16 = 0x454C;
/// LX signature "LX"
pub const LX_SIGNATURE: u16 = 0x584C;

/// IMAGE_FILE_DLL characteristic bit
pub const IMAGE_FILE_DLL: u16 = 0x2000;

pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014C;
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
pub const IMAGE_FILE_MACHINE_ARM64: u16 = 0xAA64;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

/// NE target OS value for OS/2 images
const NE_OS_OS2: u8 = 1;

/// Longest `#!` line looked at
const MAX_SHEBANG: usize = 256;

/// DOS header, only the fields the sniffer reads are named
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct DosHeader {
    pub e_magic: U16,
    pub _unused: [u8; 22],
    /// Offset of the relocation table; below 0x40 means a plain DOS image
    pub e_lfarlc: U16,
    pub _reserved: [u8; 34],
    /// Offset of the new-style header
    pub e_lfanew: U32,
}

/// PE signature plus COFF file header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PeHeader {
    pub signature: U32,
    pub machine: U16,
    pub number_of_sections: U16,
    pub time_date_stamp: U32,
    pub pointer_to_symbol_table: U32,
    pub number_of_symbols: U32,
    pub size_of_optional_header: U16,
    pub characteristics: U16,
}

/// Leading part of an NE header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct NeHeader {
    pub ne_magic: U16,
    pub _unused: [u8; 52],
    pub ne_exetyp: u8,
    pub ne_flagsothers: u8,
}

/// Leading part of an ELF header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct ElfIdent {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub _pad: [u8; 9],
    pub e_type: U16,
}

/// Recognised binary formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    /// PE executable for the given machine
    PeExe { machine: u16 },
    /// PE dynamic-link library
    PeDll,
    /// 16-bit Windows (NE)
    Win16,
    /// Plain MZ executable
    Dos,
    /// OS/2 or VxD (LE/LX, or NE targeting OS/2)
    Os2,
    /// ELF image; `executable` is false for relocatable objects and cores
    Elf { executable: bool },
}

impl BinaryType {
    /// Will the VDM host this image?
    pub fn needs_vdm(self) -> bool {
        matches!(self, BinaryType::Win16 | BinaryType::Dos)
    }
}

/// Result of sniffing a file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    Binary(BinaryType),
    /// `#!` script with its interpreter line (program and optional argument)
    Script { interpreter: String },
    Unknown,
}

/// Read until `buf` is full or EOF, returning the count read
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Identify the image behind `reader`.
///
/// Reads from the current position, which should be the start of the file.
/// Short files are reported as [`Sniffed::Unknown`], only real I/O errors
/// are returned.
pub fn sniff<R: Read + Seek>(reader: &mut R) -> io::Result<Sniffed> {
    let mut head = [0u8; MAX_SHEBANG];
    let len = read_up_to(reader, &mut head)?;
    let head = &head[..len];

    if head.starts_with(b"#!") {
        return Ok(sniff_script(head));
    }

    if let Ok((elf, _)) = ElfIdent::read_from_prefix(head) {
        if elf.magic == ELF_MAGIC {
            let e_type = elf.e_type.get();
            return Ok(Sniffed::Binary(BinaryType::Elf {
                executable: e_type == ET_EXEC || e_type == ET_DYN,
            }));
        }
    }

    let Ok((dos, _)) = DosHeader::read_from_prefix(head) else {
        return Ok(Sniffed::Unknown);
    };
    if dos.e_magic.get() != DOS_SIGNATURE {
        return Ok(Sniffed::Unknown);
    }
    if dos.e_lfarlc.get() < 0x40 {
        return Ok(Sniffed::Binary(BinaryType::Dos));
    }

    reader.seek(SeekFrom::Start(u64::from(dos.e_lfanew.get())))?;
    let mut new_header = [0u8; core::mem::size_of::<NeHeader>()];
    let len = read_up_to(reader, &mut new_header)?;
    let new_header = &new_header[..len];

    Ok(Sniffed::Binary(classify_new_header(new_header)))
}

/// [`sniff`] over an in-memory header
pub fn sniff_bytes(data: &[u8]) -> Sniffed {
    sniff(&mut io::Cursor::new(data)).unwrap_or(Sniffed::Unknown)
}

fn classify_new_header(header: &[u8]) -> BinaryType {
    if let Ok((pe, _)) = PeHeader::read_from_prefix(header) {
        if pe.signature.get() == PE_SIGNATURE {
            if pe.characteristics.get() & IMAGE_FILE_DLL != 0 {
                return BinaryType::PeDll;
            }
            return BinaryType::PeExe {
                machine: pe.machine.get(),
            };
        }
    }

    let Ok((sig, _)) = U16::read_from_prefix(header) else {
        return BinaryType::Dos;
    };
    match sig.get() {
        NE_SIGNATURE => match NeHeader::read_from_prefix(header) {
            Ok((ne, _)) if ne.ne_exetyp == NE_OS_OS2 => BinaryType::Os2,
            _ => BinaryType::Win16,
        },
        LE_SIGNATURE | LX_SIGNATURE => BinaryType::Os2,
        _ => BinaryType::Dos,
    }
}

fn sniff_script(head: &[u8]) -> Sniffed {
    let line = &head[2..];
    let line = line.split(|&b| b == b'\n').next().unwrap_or(line);
    let interpreter = String::from_utf8_lossy(line).trim().to_string();
    if interpreter.is_empty() {
        Sniffed::Unknown
    } else {
        Sniffed::Script { interpreter }
    }
}
