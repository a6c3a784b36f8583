//! ELF32 program-header loader (§4.C).
//!
//! Only loadable (`PT_LOAD`) program headers contribute bytes: each is
//! emitted as a [`Segment`], zero-filled to `p_memsz` when `p_filesz` is
//! smaller. This is exactly what `object`'s `Object::segments()` yields for
//! an ELF file, so the loader is a thin adapter rather than a hand-rolled
//! program-header walk.

use object::elf::ELFCLASS32;
use object::{Object, ObjectSegment};

use crate::error::ParseError;
use crate::segment::Segment;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Parse an ELF32 image and return one [`Segment`] per loadable program
/// header, loaded at its physical address and zero-filled to `p_memsz`
/// (§4.C).
pub fn parse(data: &[u8]) -> Result<Vec<Segment>, ParseError> {
    if data.len() < 4 || data[0..4] != ELF_MAGIC {
        return Err(ParseError::NotElf);
    }
    if data.len() < 5 || data[4] != ELFCLASS32 {
        return Err(ParseError::NotElf32);
    }

    let file = object::File::parse(data).map_err(|_| ParseError::Truncated)?;

    let mut segments = Vec::new();
    for segment in file.segments() {
        let addr = segment.address() as u32;
        let memsz = segment.size() as usize;
        if memsz == 0 {
            continue;
        }

        let file_bytes = segment.data().map_err(|_| ParseError::Truncated)?;

        let mut bytes = vec![0u8; memsz];
        if file_bytes.len() > memsz {
            return Err(ParseError::Truncated);
        }
        bytes[..file_bytes.len()].copy_from_slice(file_bytes);

        segments.push(Segment::new(addr, bytes));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build_minimal_elf(p_paddr: u32, p_filesz: u32, p_memsz: u32, file_data: &[u8]) -> Vec<u8> {
        // A hand-rolled minimal ELF32 LE header + one PT_LOAD program
        // header + data, just enough for `object`'s reader to walk it.
        const EHDR_SIZE: u16 = 52;
        const PHDR_SIZE: u16 = 32;
        const PT_LOAD: u32 = 1;
        let data_offset = (EHDR_SIZE + PHDR_SIZE) as u32;

        let mut out = Vec::new();
        out.extend_from_slice(&ELF_MAGIC); // e_ident[0..4]
        out.push(1); // EI_CLASS: ELFCLASS32
        out.push(1); // EI_DATA: ELFDATA2LSB
        out.push(1); // EI_VERSION
        out.extend_from_slice(&[0u8; 9]); // EI_PAD
        out.extend_from_slice(&2u16.to_le_bytes()); // e_type: ET_EXEC
        out.extend_from_slice(&40u16.to_le_bytes()); // e_machine: ARM
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u32.to_le_bytes()); // e_entry
        out.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&PHDR_SIZE.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), EHDR_SIZE as usize);

        out.extend_from_slice(&PT_LOAD.to_le_bytes()); // p_type
        out.extend_from_slice(&data_offset.to_le_bytes()); // p_offset
        out.extend_from_slice(&p_paddr.to_le_bytes()); // p_vaddr
        out.extend_from_slice(&p_paddr.to_le_bytes()); // p_paddr
        out.extend_from_slice(&p_filesz.to_le_bytes()); // p_filesz
        out.extend_from_slice(&p_memsz.to_le_bytes()); // p_memsz
        out.extend_from_slice(&5u32.to_le_bytes()); // p_flags: R+X
        out.extend_from_slice(&4u32.to_le_bytes()); // p_align
        assert_eq!(out.len() - EHDR_SIZE as usize, PHDR_SIZE as usize);

        out.extend_from_slice(file_data);
        out
    }

    #[test]
    fn rejects_non_elf() {
        assert_eq!(parse(b"not an elf file"), Err(ParseError::NotElf));
    }

    #[test]
    fn partial_filesz_zero_fills_to_memsz() {
        let data = build_minimal_elf(0x1000_0000, 4, 16, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let segments = parse(&data).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].first(), 0x1000_0000);
        assert_eq!(segments[0].last(), 0x1000_000F);
        let mut expected = vec![0xDE, 0xAD, 0xBE, 0xEF];
        expected.extend(std::iter::repeat(0u8).take(12));
        assert_eq!(segments[0].data(), expected.as_slice());
    }

    #[test]
    fn fully_loaded_segment_round_trips_bytes() {
        let payload = vec![0xAA; 32];
        let data = build_minimal_elf(0x0800_0000, 32, 32, &payload);
        let segments = parse(&data).unwrap();
        assert_eq!(segments[0].data(), payload.as_slice());
    }
}
