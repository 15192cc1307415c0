//! Minimal PE32+ image writer
//!
//! One `.text` section, no imports and no relocations. The image is loaded
//! at its fixed preferred base.
//!
//! ```text
//! 0x000  MS-DOS header + stub
//! 0x080  "PE\0\0" | COFF header | optional header | .text section header
//! 0x400  .text (padded to the file alignment)
//! ```

use object::pe;

pub const IMAGE_BASE: u64 = 0x1_4000_0000;
pub const ALIGNMENT: u32 = 0x200;
pub const HEADERS_SIZE: u32 = 0x400;
/// RVA and file offset of `.text`
pub const TEXT_START: u32 = HEADERS_SIZE;

const PE_HEADER_OFFSET: usize = 0x80;
const OPTIONAL_HEADER_SIZE: u16 = 112 + 8 * pe::IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u16;

/// `mov ax, 4C01h; int 21h`
const DOS_STUB: [u8; 5] = [0xB8, 0x01, 0x4C, 0xCD, 0x21];

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

fn wr_u16le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn wr_u32le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn wr_u64le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Builds an executable whose entry point is `entry_offset` bytes into `code`
pub fn write_pe(code: &[u8], entry_offset: usize) -> Vec<u8> {
    let code_size = code.len() as u32;
    let raw_size = align_up(code_size.max(1), ALIGNMENT);
    let mut out = Vec::with_capacity((HEADERS_SIZE + raw_size) as usize);

    // MS-DOS header: only the magic and e_lfanew matter
    wr_u16le(&mut out, pe::IMAGE_DOS_SIGNATURE);
    out.resize(0x3C, 0);
    wr_u32le(&mut out, PE_HEADER_OFFSET as u32);
    out.extend_from_slice(&DOS_STUB);
    out.resize(PE_HEADER_OFFSET, 0);

    wr_u32le(&mut out, pe::IMAGE_NT_SIGNATURE);

    // COFF file header
    wr_u16le(&mut out, pe::IMAGE_FILE_MACHINE_AMD64);
    wr_u16le(&mut out, 1);
    wr_u32le(&mut out, 0); // timestamp
    wr_u32le(&mut out, 0); // symbol table
    wr_u32le(&mut out, 0); // symbol count
    wr_u16le(&mut out, OPTIONAL_HEADER_SIZE);
    wr_u16le(
        &mut out,
        pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE | pe::IMAGE_FILE_RELOCS_STRIPPED,
    );

    // Optional header
    let optional_start = out.len();
    wr_u16le(&mut out, pe::IMAGE_NT_OPTIONAL_HDR64_MAGIC);
    out.extend_from_slice(&[0, 0]); // linker version
    wr_u32le(&mut out, raw_size); // size of code
    wr_u32le(&mut out, 0); // initialized data
    wr_u32le(&mut out, 0); // uninitialized data
    wr_u32le(&mut out, TEXT_START + entry_offset as u32);
    wr_u32le(&mut out, TEXT_START); // base of code
    wr_u64le(&mut out, IMAGE_BASE);
    wr_u32le(&mut out, ALIGNMENT); // section alignment
    wr_u32le(&mut out, ALIGNMENT); // file alignment
    wr_u16le(&mut out, 6); // operating system version
    wr_u16le(&mut out, 0);
    wr_u16le(&mut out, 0); // image version
    wr_u16le(&mut out, 0);
    wr_u16le(&mut out, 6); // subsystem version
    wr_u16le(&mut out, 0);
    wr_u32le(&mut out, 0); // win32 version
    wr_u32le(&mut out, HEADERS_SIZE + raw_size); // size of image
    wr_u32le(&mut out, HEADERS_SIZE);
    wr_u32le(&mut out, 0); // checksum
    wr_u16le(&mut out, pe::IMAGE_SUBSYSTEM_WINDOWS_CUI);
    wr_u16le(&mut out, pe::IMAGE_DLLCHARACTERISTICS_NX_COMPAT);
    wr_u64le(&mut out, 0x10_0000); // stack reserve
    wr_u64le(&mut out, 0x1000); // stack commit
    wr_u64le(&mut out, 0x10_0000); // heap reserve
    wr_u64le(&mut out, 0x1000); // heap commit
    wr_u32le(&mut out, 0); // loader flags
    wr_u32le(&mut out, pe::IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u32);
    out.resize(optional_start + OPTIONAL_HEADER_SIZE as usize, 0);

    // .text section header
    out.extend_from_slice(b".text\0\0\0");
    wr_u32le(&mut out, code_size); // virtual size
    wr_u32le(&mut out, TEXT_START); // virtual address
    wr_u32le(&mut out, raw_size);
    wr_u32le(&mut out, TEXT_START); // raw data pointer
    wr_u32le(&mut out, 0); // relocations
    wr_u32le(&mut out, 0); // line numbers
    wr_u16le(&mut out, 0);
    wr_u16le(&mut out, 0);
    wr_u32le(
        &mut out,
        pe::IMAGE_SCN_CNT_CODE | pe::IMAGE_SCN_MEM_EXECUTE | pe::IMAGE_SCN_MEM_READ,
    );

    out.resize(HEADERS_SIZE as usize, 0);
    out.extend_from_slice(code);
    out.resize((HEADERS_SIZE + raw_size) as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::read::pe::PeFile64;
    use object::{LittleEndian as LE, Object, ObjectSection};

    #[test]
    fn test_image_layout() {
        let code = [0xCC, 0xCC, 0x48, 0xC7, 0xC0, 0x2A, 0, 0, 0, 0xC3];
        let image = write_pe(&code, 2);

        assert_eq!(&image[..2], b"MZ");
        assert_eq!(&image[0x40..0x45], &DOS_STUB);
        assert_eq!(&image[0x80..0x84], b"PE\0\0");
        assert_eq!(image.len(), 0x600);
        assert_eq!(&image[0x400..0x400 + code.len()], &code);
    }

    #[test]
    fn test_object_reads_the_image() {
        let code = [0xC3; 700];
        let image = write_pe(&code, 16);
        let file = PeFile64::parse(&*image).unwrap();

        let optional = &file.nt_headers().optional_header;
        assert_eq!(optional.address_of_entry_point.get(LE), 0x410);
        assert_eq!(optional.image_base.get(LE), IMAGE_BASE);
        assert_eq!(optional.size_of_headers.get(LE), 0x400);
        assert_eq!(optional.size_of_image.get(LE), 0x400 + 0x400);
        assert_eq!(optional.subsystem.get(LE), pe::IMAGE_SUBSYSTEM_WINDOWS_CUI);
        assert_eq!(file.nt_headers().file_header.machine.get(LE), pe::IMAGE_FILE_MACHINE_AMD64);

        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.address(), IMAGE_BASE + 0x400);
        assert!(text.data().unwrap().starts_with(&code));
        assert_eq!(file.sections().count(), 1);
    }
}
