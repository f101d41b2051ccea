// elf.rs — side-loader for 32-bit MIPS ELF executables.
// A test aid: loadable segments are copied straight into EE RAM and the
// entry point handed back, so a driver can redirect the EE there after the
// kernel's first ERET instead of booting from a disc.

use crate::CoreError;

const PT_LOAD: u32 = 1;
const EM_MIPS: u16 = 8;

fn read_u16(image: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(image.get(offset..offset + 2)?.try_into().ok()?))
}

fn read_u32(image: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(image.get(offset..offset + 4)?.try_into().ok()?))
}

/// Copy every PT_LOAD segment of `image` into `ram`, returning the entry
/// point. The RAM slice is the 32 MiB EE main memory.
pub fn load(ram: &mut [u8], image: &[u8]) -> Result<u32, CoreError> {
    if image.len() < 0x34 || &image[0..4] != b"\x7fELF" {
        return Err(CoreError::BadElf("missing ELF magic"));
    }
    // Class 1 (32-bit), data 1 (little-endian), machine MIPS.
    if image[4] != 1 || image[5] != 1 {
        return Err(CoreError::BadElf("not a 32-bit little-endian image"));
    }
    if read_u16(image, 0x12) != Some(EM_MIPS) {
        return Err(CoreError::BadElf("not a MIPS executable"));
    }

    let entry = read_u32(image, 0x18).ok_or(CoreError::BadElf("truncated header"))?;
    let phoff = read_u32(image, 0x1c).ok_or(CoreError::BadElf("truncated header"))? as usize;
    let phentsize =
        read_u16(image, 0x2a).ok_or(CoreError::BadElf("truncated header"))? as usize;
    let phnum = read_u16(image, 0x2c).ok_or(CoreError::BadElf("truncated header"))? as usize;

    for i in 0..phnum {
        let ph = phoff + i * phentsize;
        let p_type = read_u32(image, ph).ok_or(CoreError::BadElf("truncated program header"))?;
        if p_type != PT_LOAD {
            continue;
        }

        let p_offset =
            read_u32(image, ph + 4).ok_or(CoreError::BadElf("truncated program header"))? as usize;
        let p_vaddr =
            read_u32(image, ph + 8).ok_or(CoreError::BadElf("truncated program header"))?;
        let p_filesz =
            read_u32(image, ph + 16).ok_or(CoreError::BadElf("truncated program header"))? as usize;
        let p_memsz =
            read_u32(image, ph + 20).ok_or(CoreError::BadElf("truncated program header"))? as usize;

        let dest = (p_vaddr & 0x1fff_ffff) as usize;
        if dest + p_memsz > ram.len() || p_offset + p_filesz > image.len() || p_filesz > p_memsz {
            return Err(CoreError::ElfSegmentBounds { vaddr: p_vaddr, size: p_memsz });
        }

        ram[dest..dest + p_filesz].copy_from_slice(&image[p_offset..p_offset + p_filesz]);
        // BSS tail.
        ram[dest + p_filesz..dest + p_memsz].fill(0);

        log::debug!(
            "[ELF] segment {:#010x} filesz {:#x} memsz {:#x}",
            p_vaddr,
            p_filesz,
            p_memsz
        );
    }

    log::info!("[ELF] loaded, entry {:#010x}", entry);
    Ok(entry)
}
