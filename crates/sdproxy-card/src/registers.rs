//! Contents of the card's identification and configuration registers.

use sdproxy_crc::crc7;

/// OCR bit 31: power-up finished.
pub const OCR_POWERED_UP: u32 = 1 << 31;
/// OCR bit 30: card capacity status (block addressed).
pub const OCR_HIGH_CAPACITY: u32 = 1 << 30;
/// Supported supply voltages, 2.7 V to 3.6 V.
pub const OCR_VOLTAGE_WINDOW: u32 = 0x00ff_8000;

pub const CID_LEN: usize = 16;
pub const CSD_LEN: usize = 16;
pub const SCR_LEN: usize = 8;
pub const SD_STATUS_LEN: usize = 64;

/// Fields of the CID register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardIdentity {
    pub manufacturer_id: u8,
    pub oem_id: [u8; 2],
    pub product_name: [u8; 5],
    pub revision: u8,
    pub serial: u32,
    pub year: u16,
    pub month: u8,
}

impl Default for CardIdentity {
    fn default() -> Self {
        Self {
            manufacturer_id: 0x1d,
            oem_id: *b"SP",
            product_name: *b"PROXY",
            revision: 0x10,
            serial: 0x0000_0001,
            year: 2024,
            month: 1,
        }
    }
}

fn seal(mut register: [u8; 16]) -> [u8; 16] {
    register[15] = crc7(&register[..15]) << 1 | 1;
    register
}

pub fn cid(identity: &CardIdentity) -> [u8; CID_LEN] {
    let mut cid = [0u8; CID_LEN];
    cid[0] = identity.manufacturer_id;
    cid[1..3].copy_from_slice(&identity.oem_id);
    cid[3..8].copy_from_slice(&identity.product_name);
    cid[8] = identity.revision;
    cid[9..13].copy_from_slice(&identity.serial.to_be_bytes());
    let date = (identity.year.saturating_sub(2000).min(0xff) << 4) | u16::from(identity.month & 0xf);
    cid[13..15].copy_from_slice(&(date & 0x0fff).to_be_bytes());
    seal(cid)
}

/// C_SIZE of a version 2.0 CSD. Capacity is `(C_SIZE + 1) * 512 KiB`, so images are rounded
/// down to a multiple of 1024 sectors.
pub fn csd_c_size(sectors: u64) -> u32 {
    ((sectors / 1024).saturating_sub(1)).min(0x3f_ffff) as u32
}

/// Version 2.0 (SDHC) CSD for an image of `sectors` sectors, temporarily write protected.
pub fn csd(sectors: u64) -> [u8; CSD_LEN] {
    let c_size = csd_c_size(sectors);
    seal([
        0x40, // CSD_STRUCTURE = 1
        0x0e, // TAAC: 1 ms
        0x00, // NSAC
        0x32, // TRAN_SPEED: 25 MHz
        0x5b, // CCC[11:4]
        0x59, // CCC[3:0], READ_BL_LEN = 9
        0x00,
        (c_size >> 16) as u8 & 0x3f,
        (c_size >> 8) as u8,
        c_size as u8,
        0x7f, // ERASE_BLK_EN, SECTOR_SIZE[6:1]
        0x80, // SECTOR_SIZE[0]
        0x0a, // R2W_FACTOR = 2, WRITE_BL_LEN[3:2]
        0x40, // WRITE_BL_LEN[1:0]
        0x10, // TMP_WRITE_PROTECT
        0x00,
    ])
}

/// SCR: physical layer 2.00, 1-bit and 4-bit bus widths.
pub const SCR: [u8; SCR_LEN] = [0x02, 0x05, 0, 0, 0, 0, 0, 0];

pub fn sd_status(wide_bus: bool) -> [u8; SD_STATUS_LEN] {
    let mut status = [0u8; SD_STATUS_LEN];
    if wide_bus {
        status[0] = 0b10 << 6;
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_end_with_their_crc() {
        for register in [cid(&CardIdentity::default()), csd(4096)] {
            assert_eq!(register[15] & 1, 1);
            assert_eq!(register[15] >> 1, crc7(&register[..15]));
        }
    }

    #[test]
    fn c_size_rounds_down_to_half_megabytes() {
        assert_eq!(csd_c_size(2048), 1);
        assert_eq!(csd_c_size(2047), 0);
        assert_eq!(csd_c_size(16), 0);
        // 8 GiB.
        assert_eq!(csd_c_size(16 * 1024 * 1024), 16383);

        let csd = csd(16 * 1024 * 1024);
        let c_size = u32::from_be_bytes([0, csd[7], csd[8], csd[9]]);
        assert_eq!(c_size, 16383);
    }

    #[test]
    fn cid_packs_manufacturing_date() {
        let cid = cid(&CardIdentity {
            year: 2024,
            month: 3,
            ..CardIdentity::default()
        });
        assert_eq!(&cid[3..8], b"PROXY");
        assert_eq!(u16::from_be_bytes([cid[13], cid[14]]), 24 << 4 | 3);
    }
}
