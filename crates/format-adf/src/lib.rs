//! Amiga Disk File (ADF) image access.
//!
//! ADF is a raw sector dump with no header or magic: 80 cylinders x 2 heads
//! x 11 sectors x 512 bytes = 901,120 bytes for a double-density disk,
//! twice the sector count for high-density. Identification is solely by
//! length.

use std::fmt;

pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_TRACK_DD: usize = 11;
pub const SECTORS_PER_TRACK_HD: usize = 22;
pub const CYLINDERS: usize = 80;
pub const HEADS: usize = 2;
pub const ADF_SIZE_DD: usize = CYLINDERS * HEADS * SECTORS_PER_TRACK_DD * SECTOR_SIZE;
pub const ADF_SIZE_HD: usize = CYLINDERS * HEADS * SECTORS_PER_TRACK_HD * SECTOR_SIZE;

/// Density of the imaged disk, derived from the image length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    Dd,
    Hd,
}

/// Filesystem signature read from the boot block ("DOS" + variant byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosType {
    /// "DOS\0" — original filesystem.
    Ofs,
    /// "DOS\x01" — fast filesystem.
    Ffs,
    /// No DOS signature; the volume is unformatted or foreign.
    NoDos,
}

#[derive(Debug)]
pub enum AdfError {
    /// The buffer length matches neither the DD nor the HD image size.
    InvalidSize(usize),
    /// Sector address outside the disk geometry.
    InvalidSector {
        cyl: usize,
        head: usize,
        sector: usize,
    },
}

impl fmt::Display for AdfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(size) => write!(
                f,
                "invalid ADF size: {size} bytes (expected {ADF_SIZE_DD} for DD or {ADF_SIZE_HD} for HD)",
            ),
            Self::InvalidSector { cyl, head, sector } => {
                write!(f, "sector address out of range: cyl {cyl} head {head} sector {sector}")
            }
        }
    }
}

impl std::error::Error for AdfError {}

/// A raw disk image plus the geometry derived from its length.
#[derive(Clone)]
pub struct Adf {
    data: Vec<u8>,
    density: Density,
    write_protected: bool,
}

impl Adf {
    /// Wrap an existing image buffer. The length decides the density.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, AdfError> {
        let density = match data.len() {
            ADF_SIZE_DD => Density::Dd,
            ADF_SIZE_HD => Density::Hd,
            other => return Err(AdfError::InvalidSize(other)),
        };
        Ok(Self {
            data,
            density,
            write_protected: false,
        })
    }

    /// A blank (all-zero) image of the given density.
    #[must_use]
    pub fn blank(density: Density) -> Self {
        let size = match density {
            Density::Dd => ADF_SIZE_DD,
            Density::Hd => ADF_SIZE_HD,
        };
        Self {
            data: vec![0; size],
            density,
            write_protected: false,
        }
    }

    #[must_use]
    pub fn density(&self) -> Density {
        self.density
    }

    #[must_use]
    pub fn sectors_per_track(&self) -> usize {
        match self.density {
            Density::Dd => SECTORS_PER_TRACK_DD,
            Density::Hd => SECTORS_PER_TRACK_HD,
        }
    }

    /// Total number of 512-byte blocks on the disk.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    /// Filesystem signature from the first boot sector.
    #[must_use]
    pub fn dos_type(&self) -> DosType {
        if &self.data[0..3] != b"DOS" {
            return DosType::NoDos;
        }
        match self.data[3] {
            0 => DosType::Ofs,
            1 => DosType::Ffs,
            _ => DosType::NoDos,
        }
    }

    fn sector_offset(&self, cyl: usize, head: usize, sector: usize) -> Result<usize, AdfError> {
        if cyl >= CYLINDERS || head >= HEADS || sector >= self.sectors_per_track() {
            return Err(AdfError::InvalidSector { cyl, head, sector });
        }
        Ok(((cyl * HEADS + head) * self.sectors_per_track() + sector) * SECTOR_SIZE)
    }

    pub fn read_sector(&self, cyl: usize, head: usize, sector: usize) -> Result<&[u8], AdfError> {
        let start = self.sector_offset(cyl, head, sector)?;
        Ok(&self.data[start..start + SECTOR_SIZE])
    }

    pub fn write_sector(
        &mut self,
        cyl: usize,
        head: usize,
        sector: usize,
        bytes: &[u8],
    ) -> Result<(), AdfError> {
        let start = self.sector_offset(cyl, head, sector)?;
        self.data[start..start + SECTOR_SIZE].copy_from_slice(bytes);
        Ok(())
    }

    /// All sectors of one track, in sector order.
    pub fn read_track(&self, cyl: usize, head: usize) -> Result<&[u8], AdfError> {
        let start = self.sector_offset(cyl, head, 0)?;
        Ok(&self.data[start..start + self.sectors_per_track() * SECTOR_SIZE])
    }

    /// Block access by linear block number (the filesystem view).
    #[must_use]
    pub fn block(&self, nr: usize) -> &[u8] {
        let start = nr * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    #[must_use]
    pub fn block_mut(&mut self, nr: usize) -> &mut [u8] {
        let start = nr * SECTOR_SIZE;
        &mut self.data[start..start + SECTOR_SIZE]
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_invalid_size() {
        assert!(Adf::from_bytes(vec![0; 100]).is_err());
    }

    #[test]
    fn identify_density_by_length_only() {
        let dd = Adf::from_bytes(vec![0; ADF_SIZE_DD]).expect("DD image");
        assert_eq!(dd.density(), Density::Dd);
        assert_eq!(dd.sectors_per_track(), SECTORS_PER_TRACK_DD);
        assert_eq!(dd.block_count(), 1760);

        let hd = Adf::from_bytes(vec![0; ADF_SIZE_HD]).expect("HD image");
        assert_eq!(hd.density(), Density::Hd);
        assert_eq!(hd.block_count(), 3520);
    }

    #[test]
    fn dos_type_from_boot_signature() {
        let mut adf = Adf::blank(Density::Dd);
        assert_eq!(adf.dos_type(), DosType::NoDos);

        adf.data_mut()[0..4].copy_from_slice(b"DOS\x00");
        assert_eq!(adf.dos_type(), DosType::Ofs);

        adf.data_mut()[3] = 1;
        assert_eq!(adf.dos_type(), DosType::Ffs);
    }

    #[test]
    fn sector_read_write_round_trip() {
        let mut adf = Adf::blank(Density::Dd);
        let bytes: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i & 0xFF) as u8).collect();
        adf.write_sector(40, 1, 5, &bytes).expect("in range");
        assert_eq!(adf.read_sector(40, 1, 5).expect("in range"), &bytes[..]);
    }

    #[test]
    fn sector_addressing_matches_linear_blocks() {
        let mut adf = Adf::blank(Density::Dd);
        adf.block_mut(22)[0] = 0xA5; // cyl 1, head 0, sector 0
        assert_eq!(adf.read_sector(1, 0, 0).expect("in range")[0], 0xA5);
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let adf = Adf::blank(Density::Dd);
        assert!(adf.read_sector(0, 0, 11).is_err());
        assert!(adf.read_sector(80, 0, 0).is_err());
    }
}
