//! The volume: an arena of typed blocks plus the directory, allocation,
//! and integrity operations defined over it.

use std::collections::HashSet;
use std::path::Path;

use format_adf::{Adf, Density, DosType};
use log::debug;

use crate::block::{read32, BlockError, BlockType, FsBlock, BSIZE, HT_SIZE, OFS_PAYLOAD};
use crate::block::BM_PAGES_PER_ROOT;
use crate::name::FsName;
use crate::FsError;

/// DOS variant of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsVolumeType {
    /// Original filesystem: data blocks carry their own headers.
    Ofs,
    /// Fast filesystem: data blocks are raw payload.
    Ffs,
}

/// Aggregated findings of an integrity check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsErrorReport {
    /// Blocks whose occupancy disagrees with their bitmap bit
    /// (empty-but-allocated or typed-but-free).
    pub bitmap_errors: usize,
    /// Number of corrupted blocks.
    pub corrupted_blocks: usize,
    pub first_error_block: Option<u32>,
    pub last_error_block: Option<u32>,
}

/// Default bootstrap code, OFS variant (boot checksum included).
pub const OFS_BOOTSTRAP: [u8; 45] = [
    0xC0, 0x20, 0x0F, 0x19, 0x00, 0x00, 0x03, 0x70, 0x43, 0xFA, 0x00, 0x18, 0x4E, 0xAE, 0xFF,
    0xA0, 0x4A, 0x80, 0x67, 0x0A, 0x20, 0x40, 0x20, 0x68, 0x00, 0x16, 0x70, 0x00, 0x4E, 0x75,
    0x70, 0xFF, 0x60, 0xFA, 0x64, 0x6F, 0x73, 0x2E, 0x6C, 0x69, 0x62, 0x72, 0x61, 0x72, 0x79,
];

/// Default bootstrap code, FFS variant.
pub const FFS_BOOTSTRAP: [u8; 93] = [
    0xE3, 0x3D, 0x0E, 0x72, 0x00, 0x00, 0x03, 0x70, 0x43, 0xFA, 0x00, 0x3E, 0x70, 0x25, 0x4E,
    0xAE, 0xFD, 0xD8, 0x4A, 0x80, 0x67, 0x0C, 0x22, 0x40, 0x08, 0xE9, 0x00, 0x06, 0x00, 0x22,
    0x4E, 0xAE, 0xFE, 0x62, 0x43, 0xFA, 0x00, 0x18, 0x4E, 0xAE, 0xFF, 0xA0, 0x4A, 0x80, 0x67,
    0x0A, 0x20, 0x40, 0x20, 0x68, 0x00, 0x16, 0x70, 0x00, 0x4E, 0x75, 0x70, 0xFF, 0x4E, 0x75,
    0x64, 0x6F, 0x73, 0x2E, 0x6C, 0x69, 0x62, 0x72, 0x61, 0x72, 0x79, 0x00, 0x65, 0x78, 0x70,
    0x61, 0x6E, 0x73, 0x69, 0x6F, 0x6E, 0x2E, 0x6C, 0x69, 0x62, 0x72, 0x61, 0x72, 0x79, 0x00,
    0x00, 0x00, 0x00,
];

const BITS_PER_BITMAP_BLOCK: usize = (BSIZE - 4) * 8;

pub struct FileSystem {
    dos: FsVolumeType,
    blocks: Vec<FsBlock>,
    root: u32,
    bm_blocks: Vec<u32>,
    bm_ext_blocks: Vec<u32>,
    /// Current directory (block number of a root or userdir block).
    cd: u32,
}

impl FileSystem {
    // --- construction ---------------------------------------------------

    /// Create a freshly formatted volume for the given floppy density.
    #[must_use]
    pub fn format(density: Density, dos: FsVolumeType, name: &str, bootable: bool) -> Self {
        let capacity = match density {
            Density::Dd => 1760,
            Density::Hd => 3520,
        };
        let root = capacity as u32 / 2;

        let mut blocks: Vec<FsBlock> = (0..capacity).map(|nr| FsBlock::empty(nr as u32)).collect();

        // Boot block: signature plus the optional bootstrap.
        blocks[0].kind = BlockType::Boot;
        blocks[1].kind = BlockType::Boot;
        blocks[0].data[0..3].copy_from_slice(b"DOS");
        blocks[0].data[3] = match dos {
            FsVolumeType::Ofs => 0,
            FsVolumeType::Ffs => 1,
        };
        if bootable {
            match dos {
                FsVolumeType::Ofs => {
                    blocks[0].data[4..4 + OFS_BOOTSTRAP.len()].copy_from_slice(&OFS_BOOTSTRAP);
                }
                FsVolumeType::Ffs => {
                    blocks[0].data[4..4 + FFS_BOOTSTRAP.len()].copy_from_slice(&FFS_BOOTSTRAP);
                }
            }
        }

        // Bitmap blocks directly behind the root block.
        let mapped_blocks: usize = capacity - 2;
        let bm_count = mapped_blocks.div_ceil(BITS_PER_BITMAP_BLOCK);
        let bm_blocks: Vec<u32> = (0..bm_count).map(|i| root + 1 + i as u32).collect();

        let mut root_block = FsBlock::new_root(root, &FsName::new(name));
        for (index, &bm) in bm_blocks.iter().enumerate().take(BM_PAGES_PER_ROOT) {
            root_block.set_bitmap_page(index, bm);
        }
        let (days, mins, ticks) = amiga_now();
        root_block.set_root_dates(days, mins, ticks);
        blocks[root as usize] = root_block;

        for &bm in &bm_blocks {
            blocks[bm as usize] = FsBlock::new_bitmap(bm);
        }

        let mut fs = Self {
            dos,
            blocks,
            root,
            bm_blocks,
            bm_ext_blocks: Vec::new(),
            cd: root,
        };

        // Every mapped block starts free, then the blocks formatting itself
        // consumed are taken.
        for nr in 2..capacity as u32 {
            fs.set_free(nr, true);
        }
        fs.set_free(fs.root, false);
        for &bm in &fs.bm_blocks.clone() {
            fs.set_free(bm, false);
        }

        fs.update_checksums();
        fs
    }

    /// Interpret an existing image as a volume.
    pub fn from_adf(adf: &Adf) -> Result<Self, FsError> {
        let dos = match adf.dos_type() {
            DosType::Ofs => FsVolumeType::Ofs,
            DosType::Ffs => FsVolumeType::Ffs,
            DosType::NoDos => return Err(FsError::Unformatted),
        };
        let capacity = adf.block_count();
        let root = capacity as u32 / 2;

        // The bitmap block lists live in the root block; they are needed
        // before per-block type prediction can run.
        let root_data = adf.block(root as usize);
        let mut bm_blocks = Vec::new();
        for index in 0..BM_PAGES_PER_ROOT {
            let nr = read32(root_data, 316 + 4 * index);
            if nr != 0 && (nr as usize) < capacity {
                bm_blocks.push(nr);
            }
        }
        let mut bm_ext_blocks = Vec::new();
        let mut ext = read32(root_data, 416);
        let mut guard = HashSet::new();
        while ext != 0 && (ext as usize) < capacity && guard.insert(ext) {
            bm_ext_blocks.push(ext);
            let ext_data = adf.block(ext as usize);
            for index in 0..(BSIZE / 4 - 1) {
                let nr = read32(ext_data, 4 * index);
                if nr != 0 && (nr as usize) < capacity {
                    bm_blocks.push(nr);
                }
            }
            ext = read32(ext_data, BSIZE - 4);
        }

        let mut fs = Self {
            dos,
            blocks: Vec::with_capacity(capacity),
            root,
            bm_blocks,
            bm_ext_blocks,
            cd: root,
        };
        for nr in 0..capacity as u32 {
            let bytes = adf.block(nr as usize);
            let kind = fs.predict_block_type(nr, bytes);
            fs.blocks.push(FsBlock::import(nr, kind, bytes));
        }
        debug!("imported {} blocks, root at {}", capacity, root);
        Ok(fs)
    }

    /// Write the whole volume back into an image buffer.
    pub fn export_volume(&mut self, dst: &mut [u8]) -> Result<(), FsError> {
        if dst.len() % BSIZE != 0 {
            return Err(FsError::WrongBlockSize);
        }
        if dst.len() != self.blocks.len() * BSIZE {
            return Err(FsError::WrongCapacity);
        }
        self.update_checksums();
        for block in &self.blocks {
            let start = block.nr as usize * BSIZE;
            dst[start..start + BSIZE].copy_from_slice(&block.data[..]);
        }
        Ok(())
    }

    /// Export into a fresh image of the matching density.
    pub fn to_adf(&mut self) -> Result<Adf, FsError> {
        let density = match self.blocks.len() {
            1760 => Density::Dd,
            3520 => Density::Hd,
            _ => return Err(FsError::WrongCapacity),
        };
        let mut adf = Adf::blank(density);
        self.export_volume(adf.data_mut())?;
        Ok(adf)
    }

    // --- block access ---------------------------------------------------

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn dos(&self) -> FsVolumeType {
        self.dos
    }

    #[must_use]
    pub fn root_block(&self) -> u32 {
        self.root
    }

    #[must_use]
    pub fn bitmap_blocks(&self) -> &[u32] {
        &self.bm_blocks
    }

    #[must_use]
    pub fn block(&self, nr: u32) -> Option<&FsBlock> {
        self.blocks.get(nr as usize)
    }

    fn block_mut(&mut self, nr: u32) -> Option<&mut FsBlock> {
        self.blocks.get_mut(nr as usize)
    }

    #[must_use]
    pub fn block_type(&self, nr: u32) -> BlockType {
        self.block(nr).map_or(BlockType::Unknown, |b| b.kind)
    }

    fn hashable(&self, nr: u32) -> Option<&FsBlock> {
        self.block(nr).filter(|b| b.kind.is_hashable())
    }

    /// Volume name from the root block.
    #[must_use]
    pub fn name(&self) -> FsName {
        self.block(self.root)
            .map_or_else(|| FsName::new(""), FsBlock::name)
    }

    fn update_checksums(&mut self) {
        for block in &mut self.blocks {
            block.update_checksum();
        }
    }

    /// Classify raw block bytes the way the directory scanner does.
    #[must_use]
    pub fn predict_block_type(&self, nr: u32, bytes: &[u8]) -> BlockType {
        if nr < 2 {
            return BlockType::Boot;
        }
        if self.bm_blocks.contains(&nr) {
            return BlockType::Bitmap;
        }
        if self.bm_ext_blocks.contains(&nr) {
            return BlockType::BitmapExt;
        }

        let type_word = read32(bytes, 0);
        let sec_type = read32(bytes, BSIZE - 4);
        match (type_word, sec_type) {
            (2, 1) => return BlockType::Root,
            (2, 2) => return BlockType::UserDir,
            (2, 0xFFFF_FFFD) => return BlockType::FileHeader,
            (16, 0xFFFF_FFFD) => return BlockType::FileList,
            _ => {}
        }

        match self.dos {
            FsVolumeType::Ofs if type_word == 8 => BlockType::DataOfs,
            FsVolumeType::Ffs if bytes.iter().any(|&b| b != 0) => BlockType::DataFfs,
            _ => BlockType::Empty,
        }
    }

    // --- allocation bitmap ----------------------------------------------

    /// Locate the bitmap block, byte offset, and bit index guarding a block.
    ///
    /// Within each 32-bit bitmap word the byte order is reversed relative to
    /// the linear bit number, so the byte offset is rectified by the
    /// +3/+1/-1/-3 permutation before the leading checksum long is skipped.
    fn locate_allocation_bit(&self, nr: u32) -> Option<(u32, usize, usize)> {
        if nr < 2 || nr as usize >= self.blocks.len() {
            return None;
        }
        let linear = nr as usize - 2;
        let bm_index = linear / BITS_PER_BITMAP_BLOCK;
        let bm_nr = *self.bm_blocks.get(bm_index)?;
        if self.block_type(bm_nr) != BlockType::Bitmap {
            return None;
        }

        let within = linear % BITS_PER_BITMAP_BLOCK;
        let mut byte = within / 8;
        byte = match byte % 4 {
            0 => byte + 3,
            1 => byte + 1,
            2 => byte - 1,
            _ => byte - 3,
        };
        byte += 4; // skip the bitmap block checksum
        Some((bm_nr, byte, within % 8))
    }

    /// Bit set means free. The two boot blocks are outside the bitmap and
    /// always count as allocated.
    #[must_use]
    pub fn is_free(&self, nr: u32) -> bool {
        match self.locate_allocation_bit(nr) {
            Some((bm, byte, bit)) => {
                let block = &self.blocks[bm as usize];
                block.data[byte] & (1 << bit) != 0
            }
            None => false,
        }
    }

    fn set_free(&mut self, nr: u32, free: bool) {
        if let Some((bm, byte, bit)) = self.locate_allocation_bit(nr) {
            let block = &mut self.blocks[bm as usize];
            if free {
                block.data[byte] |= 1 << bit;
            } else {
                block.data[byte] &= !(1 << bit);
            }
        }
    }

    #[must_use]
    pub fn free_blocks(&self) -> usize {
        (0..self.blocks.len() as u32)
            .filter(|&nr| self.is_free(nr))
            .count()
    }

    /// Claim a free block near the root, searching outwards the way the
    /// native filesystem does.
    fn allocate_block(&mut self) -> Result<u32, FsError> {
        let capacity = self.blocks.len() as u32;
        let mut above = self.root + 1;
        let mut below = self.root;
        loop {
            if above < capacity {
                if self.is_free(above) {
                    self.set_free(above, false);
                    return Ok(above);
                }
                above += 1;
            } else if below >= 2 {
                if self.is_free(below) {
                    self.set_free(below, false);
                    return Ok(below);
                }
                below -= 1;
            } else {
                return Err(FsError::OutOfSpace);
            }
        }
    }

    fn release_block(&mut self, nr: u32) {
        if let Some(block) = self.block_mut(nr) {
            *block = FsBlock::empty(nr);
        }
        self.set_free(nr, true);
    }

    // --- directories ----------------------------------------------------

    /// The current directory block, falling back to the root if the stored
    /// reference went invalid.
    pub fn current_dir(&mut self) -> u32 {
        match self.block_type(self.cd) {
            BlockType::Root | BlockType::UserDir => self.cd,
            _ => {
                self.cd = self.root;
                self.root
            }
        }
    }

    /// Change directory: "/" returns to the root, ".." follows the parent
    /// reference, anything else is a hash lookup. An unknown name leaves
    /// the current directory unchanged.
    pub fn change_dir(&mut self, name: &str) -> u32 {
        let cdb = self.current_dir();
        match name {
            "/" => self.cd = self.root,
            ".." => {
                let parent = self.blocks[cdb as usize].parent_dir_ref();
                self.cd = parent;
                // An invalid parent reference falls back to the root.
                let _ = self.current_dir();
            }
            _ => {
                if let Some(nr) = self.seek_ref(&FsName::new(name)) {
                    if self.block_type(nr) == BlockType::UserDir {
                        self.cd = nr;
                    }
                }
            }
        }
        self.current_dir()
    }

    /// Hash lookup of `name` in the current directory. Follows the slot's
    /// chain until the name matches or a visited block repeats.
    pub fn seek_ref(&mut self, name: &FsName) -> Option<u32> {
        let cdb = self.current_dir();
        let dir = &self.blocks[cdb as usize];
        if dir.hash_table_size() == 0 {
            return None;
        }

        let slot = name.hash_value() as usize % dir.hash_table_size();
        let mut reference = dir.hash_ref(slot);
        let mut visited = HashSet::new();

        while reference != 0 && visited.insert(reference) {
            let item = self.hashable(reference)?;
            if item.is_named(name) {
                return Some(reference);
            }
            reference = item.next_hash_ref();
        }
        None
    }

    /// Append a hashable block to its directory slot chain (tail insert).
    fn add_hash_ref(&mut self, dir: u32, nr: u32) {
        let hash = self.blocks[nr as usize].hash_value();
        let slot = hash as usize % self.blocks[dir as usize].hash_table_size();

        let head = self.blocks[dir as usize].hash_ref(slot);
        if head == 0 {
            self.blocks[dir as usize].set_hash_ref(slot, nr);
            return;
        }

        // Walk to the end of the chain, guarding against loops.
        let mut visited = HashSet::new();
        let mut tail = head;
        while visited.insert(tail) {
            let next = self.blocks[tail as usize].next_hash_ref();
            if next == 0 || self.hashable(next).is_none() {
                break;
            }
            tail = next;
        }
        self.blocks[tail as usize].set_next_hash_ref(nr);
    }

    /// Create a subdirectory in the current directory.
    pub fn create_dir(&mut self, name: &str) -> Result<u32, FsError> {
        let fs_name = FsName::new(name);
        if self.seek_ref(&fs_name).is_some() {
            return Err(FsError::FileExists(name.to_string()));
        }
        let cdb = self.current_dir();
        let nr = self.allocate_block()?;
        let mut block = FsBlock::new_userdir(nr, &fs_name);
        block.set_parent_dir_ref(cdb);
        block.update_checksum();
        self.blocks[nr as usize] = block;
        self.add_hash_ref(cdb, nr);
        Ok(nr)
    }

    /// Create an empty file in the current directory.
    pub fn create_file(&mut self, name: &str) -> Result<u32, FsError> {
        let fs_name = FsName::new(name);
        if self.seek_ref(&fs_name).is_some() {
            return Err(FsError::FileExists(name.to_string()));
        }
        let cdb = self.current_dir();
        let nr = self.allocate_block()?;
        let mut block = FsBlock::new_file_header(nr, &fs_name);
        block.set_parent_dir_ref(cdb);
        block.update_checksum();
        self.blocks[nr as usize] = block;
        self.add_hash_ref(cdb, nr);
        Ok(nr)
    }

    /// Create a file and fill it with data.
    pub fn create_file_with_data(&mut self, name: &str, bytes: &[u8]) -> Result<u32, FsError> {
        let header = self.create_file(name)?;
        if let Err(err) = self.add_file_data(header, bytes) {
            // Roll the header back out of the directory so a failed write
            // does not leave a half-created entry behind.
            self.remove_hash_ref(header);
            self.release_block(header);
            return Err(err);
        }
        Ok(header)
    }

    fn remove_hash_ref(&mut self, nr: u32) {
        let dir = self.blocks[nr as usize].parent_dir_ref();
        let Some(dir_block) = self.block(dir) else {
            return;
        };
        let table_size = dir_block.hash_table_size();
        if table_size == 0 {
            return;
        }
        let slot = self.blocks[nr as usize].hash_value() as usize % table_size;
        let next = self.blocks[nr as usize].next_hash_ref();

        if self.blocks[dir as usize].hash_ref(slot) == nr {
            self.blocks[dir as usize].set_hash_ref(slot, next);
            return;
        }
        let mut visited = HashSet::new();
        let mut walk = self.blocks[dir as usize].hash_ref(slot);
        while walk != 0 && visited.insert(walk) {
            let link = self.blocks[walk as usize].next_hash_ref();
            if link == nr {
                self.blocks[walk as usize].set_next_hash_ref(next);
                return;
            }
            walk = link;
        }
    }

    // --- file data ------------------------------------------------------

    fn payload_per_block(&self) -> usize {
        match self.dos {
            FsVolumeType::Ofs => OFS_PAYLOAD,
            FsVolumeType::Ffs => BSIZE,
        }
    }

    /// Append data blocks to a fresh file header, spilling references into
    /// file list extension blocks past the header's table capacity.
    pub fn add_file_data(&mut self, header: u32, bytes: &[u8]) -> Result<(), FsError> {
        let payload = self.payload_per_block();
        let block_count = bytes.len().div_ceil(payload);

        self.blocks[header as usize].set_file_byte_size(bytes.len() as u32);

        let mut data_refs = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            data_refs.push(self.allocate_block()?);
        }

        // Write the data blocks.
        for (index, &nr) in data_refs.iter().enumerate() {
            let chunk = &bytes[index * payload..((index + 1) * payload).min(bytes.len())];
            let mut block = match self.dos {
                FsVolumeType::Ofs => {
                    let mut b = FsBlock::new_data_ofs(nr, header, index as u32 + 1);
                    b.set_data_bytes_used(chunk.len() as u32);
                    let next = data_refs.get(index + 1).copied().unwrap_or(0);
                    b.set_next_data_ref(next);
                    b
                }
                FsVolumeType::Ffs => FsBlock::new_data_ffs(nr),
            };
            let range = block.payload_range();
            block.data[range.start..range.start + chunk.len()].copy_from_slice(chunk);
            block.update_checksum();
            self.blocks[nr as usize] = block;
        }

        if let Some(&first) = data_refs.first() {
            self.blocks[header as usize].set_first_data_ref(first);
        }

        // Distribute the references over the header and its list chain.
        let mut list_block = header;
        let mut used = 0usize;
        for &nr in &data_refs {
            if used == HT_SIZE {
                let ext = self.allocate_block()?;
                let mut block = FsBlock::new_file_list(ext, header);
                block.set_first_data_ref(self.blocks[header as usize].first_data_ref());
                block.update_checksum();
                self.blocks[ext as usize] = block;
                self.blocks[list_block as usize].set_extension_ref(ext);
                list_block = ext;
                used = 0;
            }
            self.blocks[list_block as usize].set_data_block_ref(used, nr);
            used += 1;
            self.blocks[list_block as usize].set_data_ref_count(used);
        }
        Ok(())
    }

    /// Collect the data of a file by walking its reference tables.
    pub fn read_file(&self, header: u32) -> Result<Vec<u8>, FsError> {
        let Some(block) = self.block(header).filter(|b| b.kind == BlockType::FileHeader) else {
            return Err(FsError::Corrupted);
        };
        let byte_size = block.file_byte_size() as usize;
        let payload = self.payload_per_block();

        let mut result = Vec::with_capacity(byte_size);
        let mut list_nr = header;
        let mut visited = HashSet::new();
        while list_nr != 0 && visited.insert(list_nr) {
            let list = self.block(list_nr).ok_or(FsError::Corrupted)?;
            for index in 0..list.data_ref_count() {
                let data_nr = list.data_block_ref(index);
                let data = self.block(data_nr).ok_or(FsError::Corrupted)?;
                let range = data.payload_range();
                let wanted = (byte_size - result.len()).min(payload);
                result.extend_from_slice(&data.data[range.start..range.start + wanted]);
                if result.len() == byte_size {
                    return Ok(result);
                }
            }
            list_nr = list.extension_ref();
        }
        if list_nr != 0 {
            return Err(FsError::HasCycles);
        }
        Ok(result)
    }

    // --- traversal ------------------------------------------------------

    /// Collect the hashable blocks reachable from a directory, walking each
    /// hash table in reverse slot order. Fails if a chain loops.
    pub fn collect(&self, dir: u32, recursive: bool) -> Result<Vec<u32>, FsError> {
        let mut result = Vec::new();
        let mut stack = Vec::new();
        let mut visited = HashSet::new();

        self.collect_hashed_refs(dir, &mut stack, &mut visited)?;
        while let Some(item) = stack.pop() {
            result.push(item);
            if recursive && self.block_type(item) == BlockType::UserDir {
                self.collect_hashed_refs(item, &mut stack, &mut visited)?;
            }
        }
        Ok(result)
    }

    fn collect_hashed_refs(
        &self,
        dir: u32,
        stack: &mut Vec<u32>,
        visited: &mut HashSet<u32>,
    ) -> Result<(), FsError> {
        let Some(block) = self.block(dir) else {
            return Ok(());
        };
        for slot in (0..block.hash_table_size()).rev() {
            self.collect_chain(block.hash_ref(slot), stack, visited)?;
        }
        Ok(())
    }

    fn collect_chain(
        &self,
        head: u32,
        stack: &mut Vec<u32>,
        visited: &mut HashSet<u32>,
    ) -> Result<(), FsError> {
        let mut chain = Vec::new();
        let mut nr = head;
        while nr != 0 {
            let Some(block) = self.hashable(nr) else {
                break;
            };
            if !visited.insert(nr) {
                return Err(FsError::HasCycles);
            }
            chain.push(nr);
            nr = block.next_hash_ref();
        }
        // Reverse so the stack pops chain members in list order.
        stack.extend(chain.into_iter().rev());
        Ok(())
    }

    /// Absolute path of a hashable block, for listings.
    #[must_use]
    pub fn path_of(&self, nr: u32) -> String {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut walk = nr;
        while let Some(block) = self.hashable(walk) {
            if !visited.insert(walk) {
                break;
            }
            segments.push(block.name().as_str());
            walk = block.parent_dir_ref();
        }
        segments.reverse();
        segments.join("/")
    }

    // --- integrity ------------------------------------------------------

    /// Full volume scan: bitmap agreement plus per-block structure checks.
    pub fn check(&mut self) -> FsErrorReport {
        let mut report = FsErrorReport::default();

        for nr in 0..self.blocks.len() as u32 {
            let empty = self.blocks[nr as usize].kind == BlockType::Empty;
            let free = self.is_free(nr);
            if empty != free && nr >= 2 {
                report.bitmap_errors += 1;
                debug!("bitmap disagrees with occupancy at block {nr}");
            }
        }

        let mut corrupted_tag = 0;
        for nr in 0..self.blocks.len() as u32 {
            let errors = self.check_block(nr);
            if errors.is_empty() {
                self.blocks[nr as usize].corrupted = 0;
            } else {
                corrupted_tag += 1;
                self.blocks[nr as usize].corrupted = corrupted_tag;
                report.corrupted_blocks += 1;
                if report.first_error_block.is_none() {
                    report.first_error_block = Some(nr);
                }
                report.last_error_block = Some(nr);
            }
        }
        report
    }

    /// Structure check of a single block.
    #[must_use]
    pub fn check_block(&self, nr: u32) -> Vec<BlockError> {
        let mut errors = Vec::new();
        let Some(block) = self.block(nr) else {
            return errors;
        };

        if !block.checksum_ok() {
            errors.push(BlockError::BadChecksum);
        }

        match block.kind {
            BlockType::Root => {
                if read32(&block.data[..], 12) != HT_SIZE as u32 {
                    errors.push(BlockError::InvalidHashtableSize);
                }
                for slot in 0..HT_SIZE {
                    self.check_ref_kind(block.hash_ref(slot), true, &mut errors, |k| {
                        k.is_hashable()
                    });
                }
                self.check_ref_kind(block.bitmap_page(0), false, &mut errors, |k| {
                    k == BlockType::Bitmap
                });
            }
            BlockType::UserDir => {
                if block.self_ref() != nr {
                    errors.push(BlockError::ExpectedSelfRef);
                }
                if block.type_word() != 2 || block.sec_type() != 2 {
                    errors.push(BlockError::InvalidType);
                }
                for slot in 0..HT_SIZE {
                    self.check_ref_kind(block.hash_ref(slot), true, &mut errors, |k| {
                        k.is_hashable()
                    });
                }
                self.check_ref_kind(block.parent_dir_ref(), false, &mut errors, |k| {
                    matches!(k, BlockType::Root | BlockType::UserDir)
                });
            }
            BlockType::FileHeader => {
                if block.self_ref() != nr {
                    errors.push(BlockError::ExpectedSelfRef);
                }
                if block.type_word() != 2 || block.sec_type() != 0xFFFF_FFFD {
                    errors.push(BlockError::InvalidType);
                }
                self.check_ref_kind(block.parent_dir_ref(), false, &mut errors, |k| {
                    matches!(k, BlockType::Root | BlockType::UserDir)
                });
                self.check_data_table(block, &mut errors);
                if block.data_ref_count() > 0 && block.first_data_ref() == 0 {
                    errors.push(BlockError::ExpectedRef);
                }
                self.check_ref_kind(block.extension_ref(), true, &mut errors, |k| {
                    k == BlockType::FileList
                });
            }
            BlockType::FileList => {
                if block.self_ref() != nr {
                    errors.push(BlockError::ExpectedSelfRef);
                }
                if block.type_word() != 16 || block.sec_type() != 0xFFFF_FFFD {
                    errors.push(BlockError::InvalidType);
                }
                self.check_ref_kind(block.parent_dir_ref(), false, &mut errors, |k| {
                    k == BlockType::FileHeader
                });
                self.check_data_table(block, &mut errors);
                if block.data_ref_count() < HT_SIZE && block.extension_ref() != 0 {
                    errors.push(BlockError::ExpectedNoRef);
                }
            }
            BlockType::DataOfs => {
                self.check_ref_kind(block.data_header_ref(), false, &mut errors, |k| {
                    k == BlockType::FileHeader
                });
                if block.data_seq() == 0 {
                    errors.push(BlockError::ExpectedDataBlockSeq);
                }
                if block.data_bytes_used() as usize > OFS_PAYLOAD {
                    errors.push(BlockError::InvalidType);
                }
                self.check_ref_kind(block.next_data_ref(), true, &mut errors, |k| k.is_data());
            }
            _ => {}
        }
        errors
    }

    fn check_data_table(&self, block: &FsBlock, errors: &mut Vec<BlockError>) {
        for index in 0..block.data_ref_count().min(HT_SIZE) {
            self.check_ref_kind(block.data_block_ref(index), false, errors, |k| k.is_data());
        }
        if block.data_ref_count() > HT_SIZE {
            errors.push(BlockError::InvalidType);
        }
    }

    /// Validate a block reference: range, presence, and the pointed-to type.
    fn check_ref_kind(
        &self,
        reference: u32,
        optional: bool,
        errors: &mut Vec<BlockError>,
        expected: impl Fn(BlockType) -> bool,
    ) {
        if reference == 0 {
            if !optional {
                errors.push(BlockError::ExpectedRef);
            }
            return;
        }
        if reference as usize >= self.blocks.len() {
            errors.push(BlockError::OutOfRangeRef);
            return;
        }
        let kind = self.block_type(reference);
        if !expected(kind) {
            errors.push(match kind {
                BlockType::Empty => BlockError::PtrToEmptyBlock,
                BlockType::Boot => BlockError::PtrToBootBlock,
                BlockType::Root => BlockError::PtrToRootBlock,
                BlockType::Bitmap => BlockError::PtrToBitmapBlock,
                BlockType::BitmapExt => BlockError::PtrToBitmapExtBlock,
                BlockType::UserDir => BlockError::PtrToUserDirBlock,
                BlockType::FileHeader => BlockError::PtrToFileHeaderBlock,
                BlockType::FileList => BlockError::PtrToFileListBlock,
                BlockType::DataOfs | BlockType::DataFfs => BlockError::PtrToDataBlock,
                BlockType::Unknown => BlockError::PtrToUnknownBlock,
            });
        }
    }

    // --- host directory exchange ----------------------------------------

    /// Import a host directory tree into the current directory.
    pub fn import_directory(&mut self, path: &Path, recursive: bool) -> Result<(), FsError> {
        let entries = std::fs::read_dir(path)
            .map_err(|_| FsError::CannotRead(path.display().to_string()))?;

        for entry in entries {
            let entry = entry.map_err(|_| FsError::CannotRead(path.display().to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|_| FsError::CannotRead(name.clone()))?;

            if file_type.is_dir() {
                debug!("importing directory {name}");
                self.create_dir(&name)?;
                if recursive {
                    self.change_dir(&name);
                    self.import_directory(&entry.path(), recursive)?;
                    self.change_dir("..");
                }
            } else if file_type.is_file() {
                debug!("importing file {name}");
                let bytes = std::fs::read(entry.path())
                    .map_err(|_| FsError::CannotRead(name.clone()))?;
                self.create_file_with_data(&name, &bytes)?;
            }
        }
        self.update_checksums();
        Ok(())
    }

    /// Export the current directory tree into an empty host directory.
    pub fn export_directory(&mut self, path: &Path) -> Result<(), FsError> {
        if !path.is_dir() {
            std::fs::create_dir_all(path)
                .map_err(|_| FsError::CannotCreateDir(path.display().to_string()))?;
        }
        if std::fs::read_dir(path)
            .map_err(|_| FsError::CannotRead(path.display().to_string()))?
            .next()
            .is_some()
        {
            return Err(FsError::DirNotEmpty);
        }

        let cd = self.current_dir();
        let items = self.collect(cd, true)?;
        for nr in items {
            let target = path.join(self.path_of(nr));
            match self.block_type(nr) {
                BlockType::UserDir => {
                    std::fs::create_dir_all(&target)
                        .map_err(|_| FsError::CannotCreateDir(target.display().to_string()))?;
                }
                BlockType::FileHeader => {
                    let bytes = self.read_file(nr)?;
                    std::fs::write(&target, bytes)
                        .map_err(|_| FsError::CannotCreateFile(target.display().to_string()))?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Current time as the Amiga date triple (days since 1978-01-01, minutes
/// since midnight, 50Hz ticks past the minute).
fn amiga_now() -> (u32, u32, u32) {
    const SECS_PER_DAY: u64 = 24 * 60 * 60;
    // 1970 to 1978: eight years, two of them leap.
    const EPOCH_SHIFT: u64 = (8 * 365 + 2) * SECS_PER_DAY;

    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let amiga = unix.saturating_sub(EPOCH_SHIFT);
    let days = amiga / SECS_PER_DAY;
    let mins = (amiga % SECS_PER_DAY) / 60;
    let ticks = (amiga % 60) * 50;
    (days as u32, mins as u32, ticks as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::checksum;
    use format_adf::SECTOR_SIZE;

    #[test]
    fn formatted_dd_volume_has_sane_shape() {
        let fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Empty", false);
        assert_eq!(fs.capacity(), 1760);
        assert_eq!(fs.root_block(), 880);
        assert_eq!(fs.bitmap_blocks(), &[881]);
        assert_eq!(fs.block_type(0), BlockType::Boot);
        assert_eq!(fs.block_type(880), BlockType::Root);
        assert_eq!(fs.block_type(881), BlockType::Bitmap);
        assert_eq!(fs.name().as_str(), "Empty");
    }

    #[test]
    fn formatted_volume_bitmap_is_consistent() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Empty", false);
        assert!(!fs.is_free(880), "root block must be allocated");
        assert!(!fs.is_free(881), "bitmap block must be allocated");
        assert!(fs.is_free(2));
        assert!(fs.is_free(1759));
        assert!(!fs.is_free(0), "boot blocks sit outside the bitmap");

        let report = fs.check();
        assert_eq!(report.bitmap_errors, 0);
        assert_eq!(report.corrupted_blocks, 0);
    }

    #[test]
    fn create_file_allocates_and_hashes() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Work", false);
        let nr = fs.create_file("startup-sequence").expect("create");
        assert_eq!(fs.block_type(nr), BlockType::FileHeader);
        assert!(!fs.is_free(nr));
        assert_eq!(fs.seek_ref(&FsName::new("Startup-Sequence")), Some(nr));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Work", false);
        fs.create_file("readme").expect("create");
        assert!(matches!(
            fs.create_file("README"),
            Err(FsError::FileExists(_))
        ));
    }

    #[test]
    fn ofs_file_data_round_trip() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Work", false);
        let bytes: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let nr = fs.create_file_with_data("blob", &bytes).expect("create");

        assert_eq!(fs.read_file(nr).expect("read back"), bytes);

        // OFS data blocks carry their own headers with contiguous sequence
        // numbers starting at 1.
        let header = fs.block(nr).expect("header");
        let first = header.data_block_ref(0);
        let first_block = fs.block(first).expect("data");
        assert_eq!(first_block.kind, BlockType::DataOfs);
        assert_eq!(first_block.data_seq(), 1);
        assert_eq!(first_block.data_header_ref(), nr);
        let second = first_block.next_data_ref();
        assert_eq!(fs.block(second).expect("data 2").data_seq(), 2);
    }

    #[test]
    fn ffs_file_data_round_trip() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ffs, "Fast", false);
        let bytes: Vec<u8> = (0..1300u32).map(|i| (i % 253) as u8).collect();
        let nr = fs.create_file_with_data("blob", &bytes).expect("create");
        assert_eq!(fs.read_file(nr).expect("read back"), bytes);

        let header = fs.block(nr).expect("header");
        // 1300 bytes fit in two raw 512-byte FFS blocks plus a partial third.
        assert_eq!(header.data_ref_count(), 3);
        assert_eq!(
            fs.block_type(header.data_block_ref(0)),
            BlockType::DataFfs
        );
    }

    #[test]
    fn large_file_spills_into_file_list_chain() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Big", false);
        // 72 refs fit in the header; force two more into an extension block.
        let bytes = vec![0x5Au8; OFS_PAYLOAD * 74];
        let nr = fs.create_file_with_data("big", &bytes).expect("create");

        let header = fs.block(nr).expect("header");
        assert_eq!(header.data_ref_count(), HT_SIZE);
        let ext = header.extension_ref();
        assert_ne!(ext, 0, "extension chain expected");
        let list = fs.block(ext).expect("list");
        assert_eq!(list.kind, BlockType::FileList);
        assert_eq!(list.data_ref_count(), 2);
        assert_eq!(list.parent_dir_ref(), nr);

        assert_eq!(fs.read_file(nr).expect("read back"), bytes);
    }

    #[test]
    fn change_dir_navigates_slash_dotdot_and_names() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Nav", false);
        let devs = fs.create_dir("devs").expect("mkdir");
        assert_eq!(fs.change_dir("devs"), devs);
        fs.create_dir("printers").expect("mkdir nested");
        fs.change_dir("printers");
        assert_eq!(fs.change_dir(".."), devs);
        assert_eq!(fs.change_dir("/"), fs.root_block());
    }

    #[test]
    fn collect_detects_hash_chain_cycle() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Loop", false);
        let a = fs.create_file("aaaa").expect("a");
        // Force the chain to loop back on itself.
        fs.blocks[a as usize].set_next_hash_ref(a);
        assert_eq!(fs.collect(fs.root_block(), true), Err(FsError::HasCycles));
    }

    #[test]
    fn collect_visits_nested_directories() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Tree", false);
        fs.create_dir("c").expect("dir");
        fs.create_file("readme").expect("file");
        fs.change_dir("c");
        fs.create_file("dir").expect("nested file");
        fs.change_dir("/");

        let items = fs.collect(fs.root_block(), true).expect("no cycles");
        assert_eq!(items.len(), 3);

        let paths: Vec<String> = items.iter().map(|&nr| fs.path_of(nr)).collect();
        assert!(paths.contains(&"c".to_string()));
        assert!(paths.contains(&"c/dir".to_string()));
        assert!(paths.contains(&"readme".to_string()));
    }

    #[test]
    fn adf_round_trip_preserves_structure() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Persist", false);
        fs.create_dir("s").expect("dir");
        fs.change_dir("s");
        fs.create_file_with_data("startup-sequence", b"echo hello")
            .expect("file");
        fs.change_dir("/");

        let adf = fs.to_adf().expect("export");
        let mut imported = FileSystem::from_adf(&adf).expect("import");
        assert_eq!(imported.name().as_str(), "Persist");
        imported.change_dir("s");
        let nr = imported
            .seek_ref(&FsName::new("startup-sequence"))
            .expect("file present");
        assert_eq!(imported.read_file(nr).expect("data"), b"echo hello");

        let report = imported.check();
        assert_eq!(report.corrupted_blocks, 0);
        assert_eq!(report.bitmap_errors, 0);
    }

    #[test]
    fn unformatted_image_is_rejected() {
        let adf = Adf::blank(Density::Dd);
        assert!(matches!(FileSystem::from_adf(&adf), Err(FsError::Unformatted)));
    }

    #[test]
    fn corruption_is_counted_and_located() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Chk", false);
        let nr = fs.create_file("x").expect("file");
        // Flip a byte without fixing the checksum.
        fs.blocks[nr as usize].data[40] ^= 0xFF;

        let report = fs.check();
        assert_eq!(report.corrupted_blocks, 1);
        assert_eq!(report.first_error_block, Some(nr));
        assert_eq!(report.last_error_block, Some(nr));
        assert!(fs
            .check_block(nr)
            .contains(&BlockError::BadChecksum));
    }

    #[test]
    fn allocation_searches_outwards_from_root() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Alloc", false);
        let first = fs.create_file("a").expect("a");
        let second = fs.create_file("b").expect("b");
        assert_eq!(first, 882, "first free block above root and bitmap");
        assert_eq!(second, 883);
    }

    #[test]
    fn export_block_size_validation() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Val", false);
        let mut short = vec![0u8; 1000];
        assert_eq!(fs.export_volume(&mut short), Err(FsError::WrongBlockSize));
        let mut wrong = vec![0u8; SECTOR_SIZE * 100];
        assert_eq!(fs.export_volume(&mut wrong), Err(FsError::WrongCapacity));
    }

    #[test]
    fn checksum_helper_matches_block_method() {
        let mut fs = FileSystem::format(Density::Dd, FsVolumeType::Ofs, "Sum", false);
        fs.update_checksums();
        let root = fs.block(880).expect("root");
        assert_eq!(read32(&root.data[..], 20), checksum(&root.data[..], 20));
    }
}
