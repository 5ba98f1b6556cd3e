use elato_core::storage::{Namespace, NamespaceBackend};
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::info;

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

// Record header layout shared with `elato_core::storage::codec`.
const RECORD_HEADER_LEN: usize = 10;
const RECORD_CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashNamespaceError {
    PartitionTable,
    PartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    RecordTooLarge,
    Unaligned,
}

#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, FlashNamespaceError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashNamespaceError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashNamespaceError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashNamespaceError::Unaligned);
        }

        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashNamespaceError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashNamespaceError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashNamespaceError::Unaligned);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashNamespaceError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashNamespaceError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashNamespaceError::Unaligned);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashNamespaceError::FlashOpFailed(rc));
        }
        Ok(())
    }

    /// `addr` must be word aligned; a trailing partial word is still read
    /// whole.
    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashNamespaceError> {
        for (index, chunk) in out.chunks_mut(4).enumerate() {
            let word = self.read_word(addr + (index as u32) * 4)?.to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    /// Programs `data` into an erased region; padding bytes stay 0xFF.
    fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashNamespaceError> {
        for (index, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0xFFu8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.write_word(addr + (index as u32) * 4, u32::from_le_bytes(bytes))?;
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashNamespaceError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if offset.is_multiple_of(4) {
            return self.read_bytes(offset, bytes);
        }

        // Partition table reads are aligned; this path only covers stray
        // offsets by widening to the enclosing words.
        let start = offset & !0b11;
        let skip = (offset - start) as usize;
        let mut word = [0u8; 4];
        let mut filled = 0usize;
        let mut addr = start;
        while filled < bytes.len() {
            self.read_bytes(addr, &mut word)?;
            let from = if addr == start { skip } else { 0 };
            let take = (4 - from).min(bytes.len() - filled);
            bytes[filled..filled + take].copy_from_slice(&word[from..from + take]);
            filled += take;
            addr += 4;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashNamespaceError::Unaligned)
    }
}

/// One erasable flash sector per preferences namespace, carved from the end
/// of the first writable data partition.
#[derive(Debug)]
pub struct FlashNamespaceStore {
    flash: RawFlash,
    base_addr: u32,
}

impl FlashNamespaceStore {
    pub fn new() -> Result<Self, FlashNamespaceError> {
        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashNamespaceError::PartitionTable)?;

        let needed = FLASH_SECTOR_SIZE * Namespace::ALL.len() as u32;
        let mut best_data_undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;

        for entry in table.iter() {
            if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    best_data_undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) => {
                    if fallback_nvs.is_none() {
                        fallback_nvs = Some((entry.offset(), entry.len()));
                    }
                }
                _ => {}
            }
        }

        let (offset, len) = best_data_undefined
            .or(fallback_nvs)
            .ok_or(FlashNamespaceError::PartitionMissing)?;

        if len < needed {
            return Err(FlashNamespaceError::PartitionTooSmall);
        }

        let base_addr = offset + len - needed;
        info!("prefs: flash namespaces at 0x{:08x} sectors={}", base_addr, Namespace::ALL.len());
        Ok(Self { flash, base_addr })
    }

    fn sector_addr(&self, namespace: Namespace) -> u32 {
        let slot = match namespace {
            Namespace::Server => 0,
            Namespace::Auth => 1,
        };
        self.base_addr + slot * FLASH_SECTOR_SIZE
    }
}

impl NamespaceBackend for FlashNamespaceStore {
    type Error = FlashNamespaceError;

    fn read(
        &mut self,
        namespace: Namespace,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        let addr = self.sector_addr(namespace);
        let mut header = [0u8; RECORD_HEADER_LEN];
        self.flash.read_bytes(addr, &mut header)?;

        if header.iter().all(|b| *b == 0xFF) {
            return Ok(None);
        }

        let payload_len = u16::from_le_bytes([header[8], header[9]]) as usize;
        let len = (RECORD_HEADER_LEN + payload_len + RECORD_CHECKSUM_LEN).min(buf.len());
        self.flash.read_bytes(addr, &mut buf[..len])?;
        Ok(Some(len))
    }

    fn write(&mut self, namespace: Namespace, record: &[u8]) -> Result<(), Self::Error> {
        if record.len() > FLASH_SECTOR_SIZE as usize {
            return Err(FlashNamespaceError::RecordTooLarge);
        }
        let addr = self.sector_addr(namespace);
        self.flash.erase_sector(addr)?;
        self.flash.write_erased_bytes(addr, record)
    }

    fn erase(&mut self, namespace: Namespace) -> Result<(), Self::Error> {
        let addr = self.sector_addr(namespace);
        self.flash.erase_sector(addr)
    }
}
