use super::MAX_FMMUS;
use alloc::vec::Vec;

/// A value downloaded through CoE while the slave is in PREOP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoConfig {
    pub index: u16,
    pub subindex: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Master to slave (RxPDO).
    Output,
    /// Slave to master (TxPDO).
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoEntry {
    index: u16,
    sub_index: u8,
    bit_length: u16,
}

impl PdoEntry {
    pub fn new(index: u16, sub_index: u8, bit_length: u16) -> Self {
        PdoEntry {
            index,
            sub_index,
            bit_length,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn sub_index(&self) -> u8 {
        self.sub_index
    }

    pub fn bit_length(&self) -> u16 {
        self.bit_length
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdo {
    pub index: u16,
    pub entries: Vec<PdoEntry>,
}

impl Pdo {
    pub fn new(index: u16, entries: &[PdoEntry]) -> Self {
        Self {
            index,
            entries: entries.to_vec(),
        }
    }

    pub fn bit_length(&self) -> u32 {
        self.entries.iter().map(|e| e.bit_length as u32).sum()
    }
}

/// PDO assignment of one sync manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub index: u8,
    pub direction: SyncDirection,
    pub pdos: Vec<Pdo>,
}

impl SyncConfig {
    /// Sum of all mapped entries, rounded up to full bytes.
    pub fn byte_size(&self) -> u16 {
        let bits: u32 = self.pdos.iter().map(Pdo::bit_length).sum();
        ((bits + 7) / 8) as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmmuConfig {
    pub sync_index: u8,
    pub logical_start_address: u32,
    pub data_size: u16,
}

/// What the application wants a slave to look like in SAFEOP/OP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveConfig {
    pub sdo_configs: Vec<SdoConfig>,
    pub sync_configs: Vec<SyncConfig>,
    pub fmmu_configs: heapless::Vec<FmmuConfig, MAX_FMMUS>,
}

impl SlaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sdo(&mut self, index: u16, subindex: u8, data: &[u8]) -> &mut Self {
        self.sdo_configs.push(SdoConfig {
            index,
            subindex,
            data: data.to_vec(),
        });
        self
    }

    pub fn add_sync(&mut self, index: u8, direction: SyncDirection, pdos: &[Pdo]) -> &mut Self {
        self.sync_configs.push(SyncConfig {
            index,
            direction,
            pdos: pdos.to_vec(),
        });
        self
    }

    /// Fails with the rejected entry once all FMMUs are used.
    pub fn add_fmmu(&mut self, fmmu: FmmuConfig) -> Result<&mut Self, FmmuConfig> {
        self.fmmu_configs.push(fmmu)?;
        Ok(self)
    }

    pub fn used_fmmus(&self) -> usize {
        self.fmmu_configs.len()
    }

    pub fn sync_config(&self, index: u8) -> Option<&SyncConfig> {
        self.sync_configs.iter().find(|sync| sync.index == index)
    }
}
