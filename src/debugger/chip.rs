//! Flash and RAM geometry of the connected chip

use crate::config::{ChipConfig, SectorConfig};
use std::fmt::Write;

/// Memory layout of a chip, as needed by flash staging and the GDB memory map
#[derive(Debug, Clone)]
pub struct ChipProfile {
    pub name: String,
    pub probe_rs_name: String,
    pub flash_base: u32,
    pub flash_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub bootrom_base: u32,
    pub bootrom_size: u32,
    sectors: Vec<SectorConfig>,
}

impl ChipProfile {
    pub fn from_config(name: &str, config: &ChipConfig) -> Self {
        Self {
            name: name.to_string(),
            probe_rs_name: config.probe_rs_name.clone(),
            flash_base: config.flash_base,
            flash_size: config.flash_size,
            sram_base: config.sram_base,
            sram_size: config.sram_size,
            bootrom_base: config.bootrom_base,
            bootrom_size: config.bootrom_size,
            sectors: config.sectors.clone(),
        }
    }

    /// One past the last flash address
    pub fn flash_end(&self) -> u64 {
        self.flash_base as u64 + self.flash_size as u64
    }

    /// Whether `[address, address + length)` lies entirely inside flash
    pub fn contains_flash(&self, address: u32, length: u32) -> bool {
        address >= self.flash_base && address as u64 + length as u64 <= self.flash_end()
    }

    /// Erase granularity at `address`
    pub fn page_size(&self, address: u32) -> u32 {
        self.sectors
            .iter()
            .rev()
            .find(|sector| sector.start <= address)
            .or(self.sectors.first())
            .map(|sector| sector.size)
            .unwrap_or(1)
    }

    /// Regions of uniform page size as `(start, length, page_size)`
    fn flash_regions(&self) -> Vec<(u32, u64, u32)> {
        self.sectors
            .iter()
            .enumerate()
            .map(|(i, sector)| {
                let end = self
                    .sectors
                    .get(i + 1)
                    .map(|next| next.start as u64)
                    .unwrap_or_else(|| self.flash_end());
                (sector.start, end - sector.start as u64, sector.size)
            })
            .collect()
    }

    /// GDB memory map served through `qXfer:memory-map:read`
    pub fn memory_map_document(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\"?>\n\
             <!DOCTYPE memory-map PUBLIC \"+//IDN gnu.org//DTD GDB Memory Map V1.0//EN\" \
             \"http://sourceware.org/gdb/gdb-memory-map.dtd\">\n\
             <memory-map>\n",
        );
        let _ = writeln!(
            xml,
            "  <memory type=\"rom\" start=\"0x00000000\" length=\"0x{:x}\"/>",
            self.flash_size
        );
        let _ = writeln!(
            xml,
            "  <memory type=\"ram\" start=\"0x{:08x}\" length=\"0x{:x}\"/>",
            self.sram_base, self.sram_size
        );
        for (start, length, page_size) in self.flash_regions() {
            let _ = writeln!(
                xml,
                "  <memory type=\"flash\" start=\"0x{:08x}\" length=\"0x{:x}\">\n    \
                 <property name=\"blocksize\">0x{:x}</property>\n  </memory>",
                start, length, page_size
            );
        }
        xml.push_str("  <memory type=\"ram\" start=\"0x40000000\" length=\"0x1fffffff\"/>\n");
        xml.push_str("  <memory type=\"ram\" start=\"0xe0000000\" length=\"0x1fffffff\"/>\n");
        if self.bootrom_size > 0 {
            let _ = writeln!(
                xml,
                "  <memory type=\"rom\" start=\"0x{:08x}\" length=\"0x{:x}\"/>",
                self.bootrom_base, self.bootrom_size
            );
        }
        xml.push_str("</memory-map>");
        xml
    }
}
