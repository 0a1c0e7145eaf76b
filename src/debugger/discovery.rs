//! Debug probe discovery and selection

use crate::error::{Result, ServerError};
use probe_rs::probe::list::Lister;
use probe_rs::probe::DebugProbeInfo;
use tracing::{debug, info, warn};

/// Probe family, detected from USB vendor and product IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    StLink,
    JLink,
    DapLink,
    Blackmagic,
    Unknown,
}

impl ProbeKind {
    pub fn from_vid_pid(vendor_id: u16, product_id: u16) -> Self {
        match (vendor_id, product_id) {
            (0x0483, 0x3748) | (0x0483, 0x374a) | (0x0483, 0x374b) | (0x0483, 0x374e)
            | (0x0483, 0x374f) | (0x0483, 0x3752) | (0x0483, 0x3753) => ProbeKind::StLink,
            (0x1366, _) => ProbeKind::JLink,
            (0x0d28, _) => ProbeKind::DapLink,
            (0x1d50, 0x6018) => ProbeKind::Blackmagic,
            _ => ProbeKind::Unknown,
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::StLink => write!(f, "ST-Link"),
            ProbeKind::JLink => write!(f, "J-Link"),
            ProbeKind::DapLink => write!(f, "DAPLink"),
            ProbeKind::Blackmagic => write!(f, "Black Magic Probe"),
            ProbeKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Information about a discovered debug probe
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub identifier: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub kind: ProbeKind,
}

impl From<&DebugProbeInfo> for ProbeInfo {
    fn from(probe: &DebugProbeInfo) -> Self {
        Self {
            identifier: probe.identifier.clone(),
            vendor_id: probe.vendor_id,
            product_id: probe.product_id,
            serial_number: probe.serial_number.clone(),
            kind: ProbeKind::from_vid_pid(probe.vendor_id, probe.product_id),
        }
    }
}

impl std::fmt::Display for ProbeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {} ({})",
            self.identifier,
            self.vendor_id,
            self.product_id,
            self.kind,
            self.serial_number.as_deref().unwrap_or("no serial")
        )
    }
}

/// Debug probe discovery utility
pub struct ProbeDiscovery;

impl ProbeDiscovery {
    /// List all connected debug probes
    pub fn list_probes() -> Vec<ProbeInfo> {
        debug!("Discovering debug probes");
        let probes: Vec<ProbeInfo> = Lister::new().list_all().iter().map(ProbeInfo::from).collect();
        info!("Found {} debug probes", probes.len());
        probes
    }

    /// Pick the probe with the given serial number, or the first one found
    pub fn select(serial_number: Option<&str>) -> Result<DebugProbeInfo> {
        let probes = Lister::new().list_all();
        Self::select_from(probes, serial_number)
    }

    fn select_from(
        probes: Vec<DebugProbeInfo>,
        serial_number: Option<&str>,
    ) -> Result<DebugProbeInfo> {
        if probes.is_empty() {
            return Err(ServerError::ProbeNotFound("No debug probes found".to_string()));
        }

        let mut matching: Vec<DebugProbeInfo> = match serial_number {
            Some(serial) => probes
                .into_iter()
                .filter(|probe| probe.serial_number.as_deref() == Some(serial))
                .collect(),
            None => probes,
        };

        if matching.is_empty() {
            return Err(ServerError::ProbeNotFound(format!(
                "No probe with serial number {}",
                serial_number.unwrap_or_default()
            )));
        }
        if matching.len() > 1 {
            warn!("{} probes match, using the first one", matching.len());
        }

        let selected = matching.swap_remove(0);
        info!("Selected probe: {}", ProbeInfo::from(&selected));
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_detection() {
        assert_eq!(ProbeKind::from_vid_pid(0x0483, 0x374b), ProbeKind::StLink);
        assert_eq!(ProbeKind::from_vid_pid(0x0483, 0x3748), ProbeKind::StLink);
        assert_eq!(ProbeKind::from_vid_pid(0x1366, 0x0101), ProbeKind::JLink);
        assert_eq!(ProbeKind::from_vid_pid(0x0d28, 0x0204), ProbeKind::DapLink);
        assert_eq!(ProbeKind::from_vid_pid(0xffff, 0xffff), ProbeKind::Unknown);
    }

    #[test]
    fn test_select_from_empty_list() {
        let result = ProbeDiscovery::select_from(Vec::new(), None);
        assert!(matches!(result, Err(ServerError::ProbeNotFound(_))));
    }

    #[test]
    fn test_list_probes_without_hardware() {
        // Probes may or may not be attached; only the shape is checked.
        for probe in ProbeDiscovery::list_probes() {
            assert!(!probe.identifier.is_empty());
        }
    }
}
