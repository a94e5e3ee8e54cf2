// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Largest source id addressable by a PLIC (source 0 is reserved).
pub const MAX_SOURCES: u32 = 1023;

/// Every hart exposes one consumer per privilege level (U, S, H, M).
pub const PRIVILEGE_LEVELS_PER_HART: u32 = 4;

/// Largest number of contexts a PLIC register map can address.
pub const MAX_CONSUMERS: u32 = 15872;

/// Harts whose every privilege level still fits in `MAX_CONSUMERS`.
pub const MAX_HARTS: u32 = MAX_CONSUMERS / PRIVILEGE_LEVELS_PER_HART;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_harts() -> u32 {
    1
}

/// How a consumer remembers that a source asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingMode {
    /// Pending is latched per consumer on the rising edge of a source.
    #[default]
    #[serde(alias = "edge")]
    EdgeCapture,
    /// Pending is re-derived on demand from the live source level.
    #[serde(alias = "level")]
    LevelSample,
}

/// Register map flavour exposed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[serde(alias = "riscv-plic", alias = "virt")]
    RiscvPlic,
    #[default]
    #[serde(alias = "fu540")]
    Sifive,
    #[serde(rename = "opentitan", alias = "open_titan", alias = "open-titan")]
    OpenTitan,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlicDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>, // e.g. "64MB", defaults to the layout window
    pub sources: u32,
    #[serde(default = "default_harts")]
    pub harts: u32,
    #[serde(default)]
    pub layout: LayoutKind,
    #[serde(default)]
    pub pending_mode: PendingMode,
    #[serde(default = "default_true")]
    pub priorities_enabled: bool,
    #[serde(default)]
    pub forced_consumer: Option<u32>,
}

impl PlicDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to open PLIC descriptor at {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let desc: Self = serde_yaml::from_str(yaml).context("Failed to parse PLIC Descriptor YAML")?;
        desc.validate()?;
        Ok(desc)
    }

    /// Number of consumers the controller exposes: one per (hart, privilege level) pair.
    pub fn consumers(&self) -> u32 {
        self.harts.saturating_mul(PRIVILEGE_LEVELS_PER_HART)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.sources == 0 || self.sources > MAX_SOURCES {
            anyhow::bail!(
                "PLIC '{}' declares {} sources; supported range is 1..={}",
                self.name,
                self.sources,
                MAX_SOURCES
            );
        }

        if self.harts == 0 {
            anyhow::bail!("PLIC '{}' must serve at least one hart", self.name);
        }

        if self.harts > MAX_HARTS {
            anyhow::bail!(
                "PLIC '{}' declares {} harts; at most {} are supported",
                self.name,
                self.harts,
                MAX_HARTS
            );
        }

        if let Some(size) = &self.size {
            parse_size(size).with_context(|| format!("Invalid size for PLIC '{}'", self.name))?;
        }

        // An out-of-range forced consumer mutes every consumer; accepted but reported.
        if let Some(forced) = self.forced_consumer {
            if forced >= self.consumers() {
                tracing::warn!(
                    "PLIC '{}' forces consumer {} but only {} consumers exist; all output lines will stay low",
                    self.name,
                    forced,
                    self.consumers()
                );
            }
        }

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "irq_line", ...
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub irq: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub plic: PlicDescriptor,
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
}

impl BoardManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Board Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml).context("Failed to parse Board Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        self.plic.validate()?;

        let mut seen = HashSet::new();
        let mut wired = HashSet::new();
        for p in &self.peripherals {
            if !seen.insert(p.id.as_str()) {
                anyhow::bail!("Duplicate peripheral id '{}'", p.id);
            }
            if let Some(size) = &p.size {
                parse_size(size).with_context(|| format!("Invalid size for '{}'", p.id))?;
            }
            if let Some(irq) = p.irq {
                if irq == 0 || irq > self.plic.sources {
                    anyhow::bail!(
                        "Peripheral '{}' is wired to source {}; PLIC '{}' has sources 1..={}",
                        p.id,
                        irq,
                        self.plic.name,
                        self.plic.sources
                    );
                }
                if !wired.insert(irq) {
                    tracing::warn!(
                        "Source {} is driven by more than one peripheral; the last writer wins",
                        irq
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const PLIC_YAML: &str = r#"
name: "plic0"
base_address: 0x0C000000
sources: 53
harts: 5
"#;

    #[test]
    fn test_defaults_applied() {
        let desc = PlicDescriptor::from_yaml(PLIC_YAML).unwrap();
        assert_eq!(desc.schema_version, "1.0");
        assert_eq!(desc.layout, LayoutKind::Sifive);
        assert_eq!(desc.pending_mode, PendingMode::EdgeCapture);
        assert!(desc.priorities_enabled);
        assert_eq!(desc.forced_consumer, None);
        assert_eq!(desc.consumers(), 20);
    }

    #[test]
    fn test_mode_aliases() {
        let yaml = r#"
name: "plic0"
base_address: 0x0
sources: 8
layout: "virt"
pending_mode: "level"
"#;
        let desc = PlicDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(desc.layout, LayoutKind::RiscvPlic);
        assert_eq!(desc.pending_mode, PendingMode::LevelSample);
        assert_eq!(desc.harts, 1);
    }

    #[test]
    fn test_too_many_sources() {
        let yaml = r#"
name: "plic0"
base_address: 0x0
sources: 1024
"#;
        let err = PlicDescriptor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("1..=1023"));
    }

    #[test]
    fn test_zero_harts() {
        let yaml = r#"
name: "plic0"
base_address: 0x0
sources: 4
harts: 0
"#;
        let err = PlicDescriptor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one hart"));
    }

    #[test]
    fn test_too_many_harts() {
        let yaml = r#"
name: "plic0"
base_address: 0x0
sources: 4
harts: 1073741824
forced_consumer: 1
"#;
        let err = PlicDescriptor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at most 3968"));

        let desc = PlicDescriptor::from_yaml(
            r#"
name: "plic0"
base_address: 0x0
sources: 4
harts: 3968
"#,
        )
        .unwrap();
        assert_eq!(desc.consumers(), MAX_CONSUMERS);
    }

    #[test]
    fn test_out_of_range_forced_consumer_is_accepted() {
        let yaml = r#"
name: "plic0"
base_address: 0x0
sources: 4
forced_consumer: 99
"#;
        let desc = PlicDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(desc.forced_consumer, Some(99));
    }

    #[test]
    fn test_invalid_schema_version() {
        let yaml = r#"
schema_version: "2.0"
name: "plic0"
base_address: 0x0
sources: 4
"#;
        let err = PlicDescriptor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("schema_version"));
    }

    #[test]
    fn test_manifest_rejects_unwired_irq() {
        let yaml = r#"
name: "board"
plic:
  name: "plic0"
  base_address: 0x0C000000
  sources: 4
peripherals:
  - id: "uart0"
    type: "irq_line"
    base_address: 0x10000000
    irq: 5
"#;
        let err = BoardManifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("source 5"));
    }

    #[test]
    fn test_manifest_rejects_duplicate_ids() {
        let yaml = r#"
name: "board"
plic:
  name: "plic0"
  base_address: 0x0C000000
  sources: 4
peripherals:
  - id: "dev"
    type: "irq_line"
    base_address: 0x10000000
  - id: "dev"
    type: "irq_line"
    base_address: 0x10001000
"#;
        let err = BoardManifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4KiB").unwrap(), 4096);
        assert!(parse_size("64MB").unwrap() > parse_size("128KB").unwrap());
        assert!(parse_size("four").is_err());
    }

    fn write_temp_file(prefix: &str, contents: &str) -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push("plicsim-config-tests");
        let _ = std::fs::create_dir_all(&dir);

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = dir.join(format!("{}-{}.yaml", prefix, nonce));
        std::fs::write(&path, contents).expect("Failed to write temp file");
        path
    }

    #[test]
    fn test_load_descriptor_from_file() {
        let path = write_temp_file("plic", PLIC_YAML);
        let desc = PlicDescriptor::from_file(&path).unwrap();
        assert_eq!(desc.name, "plic0");
        assert_eq!(desc.sources, 53);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = PlicDescriptor::from_file("/nonexistent/plic.yaml").unwrap_err();
        assert!(err.to_string().contains("plic.yaml"));
    }
}
