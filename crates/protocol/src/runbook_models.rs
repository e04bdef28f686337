//! Runbook and deploy template models.
//!
//! Both are named, reusable step lists matched to a node when the node
//! carries a trait equal to their name. Nothing binds a node to a runbook
//! persistently; matching happens when the steps are about to run.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::step_models::Step;

/// A named, ordered list of steps for manual cleaning or servicing.
///
/// Runbooks live in `.metal-kit/runbooks/*.md` as Markdown files with YAML
/// front matter; the Markdown body becomes the description.
///
/// # Example
///
/// ```markdown
/// ---
/// name: CUSTOM_BIOS_RESET
/// public: true
/// steps:
///   - interface: bios
///     step: factory_reset
///     order: 1
///   - interface: power
///     step: reboot
///     order: 2
/// ---
///
/// Reset BIOS settings to factory defaults and reboot.
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct Runbook {
    #[serde(default = "Uuid::new_v4")]
    #[ts(type = "string")]
    pub uuid: Uuid,

    /// Trait name this runbook is matched on, e.g. `CUSTOM_BIOS_RESET`.
    pub name: String,

    pub steps: Vec<Step>,

    /// Project owning the runbook. Only nodes with the same owner may use a
    /// non-public runbook.
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub public: bool,

    /// Skip booting the ramdisk agent when every step is out-of-band.
    #[serde(default)]
    pub disable_ramdisk: bool,

    /// Markdown body of the runbook file. Not part of the front matter.
    #[serde(skip)]
    pub description: String,
}

impl Runbook {
    /// Whether a node owned by `node_owner` may run this runbook.
    pub fn is_usable_by(&self, node_owner: Option<&str>) -> bool {
        if self.public {
            return true;
        }
        match self.owner.as_deref() {
            None => true,
            Some(owner) => node_owner == Some(owner),
        }
    }
}

/// Steps applied on top of the driver's deploy steps for matching nodes.
///
/// # Example
///
/// ```yaml
/// name: CUSTOM_RAID1
/// steps:
///   - interface: raid
///     step: apply_configuration
///     priority: 150
///     args:
///       raid_config:
///         logical_disks:
///           - size_gb: MAX
///             raid_level: "1"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct DeployTemplate {
    pub name: String,
    pub steps: Vec<Step>,
}
