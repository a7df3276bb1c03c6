//! Wire types for the VM instance endpoints.

use serde::{Deserialize, Serialize};

use crate::envelope::Tags;

/// How a stop request treats the guest.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopType {
    /// Guest-cooperative shutdown.
    Grace,
    /// Immediate power off.
    Cold,
}

/// Parameters of a create request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceParams {
    /// Instance name.
    pub name: String,
    /// Instance offering (CPU/memory flavour).
    pub instance_offering_uuid: String,
    /// Boot image.
    pub image_uuid: String,
    /// L3 networks to attach, in NIC order.
    pub l3_network_uuids: Vec<String>,
    /// Network that carries the default route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_l3_network_uuid: Option<String>,
    /// Disk offering for the root volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_disk_offering_uuid: Option<String>,
    /// Disk offerings for data volumes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_disk_offering_uuids: Vec<String>,
    /// Target zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_uuid: Option<String>,
    /// Target cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_uuid: Option<String>,
    /// Target host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_uuid: Option<String>,
    /// Free-form description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Envelope posted to create an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CreateInstanceRequest {
    /// Create parameters.
    pub params: CreateInstanceParams,
    /// System and user tags.
    #[serde(flatten)]
    pub tags: Tags,
}

/// Network interface attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VmNic {
    /// NIC identifier.
    pub uuid: String,
    /// Owning instance.
    pub vm_instance_uuid: String,
    /// Network the NIC is attached to.
    pub l3_network_uuid: String,
    /// Assigned address; empty until the guest has one.
    pub ip: String,
    /// Hardware address.
    pub mac: String,
    /// Network mask.
    pub netmask: String,
    /// Gateway address.
    pub gateway: String,
    /// Device index on the instance.
    pub device_id: i64,
}

/// Volume attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    /// Volume identifier.
    pub uuid: String,
    /// Volume name.
    pub name: String,
    /// `Root` or `Data`.
    #[serde(rename = "type")]
    pub volume_type: String,
    /// Disk offering the volume was created from.
    pub disk_offering_uuid: String,
    /// Virtual size in bytes.
    pub size: i64,
    /// Device index on the instance.
    pub device_id: i64,
    /// Provider state string.
    pub state: String,
    /// Provider status string.
    pub status: String,
}

/// Provider record for a VM instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VmInstanceInventory {
    /// Instance identifier.
    pub uuid: String,
    /// Instance name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Zone the instance lives in.
    pub zone_uuid: String,
    /// Cluster the instance lives in.
    pub cluster_uuid: String,
    /// Host currently running the instance.
    pub host_uuid: String,
    /// Image the instance booted from.
    pub image_uuid: String,
    /// Instance offering.
    pub instance_offering_uuid: String,
    /// Open provider state string (`Running`, `Stopped`, `Starting`, ...).
    pub state: String,
    /// Network interfaces, in device order.
    pub vm_nics: Vec<VmNic>,
    /// Attached volumes.
    pub all_volumes: Vec<Volume>,
}

impl VmInstanceInventory {
    /// Returns the first NIC's address, or an empty string when the instance
    /// has no interface yet.
    #[must_use]
    pub fn primary_ip(&self) -> &str {
        self.vm_nics.first().map_or("", |nic| nic.ip.as_str())
    }
}

/// Terminal payload of an instance job.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct InstanceResponse {
    /// Instance record, when the job returns one.
    #[serde(default)]
    pub inventory: Option<VmInstanceInventory>,
}

/// Reply of the query endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct QueryInstancesResponse {
    #[serde(default)]
    pub(crate) inventories: Vec<VmInstanceInventory>,
}
