//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::envelope::Tags;
use crate::instance::{CreateInstanceParams, CreateInstanceRequest};
use crate::provision::{DEFAULT_SSH_PORT, SshCredentials};

/// Driver configuration derived from environment variables and
/// configuration files. Catalog names are expected to be resolved to
/// provider UUIDs already.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZSTACK",
    discovery(
        app_name = "zstack-machine",
        env_var = "ZSTACK_CONFIG_PATH",
        config_file_name = "zstack-machine.toml",
        dotfile_name = ".zstack-machine.toml",
        project_file_name = "zstack-machine.toml"
    )
)]
pub struct DriverConfig {
    /// Account used to log in.
    pub account_name: String,
    /// Plaintext account password; hashed before it leaves the process.
    pub account_password: String,
    /// API endpoint, for example `http://zstack.example:8080`.
    pub endpoint: String,
    /// Instance name. A `machine-<uuid>` name is generated when empty.
    pub name: Option<String>,
    /// Free-form description attached to the instance.
    pub description: Option<String>,
    /// Zone to place the instance in.
    pub zone_uuid: Option<String>,
    /// Cluster to place the instance in; takes precedence over the zone.
    pub cluster_uuid: Option<String>,
    /// Host to place the instance on; takes precedence over cluster and zone.
    pub host_uuid: Option<String>,
    /// Boot image.
    pub image_uuid: String,
    /// Instance offering.
    pub instance_offering_uuid: String,
    /// Comma separated L3 networks; the first carries the default route.
    pub network_uuids: String,
    /// Static address requested on the default network.
    pub static_ip: Option<String>,
    /// Disk offering for the root volume.
    pub system_disk_offering_uuid: Option<String>,
    /// Root volume size in GiB; ignored when an offering is set.
    pub system_disk_size: Option<u64>,
    /// Disk offering for a data volume.
    pub data_disk_offering_uuid: Option<String>,
    /// Data volume size in GiB; ignored when an offering is set.
    pub data_disk_size: Option<u64>,
    /// SSH login user on the guest.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// SSH port on the guest.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// SSH password, for provisioners that can use one. The bundled
    /// `SshProvisioner` runs `ssh` in batch mode and never sends it.
    pub ssh_password: Option<String>,
    /// SSH private key path.
    pub ssh_key_path: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 6] = [
    FieldMetadata::new("ZStack account name", "ZSTACK_ACCOUNT_NAME", "account_name"),
    FieldMetadata::new(
        "ZStack account password",
        "ZSTACK_ACCOUNT_PASSWORD",
        "account_password",
    ),
    FieldMetadata::new("ZStack API endpoint", "ZSTACK_ENDPOINT", "endpoint"),
    FieldMetadata::new("image UUID", "ZSTACK_IMAGE_UUID", "image_uuid"),
    FieldMetadata::new(
        "instance offering UUID",
        "ZSTACK_INSTANCE_OFFERING_UUID",
        "instance_offering_uuid",
    ),
    FieldMetadata::new("L3 network UUIDs", "ZSTACK_NETWORK_UUIDS", "network_uuids"),
];

impl DriverConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to zstack-machine.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("zstack-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields and logs the
    /// placement and disk settings that will be ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when the SSH port is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.account_name,
            &self.account_password,
            &self.endpoint,
            &self.image_uuid,
            &self.instance_offering_uuid,
            &self.network_uuids,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        if self.network_uuid_list().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing L3 network UUIDs: ZSTACK_NETWORK_UUIDS contains no UUID",
            )));
        }
        if self.ssh_port == 0 {
            return Err(ConfigError::Invalid(String::from("ssh_port must not be 0")));
        }
        self.warn_ignored_settings();
        Ok(())
    }

    fn warn_ignored_settings(&self) {
        let host = present(self.host_uuid.as_ref());
        let cluster = present(self.cluster_uuid.as_ref());
        let zone = present(self.zone_uuid.as_ref());
        if host.is_some() && (cluster.is_some() || zone.is_some()) {
            warn!("host is set, so cluster and zone will be omitted");
        } else if cluster.is_some() && zone.is_some() {
            warn!("cluster is set, so zone will be omitted");
        }
        if present(self.system_disk_offering_uuid.as_ref()).is_some()
            && self.system_disk_size.is_some_and(|size| size > 0)
        {
            warn!("system disk size will be omitted because a system disk offering is set");
        }
        if present(self.data_disk_offering_uuid.as_ref()).is_some()
            && self.data_disk_size.is_some_and(|size| size > 0)
        {
            warn!("data disk size will be omitted because a data disk offering is set");
        }
    }

    /// Returns the configured L3 networks, trimmed, in order.
    #[must_use]
    pub fn network_uuid_list(&self) -> Vec<String> {
        self.network_uuids
            .split(',')
            .map(str::trim)
            .filter(|uuid| !uuid.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Returns `true` when a data disk offering is configured.
    #[must_use]
    pub fn has_data_disk(&self) -> bool {
        present(self.data_disk_offering_uuid.as_ref()).is_some()
    }

    /// Builds the create envelope. Placement follows host > cluster > zone;
    /// a static IP becomes a `staticIp` system tag on the default network.
    #[must_use]
    pub fn create_request(&self) -> CreateInstanceRequest {
        let networks = self.network_uuid_list();
        let default_network = networks.first().cloned();
        let name = present(self.name.as_ref()).map_or_else(
            || format!("machine-{}", Uuid::new_v4().simple()),
            ToOwned::to_owned,
        );

        let host_uuid = present(self.host_uuid.as_ref()).map(ToOwned::to_owned);
        let cluster_uuid = host_uuid
            .is_none()
            .then(|| present(self.cluster_uuid.as_ref()).map(ToOwned::to_owned))
            .flatten();
        let zone_uuid = (host_uuid.is_none() && cluster_uuid.is_none())
            .then(|| present(self.zone_uuid.as_ref()).map(ToOwned::to_owned))
            .flatten();

        let mut system_tags = Vec::new();
        if let (Some(ip), Some(network)) = (present(self.static_ip.as_ref()), &default_network) {
            system_tags.push(format!("staticIp::{network}::{ip}"));
        }

        CreateInstanceRequest {
            params: CreateInstanceParams {
                name,
                instance_offering_uuid: self.instance_offering_uuid.trim().to_owned(),
                image_uuid: self.image_uuid.trim().to_owned(),
                l3_network_uuids: networks,
                default_l3_network_uuid: default_network,
                root_disk_offering_uuid: present(self.system_disk_offering_uuid.as_ref())
                    .map(ToOwned::to_owned),
                data_disk_offering_uuids: present(self.data_disk_offering_uuid.as_ref())
                    .map(ToOwned::to_owned)
                    .into_iter()
                    .collect(),
                zone_uuid,
                cluster_uuid,
                host_uuid,
                description: present(self.description.as_ref()).map(ToOwned::to_owned),
            },
            tags: Tags {
                system_tags,
                user_tags: Vec::new(),
            },
        }
    }

    /// Returns the SSH materials handed to the guest provisioner.
    #[must_use]
    pub fn ssh_credentials(&self) -> SshCredentials {
        SshCredentials {
            user: self.ssh_user.clone(),
            port: if self.ssh_port == 0 {
                DEFAULT_SSH_PORT
            } else {
                self.ssh_port
            },
            password: present(self.ssh_password.as_ref()).map(ToOwned::to_owned),
            key_path: present(self.ssh_key_path.as_ref()).map(Utf8PathBuf::from),
        }
    }
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|raw| raw.trim()).filter(|trimmed| !trimmed.is_empty())
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
