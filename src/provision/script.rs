//! Guest-side shell script that prepares the data disk for Docker.

/// Block device the first data disk is attached as.
pub const DATA_DISK_DEVICE: &str = "/dev/vdb";

/// Mount point for the data disk partition.
pub const DATA_MOUNT_PATH: &str = "/mnt/data";

/// Builds the partition/format/mount script for `device`, relocating
/// `/var/lib/docker` onto the new filesystem. Re-running it on a prepared
/// guest is a no-op.
#[must_use]
pub fn disk_setup_script(device: &str, mount_path: &str) -> String {
    format!(
        r#"set -eu
DEVICE="{device}"
PARTITION="${{DEVICE}}1"
MOUNT_PATH="{mount_path}"
DOCKER_DIR="/var/lib/docker"
if grep -q "^${{PARTITION}} " /etc/fstab; then
  exit 0
fi
printf 'n\np\n1\n\n\nw\n' | fdisk "$DEVICE"
sleep 5
mkfs.ext4 -i 8192 "$PARTITION"
RESTART_DOCKER=0
if [ -d "$DOCKER_DIR" ]; then
  RESTART_DOCKER=1
  /etc/init.d/docker stop || true
  rm -rf "$DOCKER_DIR"
fi
mkdir -p "$MOUNT_PATH"
echo "$PARTITION $MOUNT_PATH ext4 defaults 0 0" >> /etc/fstab
mount -a
mount --make-shared "$MOUNT_PATH"
mount --make-shared /
mkdir -p "$MOUNT_PATH$DOCKER_DIR"
ln -sf "$MOUNT_PATH$DOCKER_DIR" "$DOCKER_DIR"
if [ "$RESTART_DOCKER" -eq 1 ]; then
  /etc/init.d/docker start
fi
df -h
"#
    )
}
