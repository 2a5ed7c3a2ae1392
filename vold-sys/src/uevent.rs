// SPDX-License-Identifier: GPL-3.0-only

//! Kernel block uevents: netlink listener and coldboot scan

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use vold_types::{BlockAction, BlockEvent, DeviceNumber};

use crate::{Result, SysError};

const RECV_BUFFER: usize = 64 * 1024;

/// Build a block event from `KEY=VALUE` pairs; `None` for other subsystems or incomplete records
pub fn block_event_from_pairs<'a>(
    pairs: impl IntoIterator<Item = &'a str>,
    default_action: Option<BlockAction>,
    default_path: Option<&str>,
) -> Option<BlockEvent> {
    let env: HashMap<&str, &str> = pairs
        .into_iter()
        .filter_map(|pair| pair.split_once('='))
        .collect();

    if let Some(subsystem) = env.get("SUBSYSTEM") {
        if *subsystem != "block" {
            return None;
        }
    }

    let action = match env.get("ACTION") {
        Some(action) => action.parse().ok()?,
        None => default_action?,
    };
    let event_path = env
        .get("DEVPATH")
        .copied()
        .or(default_path)?
        .to_string();
    let major = env.get("MAJOR")?.parse().ok()?;
    let minor = env.get("MINOR")?.parse().ok()?;

    Some(BlockEvent {
        action,
        event_path,
        device: DeviceNumber::new(major, minor),
        dev_type: env.get("DEVTYPE").copied().unwrap_or_default().to_string(),
        dev_name: env.get("DEVNAME").map(|name| name.to_string()),
    })
}

/// Parse one netlink datagram (`action@devpath\0KEY=VALUE\0...`)
pub fn parse_uevent(buf: &[u8]) -> Option<BlockEvent> {
    let text = String::from_utf8_lossy(buf);
    let mut fields = text.split('\0').filter(|field| !field.is_empty());

    // libudev re-broadcasts carry a binary header instead of `action@devpath`
    let header = fields.next()?;
    if !header.contains('@') {
        return None;
    }

    block_event_from_pairs(fields, None, None)
}

/// Synthesise `add` events for block devices already present at startup
pub fn coldboot(sys_root: &Path) -> Vec<BlockEvent> {
    let class_dir = sys_root.join("class/block");
    let entries = match fs::read_dir(&class_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %class_dir.display(), "Coldboot scan failed: {}", e);
            return Vec::new();
        }
    };

    let root = fs::canonicalize(sys_root).unwrap_or_else(|_| sys_root.to_path_buf());
    let mut events = Vec::new();
    for entry in entries.flatten() {
        let Ok(contents) = fs::read_to_string(entry.path().join("uevent")) else {
            continue;
        };
        let dev_path = fs::canonicalize(entry.path())
            .ok()
            .and_then(|full| {
                full.strip_prefix(&root)
                    .ok()
                    .map(|rel| format!("/{}", rel.display()))
            });

        if let Some(event) =
            block_event_from_pairs(contents.lines(), Some(BlockAction::Add), dev_path.as_deref())
        {
            events.push(event);
        }
    }

    events.sort_by_key(|event| (event.device.major, event.device.minor));
    events
}

/// Netlink socket subscribed to kernel uevent broadcasts
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> Result<Self> {
        // SAFETY: plain socket(2)/bind(2) calls; the fd is owned immediately.
        unsafe {
            let raw = libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            );
            if raw < 0 {
                return Err(SysError::Io(io::Error::last_os_error()));
            }
            let fd = OwnedFd::from_raw_fd(raw);

            let mut addr: libc::sockaddr_nl = std::mem::zeroed();
            addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
            addr.nl_pid = 0;
            addr.nl_groups = 1;

            let rc = libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            );
            if rc < 0 {
                return Err(SysError::Io(io::Error::last_os_error()));
            }

            Ok(Self { fd })
        }
    }

    /// Block until the next block-subsystem event arrives
    pub fn next_event(&self) -> Result<BlockEvent> {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            // SAFETY: buf outlives the call and its length is passed alongside.
            let len = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if len < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(SysError::Io(err));
            }

            if let Some(event) = parse_uevent(&buf[..len as usize]) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kernel_add_datagram() {
        let datagram = b"add@/devices/pci0000:00/usb1/1-1/block/sdb\0ACTION=add\0DEVPATH=/devices/pci0000:00/usb1/1-1/block/sdb\0SUBSYSTEM=block\0MAJOR=8\0MINOR=16\0DEVNAME=sdb\0DEVTYPE=disk\0SEQNUM=42\0";

        let event = parse_uevent(datagram).expect("block event");
        assert_eq!(event.action, BlockAction::Add);
        assert_eq!(event.device, DeviceNumber::new(8, 16));
        assert!(event.is_disk());
        assert_eq!(event.dev_name.as_deref(), Some("sdb"));
        assert_eq!(event.event_path, "/devices/pci0000:00/usb1/1-1/block/sdb");
    }

    #[test]
    fn ignores_other_subsystems_and_libudev_frames() {
        let net = b"add@/devices/virtual/net/lo\0ACTION=add\0DEVPATH=/devices/virtual/net/lo\0SUBSYSTEM=net\0";
        assert!(parse_uevent(net).is_none());
        assert!(parse_uevent(b"libudev\0\xfe\xed\0ACTION=add\0").is_none());
    }

    #[test]
    fn coldboot_reads_uevent_files() {
        let sys = tempfile::tempdir().expect("tempdir");
        let device_dir = sys.path().join("devices/platform/mmc1/block/mmcblk1");
        fs::create_dir_all(&device_dir).unwrap();
        fs::write(
            device_dir.join("uevent"),
            "MAJOR=179\nMINOR=32\nDEVNAME=mmcblk1\nDEVTYPE=disk\n",
        )
        .unwrap();
        fs::create_dir_all(sys.path().join("class/block")).unwrap();
        std::os::unix::fs::symlink(&device_dir, sys.path().join("class/block/mmcblk1")).unwrap();

        let events = coldboot(sys.path());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, BlockAction::Add);
        assert_eq!(events[0].device, DeviceNumber::new(179, 32));
        assert_eq!(events[0].event_path, "/devices/platform/mmc1/block/mmcblk1");
    }
}
