mod common;

use std::path::PathBuf;

use common::{GIB, Harness, USB_SYS_PATH, output};
use vold_contracts::{StorageErrorKind, StorageEvent};
use vold_service::Disk;
use vold_types::{
    DeviceNumber, DiskFlag, GPT_ANDROID_EXPAND, GPT_ANDROID_META, GPT_BASIC_DATA, VolumeState,
    VolumeType,
};

const PART_GUID: &str = "5c2f51e4-1a2b-4c3d-8e9f-0a1b2c3d4e5f";

fn volume_ids(disk: &Disk) -> Vec<&str> {
    disk.volumes().iter().map(|v| v.id()).collect()
}

#[tokio::test]
async fn gpt_expand_partition_with_key_becomes_private_volume() {
    let h = Harness::new();
    h.ctx.keys.write_key(PART_GUID, &[9u8; 32]).await.unwrap();
    let expand = format!("PART 1 {GPT_ANDROID_EXPAND} {PART_GUID}");
    h.script_dump(&["DISK gpt", expand.as_str()]);

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert_eq!(volume_ids(&disk), vec!["private:8,17"]);
    let volume = &disk.volumes()[0];
    assert_eq!(volume.base().volume_type(), VolumeType::Private);
    assert_eq!(volume.base().part_guid(), Some(PART_GUID));
    assert_eq!(volume.base().disk_id(), Some("disk:8,16"));
    assert_eq!(volume.state(), VolumeState::Unmounted);
    assert_eq!(
        h.crypto.setups(),
        vec![(
            "private:8,17".to_string(),
            PathBuf::from("/dev/block/vold/private:8,17")
        )]
    );
    assert!(h.commands.calls_to("blkid").is_empty());
}

#[tokio::test]
async fn expand_partition_without_key_is_skipped() {
    let h = Harness::new();
    let expand = format!("PART 1 {GPT_ANDROID_EXPAND} {PART_GUID}");
    h.script_dump(&["DISK gpt", expand.as_str()]);

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert!(disk.volumes().is_empty());
    assert!(h.crypto.setups().is_empty());
    assert_eq!(h.listener.count("disk_scanned", "disk:8,16"), 1);
}

#[tokio::test]
async fn unknown_table_with_filesystem_exposes_whole_device() {
    let h = Harness::new();
    h.script_blkid("disk:8,16", "vfat", "1234-ABCD");

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert_eq!(volume_ids(&disk), vec!["public:8,16"]);
    assert_eq!(disk.volumes()[0].base().disk_id(), Some("disk:8,16"));
}

#[tokio::test]
async fn unknown_table_without_filesystem_has_no_volumes() {
    let h = Harness::new();
    h.commands.on("blkid", "disk:8,16", output(2, &[]));

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert!(disk.volumes().is_empty());
    assert_eq!(h.commands.calls_to("blkid").len(), 1);
}

#[tokio::test]
async fn mbr_public_types_within_minor_range_become_public_volumes() {
    let h = Harness::new();
    h.script_dump(&["DISK mbr", "PART 1 c", "PART 2 83", "PART 3 7", "PART 20 c"]);

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert_eq!(volume_ids(&disk), vec!["public:8,17", "public:8,19"]);
    assert!(h.commands.calls_to("blkid").is_empty());
}

#[tokio::test]
async fn rescan_replaces_existing_volumes() {
    let h = Harness::new();
    h.script_dump(&["DISK mbr", "PART 1 c"]);
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    let basic = format!("PART 2 {GPT_BASIC_DATA} {PART_GUID}");
    h.script_dump(&["DISK gpt", basic.as_str()]);
    disk.read_partitions(&h.ctx).await.unwrap();

    assert_eq!(volume_ids(&disk), vec!["public:8,18"]);
    assert_eq!(h.listener.states_of("public:8,17").last(), Some(&VolumeState::Removed));
}

#[tokio::test]
async fn failed_dump_still_reports_scan() {
    let h = Harness::new();
    h.commands.on("sgdisk", "--android-dump", output(4, &[]));

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();
    h.listener.clear();

    let err = disk.read_partitions(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind, StorageErrorKind::Internal);
    assert_eq!(h.listener.count("disk_scanned", "disk:8,16"), 1);
}

#[tokio::test]
async fn scsi_metadata_comes_from_sysfs_vendor() {
    let h = Harness::new();
    h.system.set_sysfs(
        format!("/sys{USB_SYS_PATH}/device/vendor"),
        "SanDisk \n",
    );

    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    assert_eq!(disk.label(), "SanDisk");
    assert_eq!(disk.size(), 64 * GIB);
    assert!(h.listener.events().contains(&StorageEvent::DiskMetadataChanged {
        disk_id: "disk:8,16".to_string(),
        size: 64 * GIB,
        label: "SanDisk".to_string(),
        sys_path: USB_SYS_PATH.to_string(),
    }));
}

#[tokio::test]
async fn mmc_disk_uses_manufacturer_and_perdev_minors() {
    let h = Harness::new();
    let sys_path = "/devices/platform/soc/mmc1/mmc1:0001/block/mmcblk1";
    h.system.set_sysfs(format!("/sys{sys_path}/device/manfid"), "0x000003\n");
    h.system
        .set_sysfs("/sys/module/mmcblk/parameters/perdev_minors", "8\n");
    h.script_dump(&["DISK mbr", "PART 1 c", "PART 9 c"]);

    let mut disk = Disk::new(sys_path, DeviceNumber::new(179, 0), "sdcard", DiskFlag::Sd.into());
    disk.create(&h.ctx).await.unwrap();

    assert_eq!(disk.label(), "SanDisk");
    assert_eq!(volume_ids(&disk), vec!["public:179,1"]);
}

#[tokio::test]
async fn unknown_major_still_announces_metadata() {
    let h = Harness::new();
    let mut disk = Disk::new("/devices/ide/hda", DeviceNumber::new(3, 0), "ide", DiskFlag::Usb.into());

    let err = disk.read_metadata(&h.ctx).await.unwrap_err();

    assert_eq!(err.kind, StorageErrorKind::Unsupported);
    assert_eq!(h.listener.count("disk_metadata_changed", "disk:3,0"), 1);
}

#[tokio::test]
async fn destroy_removes_volumes_then_disk() {
    let h = Harness::new();
    h.script_dump(&["DISK mbr", "PART 1 c"]);
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();

    disk.destroy(&h.ctx).await.unwrap();

    assert!(disk.volumes().is_empty());
    assert!(!disk.is_created());
    let volume_gone = h.journal_index("event:volume_destroyed:public:8,17").unwrap();
    let disk_gone = h.journal_index("event:disk_destroyed:disk:8,16").unwrap();
    assert!(volume_gone < disk_gone);
    assert!(h.system.nodes().is_empty());
}

#[tokio::test]
async fn mixed_ratio_out_of_range_never_touches_the_disk() {
    let h = Harness::new();
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();
    h.commands.clear_calls();

    for ratio in [0, 9, 91, 100] {
        let err = disk.partition_mixed(&h.ctx, ratio).await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput, "ratio {ratio}");
    }
    assert!(h.commands.calls().is_empty());
    assert!(!h.ctx.config.paths.key_dir.exists());
}

#[tokio::test]
async fn key_write_failure_leaves_table_untouched() {
    let h = Harness::with_config(|config| {
        config.paths.key_dir = PathBuf::from("/dev/null/keys");
    });
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();
    h.commands.clear_calls();

    assert!(disk.partition_private(&h.ctx).await.is_err());
    assert!(h.commands.calls_to("sgdisk").is_empty());
    assert!(!disk.is_just_partitioned());
}

#[tokio::test]
async fn public_layout_zaps_then_writes_single_partition() {
    let h = Harness::new();
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();
    h.commands.clear_calls();

    disk.partition_public(&h.ctx).await.unwrap();

    let sgdisk = h.commands.calls_to("sgdisk");
    assert_eq!(sgdisk.len(), 2);
    assert_eq!(sgdisk[0][0], "--zap-all");
    assert!(sgdisk[1].contains(&"--typecode=0:0c00".to_string()));
    assert!(disk.is_just_partitioned());
}

#[tokio::test]
async fn mixed_layout_then_rescan_formats_both_halves_silently() {
    let h = Harness::new();
    let mut disk = h.usb_disk();
    disk.create(&h.ctx).await.unwrap();
    h.commands.clear_calls();
    h.listener.clear();

    disk.partition_mixed(&h.ctx, 30).await.unwrap();

    let sgdisk = h.commands.calls_to("sgdisk");
    assert_eq!(sgdisk[0][0], "--zap-all");
    let table = &sgdisk[1];
    assert!(table.contains(&"--new=0:0:+19660M".to_string()));
    let part_guid = table
        .iter()
        .find_map(|arg| arg.strip_prefix("--partition-guid=0:"))
        .unwrap()
        .to_string();
    let key = h.ctx.keys.read_key(&part_guid).await.unwrap().unwrap();
    assert_eq!(key.len(), 32);

    let basic = format!("PART 1 {GPT_BASIC_DATA} 11111111-2222-3333-4444-555555555555");
    let meta = format!("PART 2 {GPT_ANDROID_META} 66666666-7777-8888-9999-000000000000");
    let expand = format!("PART 3 {GPT_ANDROID_EXPAND} {part_guid}");
    h.script_dump(&["DISK gpt", basic.as_str(), meta.as_str(), expand.as_str()]);
    disk.read_partitions(&h.ctx).await.unwrap();

    assert_eq!(volume_ids(&disk), vec!["public:8,17", "private:8,19"]);
    assert_eq!(disk.volumes()[1].base().part_guid(), Some(part_guid.as_str()));
    assert!(!disk.is_just_partitioned());

    let exfat = h.commands.calls_to("mkfs.exfat");
    assert_eq!(exfat.len(), 1);
    assert_eq!(exfat[0].last().unwrap(), "/dev/block/vold/public:8,17");
    let ext4 = h.commands.calls_to("mke2fs");
    assert_eq!(ext4.len(), 1);
    assert_eq!(ext4[0].last().unwrap(), "/dev/mapper/private:8,19");

    // The silent format pass announces nothing
    assert_eq!(h.listener.count("volume_created", "public:8,17"), 1);
    assert_eq!(h.listener.count("volume_created", "private:8,19"), 1);
    assert_eq!(h.listener.states_of("public:8,17"), vec![VolumeState::Unmounted]);
    assert_eq!(h.crypto.reverts(), vec!["private:8,19".to_string()]);
}
