//! Recording fakes for every collaborator, wired into a ready [`Context`]
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vold_contracts::{
    AppFuseBridge, CommandOutput, CommandRunner, CryptoBackend, EventListener, OverlayHandle,
    OverlayLauncher, OverlayRequest, ProcessEntry, ProcessTable, RemountPlan, StorageError,
    StorageEvent, SystemOps,
};
use vold_service::{Adapters, Context, DaemonConfig, Disk, DiskSource, VolumeManager};
use vold_types::{
    BlockAction, BlockEvent, DeviceNumber, DiskFlag, DiskFlags, Filesystem, MountRequest,
    VolumeState,
};

pub const GIB: u64 = 1024 * 1024 * 1024;

pub const ROOT_NAMESPACE: &str = "mnt:[4026531840]";

pub const USB_SYS_PATH: &str = "/devices/platform/xhci/usb1/1-1/block/sdb";

/// Ordered log shared by the fakes, for cross-collaborator ordering checks
pub type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

pub fn output(status: i32, stdout: &[&str]) -> CommandOutput {
    CommandOutput {
        status,
        stdout: stdout.iter().map(|line| line.to_string()).collect(),
        stderr: String::new(),
    }
}

struct Rule {
    program: String,
    arg: String,
    output: CommandOutput,
}

/// Succeeds with empty output unless a rule matches; newest rule wins
#[derive(Default)]
pub struct FakeCommands {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    rules: Mutex<Vec<Rule>>,
}

impl FakeCommands {
    /// Answer `program` with `output` whenever one of its arguments contains `arg`
    pub fn on(&self, program: &str, arg: &str, output: CommandOutput) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            arg: arg.to_string(),
            output,
        });
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for FakeCommands {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        let rules = self.rules.lock().unwrap();
        let scripted = rules
            .iter()
            .rev()
            .find(|rule| rule.program == program && args.iter().any(|a| a.contains(&rule.arg)));
        if let Some(rule) = scripted {
            return Ok(rule.output.clone());
        }

        if program == "losetup" && args.first().map(String::as_str) == Some("--find") {
            return Ok(output(0, &["/dev/block/loop7"]));
        }
        Ok(CommandOutput::default())
    }
}

pub struct FakeSystem {
    journal: Journal,
    generation: Arc<AtomicU64>,
    size: AtomicU64,
    nodes: Mutex<BTreeSet<PathBuf>>,
    prepared: Mutex<Vec<(PathBuf, u32, u32, u32)>>,
    mounts: Mutex<Vec<MountRequest>>,
    unmounts: Mutex<Vec<(PathBuf, bool)>>,
    removed_dirs: Mutex<Vec<PathBuf>>,
    killed: Mutex<Vec<PathBuf>>,
    symlinks: Mutex<Vec<(PathBuf, PathBuf)>>,
    sysfs: Mutex<HashMap<PathBuf, String>>,
    mount_table: Mutex<Vec<PathBuf>>,
    fail_mounts: AtomicBool,
}

impl FakeSystem {
    fn new(journal: Journal, generation: Arc<AtomicU64>) -> Self {
        Self {
            journal,
            generation,
            size: AtomicU64::new(64 * GIB),
            nodes: Mutex::default(),
            prepared: Mutex::default(),
            mounts: Mutex::default(),
            unmounts: Mutex::default(),
            removed_dirs: Mutex::default(),
            killed: Mutex::default(),
            symlinks: Mutex::default(),
            sysfs: Mutex::default(),
            mount_table: Mutex::default(),
            fail_mounts: AtomicBool::new(false),
        }
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::SeqCst);
    }

    pub fn set_sysfs(&self, path: impl Into<PathBuf>, value: &str) {
        self.sysfs.lock().unwrap().insert(path.into(), value.to_string());
    }

    pub fn set_mount_table(&self, paths: &[&str]) {
        *self.mount_table.lock().unwrap() = paths.iter().map(PathBuf::from).collect();
    }

    pub fn fail_mounts(&self, fail: bool) {
        self.fail_mounts.store(fail, Ordering::SeqCst);
    }

    pub fn nodes(&self) -> BTreeSet<PathBuf> {
        self.nodes.lock().unwrap().clone()
    }

    pub fn prepared(&self) -> Vec<(PathBuf, u32, u32, u32)> {
        self.prepared.lock().unwrap().clone()
    }

    pub fn mounts(&self) -> Vec<MountRequest> {
        self.mounts.lock().unwrap().clone()
    }

    pub fn unmounts(&self) -> Vec<(PathBuf, bool)> {
        self.unmounts.lock().unwrap().clone()
    }

    pub fn unmounted_paths(&self) -> Vec<PathBuf> {
        self.unmounts().into_iter().map(|(path, _)| path).collect()
    }

    pub fn removed_dirs(&self) -> Vec<PathBuf> {
        self.removed_dirs.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<PathBuf> {
        self.killed.lock().unwrap().clone()
    }

    pub fn symlinks(&self) -> Vec<(PathBuf, PathBuf)> {
        self.symlinks.lock().unwrap().clone()
    }
}

#[async_trait]
impl SystemOps for FakeSystem {
    async fn create_device_node(
        &self,
        path: &Path,
        _device: DeviceNumber,
    ) -> Result<(), StorageError> {
        record(&self.journal, format!("mknod:{}", path.display()));
        self.nodes.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn destroy_device_node(&self, path: &Path) -> Result<(), StorageError> {
        record(&self.journal, format!("rmnod:{}", path.display()));
        self.nodes.lock().unwrap().remove(path);
        Ok(())
    }

    async fn block_device_size(&self, _path: &Path) -> Result<u64, StorageError> {
        Ok(self.size.load(Ordering::SeqCst))
    }

    async fn read_sysfs_attr(&self, path: &Path) -> Result<Option<String>, StorageError> {
        Ok(self.sysfs.lock().unwrap().get(path).cloned())
    }

    async fn prepare_dir(
        &self,
        path: &Path,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(), StorageError> {
        self.prepared
            .lock()
            .unwrap()
            .push((path.to_path_buf(), mode, uid, gid));
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), StorageError> {
        self.removed_dirs.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn mount(&self, request: &MountRequest) -> Result<(), StorageError> {
        if self.fail_mounts.load(Ordering::SeqCst) {
            return Err(StorageError::internal("mount refused"));
        }
        record(&self.journal, format!("mount:{}", request.target.display()));
        self.mounts.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn force_unmount(&self, path: &Path, sleep: bool) -> Result<(), StorageError> {
        record(&self.journal, format!("umount:{}", path.display()));
        self.unmounts
            .lock()
            .unwrap()
            .push((path.to_path_buf(), sleep));
        Ok(())
    }

    async fn kill_processes_using_path(
        &self,
        path: &Path,
        _sleep: bool,
    ) -> Result<usize, StorageError> {
        self.killed.lock().unwrap().push(path.to_path_buf());
        Ok(0)
    }

    async fn device_id(&self, _path: &Path) -> Result<u64, StorageError> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn mount_points(&self) -> Result<Vec<PathBuf>, StorageError> {
        Ok(self.mount_table.lock().unwrap().clone())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), StorageError> {
        self.symlinks
            .lock()
            .unwrap()
            .push((target.to_path_buf(), link.to_path_buf()));
        Ok(())
    }
}

/// Flips the shared device-id generation on spawn, as a serving overlay would
pub struct FakeOverlay {
    generation: Arc<AtomicU64>,
    stall: AtomicBool,
    next_pid: AtomicU32,
    spawned: Mutex<Vec<OverlayRequest>>,
    stopped: Mutex<Vec<OverlayHandle>>,
}

impl FakeOverlay {
    fn new(generation: Arc<AtomicU64>) -> Self {
        Self {
            generation,
            stall: AtomicBool::new(false),
            next_pid: AtomicU32::new(100),
            spawned: Mutex::default(),
            stopped: Mutex::default(),
        }
    }

    /// Spawned overlays never start serving
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> Vec<OverlayRequest> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.lock().unwrap().len()
    }
}

#[async_trait]
impl OverlayLauncher for FakeOverlay {
    async fn spawn(&self, request: &OverlayRequest) -> Result<OverlayHandle, StorageError> {
        self.spawned.lock().unwrap().push(request.clone());
        if !self.stall.load(Ordering::SeqCst) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        Ok(OverlayHandle {
            pid: Some(self.next_pid.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn stop(&self, handle: OverlayHandle) -> Result<(), StorageError> {
        self.stopped.lock().unwrap().push(handle);
        Ok(())
    }
}

pub struct FakeCrypto {
    journal: Journal,
    setups: Mutex<Vec<(String, PathBuf)>>,
    reverts: Mutex<Vec<String>>,
    user_calls: Mutex<Vec<String>>,
}

impl FakeCrypto {
    pub const KEY_SIZE: usize = 32;

    fn new(journal: Journal) -> Self {
        Self {
            journal,
            setups: Mutex::default(),
            reverts: Mutex::default(),
            user_calls: Mutex::default(),
        }
    }

    pub fn setups(&self) -> Vec<(String, PathBuf)> {
        self.setups.lock().unwrap().clone()
    }

    pub fn reverts(&self) -> Vec<String> {
        self.reverts.lock().unwrap().clone()
    }

    pub fn user_calls(&self) -> Vec<String> {
        self.user_calls.lock().unwrap().clone()
    }

    fn user_call(&self, call: String) -> Result<(), StorageError> {
        self.user_calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl CryptoBackend for FakeCrypto {
    fn key_size(&self) -> usize {
        Self::KEY_SIZE
    }

    async fn setup(
        &self,
        name: &str,
        raw_device: &Path,
        _key: &[u8],
    ) -> Result<PathBuf, StorageError> {
        record(&self.journal, format!("crypto-setup:{name}"));
        self.setups
            .lock()
            .unwrap()
            .push((name.to_string(), raw_device.to_path_buf()));
        Ok(PathBuf::from("/dev/mapper").join(name))
    }

    async fn revert(&self, name: &str) -> Result<(), StorageError> {
        record(&self.journal, format!("crypto-revert:{name}"));
        self.reverts.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn create_user_key(
        &self,
        user_id: u32,
        serial: i32,
        ephemeral: bool,
    ) -> Result<(), StorageError> {
        self.user_call(format!("create:{user_id}:{serial}:{ephemeral}"))
    }

    async fn destroy_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        self.user_call(format!("destroy:{user_id}"))
    }

    async fn add_user_key_auth(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        self.user_call(format!("auth:{user_id}:{serial}:{token}:{secret}"))
    }

    async fn unlock_user_key(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        self.user_call(format!("unlock:{user_id}:{serial}:{token}:{secret}"))
    }

    async fn lock_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        self.user_call(format!("lock:{user_id}"))
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    entries: Mutex<Vec<ProcessEntry>>,
    remounted: Mutex<Vec<(i32, RemountPlan)>>,
}

impl FakeProcesses {
    pub fn add(&self, pid: i32, uid: u32, namespace: Option<&str>, exe: Option<&str>) {
        self.entries.lock().unwrap().push(ProcessEntry {
            pid,
            uid,
            mount_namespace: namespace.map(str::to_string),
            exe: exe.map(PathBuf::from),
        });
    }

    pub fn remounted(&self) -> Vec<(i32, RemountPlan)> {
        self.remounted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessTable for FakeProcesses {
    async fn root_mount_namespace(&self) -> Result<String, StorageError> {
        Ok(ROOT_NAMESPACE.to_string())
    }

    async fn list_processes(&self) -> Result<Vec<ProcessEntry>, StorageError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn remount_storage(&self, pid: i32, plan: &RemountPlan) -> Result<(), StorageError> {
        self.remounted.lock().unwrap().push((pid, plan.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAppFuse {
    mounted: Mutex<Vec<(u32, u32)>>,
}

impl FakeAppFuse {
    pub fn mounted(&self) -> Vec<(u32, u32)> {
        self.mounted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppFuseBridge for FakeAppFuse {
    async fn mount(&self, uid: u32, mount_id: u32) -> Result<OwnedFd, StorageError> {
        self.mounted.lock().unwrap().push((uid, mount_id));
        Ok(std::fs::File::open("/dev/null")?.into())
    }

    async fn unmount(&self, uid: u32, mount_id: u32) -> Result<(), StorageError> {
        let mut mounted = self.mounted.lock().unwrap();
        let before = mounted.len();
        mounted.retain(|entry| *entry != (uid, mount_id));
        if mounted.len() == before {
            return Err(StorageError::not_found(format!("appfuse {uid}_{mount_id}")));
        }
        Ok(())
    }

    async fn open_file(
        &self,
        uid: u32,
        mount_id: u32,
        _file_id: u32,
        _flags: i32,
    ) -> Result<OwnedFd, StorageError> {
        if !self.mounted.lock().unwrap().contains(&(uid, mount_id)) {
            return Err(StorageError::not_found(format!("appfuse {uid}_{mount_id}")));
        }
        Ok(std::fs::File::open("/dev/null")?.into())
    }
}

pub struct RecordingListener {
    journal: Journal,
    events: Mutex<Vec<StorageEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<StorageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Every state a volume has announced, in order
    pub fn states_of(&self, volume_id: &str) -> Vec<VolumeState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StorageEvent::VolumeStateChanged { volume_id: id, state } if id == volume_id => {
                    Some(state)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str, id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                event.kind() == kind
                    && (event.volume_id() == Some(id) || event.disk_id() == Some(id))
            })
            .count()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &StorageEvent) {
        let subject = event.volume_id().or(event.disk_id()).unwrap_or("-");
        record(&self.journal, format!("event:{}:{}", event.kind(), subject));
        self.events.lock().unwrap().push(event.clone());
    }
}

pub struct Harness {
    pub ctx: Arc<Context>,
    pub commands: Arc<FakeCommands>,
    pub system: Arc<FakeSystem>,
    pub overlay: Arc<FakeOverlay>,
    pub crypto: Arc<FakeCrypto>,
    pub processes: Arc<FakeProcesses>,
    pub appfuse: Arc<FakeAppFuse>,
    pub listener: Arc<RecordingListener>,
    pub journal: Journal,
    pub state_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut DaemonConfig)) -> Self {
        Self::build(tweak, &Filesystem::ALL)
    }

    /// Harness whose host only has tools for `filesystems`
    pub fn with_filesystems(filesystems: &[Filesystem]) -> Self {
        Self::build(|_| {}, filesystems)
    }

    fn build(tweak: impl FnOnce(&mut DaemonConfig), filesystems: &[Filesystem]) -> Self {
        let state_dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let generation = Arc::new(AtomicU64::new(0));

        let commands = Arc::new(FakeCommands::default());
        let system = Arc::new(FakeSystem::new(journal.clone(), generation.clone()));
        let overlay = Arc::new(FakeOverlay::new(generation));
        let crypto = Arc::new(FakeCrypto::new(journal.clone()));
        let processes = Arc::new(FakeProcesses::default());
        let appfuse = Arc::new(FakeAppFuse::default());
        let listener = Arc::new(RecordingListener {
            journal: journal.clone(),
            events: Mutex::default(),
        });

        let mut config = DaemonConfig::default();
        config.paths.key_dir = state_dir.path().join("keys");
        config.overlay.ready_timeout_ms = 200;
        config.overlay.poll_interval_ms = 1;
        config.unmount.force_unmount_delay_ms = 0;
        config.maintenance.step_delay_ms = 10;
        tweak(&mut config);

        let adapters = Adapters {
            commands: commands.clone(),
            system: system.clone(),
            crypto: crypto.clone(),
            overlay: overlay.clone(),
            processes: processes.clone(),
            appfuse: appfuse.clone(),
        };
        let supported: BTreeSet<Filesystem> = filesystems.iter().copied().collect();
        let ctx = Arc::new(Context::new(adapters, config, supported));
        ctx.notifier
            .set_listener(Some(listener.clone() as Arc<dyn EventListener>));

        Self {
            ctx,
            commands,
            system,
            overlay,
            crypto,
            processes,
            appfuse,
            listener,
            journal,
            state_dir,
        }
    }

    /// Manager accepting every device under `/devices/`
    pub fn manager(&self) -> VolumeManager {
        let source = DiskSource::new("/devices/*", "usb", DiskFlags::empty()).unwrap();
        VolumeManager::new(self.ctx.clone(), vec![source])
    }

    /// Manager that has run `start` and whose keyguard is down
    pub async fn started_manager(&self) -> VolumeManager {
        let manager = self.manager();
        manager.start().await.unwrap();
        manager.on_secure_keyguard_state_changed(false).await;
        manager
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Position of the first journal entry equal to `entry`
    pub fn journal_index(&self, entry: &str) -> Option<usize> {
        self.journal().iter().position(|e| e == entry)
    }

    /// Uncreated USB disk `disk:8,16`
    pub fn usb_disk(&self) -> Disk {
        Disk::new(
            USB_SYS_PATH,
            DeviceNumber::new(8, 16),
            "usb",
            DiskFlag::Usb.into(),
        )
    }

    pub fn script_dump(&self, lines: &[&str]) {
        self.commands.on("sgdisk", "--android-dump", output(0, lines));
    }

    /// blkid answer for any device path containing `device`
    pub fn script_blkid(&self, device: &str, fs_type: &str, fs_uuid: &str) {
        let type_line = format!("TYPE={fs_type}");
        let uuid_line = format!("UUID={fs_uuid}");
        self.commands.on(
            "blkid",
            device,
            output(0, &[type_line.as_str(), uuid_line.as_str(), "LABEL=android"]),
        );
    }
}

pub fn disk_event(action: BlockAction, major: u32, minor: u32, path: &str) -> BlockEvent {
    BlockEvent {
        action,
        event_path: path.to_string(),
        device: DeviceNumber::new(major, minor),
        dev_type: "disk".to_string(),
        dev_name: None,
    }
}
