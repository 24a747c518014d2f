//! In-memory collaborators shared by unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::attach::{ConnectionParams, IscsiError, IscsiSessions, MountError, MountRef, MountUtility};
use crate::capacity::GIB;
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::nas::{
    ChapOptions, LunIndex, LunInfo, LunSpec, LunStatus, NasApi, NasError, NasFuture,
    PoolCapacity, Session, TargetIndex, TargetInfo, TargetOptions, TargetStatus,
};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Appliance operation a [`FakeNas`] can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailurePoint {
    /// [`NasApi::login`].
    Login,
    /// [`NasApi::list_targets`].
    ListTargets,
    /// [`NasApi::create_target`].
    CreateTarget,
    /// [`NasApi::create_initiator_binding`].
    CreateInitiator,
    /// [`NasApi::create_lun`].
    CreateLun,
    /// [`NasApi::get_lun`].
    GetLun,
    /// [`NasApi::attach_lun`].
    AttachLun,
    /// [`NasApi::delete_target`].
    DeleteTarget,
    /// [`NasApi::delete_lun`].
    DeleteLun,
    /// [`NasApi::pool_capacity`].
    PoolCapacity,
}

impl FailurePoint {
    const fn operation(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ListTargets => "list_targets",
            Self::CreateTarget => "add_target",
            Self::CreateInitiator => "add_init",
            Self::CreateLun => "add_lun",
            Self::GetLun => "get_lun",
            Self::AttachLun => "attach_lun",
            Self::DeleteTarget => "remove_target",
            Self::DeleteLun => "remove_lun",
            Self::PoolCapacity => "pool_capacity",
        }
    }

    fn default_error(self) -> NasError {
        match self {
            Self::Login => NasError::Auth {
                operation: self.operation().to_owned(),
            },
            _ => NasError::Appliance {
                operation: self.operation().to_owned(),
                code: -3,
            },
        }
    }
}

/// Call recorded by [`FakeNas`], in issue order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NasCall {
    /// Login.
    Login,
    /// Target listing.
    ListTargets,
    /// Target creation with the requested name.
    CreateTarget(String),
    /// Initiator binding for a target.
    CreateInitiator(TargetIndex),
    /// LUN allocation.
    CreateLun {
        /// Requested LUN name.
        name: String,
        /// Requested size in allocation units.
        size_units: u64,
    },
    /// LUN status read.
    GetLun(LunIndex),
    /// LUN mapping.
    AttachLun {
        /// LUN being mapped.
        lun: LunIndex,
        /// Target receiving it.
        target: TargetIndex,
    },
    /// Target removal.
    DeleteTarget(TargetIndex),
    /// LUN removal.
    DeleteLun(LunIndex),
    /// Pool capacity read.
    PoolCapacity(u32),
}

#[derive(Debug)]
struct FakeTarget {
    index: TargetIndex,
    name: String,
    lun_indices: Vec<LunIndex>,
}

#[derive(Debug)]
struct FakeLun {
    name: String,
    capacity_bytes: u64,
    polls_remaining: u32,
    outcome: LunStatus,
}

#[derive(Debug)]
struct NasState {
    next_target: u32,
    next_lun: u32,
    targets: Vec<FakeTarget>,
    luns: BTreeMap<LunIndex, FakeLun>,
    failures: BTreeMap<FailurePoint, NasError>,
    creating_polls: u32,
    lun_outcome: LunStatus,
    hidden: BTreeSet<String>,
    pool: PoolCapacity,
    calls: Vec<NasCall>,
    logins: usize,
}

impl Default for NasState {
    fn default() -> Self {
        Self {
            next_target: 1,
            next_lun: 1,
            targets: Vec::new(),
            luns: BTreeMap::new(),
            failures: BTreeMap::new(),
            creating_polls: 0,
            lun_outcome: LunStatus::Ready,
            hidden: BTreeSet::new(),
            pool: PoolCapacity {
                capacity_bytes: 1024 * GIB,
                free_bytes: 512 * GIB,
            },
            calls: Vec::new(),
            logins: 0,
        }
    }
}

impl NasState {
    fn check(&self, point: FailurePoint) -> Result<(), NasError> {
        self.failures.get(&point).map_or(Ok(()), |err| Err(err.clone()))
    }

    fn iqn(index: TargetIndex, name: &str) -> String {
        format!("iqn.2004-04.com.qnap:ts-fake:iscsi.{name}.{index}")
    }

    fn target_position(&self, index: TargetIndex) -> Option<usize> {
        self.targets.iter().position(|target| target.index == index)
    }
}

/// In-memory appliance implementing [`NasApi`].
///
/// Clones share state, so a test can keep a handle while the provisioner
/// owns another.
#[derive(Clone, Debug, Default)]
pub struct FakeNas {
    state: Arc<Mutex<NasState>>,
}

impl FakeNas {
    /// Empty appliance where every call succeeds and LUNs are ready at once.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call at `point` fail with the default error: an
    /// authentication error for login, result code `-3` otherwise.
    pub fn fail_on(&self, point: FailurePoint) {
        lock(&self.state)
            .failures
            .insert(point, point.default_error());
    }

    /// Makes every later call at `point` fail with `error`.
    pub fn fail_with(&self, point: FailurePoint, error: NasError) {
        lock(&self.state).failures.insert(point, error);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Number of reads a new LUN reports as creating before settling.
    pub fn set_creating_polls(&self, polls: u32) {
        lock(&self.state).creating_polls = polls;
    }

    /// Status new LUNs settle in once creation finishes.
    pub fn set_lun_outcome(&self, status: LunStatus) {
        lock(&self.state).lun_outcome = status;
    }

    /// Omits targets named `name` from listings.
    pub fn hide_target(&self, name: &str) {
        lock(&self.state).hidden.insert(name.to_owned());
    }

    /// Replaces the pool figures.
    pub fn set_pool(&self, pool: PoolCapacity) {
        lock(&self.state).pool = pool;
    }

    /// Adds a target with one ready LUN of `capacity_bytes`, bypassing the
    /// call log.
    #[must_use]
    pub fn seed_target(&self, name: &str, capacity_bytes: u64) -> TargetIndex {
        let mut state = lock(&self.state);
        let index = TargetIndex::new(state.next_target);
        let lun = LunIndex::new(state.next_lun);
        state.next_target += 1;
        state.next_lun += 1;
        state.luns.insert(
            lun,
            FakeLun {
                name: name.to_owned(),
                capacity_bytes,
                polls_remaining: 0,
                outcome: LunStatus::Ready,
            },
        );
        state.targets.push(FakeTarget {
            index,
            name: name.to_owned(),
            lun_indices: vec![lun],
        });
        index
    }

    /// Names of every target, hidden ones included, in creation order.
    #[must_use]
    pub fn target_names(&self) -> Vec<String> {
        lock(&self.state)
            .targets
            .iter()
            .map(|target| target.name.clone())
            .collect()
    }

    /// Number of LUNs on the appliance.
    #[must_use]
    pub fn lun_count(&self) -> usize {
        lock(&self.state).luns.len()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<NasCall> {
        lock(&self.state).calls.clone()
    }

    /// Calls received so far, excluding logins and listings.
    #[must_use]
    pub fn mutations(&self) -> Vec<NasCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                !matches!(
                    call,
                    NasCall::Login | NasCall::ListTargets | NasCall::GetLun(_)
                )
            })
            .collect()
    }

    /// Number of login calls received.
    #[must_use]
    pub fn login_count(&self) -> usize {
        lock(&self.state).logins
    }

    fn call<T: Send + 'static>(
        &self,
        record: NasCall,
        point: FailurePoint,
        apply: impl FnOnce(&mut NasState) -> Result<T, NasError>,
    ) -> NasFuture<'_, T> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(record);
            state.check(point).and_then(|()| apply(&mut state))
        };
        Box::pin(async move { result })
    }
}

impl NasApi for FakeNas {
    fn login(&self) -> NasFuture<'_, Session> {
        self.call(NasCall::Login, FailurePoint::Login, |state| {
            state.logins += 1;
            Ok(Session::new(format!("fake-sid-{}", state.logins)))
        })
    }

    fn list_targets<'a>(&'a self, _session: &'a Session) -> NasFuture<'a, Vec<TargetInfo>> {
        self.call(NasCall::ListTargets, FailurePoint::ListTargets, |state| {
            Ok(state
                .targets
                .iter()
                .filter(|target| !state.hidden.contains(&target.name))
                .map(|target| TargetInfo {
                    index: target.index,
                    name: target.name.clone(),
                    iqn: NasState::iqn(target.index, &target.name),
                    status: TargetStatus::Ready,
                    lun_indices: target.lun_indices.clone(),
                })
                .collect())
        })
    }

    fn create_target<'a>(
        &'a self,
        _session: &'a Session,
        name: &'a str,
        _options: TargetOptions,
    ) -> NasFuture<'a, TargetIndex> {
        self.call(
            NasCall::CreateTarget(name.to_owned()),
            FailurePoint::CreateTarget,
            |state| {
                let index = TargetIndex::new(state.next_target);
                state.next_target += 1;
                state.targets.push(FakeTarget {
                    index,
                    name: name.to_owned(),
                    lun_indices: Vec::new(),
                });
                Ok(index)
            },
        )
    }

    fn create_initiator_binding<'a>(
        &'a self,
        _session: &'a Session,
        target: TargetIndex,
        _chap: &'a ChapOptions,
    ) -> NasFuture<'a, ()> {
        self.call(
            NasCall::CreateInitiator(target),
            FailurePoint::CreateInitiator,
            |state| {
                state
                    .target_position(target)
                    .map(|_| ())
                    .ok_or_else(|| NasError::from_result("add_init", -1))
            },
        )
    }

    fn create_lun<'a>(
        &'a self,
        _session: &'a Session,
        spec: &'a LunSpec,
    ) -> NasFuture<'a, LunIndex> {
        self.call(
            NasCall::CreateLun {
                name: spec.name.clone(),
                size_units: spec.size_units,
            },
            FailurePoint::CreateLun,
            |state| {
                let index = LunIndex::new(state.next_lun);
                state.next_lun += 1;
                let lun = FakeLun {
                    name: spec.name.clone(),
                    capacity_bytes: spec.size_units.saturating_mul(GIB),
                    polls_remaining: state.creating_polls,
                    outcome: state.lun_outcome,
                };
                state.luns.insert(index, lun);
                Ok(index)
            },
        )
    }

    fn get_lun<'a>(&'a self, _session: &'a Session, lun: LunIndex) -> NasFuture<'a, LunInfo> {
        self.call(NasCall::GetLun(lun), FailurePoint::GetLun, |state| {
            let found = state
                .luns
                .get_mut(&lun)
                .ok_or_else(|| NasError::from_result("get_lun", -2))?;
            let status = if found.polls_remaining > 0 {
                found.polls_remaining -= 1;
                LunStatus::Creating
            } else {
                found.outcome
            };
            Ok(LunInfo {
                index: lun,
                name: found.name.clone(),
                status,
                capacity_bytes: found.capacity_bytes,
                sector_size: 512,
            })
        })
    }

    fn attach_lun<'a>(
        &'a self,
        _session: &'a Session,
        lun: LunIndex,
        target: TargetIndex,
    ) -> NasFuture<'a, ()> {
        self.call(
            NasCall::AttachLun { lun, target },
            FailurePoint::AttachLun,
            |state| {
                if !state.luns.contains_key(&lun) {
                    return Err(NasError::from_result("attach_lun", -2));
                }
                let position = state
                    .target_position(target)
                    .ok_or_else(|| NasError::from_result("attach_lun", -1))?;
                if let Some(entry) = state.targets.get_mut(position) {
                    entry.lun_indices.push(lun);
                }
                Ok(())
            },
        )
    }

    fn delete_target<'a>(
        &'a self,
        _session: &'a Session,
        target: TargetIndex,
    ) -> NasFuture<'a, ()> {
        self.call(
            NasCall::DeleteTarget(target),
            FailurePoint::DeleteTarget,
            |state| {
                let position = state
                    .target_position(target)
                    .ok_or_else(|| NasError::from_result("remove_target", -1))?;
                state.targets.remove(position);
                Ok(())
            },
        )
    }

    fn delete_lun<'a>(
        &'a self,
        _session: &'a Session,
        lun: LunIndex,
        _background: bool,
    ) -> NasFuture<'a, ()> {
        self.call(NasCall::DeleteLun(lun), FailurePoint::DeleteLun, |state| {
            state.luns.remove(&lun);
            for target in &mut state.targets {
                target.lun_indices.retain(|mapped| *mapped != lun);
            }
            Ok(())
        })
    }

    fn pool_capacity<'a>(
        &'a self,
        _session: &'a Session,
        pool_id: u32,
    ) -> NasFuture<'a, PoolCapacity> {
        self.call(
            NasCall::PoolCapacity(pool_id),
            FailurePoint::PoolCapacity,
            |state| Ok(state.pool),
        )
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Program and arguments joined by spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Command runner answering from a queue of canned outputs.
///
/// An empty queue yields a spawn error, so unexpected commands fail loudly.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl ScriptedRunner {
    /// Runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Queues a zero exit status.
    pub fn push_success(&self) {
        lock(&self.state)
            .responses
            .push_back(CommandOutput::with_code(0));
    }

    /// Queues an explicit output.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.state).responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut state = lock(&self.state);
        state.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        });
        state
            .responses
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    live: BTreeSet<String>,
    connects: usize,
    disconnects: Vec<String>,
    fail_connect: bool,
    fail_disconnect: bool,
}

/// In-memory iSCSI initiator.
#[derive(Clone, Debug, Default)]
pub struct FakeSessions {
    state: Arc<Mutex<SessionState>>,
}

impl FakeSessions {
    /// Initiator where every login succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later connects fail.
    pub fn fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    /// Makes later disconnects fail.
    pub fn fail_disconnect(&self, fail: bool) {
        lock(&self.state).fail_disconnect = fail;
    }

    /// Whether a session to `iqn` is open.
    #[must_use]
    pub fn is_connected(&self, iqn: &str) -> bool {
        lock(&self.state).live.contains(iqn)
    }

    /// Number of connect calls.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    /// IQNs disconnected, in order.
    #[must_use]
    pub fn disconnects(&self) -> Vec<String> {
        lock(&self.state).disconnects.clone()
    }
}

impl IscsiSessions for FakeSessions {
    fn connect(&self, params: &ConnectionParams) -> Result<Utf8PathBuf, IscsiError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail_connect {
            return Err(IscsiError::Login {
                iqn: params.iqn.clone(),
                message: String::from("simulated login failure"),
            });
        }
        state.live.insert(params.iqn.clone());
        let portal = params.primary_portal().unwrap_or("none");
        Ok(Utf8PathBuf::from(format!(
            "/dev/disk/by-path/ip-{portal}-iscsi-{}-lun-{}",
            params.iqn, params.lun
        )))
    }

    fn disconnect(&self, iqn: &str, _portals: &[String]) -> Result<(), IscsiError> {
        let mut state = lock(&self.state);
        if state.fail_disconnect {
            return Err(IscsiError::Logout {
                iqn: iqn.to_owned(),
                message: String::from("simulated logout failure"),
            });
        }
        state.live.remove(iqn);
        state.disconnects.push(iqn.to_owned());
        Ok(())
    }
}

/// Mount recorded by [`FakeMounter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeMount {
    /// Mounted device.
    pub device: Utf8PathBuf,
    /// Mount point.
    pub target: Utf8PathBuf,
    /// Filesystem type requested.
    pub fs_type: String,
    /// Mount options.
    pub options: Vec<String>,
}

#[derive(Debug, Default)]
struct MounterState {
    mounts: Vec<FakeMount>,
    fail_mount: bool,
}

/// In-memory mount table.
#[derive(Clone, Debug, Default)]
pub struct FakeMounter {
    state: Arc<Mutex<MounterState>>,
}

impl FakeMounter {
    /// Empty mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later mounts fail.
    pub fn fail_mount(&self, fail: bool) {
        lock(&self.state).fail_mount = fail;
    }

    /// Adds a mount made outside the manager.
    pub fn mount_external(&self, device: &Utf8Path, target: &Utf8Path) {
        lock(&self.state).mounts.push(FakeMount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: String::from("ext4"),
            options: Vec::new(),
        });
    }

    /// Current mounts.
    #[must_use]
    pub fn mounts(&self) -> Vec<FakeMount> {
        lock(&self.state).mounts.clone()
    }
}

fn failed(program: &str) -> MountError {
    MountError::Command(CommandError::Failed {
        program: program.to_owned(),
        code: Some(32),
        stderr: String::from("simulated failure"),
    })
}

impl MountUtility for FakeMounter {
    fn is_mount_point(&self, path: &Utf8Path) -> Result<bool, MountError> {
        Ok(lock(&self.state)
            .mounts
            .iter()
            .any(|mount| mount.target == path))
    }

    fn format_and_mount(
        &self,
        device: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        if state.fail_mount {
            return Err(failed("mount"));
        }
        state.mounts.push(FakeMount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_owned(),
            options: options.to_vec(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        let position = state
            .mounts
            .iter()
            .rposition(|mount| mount.target == target)
            .ok_or_else(|| failed("umount"))?;
        state.mounts.remove(position);
        Ok(())
    }

    fn device_and_ref_count(&self, target: &Utf8Path) -> Result<Option<MountRef>, MountError> {
        let state = lock(&self.state);
        Ok(state
            .mounts
            .iter()
            .rfind(|mount| mount.target == target)
            .map(|found| MountRef {
                device: found.device.clone(),
                ref_count: state
                    .mounts
                    .iter()
                    .filter(|mount| mount.device == found.device)
                    .count(),
            }))
    }

    fn device_ref_count(&self, device: &Utf8Path) -> Result<usize, MountError> {
        Ok(lock(&self.state)
            .mounts
            .iter()
            .filter(|mount| mount.device == device)
            .count())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or clears (`None`) variables while holding a global
    /// mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
