//! Attach and detach against in-memory host primitives.

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::capability::{AccessMode, VolumeCapability};
use crate::context;
use crate::test_support::{FakeMounter, FakeSessions};

const IQN: &str = "iqn.2004-04.com.qnap:ts-fake:iscsi.pgdata.1";

struct Node {
    _temp: TempDir,
    base: Utf8PathBuf,
    sessions: FakeSessions,
    mounter: FakeMounter,
    manager: AttachmentManager<FakeSessions, FakeMounter>,
}

impl Node {
    fn target(&self, name: &str) -> Utf8PathBuf {
        self.base.join("pods").join(name).join("mount")
    }

    fn request(&self, name: &str) -> AttachRequest {
        request_at(self.target(name))
    }
}

fn request_at(target_path: Utf8PathBuf) -> AttachRequest {
    AttachRequest {
        volume_id: String::from("pgdata"),
        target_path,
        capability: Some(VolumeCapability::mount_writer()),
        read_only: false,
        volume_context: context::volume_context("10.0.0.5:3260", IQN, 0),
    }
}

fn node_with_store(store_root: impl FnOnce(&Utf8Path) -> Utf8PathBuf) -> Node {
    let temp = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non UTF-8 temp dir: {}", path.display()));
    let sessions = FakeSessions::new();
    let mounter = FakeMounter::new();
    let store = DescriptorStore::new(store_root(&base));
    let manager = AttachmentManager::new(sessions.clone(), mounter.clone(), store);
    Node {
        _temp: temp,
        base,
        sessions,
        mounter,
        manager,
    }
}

#[fixture]
fn node() -> Node {
    node_with_store(|base| base.join("state"))
}

fn attach_ok(node: &Node, request: &AttachRequest) -> AttachOutcome {
    node.manager
        .attach(request)
        .unwrap_or_else(|err| panic!("attach failed: {err}"))
}

fn detach_ok(node: &Node, target: &Utf8Path) -> DetachOutcome {
    node.manager
        .detach("pgdata", target)
        .unwrap_or_else(|err| panic!("detach failed: {err}"))
}

#[rstest]
fn attach_mounts_and_records_descriptor(node: Node) {
    let request = node.request("a");

    let outcome = attach_ok(&node, &request);

    assert!(matches!(outcome, AttachOutcome::Mounted { .. }), "unexpected outcome: {outcome:?}");
    assert!(node.sessions.is_connected(IQN));
    assert!(request.target_path.is_dir());

    let mounts = node.mounter.mounts();
    let mount = mounts
        .first()
        .unwrap_or_else(|| panic!("nothing mounted"));
    assert_eq!(mount.target, request.target_path);
    assert_eq!(mount.fs_type, "ext4");
    assert_eq!(mount.options, vec![String::from("rw")]);
    assert_eq!(mount.device, outcome.device());

    let descriptor = node
        .manager
        .store()
        .load("pgdata")
        .unwrap_or_else(|err| panic!("load failed: {err}"))
        .unwrap_or_else(|| panic!("descriptor missing"));
    assert_eq!(descriptor.connection.iqn, IQN);
    assert_eq!(descriptor.connection.portals, vec![String::from("10.0.0.5:3260")]);
    assert_eq!(descriptor.device, outcome.device());
}

#[rstest]
#[case::flag(true, AccessMode::SingleNodeWriter)]
#[case::mode(false, AccessMode::SingleNodeReaderOnly)]
fn read_only_attach_mounts_ro(node: Node, #[case] read_only: bool, #[case] mode: AccessMode) {
    let request = AttachRequest {
        read_only,
        capability: Some(VolumeCapability {
            access_mode: mode,
            ..VolumeCapability::mount_writer()
        }),
        ..node.request("ro")
    };

    let _outcome = attach_ok(&node, &request);

    let options: Vec<Vec<String>> = node
        .mounter
        .mounts()
        .into_iter()
        .map(|mount| mount.options)
        .collect();
    assert_eq!(options, vec![vec![String::from("ro")]]);
}

#[rstest]
fn requested_fs_type_and_flags_are_used(node: Node) {
    let request = AttachRequest {
        capability: Some(VolumeCapability {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: Some(AccessType::Mount {
                fs_type: String::from("xfs"),
                mount_flags: vec![String::from("noatime")],
            }),
        }),
        ..node.request("xfs")
    };

    let _outcome = attach_ok(&node, &request);

    let mounts = node.mounter.mounts();
    let mount = mounts
        .first()
        .unwrap_or_else(|| panic!("nothing mounted"));
    assert_eq!(mount.fs_type, "xfs");
    assert_eq!(
        mount.options,
        vec![String::from("rw"), String::from("noatime")]
    );
}

#[rstest]
fn repeated_attach_is_a_no_op(node: Node) {
    let request = node.request("a");
    let _first = attach_ok(&node, &request);

    let second = attach_ok(&node, &request);

    assert!(
        matches!(second, AttachOutcome::AlreadyMounted { .. }),
        "unexpected outcome: {second:?}"
    );
    assert_eq!(node.mounter.mounts().len(), 1);
}

#[test]
fn descriptor_failure_closes_session() {
    let node = node_with_store(|base| {
        let blocker = base.join("state");
        std::fs::write(&blocker, b"not a directory")
            .unwrap_or_else(|err| panic!("write blocker: {err}"));
        blocker
    });

    let result = node.manager.attach(&node.request("a"));

    assert!(
        matches!(result, Err(AttachError::Descriptor(_))),
        "unexpected outcome: {result:?}"
    );
    assert!(!node.sessions.is_connected(IQN));
    assert_eq!(node.sessions.disconnects(), vec![String::from(IQN)]);
    assert!(node.mounter.mounts().is_empty());
}

#[rstest]
fn connect_failure_is_reported(node: Node) {
    node.sessions.fail_connect(true);

    let result = node.manager.attach(&node.request("a"));

    assert!(
        matches!(result, Err(AttachError::Session(IscsiError::Login { .. }))),
        "unexpected outcome: {result:?}"
    );
    assert!(node.mounter.mounts().is_empty());
}

#[rstest]
#[case::no_capability(AttachRequest { capability: None, ..request_at(Utf8PathBuf::from("/nonexistent/target")) })]
#[case::no_volume(AttachRequest { volume_id: String::new(), ..request_at(Utf8PathBuf::from("/nonexistent/target")) })]
#[case::no_target(AttachRequest { target_path: Utf8PathBuf::new(), ..request_at(Utf8PathBuf::from("/nonexistent/target")) })]
#[case::block(AttachRequest {
    capability: Some(VolumeCapability::block_writer()),
    ..request_at(Utf8PathBuf::from("/nonexistent/target"))
})]
fn malformed_attach_is_rejected(node: Node, #[case] request: AttachRequest) {
    let result = node.manager.attach(&request);

    assert!(
        matches!(result, Err(AttachError::InvalidArgument(_))),
        "unexpected outcome: {result:?}"
    );
    assert_eq!(node.sessions.connect_count(), 0);
}

#[rstest]
fn context_without_iqn_is_rejected(node: Node) {
    let mut request = node.request("x");
    request.volume_context.remove(context::IQN);

    let result = node.manager.attach(&request);

    assert!(
        matches!(result, Err(AttachError::InvalidContext { key: "iqn", .. })),
        "unexpected outcome: {result:?}"
    );
}

#[rstest]
fn session_outlives_all_but_last_mount(node: Node) {
    let first = node.request("a");
    let second = node.request("b");
    let _one = attach_ok(&node, &first);
    let _two = attach_ok(&node, &second);

    let retained = detach_ok(&node, &first.target_path);
    assert_eq!(retained, DetachOutcome::SessionRetained { remaining: 1 });
    assert!(node.sessions.is_connected(IQN));
    assert!(node.sessions.disconnects().is_empty());
    assert!(!first.target_path.exists());

    let detached = detach_ok(&node, &second.target_path);
    assert_eq!(detached, DetachOutcome::Detached);
    assert!(!node.sessions.is_connected(IQN));
    assert!(node.mounter.mounts().is_empty());
    assert!(!second.target_path.exists());
    let stored = node
        .manager
        .store()
        .load("pgdata")
        .unwrap_or_else(|err| panic!("load failed: {err}"));
    assert!(stored.is_none(), "descriptor survived: {stored:?}");
}

#[rstest]
fn retried_detach_keeps_shared_session(node: Node) {
    let first = node.request("a");
    let second = node.request("b");
    let _one = attach_ok(&node, &first);
    let _two = attach_ok(&node, &second);
    let _retained = detach_ok(&node, &first.target_path);

    let retried = detach_ok(&node, &first.target_path);
    assert_eq!(retried, DetachOutcome::AlreadyDetached);

    // Unmounted but the directory survived, as after a crash before cleanup.
    std::fs::create_dir_all(&first.target_path).unwrap_or_else(|err| panic!("mkdir: {err}"));
    let resumed = detach_ok(&node, &first.target_path);
    assert_eq!(resumed, DetachOutcome::SessionRetained { remaining: 1 });
    assert!(!first.target_path.exists());

    assert!(node.sessions.is_connected(IQN));
    assert!(node.sessions.disconnects().is_empty());
    let targets: Vec<Utf8PathBuf> = node
        .mounter
        .mounts()
        .into_iter()
        .map(|mount| mount.target)
        .collect();
    assert_eq!(targets, vec![second.target_path.clone()]);

    let last = detach_ok(&node, &second.target_path);
    assert_eq!(last, DetachOutcome::Detached);
    assert!(!node.sessions.is_connected(IQN));
}

#[rstest]
fn detach_after_unmount_finishes_teardown(node: Node) {
    let request = node.request("a");
    let outcome = attach_ok(&node, &request);
    node.mounter
        .unmount(&request.target_path)
        .unwrap_or_else(|err| panic!("unmount failed: {err}"));

    let detached = detach_ok(&node, &request.target_path);

    assert_eq!(detached, DetachOutcome::Detached);
    assert_eq!(node.sessions.disconnects(), vec![String::from(IQN)]);
    assert!(!request.target_path.exists());
    assert!(node.mounter.device_ref_count(outcome.device()).is_ok_and(|count| count == 0));
    let stored = node
        .manager
        .store()
        .load("pgdata")
        .unwrap_or_else(|err| panic!("load failed: {err}"));
    assert!(stored.is_none(), "descriptor survived: {stored:?}");
}

fn blocked_target(node: &Node, name: &str) -> Utf8PathBuf {
    let blocker = node.base.join(name);
    std::fs::write(&blocker, b"not a directory").unwrap_or_else(|err| panic!("write blocker: {err}"));
    blocker.join("mount")
}

#[rstest]
fn target_dir_failure_closes_session(node: Node) {
    let request = request_at(blocked_target(&node, "blocked"));

    let result = node.manager.attach(&request);

    assert!(
        matches!(result, Err(AttachError::Filesystem { .. })),
        "unexpected outcome: {result:?}"
    );
    assert!(!node.sessions.is_connected(IQN));
    assert_eq!(node.sessions.disconnects(), vec![String::from(IQN)]);
    assert!(node.mounter.mounts().is_empty());
}

#[rstest]
fn target_dir_failure_keeps_session_of_earlier_attach(node: Node) {
    let first = node.request("a");
    let _one = attach_ok(&node, &first);

    let result = node.manager.attach(&request_at(blocked_target(&node, "blocked")));

    assert!(
        matches!(result, Err(AttachError::Filesystem { .. })),
        "unexpected outcome: {result:?}"
    );
    assert!(node.sessions.is_connected(IQN));
    assert!(node.sessions.disconnects().is_empty());
    assert_eq!(node.mounter.mounts().len(), 1);
}

#[rstest]
fn detach_of_missing_path_is_a_no_op(node: Node) {
    let outcome = detach_ok(&node, &node.target("never"));

    assert_eq!(outcome, DetachOutcome::AlreadyDetached);
    assert!(node.sessions.disconnects().is_empty());
}

#[rstest]
fn detach_without_descriptor_is_a_no_op(node: Node) {
    let target = node.target("orphan");
    std::fs::create_dir_all(&target).unwrap_or_else(|err| panic!("mkdir: {err}"));

    let outcome = detach_ok(&node, &target);

    assert_eq!(outcome, DetachOutcome::AlreadyDetached);
    assert!(node.sessions.disconnects().is_empty());
}

#[rstest]
fn repeated_detach_finishes_after_partial_failure(node: Node) {
    let request = node.request("a");
    let _attached = attach_ok(&node, &request);
    node.sessions.fail_disconnect(true);

    let failed = node.manager.detach("pgdata", &request.target_path);
    assert!(
        matches!(failed, Err(DetachError::Session(IscsiError::Logout { .. }))),
        "unexpected outcome: {failed:?}"
    );
    assert!(node.mounter.mounts().is_empty());

    node.sessions.fail_disconnect(false);
    let outcome = detach_ok(&node, &request.target_path);
    assert_eq!(outcome, DetachOutcome::Detached);
    assert!(!node.sessions.is_connected(IQN));
}

#[rstest]
fn detach_requires_identifiers(node: Node) {
    let no_volume = node.manager.detach("", &node.target("a"));
    assert!(matches!(no_volume, Err(DetachError::InvalidArgument(_))));

    let no_target = node.manager.detach("pgdata", Utf8Path::new(""));
    assert!(matches!(no_target, Err(DetachError::InvalidArgument(_))));
}
