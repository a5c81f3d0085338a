//! Mirror executor tests against a recording command runner.

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::sync::Arc;
use tempfile::TempDir;
use vcsmirror_test_utils::RecordingRunner;
use vcsmirror_vcs::{
    CommandOutput, MirrorExecutor, MirrorLayout, MirrorState, RemoteEndpoint, VcsError,
};

struct Harness {
    _dir: TempDir,
    runner: Arc<RecordingRunner>,
    executor: MirrorExecutor,
    layout: MirrorLayout,
}

#[fixture]
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::simulating_tools());
    let executor = MirrorExecutor::new(runner.clone()).with_ssh_command("ssh -F /srv/ssh/config");
    let layout = MirrorLayout::new(dir.path().join("pull").join("1"), "42");
    Harness {
        _dir: dir,
        runner,
        executor,
        layout,
    }
}

fn endpoints() -> (RemoteEndpoint, RemoteEndpoint) {
    let source = RemoteEndpoint::parse("https://github.com/acme/widget.git")
        .unwrap()
        .with_flags(true, false);
    let target = RemoteEndpoint::parse("git@gitlab.example.com_1:mirrors/widget.git")
        .unwrap()
        .with_flags(false, true);
    (source, target)
}

#[rstest]
fn first_run_clones_links_and_syncs(harness: Harness) {
    let (source, target) = endpoints();
    let report = harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    assert!(report.cloned);
    assert_eq!(
        report.transitions,
        vec![
            MirrorState::Absent,
            MirrorState::Cloning,
            MirrorState::Linked,
            MirrorState::Syncing,
            MirrorState::Done,
        ]
    );
    assert!(harness.layout.project_path().join("HEAD").exists());

    let project = harness.layout.project_path();
    assert_eq!(
        harness.runner.command_lines(),
        vec![
            format!(
                "git clone --mirror https://github.com:443/acme/widget.git {}",
                project.display()
            ),
            "git remote add target ssh://git@gitlab.example.com_1:22/mirrors/widget.git".to_string(),
            "git fetch --force origin".to_string(),
            "git push --mirror --prune target".to_string(),
        ]
    );
}

#[rstest]
fn second_run_only_fetches_and_pushes(harness: Harness) {
    let (source, target) = endpoints();
    harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    let source_url = source.url();
    let target_url = target.url();
    harness.runner.on("git", &["remote", "get-url", "origin"], move |_| {
        CommandOutput::success(format!("{source_url}\n"))
    });
    harness.runner.on("git", &["remote", "get-url", "target"], move |_| {
        CommandOutput::success(format!("{target_url}\n"))
    });
    harness.runner.clear_calls();

    let report = harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    assert!(!report.cloned);
    assert_eq!(
        report.transitions,
        vec![MirrorState::Linked, MirrorState::Syncing, MirrorState::Done]
    );
    assert_eq!(harness.runner.count("git", &["clone"]), 0);
    assert_eq!(harness.runner.count("git", &["remote", "add"]), 0);
    assert_eq!(harness.runner.count("git", &["fetch"]), 1);
    assert_eq!(harness.runner.count("git", &["push"]), 1);
}

#[rstest]
fn changed_source_url_is_updated_in_place(harness: Harness) {
    let (source, target) = endpoints();
    harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    harness.runner.on("git", &["remote", "get-url"], |_| {
        CommandOutput::success("https://old.example.com/acme/widget.git\n")
    });
    harness.runner.clear_calls();

    harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    assert_eq!(harness.runner.count("git", &["remote", "set-url", "origin"]), 1);
    assert_eq!(harness.runner.count("git", &["remote", "set-url", "target"]), 1);
    assert_eq!(harness.runner.count("git", &["clone"]), 0);
}

#[rstest]
fn every_git_call_carries_the_ssh_command(harness: Harness) {
    let (source, target) = endpoints();
    harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();

    for call in harness.runner.calls() {
        assert!(
            call.env
                .iter()
                .any(|(k, v)| k == "GIT_SSH_COMMAND" && v == "ssh -F /srv/ssh/config"),
            "missing ssh command on {call}"
        );
    }
}

#[rstest]
fn mercurial_clone_is_repacked(harness: Harness) {
    let source = RemoteEndpoint::parse("hg+https://hg.example.org/repo").unwrap();
    harness
        .executor
        .create_or_update(&harness.layout, &source, None)
        .unwrap();

    assert_eq!(harness.runner.count("git", &["gc", "--aggressive"]), 1);
    assert_eq!(harness.runner.count("git", &["push"]), 0);
}

#[rstest]
fn svn_source_uses_bridge(harness: Harness) {
    let source = RemoteEndpoint::parse("svn+https://svn.example.org/repo").unwrap();
    let target = RemoteEndpoint::parse("git@gitlab.example.com_1:mirrors/repo.git").unwrap();

    let report = harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap();
    assert!(report.cloned);

    let lines = harness.runner.command_lines();
    assert!(lines[0].starts_with("git svn clone https://svn.example.org:443/repo "));
    assert_eq!(
        &lines[2..],
        &[
            "git reset --hard".to_string(),
            "git svn fetch".to_string(),
            "git svn rebase".to_string(),
            "git push --all target".to_string(),
        ]
    );
}

#[rstest]
fn failing_fetch_ends_in_failed_state(harness: Harness) {
    let (source, target) = endpoints();
    harness
        .runner
        .fail("git", &["fetch"], "fatal: unable to access: Connection timed out");

    let err = harness
        .executor
        .create_or_update(&harness.layout, &source, Some(&target))
        .unwrap_err();

    assert!(matches!(err, VcsError::FetchFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(harness.runner.count("git", &["push"]), 0);
}

#[rstest]
fn clone_that_leaves_nothing_on_disk_is_reported(harness: Harness) {
    let (source, _) = endpoints();
    harness
        .runner
        .on("git", &["clone"], |_| CommandOutput::success(""));

    let err = harness
        .executor
        .create_or_update(&harness.layout, &source, None)
        .unwrap_err();
    assert!(matches!(err, VcsError::StorageMissing { .. }));
}

#[rstest]
fn sync_requires_existing_clone(harness: Harness) {
    let (source, target) = endpoints();
    std::fs::create_dir_all(&harness.layout.namespace).unwrap();

    let err = harness
        .executor
        .sync(&harness.layout, &source, Some(&target))
        .unwrap_err();
    assert!(matches!(err, VcsError::StorageMissing { .. }));
    assert!(harness.runner.calls().is_empty());
}
