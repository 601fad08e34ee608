// tests/orchestrator.rs

//! End-to-end orchestrator behavior against a scripted environment service.

mod common;

use common::{plan, target, FakeIsolation, Script};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolsweep::graph::ResolutionError;
use toolsweep::orchestrator::TOOLCHAIN_VAR;
use toolsweep::redirect::RedirectConfig;
use toolsweep::{
    BuildResult, Classifier, Error, LogKind, Orchestrator, RunObserver, SilentProgress,
    TaskStatus, Toolchain, ToolRedirector,
};
use tokio_util::sync::CancellationToken;

fn orchestrator(fake: &Arc<FakeIsolation>) -> Orchestrator {
    let classifier = Classifier::default_rules().unwrap();
    Orchestrator::new(fake.clone(), classifier)
}

fn musl() -> Toolchain {
    Toolchain::named("x86_64-musl")
}

#[tokio::test]
async fn test_failure_blocks_dependents_transitively() {
    let fake = Arc::new(FakeIsolation::new().script(
        "baz",
        Script::fail(2, &["baz.c:1:1: error: expected ';' before '}' token"]),
    ));
    let plan = plan(vec![
        target("baz", &[]),
        target("bar", &["baz"]),
        target("foo", &["bar"]),
    ]);

    let report = orchestrator(&fake).run(&plan, &musl(), 4).await.unwrap();

    let baz = report.get("baz").unwrap();
    assert_eq!(baz.status, TaskStatus::Failed);
    assert_eq!(baz.return_code, Some(2));
    assert_eq!(baz.blocks, vec!["bar", "foo"]);
    assert!(baz.errors.contains_key("compile_error"));

    let bar = report.get("bar").unwrap();
    assert_eq!(bar.status, TaskStatus::Blocked);
    assert_eq!(bar.blocked_by, vec!["baz"]);
    assert!(bar.log.is_empty());

    let foo = report.get("foo").unwrap();
    assert_eq!(foo.status, TaskStatus::Blocked);
    assert!(foo.blocked_by.contains(&"baz".to_string()));
    assert!(foo.log.is_empty());

    assert_eq!(fake.started(), vec!["baz"]);
}

#[tokio::test]
async fn test_predecessors_finish_before_dependents() {
    // Diamond: the fake refuses to install artifacts that are not yet published
    let fake = Arc::new(
        FakeIsolation::new()
            .script("left", Script::slow(Duration::from_millis(30)))
            .script("right", Script::slow(Duration::from_millis(10))),
    );
    let plan = plan(vec![
        target("base", &[]),
        target("left", &["base"]),
        target("right", &["base"]),
        target("top", &["left", "right"]),
    ]);

    let report = orchestrator(&fake).run(&plan, &musl(), 4).await.unwrap();

    assert_eq!(report.with_status(TaskStatus::Succeeded).len(), 4);
    let started = fake.started();
    assert_eq!(started.first().map(String::as_str), Some("base"));
    assert_eq!(started.last().map(String::as_str), Some("top"));
    assert_eq!(fake.published().len(), 4);
    assert_eq!(fake.destroyed(), 4);
}

#[tokio::test]
async fn test_concurrency_limit_respected() {
    let mut fake = FakeIsolation::new();
    let mut targets = Vec::new();
    for i in 0..6 {
        let name = format!("pkg{}", i);
        fake = fake.script(&name, Script::slow(Duration::from_millis(40)));
        targets.push(target(&name, &[]));
    }
    let fake = Arc::new(fake);

    let report = orchestrator(&fake).run(&plan(targets), &musl(), 2).await.unwrap();

    assert_eq!(report.with_status(TaskStatus::Succeeded).len(), 6);
    assert!(fake.max_running() <= 2, "ran {} at once", fake.max_running());
}

#[tokio::test]
async fn test_unresolved_target_blocked_others_continue() {
    let fake = Arc::new(FakeIsolation::new());
    let mut tool = target("tool", &[]);
    tool.unresolved.push(ResolutionError::Unresolved {
        requester: "tool".to_string(),
        dependency: "libmissing".to_string(),
    });
    let plan = plan(vec![tool, target("user", &["tool"]), target("zlib", &[])]);

    let report = orchestrator(&fake).run(&plan, &musl(), 2).await.unwrap();

    assert_eq!(report.get("tool").unwrap().status, TaskStatus::Blocked);
    assert!(report.get("tool").unwrap().blocked_by.is_empty());
    assert_eq!(report.get("tool").unwrap().unresolved, vec!["libmissing"]);
    assert_eq!(report.get("tool").unwrap().blocks, vec!["user"]);
    assert_eq!(report.get("user").unwrap().status, TaskStatus::Blocked);
    assert_eq!(report.get("user").unwrap().blocked_by, vec!["tool"]);
    assert!(report.get("user").unwrap().unresolved.is_empty());
    assert_eq!(report.get("zlib").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(fake.started(), vec!["zlib"]);
}

#[tokio::test]
async fn test_blocked_iff_bad_predecessor() {
    let fake = Arc::new(
        FakeIsolation::new()
            .script("b", Script::fail(1, &[]))
            .script("e", Script::fail(1, &[])),
    );
    let targets = vec![
        target("a", &[]),
        target("b", &["a"]),
        target("c", &["a"]),
        target("d", &["b", "c"]),
        target("e", &["c"]),
        target("f", &["e"]),
        target("g", &["c"]),
        target("h", &["d", "g"]),
    ];
    let plan = plan(targets);

    let report = orchestrator(&fake).run(&plan, &musl(), 3).await.unwrap();

    for target in plan.targets() {
        let result = report.get(&target.name).unwrap();
        let bad_predecessor = target.predecessors.iter().any(|p| {
            matches!(
                report.get(p).unwrap().status,
                TaskStatus::Failed | TaskStatus::Blocked
            )
        });
        assert_eq!(
            result.status == TaskStatus::Blocked,
            bad_predecessor,
            "task {}",
            target.name
        );
    }
    assert_eq!(report.with_status(TaskStatus::Blocked), vec!["d", "f", "h"]);
    assert_eq!(report.get("b").unwrap().blocks, vec!["d", "h"]);
}

#[tokio::test]
async fn test_environment_failure_aborts_run() {
    let fake = Arc::new(FakeIsolation::new().script(
        "bar",
        Script {
            env_failure: true,
            ..Default::default()
        },
    ));
    let plan = plan(vec![target("baz", &[]), target("bar", &["baz"])]);

    let result = orchestrator(&fake).run(&plan, &musl(), 2).await;
    assert!(matches!(result, Err(Error::Environment(_))));
}

#[tokio::test]
async fn test_publish_failure_fails_task() {
    let fake = Arc::new(FakeIsolation::new().script(
        "zlib",
        Script {
            no_artifact: true,
            ..Default::default()
        },
    ));
    let plan = plan(vec![target("zlib", &[]), target("libpng", &["zlib"])]);

    let report = orchestrator(&fake).run(&plan, &musl(), 2).await.unwrap();

    let zlib = report.get("zlib").unwrap();
    assert_eq!(zlib.status, TaskStatus::Failed);
    assert_eq!(zlib.return_code, Some(0));
    assert!(zlib.log.iter().any(|e| e.kind == LogKind::Die));
    assert_eq!(report.get("libpng").unwrap().status, TaskStatus::Blocked);
}

#[tokio::test]
async fn test_native_tool_audit_aggregated() {
    let fake = Arc::new(FakeIsolation::new().script(
        "binutils-user",
        Script {
            native_tools: vec!["ar".to_string(), "ranlib".to_string(), "ar".to_string()],
            ..Default::default()
        },
    ));
    let plan = plan(vec![target("binutils-user", &[])]);

    let report = orchestrator(&fake).run(&plan, &musl(), 1).await.unwrap();

    let result = report.get("binutils-user").unwrap();
    assert_eq!(result.native_tools["ar"], 2);
    assert_eq!(result.native_tools["ranlib"], 1);

    let invocations = &result.errors["native_tool_invocation"];
    assert_eq!(invocations[0].captures["tool"], "ar");
    assert_eq!(invocations[0].frequency, 2);
}

#[tokio::test]
async fn test_dependents_receive_transitive_artifacts() {
    let fake = Arc::new(FakeIsolation::new());
    let plan = plan(vec![
        target("baz", &[]),
        target("bar", &["baz"]),
        target("foo", &["bar"]),
        target("qux", &[]),
    ]);

    orchestrator(&fake).run(&plan, &musl(), 2).await.unwrap();

    assert_eq!(fake.installed_artifacts("foo"), vec!["bar", "baz"]);
    assert_eq!(fake.installed_artifacts("bar"), vec!["baz"]);
    assert!(fake.installed_artifacts("baz").is_empty());
}

#[tokio::test]
async fn test_intercepted_tools_logged_as_commands() {
    let fake = Arc::new(FakeIsolation::new().script(
        "zlib",
        Script {
            native_tools: vec!["gcc".to_string(), "ar".to_string()],
            ..Default::default()
        },
    ));
    let plan = plan(vec![target("zlib", &[])]);

    let report = orchestrator(&fake).run(&plan, &musl(), 1).await.unwrap();

    let zlib = report.get("zlib").unwrap();
    let heads: Vec<&str> = zlib
        .log
        .iter()
        .filter(|e| e.kind == LogKind::Command)
        .map(|e| e.head.as_str())
        .collect();
    assert_eq!(heads, vec!["build zlib x86_64-musl", "gcc --fake", "ar --fake"]);
    assert!(zlib
        .log
        .iter()
        .any(|e| e.body.iter().any(|l| l == "toolsweep: native invocation of 'gcc' in /build/zlib")));
}

#[tokio::test]
async fn test_interceptors_installed_per_task() {
    let fake = Arc::new(FakeIsolation::new());
    let mut toolchain = musl();
    toolchain.redirect = RedirectConfig {
        bin: PathBuf::from("/toolchain/bin"),
        overwrite: vec!["ar".to_string()],
        replacements: [("gcc".to_string(), "x86_64-linux-musl-gcc".to_string())].into(),
    };
    let redirector = ToolRedirector::new(b"#!stub".to_vec(), "/tmp").unwrap();
    let plan = plan(vec![target("zlib", &[])]);

    orchestrator(&fake)
        .with_redirector(redirector)
        .run(&plan, &toolchain, 1)
        .await
        .unwrap();

    let tools = fake.installed_tools("zlib");
    let names: Vec<&str> = tools.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["ar", "gcc"]);

    let payload = toolsweep_shim::Payload::extract(&tools[1].1).unwrap().unwrap();
    assert_eq!(payload.tool, "gcc");
    assert_eq!(payload.destination, PathBuf::from("/toolchain/bin/x86_64-linux-musl-gcc"));
    assert_eq!(payload.audit_dir, PathBuf::from("/audit/env-0"));
}

#[tokio::test]
async fn test_redirect_without_stub_is_config_error() {
    let fake = Arc::new(FakeIsolation::new());
    let mut toolchain = musl();
    toolchain.redirect.bin = PathBuf::from("/toolchain/bin");
    toolchain.redirect.overwrite = vec!["ar".to_string()];

    let result = orchestrator(&fake)
        .run(&plan(vec![target("zlib", &[])]), &toolchain, 1)
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(fake.started().is_empty());
}

#[tokio::test]
async fn test_zero_concurrency_is_config_error() {
    let fake = Arc::new(FakeIsolation::new());
    let result = orchestrator(&fake)
        .run(&plan(vec![target("zlib", &[])]), &musl(), 0)
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_command_expanded_with_toolchain_env() {
    let fake = Arc::new(FakeIsolation::new());
    let mut toolchain = musl();
    toolchain.env.insert("CC".to_string(), "musl-gcc".to_string());

    orchestrator(&fake)
        .run(&plan(vec![target("zlib", &[])]), &toolchain, 1)
        .await
        .unwrap();

    let command = fake.command("zlib").unwrap();
    assert_eq!(command.argv, vec!["build", "zlib", "x86_64-musl"]);
    assert_eq!(command.env["CC"], "musl-gcc");
    assert_eq!(command.env[TOOLCHAIN_VAR], "x86_64-musl");
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let fake = Arc::new(FakeIsolation::new());
    let token = CancellationToken::new();
    token.cancel();

    let report = orchestrator(&fake)
        .with_cancellation(token)
        .run(&plan(vec![target("a", &[]), target("b", &["a"])]), &musl(), 2)
        .await
        .unwrap();

    assert_eq!(report.with_status(TaskStatus::Cancelled), vec!["a", "b"]);
    assert!(fake.started().is_empty());
}

/// Cancels the run as soon as the first build finishes
struct CancelAfterFirst(CancellationToken);

impl RunObserver for CancelAfterFirst {
    fn task_finished(&self, _result: &BuildResult) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn test_cancel_mid_run_lets_in_flight_finish() {
    let fake = Arc::new(FakeIsolation::new());
    let token = CancellationToken::new();
    let plan = plan(vec![target("a", &[]), target("b", &[]), target("c", &[])]);

    let report = orchestrator(&fake)
        .with_cancellation(token.clone())
        .with_observer(Arc::new(CancelAfterFirst(token)))
        .run(&plan, &musl(), 1)
        .await
        .unwrap();

    assert_eq!(report.with_status(TaskStatus::Succeeded), vec!["a"]);
    assert_eq!(report.with_status(TaskStatus::Cancelled), vec!["b", "c"]);
}

#[tokio::test]
async fn test_observer_sees_every_task() {
    let fake = Arc::new(FakeIsolation::new().script("baz", Script::fail(1, &[])));
    let progress = Arc::new(SilentProgress::new());
    let plan = plan(vec![target("baz", &[]), target("bar", &["baz"]), target("qux", &[])]);

    orchestrator(&fake)
        .with_observer(progress.clone())
        .run(&plan, &musl(), 2)
        .await
        .unwrap();

    assert_eq!(progress.started(), 2);
    assert_eq!(progress.finished(), 3);
}

#[tokio::test]
async fn test_results_persisted() {
    let fake = Arc::new(FakeIsolation::new().script("baz", Script::fail(1, &[])));
    let plan = plan(vec![target("baz", &[]), target("bar", &["baz"])]);
    let report = orchestrator(&fake).run(&plan, &musl(), 2).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    report.write_results(dir.path()).unwrap();

    let loaded = toolsweep::load_results(dir.path()).unwrap();
    assert_eq!(loaded.len(), 2);
    let baz = loaded.iter().find(|(_, r)| r.name == "baz").unwrap();
    assert_eq!(baz.1.blocks, vec!["bar"]);
    assert_eq!(baz.1.toolchain, "x86_64-musl");
}
