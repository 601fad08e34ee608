// tests/compile.rs

//! Metadata to plan compilation, end to end.

mod common;

use common::{record, FakeIsolation};
use std::fs;
use std::sync::Arc;
use toolsweep::{
    BuildPlan, Classifier, CycleBreakRule, Error, MetadataStore, Orchestrator, Overrides,
    PackageRecord, SweepConfig, TaskStatus, Toolchain,
};

fn store(records: Vec<PackageRecord>) -> MetadataStore {
    MetadataStore::from_records(records).unwrap()
}

#[test]
fn test_virtual_provider_resolves_to_concrete_package() {
    let store = store(vec![
        PackageRecord::new("shell").with_provides(&["sh"]),
        record("tool", &["sh"]),
    ]);

    let plan = toolsweep::compile(&store, &Overrides::default()).unwrap();

    let tool = plan.target("tool").unwrap();
    assert!(tool.is_resolved());
    assert!(tool.predecessors.contains("shell"));
}

#[test]
fn test_compilation_is_deterministic() {
    let records = vec![
        record("glibc", &["linux-api-headers"]),
        record("linux-api-headers", &[]),
        record("gcc", &["glibc", "binutils>=2.25"]),
        record("binutils", &["glibc", "zlib"]),
        record("zlib", &["glibc"]),
        PackageRecord::new("bash").with_provides(&["sh"]),
        record("make", &["sh", "glibc"]),
    ];
    let overrides = Overrides::default();

    let first = toolsweep::compile(&store(records.clone()), &overrides).unwrap();
    let mut reversed = records;
    reversed.reverse();
    let again = toolsweep::compile(&store(reversed), &overrides).unwrap();

    assert_eq!(again, first);
    assert_eq!(again.graph().edges(), first.graph().edges());
}

#[test]
fn test_cycle_break_removes_only_named_edge() {
    let store = store(vec![
        record("gcc", &["glibc"]),
        record("glibc", &["gcc"]),
        record("zlib", &["glibc"]),
    ]);
    let overrides = Overrides {
        cycle_breaks: vec![CycleBreakRule::new("glibc", "gcc")],
        ..Default::default()
    };

    let plan = toolsweep::compile(&store, &overrides).unwrap();

    assert!(plan.target("glibc").unwrap().predecessors.is_empty());
    assert!(plan.target("gcc").unwrap().predecessors.contains("glibc"));
    assert_eq!(plan.broken_edges(), &[CycleBreakRule::new("glibc", "gcc")]);
    assert_eq!(plan.build_order().unwrap()[0], "glibc");
}

#[test]
fn test_unbreakable_cycle_lists_every_member() {
    let store = store(vec![
        record("a", &["b"]),
        record("b", &["c"]),
        record("c", &["a"]),
        record("d", &["a"]),
    ]);

    match toolsweep::compile(&store, &Overrides::default()) {
        Err(Error::UnbreakableCycle { members }) => assert_eq!(members, vec!["a", "b", "c"]),
        other => panic!("expected unbreakable cycle, got {:?}", other.map(|p| p.len())),
    }
}

#[test]
fn test_split_package_dependency_points_at_build() {
    let mut gcc = PackageRecord::new("gcc");
    gcc.build = Some("core/gcc".to_string());
    gcc.names.push("gcc-libs".to_string());
    let store = store(vec![gcc, record("zstd", &["gcc-libs"])]);

    let plan = toolsweep::compile(&store, &Overrides::default()).unwrap();

    assert!(plan.target("zstd").unwrap().predecessors.contains("core/gcc"));
    assert_eq!(plan.target("core/gcc").unwrap().names, vec!["gcc", "gcc-libs"]);
}

#[test]
fn test_plan_round_trip_through_file() {
    let store = store(vec![
        record("zlib", &[]),
        record("libpng", &["zlib"]),
        record("broken", &["nonexistent"]),
    ]);
    let plan = toolsweep::compile(&store, &Overrides::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    plan.save(&path).unwrap();
    let loaded = BuildPlan::load(&path).unwrap();

    assert_eq!(loaded.predecessor_map(), plan.predecessor_map());
    assert_eq!(loaded, plan);
    assert!(!loaded.target("broken").unwrap().is_resolved());
}

#[test]
fn test_config_file_drives_compiler() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("toolsweep.toml");
    fs::write(
        &config_path,
        r#"
        [plan]
        build_command = ["sh", "-c", "./build.sh {name}"]
        exclude = ["linux-firmware"]

        [provides]
        awk = "gawk"

        [[cycle_break]]
        dependent = "glibc"
        dependency = "gcc"
        "#,
    )
    .unwrap();
    let metadata_path = dir.path().join("packages.json");
    fs::write(
        &metadata_path,
        r#"[
            {"names": ["gawk"], "provides": ["awk"]},
            {"names": ["mawk"], "provides": ["awk"]},
            {"names": ["glibc"], "makedepends": ["gcc"]},
            {"names": ["gcc"], "depends": ["glibc", "awk"]},
            {"names": ["linux-firmware"]},
            {"names": ["mkinitcpio"], "depends": ["linux-firmware"]}
        ]"#,
    )
    .unwrap();

    let config = SweepConfig::load(&config_path).unwrap();
    let store = MetadataStore::load(&metadata_path).unwrap();
    let plan = config.compiler().compile(&store).unwrap();

    assert!(plan.target("linux-firmware").is_none());
    assert!(!plan.target("mkinitcpio").unwrap().is_resolved());
    let gcc = plan.target("gcc").unwrap();
    assert!(gcc.predecessors.contains("gawk"));
    assert_eq!(gcc.expand_command("musl")[2], "./build.sh gcc");
    assert!(plan.target("glibc").unwrap().predecessors.is_empty());

    let ninja = plan.to_ninja("musl");
    assert!(ninja.contains("build markers/gcc.json: build | markers/gawk.json markers/glibc.json"));
    assert!(ninja.contains("build markers/mkinitcpio.json: unresolved"));
}

#[tokio::test]
async fn test_unresolved_dependency_blocks_subtree_only() {
    let store = store(vec![
        record("zlib", &[]),
        record("tool", &["libmagic>=5"]),
        record("app", &["tool", "zlib"]),
        record("other", &["zlib"]),
    ]);
    let plan = toolsweep::compile(&store, &Overrides::default()).unwrap();

    let fake = Arc::new(FakeIsolation::new());
    let report = Orchestrator::new(fake.clone(), Classifier::default_rules().unwrap())
        .run(&plan, &Toolchain::named("musl"), 2)
        .await
        .unwrap();

    assert_eq!(report.with_status(TaskStatus::Succeeded), vec!["other", "zlib"]);
    assert_eq!(report.with_status(TaskStatus::Blocked), vec!["app", "tool"]);
    let tool = report.get("tool").unwrap();
    assert!(tool.blocked_by.is_empty());
    assert_eq!(tool.unresolved, vec!["libmagic>=5"]);
    assert_eq!(report.get("app").unwrap().blocked_by, vec!["tool"]);
    assert!(!fake.started().contains(&"tool".to_string()));
}
