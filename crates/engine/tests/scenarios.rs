//! End-to-end engine scenarios.
//!
//! Drives resolve → execute → classify → remediate through the real
//! executor. Failing installs are simulated with shell stubs that print
//! the stderr a real tool would produce, so the full pipeline runs
//! without touching the host.

use std::collections::BTreeMap;
use std::sync::Arc;

use opsdeck_engine::probe::testing::FakeProbe;
use opsdeck_engine::{
    Availability, ExecutionEvent, FallbackAction, HostProbe, InstallEngine, InstallPlan,
    InstallStep, MatchedLayer, Resolver, StepKind, StepProduct, SystemProbe,
};
use opsdeck_profile::{
    Capabilities, DistroFamily, DistroInfo, OsKind, PackageManager, PackageManagerInfo,
    SystemProfile,
};
use opsdeck_recipes::{builtin_catalog, MethodEntry, MethodFamily, RecipeDef, RecipeRegistry};

fn debian_profile() -> SystemProfile {
    let mut profile = SystemProfile::unknown();
    profile.system = OsKind::Linux;
    profile.arch = "amd64".to_string();
    profile.distro = DistroInfo {
        id: "debian".to_string(),
        family: DistroFamily::Debian,
        version: Some("12".to_string()),
        version_tuple: vec![12],
    };
    profile.capabilities = Capabilities {
        has_systemd: true,
        has_sudo: true,
        passwordless_sudo: false,
        is_root: false,
    };
    profile.package_manager = PackageManagerInfo {
        primary: PackageManager::Apt,
        available: std::iter::once(PackageManager::Apt).collect(),
        snap_available: false,
    };
    profile
}

fn engine_with(probe: Arc<dyn HostProbe>) -> InstallEngine {
    let registry = Arc::new(RecipeRegistry::new(builtin_catalog()).unwrap());
    let resolver = Arc::new(Resolver::new(registry, Arc::clone(&probe)));
    InstallEngine::new(resolver, probe)
}

/// Rewrite a plan's install step into a shell stub that fails with the
/// given stderr, keeping the step's method family for handler scoping.
fn stub_failure(plan: &mut InstallPlan, stderr: &str, exit_code: i32) {
    let step = plan
        .steps
        .iter_mut()
        .find(|s| s.kind == StepKind::InstallTarget)
        .expect("plan has no install step");
    step.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo '{stderr}' >&2; exit {exit_code}"),
    ];
}

async fn run_to_done(engine: &InstallEngine, plan: InstallPlan, chain_id: Option<String>) -> ExecutionEvent {
    let mut handle = engine.execute(plan, Arc::new(debian_profile()), None, chain_id);
    let mut terminal = None;
    while let Some(event) = handle.events.recv().await {
        if event.is_terminal() {
            terminal = Some(event);
        }
    }
    terminal.expect("stream ended without a terminal event")
}

#[tokio::test]
async fn test_pep668_failure_yields_full_remediation() {
    // ruff on a pip-only host; the install step fails the way pip does
    // on an OS-managed interpreter.
    let probe: Arc<dyn HostProbe> = Arc::new(FakeProbe::with_binaries(&["pip"]));
    let engine = engine_with(Arc::clone(&probe));

    let mut plan = engine
        .resolver()
        .resolve("ruff", &debian_profile())
        .await
        .unwrap();
    stub_failure(&mut plan, "error: externally-managed-environment", 1);

    let done = run_to_done(&engine, plan, None).await;
    let ExecutionEvent::Done {
        ok,
        remediation: Some(remediation),
        chain,
        ..
    } = done
    else {
        panic!("expected a remediation terminal, got {done:?}");
    };
    assert!(!ok);

    assert_eq!(remediation.failure.failure_id, "pep668");
    assert_eq!(remediation.failure.matched_layer, MatchedLayer::MethodFamily);

    let by_id = |id: &str| {
        remediation
            .options
            .iter()
            .find(|o| o.id == id)
            .unwrap_or_else(|| panic!("missing option {id}"))
    };
    assert_eq!(by_id("use_pipx").availability, Availability::Locked);
    assert_eq!(by_id("use_venv").availability, Availability::Ready);
    assert_eq!(by_id("break_system_packages").availability, Availability::Ready);
    assert_eq!(by_id("install_from_apt").availability, Availability::Locked);
    assert_eq!(
        by_id("install_from_apt").lock_reason.as_deref(),
        Some("python3-ruff not available in Debian repos")
    );

    assert!(remediation.fallback.actions.contains(&FallbackAction::Retry));

    // pep668 chains forward: the response opens an escalation chain.
    let chain = chain.expect("chain_forward handler should open a chain");
    assert_eq!(chain.original_goal, "ruff");
    assert!(!chain.loop_detected);
}

#[tokio::test]
async fn test_rustc_too_old_scenario() {
    // An old toolchain is present, so the rustup dependency is satisfied
    // and the plan goes straight to `cargo install`.
    let probe: Arc<dyn HostProbe> = Arc::new(
        FakeProbe::with_binaries(&["curl", "cargo"])
            .pass_verify("cargo --version")
            .with_packages(&[
                "curl",
                "ca-certificates",
                "pkg-config",
                "libssl-dev",
                "libcurl4-openssl-dev",
            ]),
    );
    let engine = engine_with(Arc::clone(&probe));

    let mut plan = engine
        .resolver()
        .resolve("cargo-audit", &debian_profile())
        .await
        .unwrap();
    stub_failure(
        &mut plan,
        "error: cargo-audit v0.21.0 requires rustc 1.85 or newer, while the currently \
         active rustc version is 1.75.0",
        101,
    );

    let done = run_to_done(&engine, plan, None).await;
    let ExecutionEvent::Done {
        remediation: Some(remediation),
        ..
    } = done
    else {
        panic!("expected a remediation terminal");
    };

    assert_eq!(remediation.failure.failure_id, "rustc_too_old");

    let update = remediation
        .options
        .iter()
        .find(|o| o.id == "update_rust_via_rustup")
        .unwrap();
    assert_eq!(update.availability, Availability::Ready);
    assert!(update.recommended);

    let pin = remediation
        .options
        .iter()
        .find(|o| o.id == "install_older_cargo_audit_version")
        .unwrap();
    assert_eq!(pin.availability, Availability::Ready);

    let distro = remediation
        .options
        .iter()
        .find(|o| o.id == "use_distro_package")
        .unwrap();
    assert_eq!(distro.availability, Availability::Locked);
    assert_eq!(distro.lock_reason.as_deref(), Some("no matching apt package"));
}

#[tokio::test]
async fn test_repeated_failure_on_chain_detects_loop() {
    let probe: Arc<dyn HostProbe> = Arc::new(FakeProbe::with_binaries(&["pip", "pipx"]));
    let engine = engine_with(Arc::clone(&probe));

    // First attempt fails with pep668 and opens a chain.
    let mut plan = engine
        .resolver()
        .resolve("ruff", &debian_profile())
        .await
        .unwrap();
    stub_failure(&mut plan, "error: externally-managed-environment", 1);
    let done = run_to_done(&engine, plan, None).await;
    let ExecutionEvent::Done {
        chain: Some(chain), ..
    } = done
    else {
        panic!("expected a chain on the first failure");
    };

    // The operator retries; the follow-up attempt hits the same failure.
    let chain_id = engine
        .chains()
        .begin_attempt(&chain.chain_id, "ruff", "Install Ruff");
    let mut retry = engine
        .resolver()
        .resolve("ruff", &debian_profile())
        .await
        .unwrap();
    stub_failure(&mut retry, "error: externally-managed-environment", 1);

    let done = run_to_done(&engine, retry, Some(chain_id)).await;
    let ExecutionEvent::Done {
        remediation: Some(remediation),
        chain: Some(chain),
        ..
    } = done
    else {
        panic!("expected remediation with chain");
    };

    assert!(chain.loop_detected);
    // Everything except the manual escape hatch is degraded.
    for option in &remediation.options {
        if option.id == "use_venv" {
            assert_eq!(option.availability, Availability::Ready);
        } else {
            assert_eq!(option.availability, Availability::Impossible);
        }
    }
    assert!(!remediation.fallback.actions.contains(&FallbackAction::Retry));
}

#[tokio::test]
async fn test_chain_closes_when_goal_succeeds() {
    let probe: Arc<dyn HostProbe> = Arc::new(FakeProbe::with_binaries(&["pip"]));
    let engine = engine_with(Arc::clone(&probe));

    let chain_id = engine.chains().start("ruff", "Install Ruff");
    engine.chains().record_failure(&chain_id, "ruff", "pep668");
    let attempt = engine.chains().begin_attempt(&chain_id, "ruff", "Install Ruff");

    // A succeeding re-attempt: single harmless step.
    let plan = InstallPlan {
        tool_id: "ruff".to_string(),
        profile_snapshot_id: "snap".to_string(),
        steps: vec![InstallStep {
            kind: StepKind::InstallTarget,
            label: "Install Ruff".to_string(),
            command: vec!["true".to_string()],
            needs_sudo: false,
            timeout_secs: 30,
            expected_exit: opsdeck_engine::ExpectedExit::Zero,
            produces: StepProduct::Tool { id: "ruff".into() },
            method_family: Some(MethodFamily::Pipx),
        }],
        already_installed: false,
        needs_sudo_overall: false,
        advisory_ephemeral: false,
    };

    let done = run_to_done(&engine, plan, Some(attempt)).await;
    let ExecutionEvent::Done { ok, chain, .. } = done else {
        panic!("expected done");
    };
    assert!(ok);
    // The goal landed: the chain reports success and is gone.
    let chain = chain.expect("final summary expected");
    assert!(chain
        .breadcrumbs
        .iter()
        .any(|b| b.status == opsdeck_engine::NodeStatus::Succeeded));
    assert!(engine.chains().is_empty());
}

#[tokio::test]
async fn test_install_roundtrip_with_live_probe() {
    // A recipe whose install drops a marker file and whose verify checks
    // for it, driven through the live system probe: resolve, execute,
    // then resolve again and observe already_installed.
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("installed");
    let marker_str = marker.to_string_lossy().into_owned();

    let recipe = RecipeDef {
        id: "marker-tool".to_string(),
        label: "Marker Tool".to_string(),
        category: "testing".to_string(),
        methods: vec![MethodEntry {
            family: MethodFamily::Default,
            commands_by_pm: BTreeMap::from([(
                "_any".to_string(),
                vec!["touch".to_string(), marker_str.clone()],
            )]),
            needs_sudo_by_pm: BTreeMap::from([("_any".to_string(), false)]),
            binary_url_template: None,
            binary_archs: Vec::new(),
            post_env: BTreeMap::new(),
        }],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: vec!["test".to_string(), "-f".to_string(), marker_str],
        step_timeout_secs: None,
        on_failure: Vec::new(),
        example_stderr_by_failure_id: BTreeMap::new(),
    };

    let registry = Arc::new(RecipeRegistry::new(vec![recipe]).unwrap());
    let probe: Arc<dyn HostProbe> = Arc::new(SystemProbe);
    let resolver = Arc::new(Resolver::new(registry, Arc::clone(&probe)));
    let engine = InstallEngine::new(Arc::clone(&resolver), probe);

    let mut profile = debian_profile();
    // Keep the plan free of package probes on arbitrary test hosts.
    profile.package_manager.primary = PackageManager::None;

    let plan = resolver.resolve("marker-tool", &profile).await.unwrap();
    assert!(!plan.already_installed);

    let done = run_to_done(&engine, plan, None).await;
    assert!(matches!(done, ExecutionEvent::Done { ok: true, .. }));

    let replanned = resolver.resolve("marker-tool", &profile).await.unwrap();
    assert!(replanned.already_installed);
    assert!(replanned.steps.is_empty());
}
