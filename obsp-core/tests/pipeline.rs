// obsp-core/tests/pipeline.rs
mod common;

use std::fs;

use common::{deb_fixture, listing, tar_gz_bytes, zip_bytes, FakeApt, StubTransport};
use obsp_common::{Cache, Config, Manifest, PlatformContext};
use obsp_core::install::{ArtifactOutcome, ArtifactPipeline};
use obsp_core::pkg::PackageInstaller;
use obsp_net::ArtifactFetcher;

const WEBSOCKET_URL: &str =
    "https://example.com/releases/obs-websocket_4.9.1-1_amd64.deb";
const MOVE_URL: &str = "https://example.com/releases/move-transition-2.9.5-linux64.zip";
const GSTREAMER_URL: &str = "https://example.com/releases/obs-gstreamer.zip";

fn manifest(artifacts: &str, rules: &str) -> Manifest {
    Manifest::from_json_str(&format!(
        r#"{{
            "repository": "ppa:obsproject/obs-studio",
            "distributions": ["Ubuntu"],
            "codenames": {{"focal": 5, "jammy": 6}},
            "base_packages": [],
            "artifacts": {artifacts},
            "rules": {rules}
        }}"#
    ))
    .unwrap()
}

fn jammy() -> PlatformContext {
    PlatformContext::new("Ubuntu", "jammy", 6)
}

#[tokio::test]
async fn deb_artifact_is_installed_without_touching_plugins() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(
        &format!(
            r#"[{{"id": "obs-websocket", "kind": "deb", "url": "{WEBSOCKET_URL}",
                 "target": "packages", "package": "obs-websocket"}}]"#
        ),
        "{}",
    );
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let transport = StubTransport::default().serve(WEBSOCKET_URL, deb_fixture("obs-websocket"));
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();

    assert!(outcome.is_installed());
    assert!(apt.has("obs-websocket"));
    assert!(config
        .cache_dir()
        .join("obs-websocket_4.9.1-1_amd64.deb")
        .is_file());
    assert!(!config.plugin_dir().exists());
    assert_eq!(*fetcher.transport().requests.borrow(), vec![WEBSOCKET_URL]);
}

#[tokio::test]
async fn nested_tarball_without_rule_lands_unrelocated() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(
        &format!(
            r#"[{{"id": "move-transition", "kind": "nested-tar-in-zip", "url": "{MOVE_URL}",
                 "target": "plugins"}}]"#
        ),
        "{}",
    );
    let inner = tar_gz_bytes(&[
        ("move-transition/bin/64bit/move-transition.so", b"elf"),
        ("move-transition/data/locale/en-US.ini", b"Move=Move"),
    ]);
    let transport = StubTransport::default().serve(
        MOVE_URL,
        zip_bytes(&[("move-transition-2.9.5-linux64.tar.gz", &inner)]),
    );
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();

    match outcome {
        ArtifactOutcome::Installed { extracted } => {
            assert_eq!(
                extracted.roots().collect::<Vec<_>>(),
                vec![config.plugin_dir().join("move-transition")]
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        listing(&config.plugin_dir()),
        vec![
            "move-transition",
            "move-transition/bin",
            "move-transition/bin/64bit",
            "move-transition/bin/64bit/move-transition.so",
            "move-transition/data",
            "move-transition/data/locale",
            "move-transition/data/locale/en-US.ini",
        ]
    );
    assert!(apt.calls.borrow().is_empty());
}

const RELOCATE_RULE: &str = r#"{
    "obs-gstreamer": {
        "variants": [{
            "steps": [
                {"op": "create_dir", "path": "plugins:obs-gstreamer/bin/64bit"},
                {"op": "move", "from": "plugins:linux/obs-gstreamer.so",
                 "to": "plugins:obs-gstreamer/bin/64bit/obs-gstreamer.so"},
                {"op": "remove", "path": "plugins:linux"}
            ],
            "dependencies": ["gstreamer1.0-vaapi"]
        }]
    }
}"#;

fn gstreamer_artifact() -> String {
    format!(
        r#"[{{"id": "obs-gstreamer", "kind": "zip", "url": "{GSTREAMER_URL}",
             "sub_path": "linux/*", "target": "plugins", "rule": "obs-gstreamer",
             "dependencies": ["gstreamer1.0-plugins-good"],
             "provides": ["plugins:obs-gstreamer"]}}]"#
    )
}

#[tokio::test]
async fn zip_with_relocation_rule_ends_in_plugin_layout() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(&gstreamer_artifact(), RELOCATE_RULE);
    let transport = StubTransport::default().serve(
        GSTREAMER_URL,
        zip_bytes(&[
            ("linux/obs-gstreamer.so", b"elf"),
            ("windows/obs-gstreamer.dll", b"pe"),
            ("macos/obs-gstreamer.so", b"macho"),
        ]),
    );
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();
    assert!(outcome.is_installed());

    let plugins = config.plugin_dir();
    assert_eq!(
        fs::read(plugins.join("obs-gstreamer/bin/64bit/obs-gstreamer.so")).unwrap(),
        b"elf"
    );
    assert!(!plugins.join("linux").exists());
    assert_eq!(
        listing(&plugins),
        vec![
            "obs-gstreamer",
            "obs-gstreamer/bin",
            "obs-gstreamer/bin/64bit",
            "obs-gstreamer/bin/64bit/obs-gstreamer.so",
        ]
    );
    assert!(apt.has("gstreamer1.0-plugins-good"));
    assert!(apt.has("gstreamer1.0-vaapi"));

    // A second run reuses the cached download and converges to the same tree.
    let again = pipeline.install(&manifest.artifacts[0]).await.unwrap();
    assert!(again.is_installed());
    assert_eq!(
        listing(&plugins),
        vec![
            "obs-gstreamer",
            "obs-gstreamer/bin",
            "obs-gstreamer/bin/64bit",
            "obs-gstreamer/bin/64bit/obs-gstreamer.so",
        ]
    );
    assert_eq!(fetcher.transport().requests.borrow().len(), 1);
}

#[tokio::test]
async fn broken_archive_skips_rule_and_dependencies() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(&gstreamer_artifact(), RELOCATE_RULE);
    let transport =
        StubTransport::default().serve(GSTREAMER_URL, b"<html>rate limited</html>".to_vec());
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();

    assert_eq!(outcome, ArtifactOutcome::ExtractionFailed);
    assert!(apt.installed.borrow().is_empty());
    assert!(!config.plugin_dir().join("obs-gstreamer").exists());
}

#[tokio::test]
async fn moved_upstream_layout_is_a_rule_failure() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(
        &gstreamer_artifact().replace(r#""sub_path": "linux/*", "#, ""),
        RELOCATE_RULE,
    );
    let transport = StubTransport::default().serve(
        GSTREAMER_URL,
        zip_bytes(&[("linux-x86_64/obs-gstreamer.so", b"elf")]),
    );
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();

    assert_eq!(outcome, ArtifactOutcome::RuleFailed);
    assert!(!apt.has("gstreamer1.0-plugins-good"));
}

#[tokio::test]
async fn unavailable_dependency_is_a_rule_failure() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(&gstreamer_artifact(), RELOCATE_RULE);
    let transport = StubTransport::default().serve(
        GSTREAMER_URL,
        zip_bytes(&[("linux/obs-gstreamer.so", b"elf")]),
    );
    let platform = jammy();
    let apt = FakeApt::default().without(&["gstreamer1.0-vaapi"]);
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(transport, Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let outcome = pipeline.install(&manifest.artifacts[0]).await.unwrap();

    assert_eq!(outcome, ArtifactOutcome::RuleFailed);
    assert!(!apt.has("gstreamer1.0-vaapi"));
    assert!(config
        .plugin_dir()
        .join("obs-gstreamer/bin/64bit/obs-gstreamer.so")
        .is_file());
}

#[tokio::test]
async fn download_failure_aborts() {
    let home = tempfile::tempdir().unwrap();
    let config = Config::with_home("alice", home.path());
    let manifest = manifest(&gstreamer_artifact(), RELOCATE_RULE);
    let platform = jammy();
    let apt = FakeApt::default();
    let installer = PackageInstaller::new(&apt, config.cache_dir());
    let fetcher = ArtifactFetcher::new(StubTransport::default(), Cache::new(&config).unwrap());
    let pipeline = ArtifactPipeline::new(&config, &platform, &manifest, &fetcher, &installer);

    let err = pipeline.install(&manifest.artifacts[0]).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains(GSTREAMER_URL));
}
