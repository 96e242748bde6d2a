//! End-to-end manifest loading tests against on-disk fixtures.

use dockform::manifest::{self, LoadOptions};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_fixture(dir: &TempDir, manifest: &str) -> PathBuf {
    fs::create_dir_all(dir.path().join("stacks/web")).unwrap();
    fs::write(
        dir.path().join("stacks/web/docker-compose.yml"),
        "services:\n  app:\n    image: nginx\n",
    )
    .unwrap();
    fs::write(dir.path().join("stacks/web/.env"), "PORT=8080\n").unwrap();
    fs::create_dir_all(dir.path().join("config/app")).unwrap();
    fs::write(dir.path().join("config/app/settings.ini"), "[app]\n").unwrap();
    let path = dir.path().join("dockform.yaml");
    fs::write(&path, manifest).unwrap();
    path
}

const FULL_MANIFEST: &str = r"
project_identifier: acme-prod
contexts:
  remote:
    host: ssh://deploy@box
stacks:
  web:
    root: stacks/web
    profiles: [prod]
    env_files: [.env]
    env_inline:
      - FEATURE_FLAG=on
    context: remote
volumes:
  data:
    driver: local
    migrate: true
  legacy:
    external: true
networks:
  frontend:
    subnet: 10.20.0.0/16
    attachable: true
filesets:
  app-config:
    source: config/app
    target_volume: app-config
    target_path: /etc/app/
    excludes: ['*.bak', 'tmp/']
    ownership:
      user: '33'
      group: www-data
      file_mode: '0644'
      dir_mode: '0755'
      preserve_existing: true
    restart_services: [web/app]
";

#[test]
fn loads_a_complete_manifest() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, FULL_MANIFEST);
    let manifest = manifest::load(&path, LoadOptions::default()).unwrap();

    assert_eq!(manifest.project_identifier, "acme-prod");
    assert_eq!(manifest.base_dir, dir.path());

    let web = &manifest.stacks["web"];
    assert_eq!(web.project_name.as_deref(), Some("web"));
    assert_eq!(
        web.compose_files,
        vec![PathBuf::from("docker-compose.yml")]
    );
    // Env files are stored absolute after resolution.
    assert!(web.env_files[0].is_absolute());
    assert!(web.env_files[0].ends_with("stacks/web/.env"));
    assert_eq!(web.context.as_deref(), Some("remote"));

    assert!(manifest.volumes["data"].migrate);
    assert!(manifest.volumes["legacy"].external);
    assert_eq!(
        manifest.networks["frontend"].subnet.as_deref(),
        Some("10.20.0.0/16")
    );

    let fileset = &manifest.filesets["app-config"];
    assert_eq!(fileset.target_path, "/etc/app");
    assert_eq!(fileset.excludes, vec!["*.bak", "tmp/**"]);
    assert!(fileset.ownership.preserve_existing);
    assert_eq!(fileset.restart_services[0].to_string(), "web/app");

    let desired = manifest.desired_volume_names();
    assert!(desired.contains("data"));
    assert!(desired.contains("legacy"));
    assert!(desired.contains("app-config"));
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "project_identifier: demo\nsurprise: true\n");
    let err = manifest::load(&path, LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), dockform::Kind::Validation);
}

#[test]
fn missing_manifest_file_is_internal() {
    let err = manifest::load(
        std::path::Path::new("/nonexistent/dockform.yaml"),
        LoadOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), dockform::Kind::Internal);
}

#[test]
fn duplicate_target_pairs_are_rejected() {
    let dir = TempDir::new().unwrap();
    let manifest = r"
project_identifier: demo
filesets:
  one:
    source: config/app
    target_volume: shared
    target_path: /data
  two:
    source: config/app
    target_volume: shared
    target_path: /data
";
    let path = write_fixture(&dir, manifest);
    let err = manifest::load(&path, LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), dockform::Kind::Validation);
}
