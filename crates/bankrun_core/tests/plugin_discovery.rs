use bankrun_core::{Kernel, KernelConfig, ManifestSnapshot};
use std::path::Path;

fn write_plugin(root: &Path, dir_name: &str, manifest: Option<&str>) {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).unwrap();
    if let Some(text) = manifest {
        std::fs::write(dir.join("plugin.json"), text).unwrap();
    }
}

fn named(name: &str) -> String {
    format!(r#"{{"name": "{name}", "entry_win": "run.bat", "entry_lin": "run.sh"}}"#)
}

#[test]
fn includes_only_directories_with_named_manifests() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "alpha", Some(&named("alpha")));
    write_plugin(root.path(), "beta", Some(&named("beta")));
    write_plugin(root.path(), "no-manifest", None);
    write_plugin(root.path(), "empty-name", Some(r#"{"name": "", "entry_lin": "run.sh"}"#));
    write_plugin(root.path(), "no-name", Some(r#"{"entry_lin": "run.sh"}"#));
    std::fs::write(root.path().join("plugin.json"), named("stray-file")).unwrap();

    let snapshot = ManifestSnapshot::discover(root.path());
    let names: Vec<&str> = snapshot
        .manifests()
        .iter()
        .map(|manifest| manifest.name.as_str())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert!(snapshot.rejected().is_empty());

    let alpha = snapshot.find("alpha").expect("alpha should be discovered");
    assert_eq!(alpha.directory, root.path().join("alpha"));
    assert_eq!(alpha.entry_posix, "run.sh");
    assert_eq!(alpha.entry_windows, "run.bat");
}

#[test]
fn malformed_manifest_is_excluded_and_recorded() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "good", Some(&named("good")));
    write_plugin(root.path(), "broken", Some(r#"{"name": "broken""#));

    let snapshot = ManifestSnapshot::discover(root.path());
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.find("broken").is_none());
    assert_eq!(snapshot.rejected().len(), 1);
    assert_eq!(snapshot.rejected()[0].directory, root.path().join("broken"));
}

#[test]
fn duplicate_names_are_kept_but_first_wins() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "a-first", Some(&named("same")));
    write_plugin(root.path(), "b-second", Some(&named("same")));

    let snapshot = ManifestSnapshot::discover(root.path());
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot.find("same").unwrap().directory,
        root.path().join("a-first")
    );
}

#[test]
fn refresh_reflects_only_the_latest_snapshot() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "old", Some(&named("old")));

    let mut kernel = Kernel::new(KernelConfig {
        plugins_root: root.path().to_path_buf(),
        output_root: root.path().join("out"),
        ..KernelConfig::default()
    });
    assert!(kernel.find("old").is_some());
    assert!(kernel.find("new").is_none());

    write_plugin(root.path(), "new", Some(&named("new")));
    std::fs::remove_dir_all(root.path().join("old")).unwrap();
    assert!(kernel.find("old").is_some(), "snapshot changes only on refresh");

    kernel.refresh();
    assert!(kernel.find("new").is_some());
    assert!(kernel.find("old").is_none());
    assert_eq!(kernel.list().len(), 1);
}

#[test]
fn missing_plugin_root_yields_empty_kernel() {
    let root = tempfile::tempdir().unwrap();
    let kernel = Kernel::new(KernelConfig {
        plugins_root: root.path().join("absent"),
        ..KernelConfig::default()
    });
    assert!(kernel.list().is_empty());
}
