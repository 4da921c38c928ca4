use std::{fs, os::unix::fs::PermissionsExt, path::Path};

use graphdriver::{
    archive::ChangeKind, CreateOpts, DiffDriver, Driver, GraphConfig, ProtoDriver, Registry,
};
use tar::Archive;
use tempfile::tempdir;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test]
/// Tests diffing a container layer against its image and replaying the diff elsewhere.
///
/// ```text
/// image/                       ctr/ (child of image)          replay/ (child of image)
/// ├── etc/                     ├── etc/                       ← diff(ctr, image)
/// │   ├── hostname             │   ├── hostname  (edited)
/// │   └── shadow               │   └── resolv.conf (added)
/// ├── usr/bin/tool (rwx)       ├── usr/bin/tool  (chmod 0700)
/// └── var/cache/               └── (var removed)
///     └── index
/// ```
fn test_naive_diff_replays_container_changes() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let driver = open_vfs(temp.path())?;

    driver.create("image", None, &CreateOpts::default())?;
    let image = driver.get("image", "")?;
    write(&image.join("etc").join("hostname"), "image")?;
    write(&image.join("etc").join("shadow"), "root:*")?;
    write(&image.join("usr").join("bin").join("tool"), "#!/bin/true")?;
    fs::set_permissions(
        image.join("usr").join("bin").join("tool"),
        fs::Permissions::from_mode(0o755),
    )?;
    write(&image.join("var").join("cache").join("index"), "stale")?;
    driver.put("image")?;

    driver.create_read_write("ctr", Some("image"), &CreateOpts::default())?;
    driver.create_read_write("replay", Some("image"), &CreateOpts::default())?;

    // A fresh child shows no changes.
    assert!(driver.changes("ctr", Some("image"))?.is_empty());
    assert_eq!(driver.diff_size("ctr", Some("image"))?, 0);

    let ctr = driver.get("ctr", "")?;
    write(&ctr.join("etc").join("hostname"), "container-1")?;
    fs::remove_file(ctr.join("etc").join("shadow"))?;
    write(&ctr.join("etc").join("resolv.conf"), "nameserver 10.0.0.1")?;
    fs::set_permissions(
        ctr.join("usr").join("bin").join("tool"),
        fs::Permissions::from_mode(0o700),
    )?;
    fs::remove_dir_all(ctr.join("var"))?;
    driver.put("ctr")?;

    let changes = driver.changes("ctr", Some("image"))?;
    let summary: Vec<String> = changes.iter().map(ToString::to_string).collect();
    assert_eq!(
        summary,
        vec![
            "C /etc",
            "C /etc/hostname",
            "A /etc/resolv.conf",
            "D /etc/shadow",
            "C /usr",
            "C /usr/bin",
            "C /usr/bin/tool",
            "D /var",
        ]
    );
    assert_eq!(
        changes.iter().filter(|c| c.kind == ChangeKind::Delete).count(),
        2
    );

    let expected_size =
        ("container-1".len() + "nameserver 10.0.0.1".len() + "#!/bin/true".len()) as u64;
    assert_eq!(driver.diff_size("ctr", Some("image"))?, expected_size);

    let mut stream = driver.diff("ctr", Some("image"))?;
    assert_eq!(driver.apply_diff("replay", Some("image"), &mut stream)?, expected_size);

    let replay = driver.get("replay", "")?;
    assert_eq!(fs::read_to_string(replay.join("etc").join("hostname"))?, "container-1");
    assert_eq!(
        fs::read_to_string(replay.join("etc").join("resolv.conf"))?,
        "nameserver 10.0.0.1"
    );
    assert!(!replay.join("etc").join("shadow").exists());
    assert!(!replay.join("var").exists());
    assert_eq!(
        fs::metadata(replay.join("usr").join("bin").join("tool"))?
            .permissions()
            .mode()
            & 0o777,
        0o700
    );
    driver.put("replay")?;

    // The replayed layer differs from the image exactly like the original.
    let replay_changes: Vec<String> = driver
        .changes("replay", Some("image"))?
        .iter()
        .map(|c| c.path.display().to_string())
        .collect();
    let ctr_changes: Vec<String> = changes
        .iter()
        .map(|c| c.path.display().to_string())
        .collect();
    assert_eq!(replay_changes, ctr_changes);
    Ok(())
}

#[test_log::test]
/// Tests replaying a diff in which a directory became a file.
///
/// ```text
/// image/                 ctr/                     replay/
/// └── x/                 └── x (file)             ← diff(ctr, image)
///     └── y/
///         └── z
/// ```
fn test_naive_diff_replays_directory_replaced_by_file() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let driver = open_vfs(temp.path())?;

    driver.create("image", None, &CreateOpts::default())?;
    let image = driver.get("image", "")?;
    write(&image.join("x").join("y").join("z"), "deep")?;
    driver.put("image")?;

    driver.create_read_write("ctr", Some("image"), &CreateOpts::default())?;
    driver.create_read_write("replay", Some("image"), &CreateOpts::default())?;

    let ctr = driver.get("ctr", "")?;
    fs::remove_dir_all(ctr.join("x"))?;
    write(&ctr.join("x"), "now a file")?;
    driver.put("ctr")?;

    let summary: Vec<String> = driver
        .changes("ctr", Some("image"))?
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(summary, vec!["C /x"]);

    let mut stream = driver.diff("ctr", Some("image"))?;
    assert_eq!(
        driver.apply_diff("replay", Some("image"), &mut stream)?,
        "now a file".len() as u64
    );

    let replay = driver.get("replay", "")?;
    assert_eq!(fs::read_to_string(replay.join("x"))?, "now a file");
    driver.put("replay")?;
    Ok(())
}

#[test_log::test]
fn test_naive_diff_without_parent_archives_whole_layer() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let driver = open_vfs(temp.path())?;

    driver.create("base", None, &CreateOpts::default())?;
    let base = driver.get("base", "")?;
    write(&base.join("a").join("b.txt"), "bee")?;
    write(&base.join("c.txt"), "sea")?;
    driver.put("base")?;

    let mut archive = Archive::new(driver.diff("base", None)?);
    let mut paths = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        paths.push(entry.path()?.to_string_lossy().trim_end_matches('/').to_string());
    }

    assert_eq!(paths, vec!["a", "a/b.txt", "c.txt"]);
    assert_eq!(driver.diff_size("base", None)?, 6);
    Ok(())
}

#[test_log::test]
fn test_naive_diff_missing_layers() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let driver = open_vfs(temp.path())?;
    driver.create("base", None, &CreateOpts::default())?;

    assert!(driver.changes("ghost", Some("base")).unwrap_err().is_not_found());
    assert!(driver.changes("base", Some("ghost")).unwrap_err().is_not_found());
    assert!(driver.diff("ghost", None).is_err());

    let mut empty = std::io::empty();
    assert!(driver
        .apply_diff("ghost", None, &mut empty)
        .unwrap_err()
        .is_not_found());
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn open_vfs(home: &Path) -> anyhow::Result<Box<dyn Driver>> {
    let config = GraphConfig::builder().driver("vfs").root(home).build();
    Ok(Registry::with_builtin()?.select(&config)?)
}

fn write(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
