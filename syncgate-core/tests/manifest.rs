mod common;

use common::write_pattern;
use std::fs;
use std::path::{Path, PathBuf};
use syncgate_core::config::MissingSourcePolicy;
use syncgate_core::error::ManifestError;
use syncgate_core::manifest::{read_manifest, ExclusionSet, Expander, ManifestRow};
use syncgate_core::path_convention::PathConvention;
use syncgate_core::pipeline::materialize_dirs;
use syncgate_core::split::part_path;

fn expander(sync_root: &Path, missing: MissingSourcePolicy) -> Expander {
    Expander::new(sync_root, PathConvention::native(), ExclusionSet::new(&[]).unwrap(), missing)
}

fn row(source: PathBuf, dest: PathBuf) -> ManifestRow {
    ManifestRow { source, dest_folder: dest }
}

#[test]
fn directory_rows_expand_recursively_without_junk() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("src");
    let sync = td.path().join("sync");
    write_pattern(&src.join("a.txt"), 3, 1);
    write_pattern(&src.join("sub").join("b.txt"), 5, 2);
    write_pattern(&src.join("desktop.ini"), 1, 0);
    write_pattern(&src.join(".DS_Store"), 1, 0);
    write_pattern(&src.join("sub").join("Thumbs.db"), 1, 0);

    let dest = sync.join("proj");
    let exp = expander(&sync, MissingSourcePolicy::Skip)
        .expand(&[row(src.clone(), dest.clone())])
        .unwrap();

    let got: Vec<(PathBuf, u64, PathBuf, String)> = exp
        .entries
        .iter()
        .map(|e| {
            (
                e.source_path.clone(),
                e.size_bytes,
                e.local_dest_path.clone(),
                e.remote_canonical_path.clone(),
            )
        })
        .collect();
    assert_eq!(
        got,
        vec![
            (src.join("a.txt"), 3, dest.join("a.txt"), "/proj/a.txt".to_string()),
            (
                src.join("sub").join("b.txt"),
                5,
                dest.join("sub").join("b.txt"),
                "/proj/sub/b.txt".to_string(),
            ),
        ]
    );
    let dirs: Vec<PathBuf> = exp.dest_dirs.iter().cloned().collect();
    assert_eq!(dirs, vec![dest.clone(), dest.join("sub")]);
    assert_eq!(exp.total_bytes(), 8);
}

#[test]
fn explicit_file_row_is_kept_even_with_a_junk_name() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let f = td.path().join("desktop.ini");
    write_pattern(&f, 4, 0);

    let exp = expander(&sync, MissingSourcePolicy::Skip)
        .expand(&[row(f.clone(), sync.join("cfg"))])
        .unwrap();
    assert_eq!(exp.entries.len(), 1);
    assert_eq!(exp.entries[0].local_dest_path, sync.join("cfg").join("desktop.ini"));
    assert_eq!(exp.entries[0].remote_canonical_path, "/cfg/desktop.ini");
}

#[test]
fn extra_exclude_globs_apply_to_walks() {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("src");
    write_pattern(&src.join("keep.dat"), 2, 0);
    write_pattern(&src.join("scratch.tmp"), 2, 0);

    let ex = Expander::new(
        td.path(),
        PathConvention::native(),
        ExclusionSet::new(&["*.tmp".to_string()]).unwrap(),
        MissingSourcePolicy::Skip,
    );
    let exp = ex.expand(&[row(src, td.path().join("out"))]).unwrap();
    assert_eq!(exp.entries.len(), 1);
    assert!(exp.entries[0].source_path.ends_with("keep.dat"));
}

#[test]
fn missing_sources_skip_or_fail_by_policy() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let present = td.path().join("here.bin");
    write_pattern(&present, 6, 0);
    let rows = vec![
        row(td.path().join("nowhere.bin"), sync.join("x")),
        row(present.clone(), sync.join("x")),
    ];

    let exp = expander(&sync, MissingSourcePolicy::Skip).expand(&rows).unwrap();
    assert_eq!(exp.entries.len(), 1);
    assert_eq!(exp.entries[0].source_path, present);

    let err = expander(&sync, MissingSourcePolicy::Fail).expand(&rows).unwrap_err();
    match err.downcast_ref::<ManifestError>() {
        Some(ManifestError::MissingSource(p)) => assert!(p.ends_with("nowhere.bin")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn file_row_falls_back_to_its_split_parts() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let big = td.path().join("big.iso");
    for i in 1..=3 {
        write_pattern(&part_path(&big, i), 4, i as u8);
    }

    let exp = expander(&sync, MissingSourcePolicy::Fail)
        .expand(&[row(big.clone(), sync.join("iso"))])
        .unwrap();
    let remotes: Vec<&str> =
        exp.entries.iter().map(|e| e.remote_canonical_path.as_str()).collect();
    assert_eq!(
        remotes,
        vec!["/iso/big.iso_split_0001", "/iso/big.iso_split_0002", "/iso/big.iso_split_0003"]
    );
    assert_eq!(exp.entries[1].source_path, part_path(&big, 2));
}

#[test]
fn destination_folders_are_deduplicated() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let a = td.path().join("a.bin");
    let b = td.path().join("b.bin");
    write_pattern(&a, 1, 0);
    write_pattern(&b, 1, 0);
    let exp = expander(&sync, MissingSourcePolicy::Skip)
        .expand(&[row(a, sync.join("d")), row(b, sync.join("d"))])
        .unwrap();
    assert_eq!(exp.dest_dirs.len(), 1);
    assert_eq!(exp.remote_dirs().into_iter().collect::<Vec<_>>(), vec!["/d".to_string()]);
}

#[test]
fn manifest_reader_skips_comments_and_blank_sources() {
    let td = tempfile::tempdir().unwrap();
    let m = td.path().join("manifest.tsv");
    fs::write(
        &m,
        "# source\tdestination\n\n/data/run1\t/sync/run1\textra\n\t/sync/ignored\n/data/x.bin\t/sync/x\n",
    )
    .unwrap();
    let rows = read_manifest(&m).unwrap();
    assert_eq!(
        rows,
        vec![
            row(PathBuf::from("/data/run1"), PathBuf::from("/sync/run1")),
            row(PathBuf::from("/data/x.bin"), PathBuf::from("/sync/x")),
        ]
    );
}

#[test]
fn manifest_reader_reports_rows_without_destination() {
    let td = tempfile::tempdir().unwrap();
    let m = td.path().join("manifest.tsv");
    fs::write(&m, "/data/a\t/sync/a\n/data/b\n").unwrap();
    let err = read_manifest(&m).unwrap_err();
    match err.downcast_ref::<ManifestError>() {
        Some(ManifestError::Malformed { line, .. }) => assert_eq!(*line, 2),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn materialize_dirs_is_idempotent() {
    let td = tempfile::tempdir().unwrap();
    let dirs = vec![td.path().join("x"), td.path().join("x").join("y"), td.path().join("z")];
    assert_eq!(materialize_dirs(&dirs).unwrap(), 3);
    assert!(dirs.iter().all(|d| d.is_dir()));
    assert_eq!(materialize_dirs(&dirs).unwrap(), 0);

    let blocked = vec![td.path().join("file")];
    fs::write(&blocked[0], b"").unwrap();
    assert!(materialize_dirs(&blocked).is_err());
}

#[test]
fn destinations_join_through_the_path_convention() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let f = td.path().join("a.bin");
    write_pattern(&f, 2, 0);
    let conv = PathConvention::native();
    let trailing = format!("{}{}", sync.join("d").display(), conv.separator());

    let exp = expander(&sync, MissingSourcePolicy::Fail)
        .expand(&[row(f, PathBuf::from(trailing))])
        .unwrap();
    let want = conv.join(&sync.join("d").to_string_lossy(), "a.bin");
    assert_eq!(exp.entries[0].local_dest_path, PathBuf::from(want));
    assert_eq!(exp.entries[0].remote_canonical_path, "/d/a.bin");
    assert!(exp.outside_sync_root.is_empty());
}

#[test]
fn destinations_outside_the_sync_root_are_flagged() {
    let td = tempfile::tempdir().unwrap();
    let sync = td.path().join("sync");
    let f = td.path().join("a.bin");
    write_pattern(&f, 2, 0);
    let elsewhere = td.path().join("sync2").join("d");

    let exp = expander(&sync, MissingSourcePolicy::Fail)
        .expand(&[row(f.clone(), elsewhere.clone()), row(f, sync.join("ok"))])
        .unwrap();
    assert_eq!(exp.entries.len(), 2);
    assert_eq!(exp.outside_sync_root.iter().collect::<Vec<_>>(), vec![&elsewhere]);
}
