use std::path::{Path, PathBuf};
use syncgate_core::path_convention::{relative_under, remote_parent, PathConvention};

#[test]
fn windows_paths_map_under_the_sync_root() {
    let w = PathConvention::Windows;
    let root = r"C:\Users\lab\Dropbox";
    assert_eq!(w.to_remote(r"C:\Users\lab\Dropbox\proj\run1\a.tif", root), "/proj/run1/a.tif");
    let trailing = r"C:\Users\lab\Dropbox\";
    assert_eq!(w.to_remote(r"C:\Users\lab\Dropbox\proj\a.tif", trailing), "/proj/a.tif");
    assert_eq!(w.to_remote(r"c:\users\LAB\dropbox\proj\a.tif", root), "/proj/a.tif");
    // Forward slashes are separators too.
    assert_eq!(w.to_remote("C:/Users/lab/Dropbox/proj/a.tif", root), "/proj/a.tif");
    assert_eq!(w.to_remote(root, root), "/");
}

#[test]
fn windows_path_outside_root_keeps_every_component() {
    let w = PathConvention::Windows;
    assert_eq!(w.to_remote(r"D:\scratch\x.bin", r"C:\Users\lab\Dropbox"), "/D:/scratch/x.bin");
}

#[test]
fn posix_paths_map_under_the_sync_root() {
    let p = PathConvention::Posix;
    let root = "/home/lab/Dropbox";
    assert_eq!(p.to_remote("/home/lab/Dropbox/proj/a b.txt", root), "/proj/a b.txt");
    // A backslash is an ordinary character on POSIX.
    assert_eq!(p.to_remote("/home/lab/Dropbox/odd\\name", root), "/odd\\name");
    assert_eq!(p.to_remote("/home/lab/dropbox/x", root), "/home/lab/dropbox/x");
}

#[test]
fn relativize_matches_whole_components_only() {
    let p = PathConvention::Posix;
    assert_eq!(p.relativize("/data/x", "/data"), Some("x"));
    assert_eq!(p.relativize("/data2/x", "/data"), None);
    assert_eq!(p.relativize("/data", "/data/"), Some(""));
    assert_eq!(p.relativize("/data/x", ""), None);
    let w = PathConvention::Windows;
    assert_eq!(w.relativize(r"C:\sync\a\b", r"C:\sync"), Some(r"a\b"));
}

#[test]
fn join_and_file_name_follow_the_convention() {
    let w = PathConvention::Windows;
    assert_eq!(w.join(r"C:\sync\", "a.txt"), r"C:\sync\a.txt");
    assert_eq!(w.file_name(r"C:\sync\dir\a.txt"), "a.txt");
    assert_eq!(w.file_name("C:/sync/dir/"), "dir");
    let p = PathConvention::Posix;
    assert_eq!(p.join("/sync", "/a.txt"), "/sync/a.txt");
    assert_eq!(p.join("/", "a.txt"), "/a.txt");
    assert_eq!(p.join("", "a.txt"), "a.txt");
    assert_eq!(p.file_name("plain"), "plain");
}

#[test]
fn remote_parent_of_top_level_is_root() {
    assert_eq!(remote_parent("/a.txt"), "/");
    assert_eq!(remote_parent("/proj/run/a.txt"), "/proj/run");
}

#[test]
fn relative_under_rejects_escapes() {
    let base = Path::new("/data/in");
    let rel = relative_under(Path::new("/data/in/a/b.txt"), base);
    assert_eq!(rel, Some(PathBuf::from("a/b.txt")));
    assert_eq!(relative_under(Path::new("/data/other.txt"), base), None);
}
