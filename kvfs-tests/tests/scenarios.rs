//! End-to-end filesystem scenarios
//!
//! Each test drives the whole stack (FSAL open/state layer down to the
//! in-memory KV and object backends) through one user-visible story.

use kvfs_api::{FsError, Stat, StatFlags};
use kvfs_fsal::{CreateMode, OpenFlags, StateType};
use kvfs_tests::TestFs;

#[test]
fn test_create_read_unlink_close_cycle() {
    let t = TestFs::new();
    let cred = t.cred();

    let dir_a = t.fs.mkdir(&cred, t.root_ino(), "a", 0o755).unwrap();
    let obj_a = t.export.obj_from_ino(&cred, dir_a).unwrap();

    // Create /a/f (mode 0644) and write through the open state.
    let state = t.export.alloc_state(StateType::Share);
    let attrs = Stat {
        mode: 0o644,
        ..Stat::default()
    };
    let obj_f = t
        .export
        .open2(
            &cred,
            &obj_a,
            &state,
            OpenFlags::READ | OpenFlags::WRITE,
            CreateMode::Unchecked,
            Some("f"),
            Some((&attrs, StatFlags::MODE_SET)),
            None,
        )
        .unwrap()
        .unwrap();
    assert_eq!(t.stat_of(obj_f.ino()).mode & 0o777, 0o644);

    let written = t.export.write2(&cred, &obj_f, &state, 0, b"hello").unwrap();
    assert_eq!(written, 5);
    t.export.close2(&obj_f, &state).unwrap();

    // Reopen read-only and read back.
    let ro_state = t.export.alloc_state(StateType::Share);
    t.export
        .open2(
            &cred,
            &obj_f,
            &ro_state,
            OpenFlags::READ,
            CreateMode::NoCreate,
            None,
            None,
            None,
        )
        .unwrap();
    let mut buf = [0u8; 5];
    let (amount, eof) = t.export.read2(&cred, &obj_f, &ro_state, 0, &mut buf).unwrap();
    assert_eq!(amount, 5);
    assert!(eof);
    assert_eq!(&buf, b"hello");
    t.export.close2(&obj_f, &ro_state).unwrap();

    // Unlink and verify the name is gone.
    t.export.remove(&cred, &obj_a, "f").unwrap();
    assert_eq!(t.fs.lookup(&cred, dir_a, "f"), Err(FsError::NotFound));
}

#[test]
fn test_rename_overwrite_of_open_file() {
    let t = TestFs::new();
    let cred = t.cred();
    let root = t.root_obj();

    let x_ino = t.fs.creat(&cred, t.root_ino(), "x", 0o644).unwrap();
    let y_ino = t.fs.creat(&cred, t.root_ino(), "y", 0o644).unwrap();
    t.fs.write(&cred, y_ino, 0, b"old-y").unwrap();

    // Hold /y open while it gets overwritten.
    let (obj_y, state_y) = t
        .open2_by_name("y", OpenFlags::READ | OpenFlags::WRITE)
        .unwrap();
    assert_eq!(obj_y.ino(), y_ino);

    t.export.rename(&cred, &root, "x", &root, "y").unwrap();

    // The name now resolves to old-x's inode.
    assert_eq!(t.fs.lookup(&cred, t.root_ino(), "y").unwrap(), x_ino);
    assert_eq!(t.fs.lookup(&cred, t.root_ino(), "x"), Err(FsError::NotFound));

    // The open state on the former /y keeps working.
    t.export.write2(&cred, &obj_y, &state_y, 0, b"still").unwrap();
    let mut buf = [0u8; 5];
    let (amount, _) = t.export.read2(&cred, &obj_y, &state_y, 0, &mut buf).unwrap();
    assert_eq!(amount, 5);
    assert_eq!(&buf, b"still");

    // Closing the last open destroys the orphaned object.
    t.export.close2(&obj_y, &state_y).unwrap();
    assert_eq!(t.fs.getattr(&cred, y_ino), Err(FsError::NotFound));
    assert_eq!(t.fs.ino_to_oid(y_ino), Err(FsError::NotFound));
}

#[test]
fn test_cross_type_rename_rejected() {
    let t = TestFs::new();
    let cred = t.cred();
    let root = t.root_obj();

    t.fs.mkdir(&cred, t.root_ino(), "d", 0o755).unwrap();
    t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();

    assert_eq!(
        t.export.rename(&cred, &root, "d", &root, "f"),
        Err(FsError::NotDir)
    );
    assert_eq!(
        t.export.rename(&cred, &root, "f", &root, "d"),
        Err(FsError::NotDir)
    );

    // Both entries survived the refused renames.
    assert!(t.fs.lookup(&cred, t.root_ino(), "d").is_ok());
    assert!(t.fs.lookup(&cred, t.root_ino(), "f").is_ok());
}

#[test]
fn test_rmdir_non_empty_then_empty() {
    let t = TestFs::new();
    let cred = t.cred();

    let nlink_before = t.stat_of(t.root_ino()).nlink;
    let d_ino = t.fs.mkdir(&cred, t.root_ino(), "d", 0o755).unwrap();
    assert_eq!(t.stat_of(t.root_ino()).nlink, nlink_before + 1);

    t.fs.creat(&cred, d_ino, "x", 0o644).unwrap();
    assert_eq!(
        t.fs.rmdir(&cred, t.root_ino(), "d"),
        Err(FsError::NotEmpty)
    );

    t.fs.unlink(&cred, d_ino, None, "x").unwrap();
    t.fs.rmdir(&cred, t.root_ino(), "d").unwrap();
    assert_eq!(t.stat_of(t.root_ino()).nlink, nlink_before);
    assert_eq!(t.fs.lookup(&cred, t.root_ino(), "d"), Err(FsError::NotFound));
}

#[test]
fn test_truncate_shrinks_and_read_past_eof() {
    let t = TestFs::new();
    let cred = t.cred();

    let f_ino = t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();
    t.fs.write(&cred, f_ino, 0, b"0123456789").unwrap();
    assert_eq!(t.stat_of(f_ino).size, 10);

    let mut wanted = Stat::default();
    wanted.set_size(4);
    t.fs.setattr(&cred, f_ino, &wanted, StatFlags::SIZE_SET).unwrap();
    assert_eq!(t.stat_of(f_ino).size, 4);

    let mut buf = [0xffu8; 10];
    let (amount, eof) = t.fs.read(&cred, f_ino, 0, &mut buf).unwrap();
    assert_eq!(amount, 4);
    assert!(eof);
    assert_eq!(&buf[..4], b"0123");

    let (amount, eof) = t.fs.read(&cred, f_ino, 100, &mut buf).unwrap();
    assert_eq!(amount, 0);
    assert!(eof);
}

#[test]
fn test_unaligned_block_io() {
    let t = TestFs::new();
    let cred = t.cred();
    let f_ino = t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();

    // (offset, len): unaligned head; unaligned both ends; odd length;
    // aligned head with unaligned tail.
    let cases: &[(u64, usize)] = &[(3000, 100), (3100, 2000), (5100, 7188), (12288, 17000)];

    let mut expected: Vec<u8> = Vec::new();
    for &(offset, len) in cases {
        let data: Vec<u8> = (0..len).map(|i| ((offset as usize + i) % 251) as u8).collect();
        let written = t.fs.write(&cred, f_ino, offset, &data).unwrap();
        assert_eq!(written, len);

        let end = offset as usize + len;
        if expected.len() < end {
            expected.resize(end, 0);
        }
        expected[offset as usize..end].copy_from_slice(&data);

        // Read the whole spanned region back, holes included.
        let stat = t.stat_of(f_ino);
        assert_eq!(stat.size as usize, expected.len());
        let mut buf = vec![0xaau8; expected.len()];
        let (amount, eof) = t.fs.read(&cred, f_ino, 0, &mut buf).unwrap();
        assert_eq!(amount, expected.len());
        assert!(eof);
        assert_eq!(buf, expected);
    }
}

#[test]
fn test_readdir_cookies_and_eof() {
    let t = TestFs::new();
    let cred = t.cred();
    let root = t.root_obj();

    for name in ["cc", "aa", "bb"] {
        t.fs.creat(&cred, t.root_ino(), name, 0o644).unwrap();
    }

    // Full walk: key order, cookies from 3, natural end.
    let mut seen = Vec::new();
    let eof = t
        .export
        .readdir2(&cred, &root, None, |name, _stat, cookie| {
            seen.push((name.to_string(), cookie));
            true
        })
        .unwrap();
    assert!(eof);
    assert_eq!(
        seen,
        vec![
            ("aa".to_string(), 3),
            ("bb".to_string(), 4),
            ("cc".to_string(), 5)
        ]
    );

    // Early stop: not at the last entry means eof=false.
    let eof = t
        .export
        .readdir2(&cred, &root, None, |_name, _stat, _cookie| false)
        .unwrap();
    assert!(!eof);

    // Resume from a cookie.
    let mut resumed = Vec::new();
    let eof = t
        .export
        .readdir2(&cred, &root, Some(3), |name, _stat, cookie| {
            resumed.push((name.to_string(), cookie));
            true
        })
        .unwrap();
    assert!(eof);
    assert_eq!(
        resumed,
        vec![("bb".to_string(), 4), ("cc".to_string(), 5)]
    );
}

#[test]
fn test_readdir_bumps_dir_atime() {
    let t = TestFs::new();
    let cred = t.cred();
    let root = t.root_obj();

    t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();
    let before = t.stat_of(t.root_ino()).atime;
    t.export
        .readdir2(&cred, &root, None, |_, _, _| true)
        .unwrap();
    assert!(t.stat_of(t.root_ino()).atime >= before);
}

#[test]
fn test_symlink_cycle() {
    let t = TestFs::new();
    let cred = t.cred();

    let lnk = t
        .fs
        .symlink(&cred, t.root_ino(), "ln", "/target/path")
        .unwrap();
    let stat = t.stat_of(lnk);
    assert!(stat.is_symlink());
    assert_eq!(stat.mode & 0o777, 0o777);

    let mut buf = [0u8; 64];
    let len = t.fs.readlink(&cred, lnk, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"/target/path");

    // A one-byte destination is too small.
    let mut tiny = [0u8; 1];
    assert_eq!(t.fs.readlink(&cred, lnk, &mut tiny), Err(FsError::NoBuffers));

    t.fs.unlink(&cred, t.root_ino(), None, "ln").unwrap();
    assert_eq!(t.fs.lookup(&cred, t.root_ino(), "ln"), Err(FsError::NotFound));
}

#[test]
fn test_link_counts_and_unlink_order() {
    let t = TestFs::new();
    let cred = t.cred();

    let f_ino = t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();
    t.fs.write(&cred, f_ino, 0, b"data").unwrap();
    t.fs.link(&cred, f_ino, t.root_ino(), "g").unwrap();
    assert_eq!(t.stat_of(f_ino).nlink, 2);

    // Dropping one name keeps the file reachable through the other.
    t.fs.unlink(&cred, t.root_ino(), None, "f").unwrap();
    assert_eq!(t.stat_of(f_ino).nlink, 1);
    let mut buf = [0u8; 4];
    let (amount, _) = t.fs.read(&cred, f_ino, 0, &mut buf).unwrap();
    assert_eq!(amount, 4);

    t.fs.unlink(&cred, t.root_ino(), None, "g").unwrap();
    assert_eq!(t.fs.getattr(&cred, f_ino), Err(FsError::NotFound));
}

#[test]
fn test_posix_backend_cycle() {
    use kvfs_dstore::DstoreConfig;

    let dir = tempfile::tempdir().unwrap();
    let t = TestFs::with_dstore_config(DstoreConfig::posix(dir.path().to_path_buf()));
    let cred = t.cred();

    let f_ino = t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();
    t.fs.write(&cred, f_ino, 3000, b"posix bytes").unwrap();

    let mut buf = [0u8; 11];
    let (amount, eof) = t.fs.read(&cred, f_ino, 3000, &mut buf).unwrap();
    assert_eq!(amount, 11);
    assert!(eof);
    assert_eq!(&buf, b"posix bytes");

    // The object landed on disk, and unlink removes it again.
    assert_eq!(dir.path().read_dir().unwrap().count(), 1);
    t.fs.unlink(&cred, t.root_ino(), None, "f").unwrap();
    assert_eq!(dir.path().read_dir().unwrap().count(), 0);
}

#[test]
fn test_hole_after_grow_reads_zero() {
    let t = TestFs::new();
    let cred = t.cred();

    let f_ino = t.fs.creat(&cred, t.root_ino(), "f", 0o644).unwrap();
    t.fs.write(&cred, f_ino, 0, b"abcd").unwrap();

    // Growing truncate only changes metadata.
    let mut wanted = Stat::default();
    wanted.set_size(10000);
    t.fs.setattr(&cred, f_ino, &wanted, StatFlags::SIZE_SET).unwrap();
    assert_eq!(t.stat_of(f_ino).size, 10000);

    let mut buf = vec![0xffu8; 10000];
    let (amount, eof) = t.fs.read(&cred, f_ino, 0, &mut buf).unwrap();
    assert_eq!(amount, 10000);
    assert!(eof);
    assert_eq!(&buf[..4], b"abcd");
    assert!(buf[4..].iter().all(|&b| b == 0));
}
