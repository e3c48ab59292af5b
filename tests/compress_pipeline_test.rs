/*!
 * Integration tests for compress mode
 */

use std::fs;
use std::path::Path;
use tempfile::tempdir;

use collate::compression::{decompress_file, ZstdTransform};
use collate::config::CompressConfig;
use collate::pipeline::{compress_file, compress_files, FileOutcome};
use collate::ThreadWorld;

/// 1,000,000 bytes whose quarters compress very differently
fn mixed_content() -> Vec<u8> {
    let mut data = vec![0u8; 250_000];
    data.extend((0..250_000u32).map(|i| (i % 7) as u8));
    let mut state = 0x2545_f491_u32;
    data.extend((0..250_000).map(|_| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state >> 24) as u8
    }));
    data.extend(b"the quick brown fox jumps over the lazy dog ".iter().cycle().take(250_000));
    data
}

fn zstd_decode(path: &Path) -> Vec<u8> {
    zstd::stream::decode_all(fs::File::open(path).unwrap()).unwrap()
}

#[test]
fn test_million_bytes_four_workers() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("data.bin");
    let original = mixed_content();
    assert_eq!(original.len(), 1_000_000);
    fs::write(&source, &original).unwrap();

    let config = CompressConfig {
        keep: true,
        ..Default::default()
    };
    let world = ThreadWorld::new(4).unwrap();
    let reports = world
        .run(|comm| compress_file(&comm, &source, &config, &ZstdTransform::new(3)))
        .unwrap();

    let dest = dir.path().join("data.bin.zst");
    let sizes: Vec<u64> = reports.iter().map(|r| r.local_size).collect();
    assert!(reports.iter().all(|r| r.outcome == FileOutcome::Compressed));
    assert!(sizes.iter().all(|&s| s > 0));
    assert!(sizes.windows(2).any(|w| w[0] != w[1]), "segments: {:?}", sizes);

    // Offsets are the exclusive prefix sums of the segment sizes
    assert_eq!(reports[0].offset, 0);
    for k in 1..4 {
        assert_eq!(reports[k].offset, reports[k - 1].offset + sizes[k - 1]);
    }
    assert_eq!(fs::metadata(&dest).unwrap().len(), sizes.iter().sum::<u64>());

    assert_eq!(zstd_decode(&dest), original);
    assert!(source.exists());

    // Only the source and its compressed form remain
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn test_round_trip_for_awkward_sizes() {
    for (size, workers) in [(0usize, 3usize), (1, 4), (3, 8), (17, 4), (4096, 1)] {
        let dir = tempdir().unwrap();
        let source = dir.path().join("file");
        let original: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
        fs::write(&source, &original).unwrap();

        let world = ThreadWorld::new(workers).unwrap();
        let config = CompressConfig::default();
        let stats = world
            .run(|comm| compress_files(&comm, &[source.clone()], &config))
            .unwrap();

        assert_eq!(stats[0].files, 1, "size {} workers {}", size, workers);
        assert_eq!(stats[0].failed, 0);
        assert_eq!(stats[0].bytes_read, size as u64);

        let packed = dir.path().join("file.zst");
        let unpacked = dir.path().join("restored");
        assert_eq!(decompress_file(&packed, &unpacked).unwrap(), size as u64);
        assert_eq!(fs::read(&unpacked).unwrap(), original);
        assert!(!source.exists());
    }
}

#[test]
fn test_existing_destination_without_force() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("log.txt");
    let dest = dir.path().join("log.txt.zst");
    fs::write(&source, b"fresh log lines").unwrap();
    fs::write(&dest, b"previous archive").unwrap();

    let world = ThreadWorld::new(2).unwrap();
    let config = CompressConfig::default();
    let stats = world
        .run(|comm| compress_files(&comm, &[source.clone()], &config))
        .unwrap();

    assert_eq!(stats[0].failed, 1);
    assert_eq!(stats[0].exit_code(), 1);
    assert_eq!(fs::read(&dest).unwrap(), b"previous archive");
    assert!(source.exists());

    let forced = CompressConfig {
        force: true,
        ..Default::default()
    };
    let stats = world
        .run(|comm| compress_files(&comm, &[source.clone()], &forced))
        .unwrap();
    assert_eq!(stats[1].files, 1);
    assert_eq!(zstd_decode(&dest), b"fresh log lines");
}

#[test]
fn test_batch_continues_past_bad_inputs() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first");
    let already = dir.path().join("already.zst");
    let missing = dir.path().join("missing");
    let subdir = dir.path().join("subdir");
    let last = dir.path().join("last");
    fs::write(&first, b"first file ".repeat(50)).unwrap();
    fs::write(&already, b"not touched").unwrap();
    fs::create_dir(&subdir).unwrap();
    fs::write(&last, b"last file ".repeat(50)).unwrap();

    let sources = vec![
        first.clone(),
        already.clone(),
        missing,
        subdir.clone(),
        last.clone(),
    ];
    let world = ThreadWorld::new(3).unwrap();
    let config = CompressConfig::default();
    let stats = world
        .run(|comm| compress_files(&comm, &sources, &config))
        .unwrap();

    // Every rank sees the same reduced totals
    for totals in &stats {
        assert_eq!(totals.files, 2);
        assert_eq!(totals.skipped, 1);
        assert_eq!(totals.failed, 2);
    }
    assert_eq!(zstd_decode(&dir.path().join("first.zst")), b"first file ".repeat(50));
    assert_eq!(zstd_decode(&dir.path().join("last.zst")), b"last file ".repeat(50));
    assert_eq!(fs::read(&already).unwrap(), b"not touched");
    assert!(subdir.is_dir());
}

#[test]
fn test_keep_preserves_source_and_times() {
    use filetime::{set_file_times, FileTime};

    let dir = tempdir().unwrap();
    let source = dir.path().join("old.dat");
    fs::write(&source, b"ancient bytes").unwrap();
    let old = FileTime::from_unix_time(1_300_000_000, 0);
    set_file_times(&source, old, old).unwrap();

    let world = ThreadWorld::new(2).unwrap();
    let config = CompressConfig {
        keep: true,
        ..Default::default()
    };
    world
        .run(|comm| compress_files(&comm, &[source.clone()], &config))
        .unwrap();

    let dest = dir.path().join("old.dat.zst");
    assert!(source.exists());
    let dest_meta = fs::metadata(&dest).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&dest_meta), old);
}

#[cfg(unix)]
#[test]
fn test_external_program_segments_concatenate() {
    use collate::config::Codec;

    let dir = tempdir().unwrap();
    let source = dir.path().join("plain");
    let original = b"segment-wise identity transform ".repeat(300);
    fs::write(&source, &original).unwrap();

    // An identity "compressor": the reassembled output equals the input
    let config = CompressConfig {
        codec: Codec::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "cp \"$0\" \"$0.id\"".to_string()],
            suffix: ".id".to_string(),
        },
        ..Default::default()
    };
    let world = ThreadWorld::new(5).unwrap();
    let stats = world
        .run(|comm| compress_files(&comm, &[source.clone()], &config))
        .unwrap();

    assert_eq!(stats[0].files, 1);
    assert_eq!(stats[0].segments, 5);
    assert_eq!(fs::read(dir.path().join("plain.id")).unwrap(), original);
}

#[cfg(unix)]
#[test]
fn test_output_suffix_differs_from_program_suffix() {
    use collate::config::Codec;

    let dir = tempdir().unwrap();
    let source = dir.path().join("plain");
    let original = b"renamed after the tool has run ".repeat(100);
    fs::write(&source, &original).unwrap();

    let config = CompressConfig {
        suffix: Some(".identity".to_string()),
        codec: Codec::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "cp \"$0\" \"$0.id\"".to_string()],
            suffix: ".id".to_string(),
        },
        ..Default::default()
    };
    let world = ThreadWorld::new(3).unwrap();
    let stats = world
        .run(|comm| compress_files(&comm, &[source.clone()], &config))
        .unwrap();

    assert_eq!(stats[0].files, 1);
    assert_eq!(stats[0].failed, 0);
    assert_eq!(fs::read(dir.path().join("plain.identity")).unwrap(), original);
    assert!(!dir.path().join("plain.id").exists());
}
