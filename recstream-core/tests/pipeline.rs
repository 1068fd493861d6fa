// recstream-core/tests/pipeline.rs

//! End-to-end checks through the public API: runtime, datasets, sinks.

use std::io::Write;
use std::sync::Arc;

use recstream_core::config::StreamConfig;
use recstream_core::dataset::{encode_struct, ElementStream, IteratorState, Pipeline};
use recstream_core::registry::DecoderOptions;
use recstream_core::{
    Compression, DecodedValue, ElementType, InMemoryCache, StreamError, StreamRuntime,
};
use tempfile::TempDir;

fn runtime_in(temp_dir: &TempDir) -> StreamRuntime {
    let mut config = StreamConfig::default();
    config.storage.base_path = temp_dir.path().to_path_buf();
    // Small chunks so records straddle reads
    config.source.read_chunk_size = 3;
    StreamRuntime::from_config(config).unwrap()
}

fn raw_fixed(record_size: usize) -> DecoderOptions {
    DecoderOptions {
        record_size: Some(record_size),
        ..Default::default()
    }
}

fn lines(runtime: &StreamRuntime, source: &str, compression: Option<Compression>) -> Vec<String> {
    runtime
        .text_lines(&[source], compression)
        .unwrap()
        .make_iterator()
        .map(|v| v.unwrap().to_string())
        .collect()
}

#[test]
fn test_fixed_size_records_divide_evenly() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    for (len, record_size) in [(12usize, 3usize), (64, 8), (7, 7), (0, 4)] {
        let data: Vec<u8> = (0..len).map(|b| b as u8).collect();
        std::fs::write(temp_dir.path().join("fixed.bin"), &data).unwrap();

        let records: Vec<Vec<u8>> = runtime
            .dataset("raw", &raw_fixed(record_size), &["fixed.bin"], None)
            .unwrap()
            .make_iterator()
            .map(|v| v.unwrap().as_bytes().unwrap().to_vec())
            .collect();

        assert_eq!(records.len(), len / record_size);
        assert!(records.iter().all(|r| r.len() == record_size));
        assert_eq!(records.concat(), data);
    }
}

#[test]
fn test_three_two_byte_records() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("six.bin"), [1u8, 2, 3, 4, 5, 6]).unwrap();

    let mut iter = runtime
        .dataset("raw", &raw_fixed(2), &["six.bin"], None)
        .unwrap()
        .make_iterator();

    assert_eq!(iter.next_element().unwrap(), DecodedValue::Bytes(vec![1, 2]));
    assert_eq!(iter.next_element().unwrap(), DecodedValue::Bytes(vec![3, 4]));
    assert_eq!(iter.next_element().unwrap(), DecodedValue::Bytes(vec![5, 6]));
    assert!(matches!(
        iter.next_element(),
        Err(StreamError::IteratorExhausted)
    ));
}

#[test]
fn test_trailing_partial_record_is_truncation() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("odd.bin"), [1u8, 2, 3, 4, 5]).unwrap();

    let results: Vec<_> = runtime
        .dataset("raw", &raw_fixed(2), &["odd.bin"], None)
        .unwrap()
        .make_iterator()
        .collect();

    assert_eq!(results.len(), 3);
    assert!(matches!(
        results[2],
        Err(StreamError::TruncatedRecord {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn test_delimited_record_counts() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    for contents in ["", "\n", "a", "a\n", "a\nb\nc", "a\nb\nc\n", "\n\nx", "one\n\ntwo\n"] {
        std::fs::write(temp_dir.path().join("t.txt"), contents).unwrap();
        let delimiters = contents.matches('\n').count();
        let trailing = usize::from(!contents.is_empty() && !contents.ends_with('\n'));
        assert_eq!(
            lines(&runtime, "t.txt", None).len(),
            delimiters + trailing,
            "{contents:?}"
        );
    }
}

#[test]
fn test_text_with_and_without_final_newline() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    std::fs::write(temp_dir.path().join("a.txt"), "a\nb\nc").unwrap();
    std::fs::write(temp_dir.path().join("b.txt"), "a\nb\nc\n").unwrap();
    assert_eq!(lines(&runtime, "a.txt", None), vec!["a", "b", "c"]);
    assert_eq!(lines(&runtime, "b.txt", None), vec!["a", "b", "c"]);
}

#[test]
fn test_reiteration_reproduces_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("r.txt"), "x\ny\nz\n").unwrap();

    let dataset = runtime.text_lines(&["r.txt", "r.txt"], None).unwrap();
    let first: Vec<_> = dataset.make_iterator().map(Result::unwrap).collect();
    let second: Vec<_> = dataset.make_iterator().map(Result::unwrap).collect();
    assert_eq!(first.len(), 6);
    assert_eq!(first, second);

    let repeated: Vec<_> = dataset
        .clone()
        .repeat(Some(2))
        .make_iterator()
        .map(Result::unwrap)
        .collect();
    assert_eq!(repeated, [first.clone(), first].concat());
}

#[test]
fn test_zip_lengths() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("a"), "1\n2\n3\n").unwrap();
    std::fs::write(temp_dir.path().join("b"), "x\ny\nz\n").unwrap();
    std::fs::write(temp_dir.path().join("c"), "p\nq\n").unwrap();

    let text = |name: &str| runtime.text_lines(&[name], None).unwrap();

    let equal = text("a").zip(text("b"));
    assert_eq!(equal.make_iterator().map(Result::unwrap).count(), 3);

    let unequal = text("a").zip(text("c"));
    let results: Vec<_> = unequal.make_iterator().collect();
    assert_eq!(results.len(), 3);
    assert!(results[..2].iter().all(Result::is_ok));
    assert!(matches!(
        results[2],
        Err(StreamError::ZipMisalignment { .. })
    ));
}

#[test]
fn test_close_releases_source() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("h.txt"), "1\n2\n3\n").unwrap();

    let dataset = runtime.text_lines(&["h.txt"], None).unwrap();
    let mut iter = dataset.make_iterator();
    assert!(iter.next_element().is_ok());
    assert!(iter.current_source().is_some());

    iter.close();
    assert_eq!(iter.state(), IteratorState::Closed);
    assert!(iter.current_source().is_none());

    // The path can be replaced and opened again by a new iterator
    std::fs::remove_file(temp_dir.path().join("h.txt")).unwrap();
    std::fs::write(temp_dir.path().join("h.txt"), "4\n").unwrap();
    assert_eq!(lines(&runtime, "h.txt", None), vec!["4"]);
}

#[test]
fn test_close_releases_remote_connection() {
    let temp_dir = TempDir::new().unwrap();
    let cache = InMemoryCache::new();
    for i in 0..10i64 {
        cache.insert("numbers", i.to_be_bytes().to_vec(), format!("n{i}"));
    }
    let runtime = runtime_in(&temp_dir)
        .with_cache_service(Arc::new(cache.clone()))
        .unwrap();

    let dataset = runtime
        .remote_cache(Some("numbers"), ElementType::Int64, ElementType::Utf8)
        .unwrap();

    let mut iter = dataset.make_iterator();
    assert_eq!(iter.next_element().unwrap().to_string(), "0\tn0");
    assert!(cache.open_connections() >= 1);
    iter.close();
    assert_eq!(cache.open_connections(), 0);

    let all: Vec<_> = dataset.make_iterator().map(Result::unwrap).collect();
    assert_eq!(all.len(), 10);
    assert_eq!(cache.open_connections(), 0);
}

#[test]
fn test_remote_scan_survives_one_drop() {
    let temp_dir = TempDir::new().unwrap();
    let cache = InMemoryCache::new();
    for key in ["a", "b", "c", "d", "e"] {
        cache.insert("letters", key, key.to_uppercase());
    }

    let mut config = StreamConfig::default();
    config.storage.base_path = temp_dir.path().to_path_buf();
    config.remote.page_size = 2;
    config.remote.reconnect_delay_ms = 0;
    let runtime = StreamRuntime::from_config(config)
        .unwrap()
        .with_cache_service(Arc::new(cache.clone()))
        .unwrap();

    let dataset = runtime
        .remote_cache(Some("letters"), ElementType::Utf8, ElementType::Utf8)
        .unwrap();
    let mut iter = dataset.make_iterator();
    assert!(iter.next_element().is_ok());

    cache.drop_next_requests(1);
    let rest: Vec<String> = iter.map(|v| v.unwrap().to_string()).collect();
    assert_eq!(rest, vec!["b\tB", "c\tC", "d\tD", "e\tE"]);
}

#[test]
fn test_remote_cache_struct_rows() {
    let temp_dir = TempDir::new().unwrap();
    let cache = InMemoryCache::new();
    for (key, name, val) in [(1i64, "TEST1", 42i64), (2, "TEST2", 43), (3, "TEST3", 44)] {
        let row = encode_struct([name.as_bytes().to_vec(), val.to_be_bytes().to_vec()]);
        cache.insert("SQL_PUBLIC_TEST_CACHE", key.to_be_bytes().to_vec(), row);
    }
    let runtime = runtime_in(&temp_dir)
        .with_cache_service(Arc::new(cache))
        .unwrap();

    let row_type: ElementType = "struct<NAME: string, VAL: int64>".parse().unwrap();
    let dataset = runtime
        .remote_cache(Some("SQL_PUBLIC_TEST_CACHE"), ElementType::Int64, row_type.clone())
        .unwrap();

    let signature = &dataset.output_signatures()[0];
    assert_eq!(signature.fields()[0].dtype, ElementType::Int64);
    assert_eq!(signature.fields()[1].dtype, row_type);

    let mut iter = dataset.make_iterator();
    let mut rows = Vec::new();
    for _ in 0..3 {
        rows.push(iter.next_element().unwrap());
    }
    assert!(matches!(
        iter.next_element(),
        Err(StreamError::IteratorExhausted)
    ));

    let rendered: Vec<String> = rows.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            "1\t{NAME: TEST1, VAL: 42}",
            "2\t{NAME: TEST2, VAL: 43}",
            "3\t{NAME: TEST3, VAL: 44}",
        ]
    );
    match &rows[2] {
        DecodedValue::KeyValue { value, .. } => {
            assert_eq!(value.member("VAL"), Some(&DecodedValue::Int64(44)));
        }
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn test_sink_positional_write_then_read() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    let mut sink = runtime.text_output("out/seq.txt", None).unwrap();
    sink.set_item(42, "bytes for forty-two").unwrap();
    assert_eq!(sink.get_item(42), Some("bytes for forty-two"));
    sink.set_item(7, "seven").unwrap();
    sink.set_item(42, "replaced").unwrap();
    assert_eq!(sink.get_item(42), Some("replaced"));
    sink.finish().unwrap();

    assert_eq!(lines(&runtime, "out/seq.txt", None), vec!["seven", "replaced"]);
}

#[test]
fn test_compressed_sink_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    for (name, compression) in [("z.txt.gz", Compression::Gzip), ("z.txt.zz", Compression::Zlib)] {
        let mut sink = runtime.text_output(name, Some(compression)).unwrap();
        for (i, line) in ["first", "", "third"].iter().enumerate() {
            sink.set_item(i as u64, *line).unwrap();
        }
        sink.finish().unwrap();

        assert_eq!(lines(&runtime, name, Some(compression)), vec!["first", "", "third"]);
    }
}

#[test]
fn test_concatenated_gzip_members() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    let mut bytes = Vec::new();
    for part in ["a\nb\n", "c\n"] {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(part.as_bytes()).unwrap();
        bytes.extend(encoder.finish().unwrap());
    }
    std::fs::write(temp_dir.path().join("multi.gz"), bytes).unwrap();

    assert_eq!(lines(&runtime, "multi.gz", Some(Compression::Gzip)), vec!["a", "b", "c"]);
}

#[test]
fn test_corrupt_and_missing_sources() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);
    std::fs::write(temp_dir.path().join("bad.gz"), b"definitely not gzip").unwrap();

    let mut iter = runtime
        .text_lines(&["bad.gz"], Some(Compression::Gzip))
        .unwrap()
        .make_iterator();
    assert!(matches!(
        iter.next_element(),
        Err(StreamError::CorruptStream { .. })
    ));
    assert_eq!(iter.state(), IteratorState::Closed);

    let mut missing = runtime.text_lines(&["nope.txt"], None).unwrap().make_iterator();
    assert!(matches!(
        missing.next_element(),
        Err(StreamError::SourceNotFound { .. })
    ));

    assert!(matches!(
        "bzip2".parse::<Compression>(),
        Err(StreamError::UnsupportedCompression { .. })
    ));
}

#[test]
fn test_declared_signature_before_iteration() {
    let temp_dir = TempDir::new().unwrap();
    let runtime = runtime_in(&temp_dir);

    // Nothing exists yet; constructing and inspecting opens nothing
    let mnist = runtime
        .mnist(&["images.idx"], &["labels.idx"], None)
        .unwrap();
    let signatures: Vec<String> = mnist
        .output_signatures()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        signatures,
        vec!["(image: uint8[None, None])", "(label: uint8[])"]
    );
}
