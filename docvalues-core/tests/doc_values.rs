//! End-to-end tests: write a segment, reopen it and compare against the input.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Barrier};

use docvalues_core::docvalues::{SortedSetEncoding, VERSION_CURRENT, VERSION_START};
use docvalues_core::{
    BinaryDocValues, Directory, DirectoryWriter, DocValuesConfig, DocValuesReader, DocValuesType,
    DocValuesWriter, Error, FieldInfos, NumericDocValues, RamDirectory, SeekStatus, SegmentReadState,
    SegmentWriteState, SortedDocValues, SortedSetDocValues,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEGMENT: &str = "_seg";

/// One field's worth of input.
#[derive(Debug, Clone)]
enum Column {
    Numeric(Vec<Option<i64>>),
    Binary(Vec<Option<Vec<u8>>>),
    Sorted(Vec<Option<Vec<u8>>>),
    SortedSet(Vec<Vec<Vec<u8>>>),
}

impl Column {
    fn doc_values_type(&self) -> DocValuesType {
        match self {
            Column::Numeric(_) => DocValuesType::Numeric,
            Column::Binary(_) => DocValuesType::Binary,
            Column::Sorted(_) => DocValuesType::Sorted,
            Column::SortedSet(_) => DocValuesType::SortedSet,
        }
    }

    fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Binary(v) | Column::Sorted(v) => v.len(),
            Column::SortedSet(v) => v.len(),
        }
    }
}

fn field_infos(columns: &[(&str, Column)]) -> Arc<FieldInfos> {
    let mut builder = FieldInfos::builder();
    for (name, column) in columns {
        builder.add_field(name, Some(column.doc_values_type()));
    }
    Arc::new(builder.build())
}

fn write_segment(dir: Arc<dyn DirectoryWriter>, columns: &[(&str, Column)], config: &DocValuesConfig) {
    let max_doc = columns.first().map(|(_, c)| c.len()).unwrap_or(0) as u32;
    let infos = field_infos(columns);
    let state = SegmentWriteState::new(dir, SEGMENT, max_doc, Arc::clone(&infos));
    let mut writer = DocValuesWriter::new(&state, config).unwrap();
    for (name, column) in columns {
        let field = infos.by_name(name).unwrap();
        match column {
            Column::Numeric(values) => writer.add_numeric_field(field, values.iter().copied()).unwrap(),
            Column::Binary(values) => writer.add_binary_field(field, values.iter().map(|v| v.as_ref())).unwrap(),
            Column::Sorted(values) => writer.add_sorted_field(field, values.iter().map(|v| v.as_ref())).unwrap(),
            Column::SortedSet(docs) => writer.add_sorted_set_field(field, docs.iter()).unwrap(),
        }
    }
    writer.finish().unwrap();
}

fn open_segment(dir: Arc<dyn Directory>, columns: &[(&str, Column)]) -> docvalues_core::Result<DocValuesReader> {
    let max_doc = columns.first().map(|(_, c)| c.len()).unwrap_or(0) as u32;
    let state = SegmentReadState::new(dir, SEGMENT, max_doc, field_infos(columns));
    DocValuesReader::open(&state)
}

fn roundtrip(columns: &[(&str, Column)], config: &DocValuesConfig) -> DocValuesReader {
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), columns, config);
    let reader = open_segment(Arc::new(dir), columns).unwrap();
    verify(&reader, columns);
    reader
}

fn verify(reader: &DocValuesReader, columns: &[(&str, Column)]) {
    for (name, column) in columns {
        let bits = reader.docs_with_field(name).unwrap();
        match column {
            Column::Numeric(values) => {
                let numeric = reader.numeric(name).unwrap();
                for (doc, expected) in values.iter().enumerate() {
                    let doc = doc as u32;
                    assert_eq!(numeric.get(doc).unwrap(), expected.unwrap_or(0), "{} doc {}", name, doc);
                    assert_eq!(bits.get(doc).unwrap(), expected.is_some());
                }
            }
            Column::Binary(values) => {
                let mut binary = reader.binary(name).unwrap();
                for (doc, expected) in values.iter().enumerate() {
                    let doc = doc as u32;
                    let expected_bytes = expected.as_deref().unwrap_or_default();
                    assert_eq!(binary.get(doc).unwrap(), expected_bytes, "{} doc {}", name, doc);
                    assert_eq!(bits.get(doc).unwrap(), expected.is_some());
                }
            }
            Column::Sorted(values) => {
                let terms: Vec<&Vec<u8>> = values
                    .iter()
                    .flatten()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let mut sorted = reader.sorted(name).unwrap();
                assert_eq!(sorted.value_count(), terms.len() as u64);
                for (doc, expected) in values.iter().enumerate() {
                    let doc = doc as u32;
                    let ord = sorted.get_ord(doc).unwrap();
                    match expected {
                        Some(term) => {
                            assert_eq!(ord, terms.binary_search(&term).unwrap() as i64);
                            assert_eq!(sorted.lookup_ord(ord).unwrap(), term.as_slice());
                        }
                        None => assert_eq!(ord, -1),
                    }
                    assert_eq!(bits.get(doc).unwrap(), expected.is_some());
                }
                for (ord, term) in terms.iter().enumerate() {
                    assert_eq!(sorted.lookup_term(term).unwrap(), ord as i64);
                }
            }
            Column::SortedSet(docs) => {
                let terms: Vec<&Vec<u8>> = docs
                    .iter()
                    .flatten()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let mut set = reader.sorted_set(name).unwrap();
                assert_eq!(set.value_count(), terms.len() as u64);
                for (doc, values) in docs.iter().enumerate() {
                    let expected: Vec<i64> = values
                        .iter()
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .map(|t| terms.binary_search(&t).unwrap() as i64)
                        .collect();
                    set.set_document(doc as u32).unwrap();
                    assert_eq!(set.cardinality(), expected.len());
                    for (i, &ord) in expected.iter().enumerate() {
                        assert_eq!(set.ord_at(i).unwrap(), ord);
                    }
                    let mut actual = Vec::new();
                    loop {
                        let ord = set.next_ord().unwrap();
                        if ord == -1 {
                            break;
                        }
                        actual.push(ord);
                    }
                    assert_eq!(actual, expected, "{} doc {}", name, doc);
                    assert_eq!(bits.get(doc as u32).unwrap(), !expected.is_empty());
                }
                for (ord, term) in terms.iter().enumerate() {
                    assert_eq!(set.lookup_ord(ord as i64).unwrap(), term.as_slice());
                }
            }
        }
    }
}

fn random_term(rng: &mut StdRng, alphabet: &[u8], max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect()
}

fn random_columns(seed: u64, max_doc: usize) -> Vec<(&'static str, Column)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let constant = Column::Numeric(vec![Some(42); max_doc]);
    let small = Column::Numeric(
        (0..max_doc)
            .map(|_| rng.r#gen::<bool>().then(|| rng.gen_range(-3..4)))
            .collect(),
    );
    let gcd = Column::Numeric((0..max_doc).map(|_| Some(rng.gen_range(0..100_000i64) * 1009 - 7)).collect());
    let wide = Column::Numeric((0..max_doc).map(|_| Some(rng.r#gen::<i64>())).collect());
    let timestamps = Column::Numeric(
        (0..max_doc)
            .map(|i| Some(1_600_000_000_000 + i as i64 * 1000 + rng.gen_range(0..10)))
            .collect(),
    );
    let fixed = Column::Binary((0..max_doc).map(|_| Some(rng.r#gen::<[u8; 8]>().to_vec())).collect());
    let variable = Column::Binary(
        (0..max_doc)
            .map(|_| (rng.gen_range(0..5) > 0).then(|| random_term(&mut rng, b"abcdefgh", 40)))
            .collect(),
    );
    let sorted = Column::Sorted(
        (0..max_doc)
            .map(|_| (rng.gen_range(0..4) > 0).then(|| random_term(&mut rng, b"abc", 6)))
            .collect(),
    );
    let multi = Column::SortedSet(
        (0..max_doc)
            .map(|_| {
                let n = rng.gen_range(0..5);
                (0..n).map(|_| random_term(&mut rng, b"xyz", 4)).collect()
            })
            .collect(),
    );
    vec![
        ("constant", constant),
        ("small", small),
        ("gcd", gcd),
        ("wide", wide),
        ("timestamps", timestamps),
        ("fixed", fixed),
        ("variable", variable),
        ("sorted", sorted),
        ("multi", multi),
    ]
}

#[test]
fn test_roundtrip_random_segments() {
    let configs = [
        DocValuesConfig::default(),
        DocValuesConfig::default().with_block_size(64).with_address_interval(3),
        DocValuesConfig::default().with_optimize_storage(false).with_block_size(128),
        DocValuesConfig::default().with_max_table_size(4),
    ];
    for (seed, max_doc) in [(1u64, 1usize), (2, 100), (3, 1000), (4, 5000)] {
        let columns = random_columns(seed, max_doc);
        for config in &configs {
            roundtrip(&columns, config);
        }
    }
}

#[test]
fn test_empty_segment() {
    let columns = vec![
        ("n", Column::Numeric(vec![])),
        ("b", Column::Binary(vec![])),
        ("s", Column::Sorted(vec![])),
        ("ss", Column::SortedSet(vec![])),
    ];
    let reader = roundtrip(&columns, &DocValuesConfig::default());
    assert_eq!(reader.max_doc(), 0);
    assert!(reader.numeric("n").unwrap().get(0).is_err());
}

#[test]
fn test_missing_numeric_values() {
    let columns = vec![("n", Column::Numeric(vec![Some(5), None, None, Some(8)]))];
    let reader = roundtrip(&columns, &DocValuesConfig::default());
    let numeric = reader.numeric("n").unwrap();
    let values: Vec<i64> = (0..4).map(|d| numeric.get(d).unwrap()).collect();
    assert_eq!(values, vec![5, 0, 0, 8]);
    let bits = reader.docs_with_field("n").unwrap();
    let present: Vec<bool> = (0..4).map(|d| bits.get(d).unwrap()).collect();
    assert_eq!(present, vec![true, false, false, true]);
    assert!(reader.field_summaries()[0].has_missing);
}

#[test]
fn test_extreme_values() {
    let values = vec![Some(i64::MIN), Some(i64::MAX), Some(0), Some(-1), Some(i64::MIN)];
    let columns = vec![("n", Column::Numeric(values))];
    for config in [
        DocValuesConfig::default(),
        DocValuesConfig::default().with_optimize_storage(false),
    ] {
        let reader = roundtrip(&columns, &config);
        let expected = if config.optimize_storage {
            "TABLE_COMPRESSED"
        } else {
            "DELTA_COMPRESSED"
        };
        assert_eq!(reader.field_summaries()[0].encoding, expected);
    }
}

#[test]
fn test_all_equal_values_use_zero_bits() {
    let columns = vec![("n", Column::Numeric(vec![Some(-9); 10_000]))];
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default().with_block_size(1024));
    let data_len = dir.file_size(Path::new("_seg.dvd")).unwrap();
    // ten constant pages of two or three bytes each plus header and footer
    assert!(data_len < 100, "data file is {} bytes", data_len);
    let reader = open_segment(Arc::new(dir), &columns).unwrap();
    verify(&reader, &columns);
}

#[test]
fn test_dictionary_lookup() {
    let terms = ["apple", "banana", "cherry"];
    let columns = vec![(
        "fruit",
        Column::Sorted(terms.iter().rev().map(|t| Some(t.as_bytes().to_vec())).collect()),
    )];
    let reader = roundtrip(&columns, &DocValuesConfig::default().with_address_interval(2));
    let mut sorted = reader.sorted("fruit").unwrap();
    assert_eq!(sorted.lookup_term(b"banana").unwrap(), 1);
    assert_eq!(sorted.lookup_term(b"avocado").unwrap(), -2);
    assert_eq!(sorted.lookup_term(b"zucchini").unwrap(), -4);
    assert_eq!(sorted.get(0).unwrap(), Some(&b"cherry"[..]));

    let mut terms_enum = sorted.terms_enum();
    assert_eq!(terms_enum.seek_ceil(b"b").unwrap(), SeekStatus::NotFound);
    assert_eq!(terms_enum.term(), b"banana");
    assert_eq!(terms_enum.ord(), 1);
    assert_eq!(terms_enum.next().unwrap(), Some(&b"cherry"[..]));
    assert_eq!(terms_enum.next().unwrap(), None);
}

#[test]
fn test_single_valued_sorted_set_reads_like_sorted() {
    let values: Vec<Option<Vec<u8>>> = ["m", "", "a", "m", "z", "", "q"]
        .iter()
        .map(|t| (!t.is_empty()).then(|| t.as_bytes().to_vec()))
        .collect();
    let as_set: Vec<Vec<Vec<u8>>> = values.iter().map(|v| v.iter().cloned().collect()).collect();
    let columns = vec![
        ("sorted", Column::Sorted(values)),
        ("set", Column::SortedSet(as_set)),
    ];
    let reader = roundtrip(&columns, &DocValuesConfig::default());
    let summaries = reader.field_summaries();
    assert_eq!(summaries[1].encoding, SortedSetEncoding::SingleValued.as_str());

    let mut sorted = reader.sorted_set("sorted").unwrap();
    let mut set = reader.sorted_set("set").unwrap();
    assert_eq!(sorted.value_count(), set.value_count());
    for doc in 0..7 {
        sorted.set_document(doc).unwrap();
        set.set_document(doc).unwrap();
        assert_eq!(sorted.cardinality(), set.cardinality());
        loop {
            let ord = sorted.next_ord().unwrap();
            assert_eq!(ord, set.next_ord().unwrap());
            if ord == -1 {
                break;
            }
        }
    }
    let sorted_bits = reader.docs_with_field("sorted").unwrap();
    let set_bits = reader.docs_with_field("set").unwrap();
    for doc in 0..7 {
        assert_eq!(sorted_bits.get(doc).unwrap(), set_bits.get(doc).unwrap());
    }
    assert_eq!(set.lookup_term(b"q").unwrap(), sorted.lookup_term(b"q").unwrap());
}

#[test]
fn test_duplicate_values_within_a_document() {
    let docs = vec![
        vec![b"b".to_vec(), b"a".to_vec(), b"b".to_vec()],
        vec![b"a".to_vec(), b"a".to_vec()],
    ];
    let columns = vec![("tags", Column::SortedSet(docs))];
    let reader = roundtrip(&columns, &DocValuesConfig::default());
    let mut set = reader.sorted_set("tags").unwrap();
    set.set_document(0).unwrap();
    assert_eq!(set.cardinality(), 2);
    // doc 1 collapses to one value, doc 0 keeps two: not single valued
    assert_eq!(reader.field_summaries()[0].encoding, "WITH_ADDRESS_LIST");
}

#[test]
fn test_legacy_version_roundtrip() {
    let columns = random_columns(11, 300);
    let config = DocValuesConfig::default().with_format_version(VERSION_START);
    let reader = roundtrip(&columns, &config);
    assert_eq!(reader.version(), VERSION_START);
    reader.check_integrity().unwrap();
}

fn corrupt_byte(dir: &RamDirectory, file: &str, pos_from_end: u64) {
    let path = Path::new(file);
    let mut bytes = dir.open_read(path).unwrap().bytes().unwrap().to_vec();
    let pos = bytes.len() - pos_from_end as usize;
    bytes[pos] ^= 0x55;
    dir.write(path, &bytes).unwrap();
}

#[test]
fn test_corrupt_metadata_is_detected_at_open() {
    let columns = random_columns(5, 50);
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    corrupt_byte(&dir, "_seg.dvm", 30);
    let err = open_segment(Arc::new(dir), &columns).err().unwrap();
    assert!(err.is_corruption(), "{}", err);
}

#[test]
fn test_corrupt_data_is_detected_by_check_integrity() {
    let columns = random_columns(6, 50);
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    corrupt_byte(&dir, "_seg.dvd", 40);
    let reader = open_segment(Arc::new(dir), &columns).unwrap();
    assert!(matches!(reader.check_integrity(), Err(Error::Corruption(_))));
}

#[test]
fn test_truncated_data_is_detected_at_open() {
    let columns = random_columns(7, 50);
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    let path = Path::new("_seg.dvd");
    let bytes = dir.open_read(path).unwrap().bytes().unwrap().to_vec();
    dir.write(path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(matches!(open_segment(Arc::new(dir), &columns), Err(Error::Corruption(_))));
}

#[test]
fn test_newer_version_is_rejected() {
    let columns = random_columns(8, 10);
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    let path = Path::new("_seg.dvm");
    let mut bytes = dir.open_read(path).unwrap().bytes().unwrap().to_vec();
    // version follows magic(4) + vint len(1) + "DocValuesMetadata"
    let pos = 4 + 1 + "DocValuesMetadata".len();
    bytes[pos..pos + 4].copy_from_slice(&(VERSION_CURRENT + 1).to_le_bytes());
    dir.write(path, &bytes).unwrap();
    let err = open_segment(Arc::new(dir), &columns).err().unwrap();
    assert!(matches!(err, Error::UnsupportedVersion { version, .. } if version == VERSION_CURRENT + 1));
}

#[test]
fn test_mismatched_file_versions() {
    let columns = random_columns(9, 10);
    let legacy = RamDirectory::new();
    write_segment(Arc::new(legacy.clone()), &columns, &DocValuesConfig::default().with_format_version(VERSION_START));
    let current = RamDirectory::new();
    write_segment(Arc::new(current.clone()), &columns, &DocValuesConfig::default());

    let legacy_data = legacy.open_read(Path::new("_seg.dvd")).unwrap();
    current.write(Path::new("_seg.dvd"), legacy_data.bytes().unwrap()).unwrap();
    assert!(matches!(open_segment(Arc::new(current), &columns), Err(Error::Corruption(_))));
}

#[test]
fn test_close_invalidates_accessors() {
    let columns = random_columns(10, 200);
    let reader = roundtrip(&columns, &DocValuesConfig::default());
    let numeric = reader.numeric("wide").unwrap();
    let mut binary = reader.binary("variable").unwrap();
    let mut set = reader.sorted_set("multi").unwrap();
    reader.close();
    assert!(matches!(numeric.get(3), Err(Error::AlreadyClosed)));
    assert!(matches!(binary.get(3), Err(Error::AlreadyClosed)));
    assert!(matches!(set.lookup_ord(0), Err(Error::AlreadyClosed)));
    assert!(matches!(reader.sorted("sorted"), Err(Error::AlreadyClosed)));
    assert!(matches!(reader.check_integrity(), Err(Error::AlreadyClosed)));
}

#[test]
fn test_concurrent_first_access_shares_one_table() {
    let max_doc = 20_000;
    let mut rng = StdRng::seed_from_u64(12);
    let values: Vec<Option<Vec<u8>>> = (0..max_doc)
        .map(|_| Some(random_term(&mut rng, b"pqrs", 30)))
        .collect();
    let columns = vec![("payload", Column::Binary(values.clone()))];
    let dir = RamDirectory::new();
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    let reader = Arc::new(open_segment(Arc::new(dir), &columns).unwrap());
    let values = Arc::new(values);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let reader = Arc::clone(&reader);
            let barrier = Arc::clone(&barrier);
            let values = Arc::clone(&values);
            std::thread::spawn(move || {
                barrier.wait();
                let mut binary = reader.binary("payload").unwrap();
                for doc in (t..max_doc).step_by(threads) {
                    let expected = values[doc].as_deref().unwrap_or_default();
                    assert_eq!(binary.get(doc as u32).unwrap(), expected);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(reader.cached_structures(), 1);
    assert!(reader.cache_builds() >= 1);
}

#[test]
fn test_mmap_directory_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = docvalues_core::MmapDirectory::new(tmp.path());
    let columns = random_columns(13, 700);
    write_segment(Arc::new(dir.clone()), &columns, &DocValuesConfig::default());
    let reader = open_segment(Arc::new(dir), &columns).unwrap();
    verify(&reader, &columns);
    reader.check_integrity().unwrap();
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn optional_bytes() -> impl Strategy<Value = Option<Vec<u8>>> {
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..12))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn numeric_roundtrip(values in proptest::collection::vec(proptest::option::of(any::<i64>()), 0..300)) {
            roundtrip(&[("n", Column::Numeric(values))], &DocValuesConfig::default().with_block_size(64));
        }

        #[test]
        fn narrow_numeric_roundtrip(values in proptest::collection::vec(proptest::option::of(-20i64..20), 0..300)) {
            roundtrip(&[("n", Column::Numeric(values))], &DocValuesConfig::default().with_block_size(64));
        }

        #[test]
        fn binary_and_sorted_roundtrip(values in proptest::collection::vec(optional_bytes(), 0..200)) {
            roundtrip(
                &[
                    ("b", Column::Binary(values.clone())),
                    ("s", Column::Sorted(values)),
                ],
                &DocValuesConfig::default().with_address_interval(4),
            );
        }

        #[test]
        fn sorted_set_roundtrip(
            docs in proptest::collection::vec(
                proptest::collection::vec(proptest::collection::vec(0u8..4, 0..3), 0..4),
                0..150,
            )
        ) {
            roundtrip(&[("ss", Column::SortedSet(docs))], &DocValuesConfig::default().with_block_size(64));
        }
    }
}
