//! Segment operations: build, info, check, dump

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::{info, warn};

use docvalues_core::{
    BinaryDocValues, DocValuesConfig, DocValuesReader, DocValuesType, DocValuesWriter, FieldInfos,
    MmapDirectory, NumericDocValues, SegmentInfo, SegmentReadState, SegmentWriteState,
    SortedDocValues, SortedSetDocValues,
};

/// `name:type` as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub doc_values_type: DocValuesType,
}

impl FromStr for FieldSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, ty) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected name:type, got {:?}", s))?;
        if name.is_empty() {
            return Err(format!("empty field name in {:?}", s));
        }
        let doc_values_type = match ty.to_ascii_lowercase().as_str() {
            "numeric" => DocValuesType::Numeric,
            "binary" => DocValuesType::Binary,
            "sorted" => DocValuesType::Sorted,
            "sorted_set" | "sortedset" => DocValuesType::SortedSet,
            other => return Err(format!("unknown doc values type {:?}", other)),
        };
        Ok(FieldSpec {
            name: name.to_string(),
            doc_values_type,
        })
    }
}

fn segment_info_path(dir: &Path, segment: &str) -> PathBuf {
    dir.join(format!("{}.si.json", segment))
}

fn read_documents<R: BufRead>(reader: R) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON at line {}", line_no + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn numeric_value(doc: usize, field: &str, value: Option<&Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("doc {}: field {} is not a 64-bit integer: {}", doc, field, v)),
    }
}

fn bytes_value(doc: usize, field: &str, value: Option<&Value>) -> Result<Option<Vec<u8>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_bytes().to_vec())),
        Some(v) => bail!("doc {}: field {} is not a string: {}", doc, field, v),
    }
}

fn set_values(doc: usize, field: &str, value: Option<&Value>) -> Result<Vec<Vec<u8>>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                bytes_value(doc, field, Some(item))?
                    .ok_or_else(|| anyhow!("doc {}: null inside field {}", doc, field))
            })
            .collect(),
        Some(v) => Ok(bytes_value(doc, field, Some(v))?.into_iter().collect()),
    }
}

pub fn build_segment(
    dir: &Path,
    segment: &str,
    fields: &[FieldSpec],
    input: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            serde_json::from_str::<DocValuesConfig>(&text)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        }
        None => DocValuesConfig::default(),
    };
    config.validate()?;

    let docs = match input {
        Some(path) => {
            info!("Reading documents from {:?}", path);
            let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
            read_documents(BufReader::new(file))?
        }
        None => {
            info!("Reading documents from stdin");
            read_documents(io::stdin().lock())?
        }
    };
    let max_doc = u32::try_from(docs.len()).context("Too many documents for one segment")?;

    let mut builder = FieldInfos::builder();
    for spec in fields {
        builder.add_field(&spec.name, Some(spec.doc_values_type));
    }
    let infos = Arc::new(builder.build());
    if infos.len() != fields.len() {
        bail!("Duplicate field names in --field");
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
    let directory = MmapDirectory::new(dir);
    let state = SegmentWriteState::new(Arc::new(directory), segment, max_doc, Arc::clone(&infos));
    let mut writer = DocValuesWriter::new(&state, &config)?;

    for spec in fields {
        let field = infos
            .by_name(&spec.name)
            .ok_or_else(|| anyhow!("field {} missing from field infos", spec.name))?;
        let name = spec.name.as_str();
        match spec.doc_values_type {
            DocValuesType::Numeric => {
                let values = docs
                    .iter()
                    .enumerate()
                    .map(|(i, d)| numeric_value(i, name, d.get(name)))
                    .collect::<Result<Vec<_>>>()?;
                writer.add_numeric_field(field, values)?;
            }
            DocValuesType::Binary => {
                let values = docs
                    .iter()
                    .enumerate()
                    .map(|(i, d)| bytes_value(i, name, d.get(name)))
                    .collect::<Result<Vec<_>>>()?;
                writer.add_binary_field(field, values)?;
            }
            DocValuesType::Sorted => {
                let values = docs
                    .iter()
                    .enumerate()
                    .map(|(i, d)| bytes_value(i, name, d.get(name)))
                    .collect::<Result<Vec<_>>>()?;
                writer.add_sorted_field(field, values)?;
            }
            DocValuesType::SortedSet => {
                let values = docs
                    .iter()
                    .enumerate()
                    .map(|(i, d)| set_values(i, name, d.get(name)))
                    .collect::<Result<Vec<_>>>()?;
                writer.add_sorted_set_field(field, values)?;
            }
        }
    }
    let stats = writer.finish()?;

    for field in &stats.fields {
        info!(
            "{} ({}): {} as {}, {} data bytes, {} meta bytes",
            field.field, field.doc_values_type, field.value_count, field.encoding, field.data_bytes, field.meta_bytes
        );
    }

    let segment_info = SegmentInfo {
        name: segment.to_string(),
        suffix: String::new(),
        max_doc,
        fields: (*infos).clone(),
    };
    let info_path = segment_info_path(dir, segment);
    fs::write(&info_path, serde_json::to_string_pretty(&segment_info)?)
        .with_context(|| format!("Failed to write {:?}", info_path))?;

    info!(
        "Wrote {} documents, {} fields to {:?} ({} data bytes, {} meta bytes)",
        max_doc,
        stats.fields.len(),
        dir,
        stats.data_bytes,
        stats.meta_bytes
    );
    Ok(())
}

fn open_segment(dir: &Path, segment: &str) -> Result<DocValuesReader> {
    let info_path = segment_info_path(dir, segment);
    let text = fs::read_to_string(&info_path)
        .with_context(|| format!("Failed to read segment info: {:?}", info_path))?;
    let segment_info: SegmentInfo = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse segment info: {:?}", info_path))?;
    let state = SegmentReadState::new(
        Arc::new(MmapDirectory::new(dir)),
        segment_info.name,
        segment_info.max_doc,
        Arc::new(segment_info.fields),
    )
    .with_suffix(segment_info.suffix);
    Ok(DocValuesReader::open(&state)?)
}

pub fn show_info(dir: &Path, segment: &str) -> Result<()> {
    let reader = open_segment(dir, segment)?;
    println!("Segment: {}", segment);
    println!("  Format version: {}", reader.version());
    println!("  Documents: {}", reader.max_doc());
    println!();
    println!("Fields:");
    for summary in reader.field_summaries() {
        let terms = summary
            .term_count
            .map(|t| format!(", {} terms", t))
            .unwrap_or_default();
        println!(
            "  {} [{}] {} - {} values{}{}",
            summary.name,
            summary.number,
            summary.doc_values_type,
            summary.value_count,
            terms,
            if summary.has_missing { ", has missing" } else { "" }
        );
        println!("      encoding: {}", summary.encoding);
    }
    println!();
    println!("Reader heap: {} bytes", reader.ram_bytes_used());
    Ok(())
}

pub fn check_segment(dir: &Path, segment: &str) -> Result<()> {
    let reader = open_segment(dir, segment)?;
    if let Err(e) = reader.check_integrity() {
        warn!("Checksum verification failed for segment {}", segment);
        return Err(e.into());
    }
    info!(
        "Segment {} OK: {} documents, {} fields",
        segment,
        reader.max_doc(),
        reader.field_summaries().len()
    );
    Ok(())
}

fn bytes_json(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

pub fn dump_field(dir: &Path, segment: &str, field: &str, limit: Option<u32>) -> Result<()> {
    let reader = open_segment(dir, segment)?;
    let bits = reader.docs_with_field(field)?;
    let end = limit.map_or(reader.max_doc(), |l| l.min(reader.max_doc()));
    let summary = reader
        .field_summaries()
        .into_iter()
        .find(|s| s.name == field)
        .ok_or_else(|| anyhow!("field {} has no doc values", field))?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut emit = |doc: u32, value: Value| -> Result<()> {
        writeln!(out, "{}", json!({ "doc": doc, "value": value }))?;
        Ok(())
    };

    match summary.doc_values_type {
        DocValuesType::Numeric => {
            let values = reader.numeric(field)?;
            for doc in 0..end {
                let value = if bits.get(doc)? { json!(values.get(doc)?) } else { Value::Null };
                emit(doc, value)?;
            }
        }
        DocValuesType::Binary => {
            let mut values = reader.binary(field)?;
            for doc in 0..end {
                let value = if bits.get(doc)? { bytes_json(values.get(doc)?) } else { Value::Null };
                emit(doc, value)?;
            }
        }
        DocValuesType::Sorted => {
            let mut values = reader.sorted(field)?;
            for doc in 0..end {
                let value = values.get(doc)?.map(bytes_json).unwrap_or(Value::Null);
                emit(doc, value)?;
            }
        }
        DocValuesType::SortedSet => {
            let mut values = reader.sorted_set(field)?;
            for doc in 0..end {
                values.set_document(doc)?;
                let mut ords = Vec::with_capacity(values.cardinality());
                loop {
                    let ord = values.next_ord()?;
                    if ord < 0 {
                        break;
                    }
                    ords.push(ord);
                }
                let mut terms = Vec::with_capacity(ords.len());
                for ord in ords {
                    terms.push(bytes_json(values.lookup_ord(ord)?));
                }
                emit(doc, Value::Array(terms))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
