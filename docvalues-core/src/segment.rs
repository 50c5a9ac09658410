//! Segment-level state the doc-values codec needs: field numbering, the
//! document count and where the files live.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directories::{Directory, DirectoryWriter};
use crate::docvalues::DocValuesType;

/// One field of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: i32,
    /// `None` for fields without doc values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_values_type: Option<DocValuesType>,
}

/// Field table of a segment, addressable by number and by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FieldInfo>", into = "Vec<FieldInfo>")]
pub struct FieldInfos {
    fields: Vec<FieldInfo>,
    by_number: HashMap<i32, usize>,
    by_name: HashMap<String, usize>,
}

impl From<Vec<FieldInfo>> for FieldInfos {
    fn from(fields: Vec<FieldInfo>) -> Self {
        let mut infos = FieldInfos::default();
        for field in fields {
            infos.push(field);
        }
        infos
    }
}

impl From<FieldInfos> for Vec<FieldInfo> {
    fn from(infos: FieldInfos) -> Self {
        infos.fields
    }
}

impl FieldInfos {
    pub fn builder() -> FieldInfosBuilder {
        FieldInfosBuilder::default()
    }

    fn push(&mut self, field: FieldInfo) {
        let idx = self.fields.len();
        self.by_number.insert(field.number, idx);
        self.by_name.insert(field.name.clone(), idx);
        self.fields.push(field);
    }

    pub fn by_number(&self, number: i32) -> Option<&FieldInfo> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder for [`FieldInfos`]; numbers are assigned in insertion order.
#[derive(Debug, Default)]
pub struct FieldInfosBuilder {
    infos: FieldInfos,
}

impl FieldInfosBuilder {
    pub fn add_field(&mut self, name: &str, doc_values_type: Option<DocValuesType>) -> i32 {
        let number = self.infos.len() as i32;
        self.infos.push(FieldInfo {
            name: name.to_string(),
            number,
            doc_values_type,
        });
        number
    }

    pub fn add_numeric_field(&mut self, name: &str) -> i32 {
        self.add_field(name, Some(DocValuesType::Numeric))
    }

    pub fn add_binary_field(&mut self, name: &str) -> i32 {
        self.add_field(name, Some(DocValuesType::Binary))
    }

    pub fn add_sorted_field(&mut self, name: &str) -> i32 {
        self.add_field(name, Some(DocValuesType::Sorted))
    }

    pub fn add_sorted_set_field(&mut self, name: &str) -> i32 {
        self.add_field(name, Some(DocValuesType::SortedSet))
    }

    pub fn build(self) -> FieldInfos {
        self.infos
    }
}

/// Everything a writer needs to flush one segment's doc values.
#[derive(Clone)]
pub struct SegmentWriteState {
    pub directory: Arc<dyn DirectoryWriter>,
    pub segment_name: String,
    /// Appended to the file names as `_{suffix}` when non-empty.
    pub segment_suffix: String,
    pub max_doc: u32,
    pub field_infos: Arc<FieldInfos>,
}

impl SegmentWriteState {
    pub fn new(
        directory: Arc<dyn DirectoryWriter>,
        segment_name: impl Into<String>,
        max_doc: u32,
        field_infos: Arc<FieldInfos>,
    ) -> Self {
        Self {
            directory,
            segment_name: segment_name.into(),
            segment_suffix: String::new(),
            max_doc,
            field_infos,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.segment_suffix = suffix.into();
        self
    }

    pub fn file_name(&self, extension: &str) -> PathBuf {
        segment_file_name(&self.segment_name, &self.segment_suffix, extension)
    }
}

/// Everything a reader needs to open one segment's doc values.
#[derive(Clone)]
pub struct SegmentReadState {
    pub directory: Arc<dyn Directory>,
    pub segment_name: String,
    pub segment_suffix: String,
    pub max_doc: u32,
    pub field_infos: Arc<FieldInfos>,
}

impl SegmentReadState {
    pub fn new(
        directory: Arc<dyn Directory>,
        segment_name: impl Into<String>,
        max_doc: u32,
        field_infos: Arc<FieldInfos>,
    ) -> Self {
        Self {
            directory,
            segment_name: segment_name.into(),
            segment_suffix: String::new(),
            max_doc,
            field_infos,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.segment_suffix = suffix.into();
        self
    }

    pub fn file_name(&self, extension: &str) -> PathBuf {
        segment_file_name(&self.segment_name, &self.segment_suffix, extension)
    }
}

/// `{segment}[_{suffix}].{extension}`
pub fn segment_file_name(segment: &str, suffix: &str, extension: &str) -> PathBuf {
    if suffix.is_empty() {
        PathBuf::from(format!("{}.{}", segment, extension))
    } else {
        PathBuf::from(format!("{}_{}.{}", segment, suffix, extension))
    }
}

/// Serializable description of a flushed segment, enough to reopen it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    #[serde(default)]
    pub suffix: String,
    pub max_doc: u32,
    pub fields: FieldInfos,
}
