//! Parsers for atlas label dictionaries (CSV, FSL-style XML, whitespace text)

use crate::structs::{InsightError, Result};
use csv::ReaderBuilder;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Column holding region names in the DiFuMo dictionaries
const DIFUMO_NAME_COLUMN: &str = "Difumo_names";

#[derive(Debug, Deserialize)]
struct DifumoRow {
    #[serde(rename = "Difumo_names")]
    name: String,
}

/// Read region names from a CSV dictionary, one row per 4th-axis volume.
///
/// # Errors
/// Returns error if the file cannot be parsed or lacks the name column
pub fn parse_csv_labels(path: &Path) -> Result<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    if !reader.headers()?.iter().any(|h| h == DIFUMO_NAME_COLUMN) {
        return Err(InsightError::AtlasFormat(format!(
            "{}: missing column '{DIFUMO_NAME_COLUMN}'",
            path.display()
        )));
    }

    let mut names = Vec::new();
    for result in reader.deserialize::<DifumoRow>() {
        names.push(result?.name.trim().to_string());
    }
    Ok(names)
}

/// Read `<label index="i">Name</label>` entries, ordered by index.
///
/// Indices must be unique; centroid attributes are ignored.
///
/// # Errors
/// Returns error on malformed XML or a missing/invalid/duplicate index
pub fn parse_xml_labels(path: &Path) -> Result<Vec<(i64, String)>> {
    let content = fs::read_to_string(path)?;
    parse_xml_str(&content).map_err(|e| match e {
        InsightError::AtlasFormat(msg) => {
            InsightError::AtlasFormat(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

fn parse_xml_str(content: &str) -> Result<Vec<(i64, String)>> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut labels: BTreeMap<i64, String> = BTreeMap::new();
    let mut current: Option<(i64, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"label" => {
                current = Some((label_index(&e)?, String::new()));
            }
            Event::Empty(e) if e.name().as_ref() == b"label" => {
                insert_label(&mut labels, label_index(&e)?, String::new())?;
            }
            Event::Text(t) => {
                if let Some((_, name)) = current.as_mut() {
                    name.push_str(&t.unescape()?);
                }
            }
            Event::End(e) if e.name().as_ref() == b"label" => {
                if let Some((index, name)) = current.take() {
                    insert_label(&mut labels, index, name.trim().to_string())?;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(labels.into_iter().collect())
}

fn label_index(e: &quick_xml::events::BytesStart<'_>) -> Result<i64> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"index" {
            let value = attr.unescape_value()?;
            return value.trim().parse::<i64>().map_err(|_| {
                InsightError::AtlasFormat(format!("invalid label index '{value}'"))
            });
        }
    }
    Err(InsightError::AtlasFormat(
        "label element without index attribute".into(),
    ))
}

fn insert_label(labels: &mut BTreeMap<i64, String>, index: i64, name: String) -> Result<()> {
    if labels.insert(index, name).is_some() {
        return Err(InsightError::AtlasFormat(format!(
            "duplicate label index {index}"
        )));
    }
    Ok(())
}

/// Read `<code> <name> [extra columns...]` lines.
///
/// Blank lines and `#` comments are skipped.
///
/// # Errors
/// Returns error if a line has no name or a non-integer code
pub fn parse_text_labels(path: &Path) -> Result<Vec<(i64, String)>> {
    let content = fs::read_to_string(path)?;
    let mut labels = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let code = fields.next().and_then(|c| c.parse::<i64>().ok());
        let name = fields.next();

        match (code, name) {
            (Some(code), Some(name)) => labels.push((code, name.to_string())),
            _ => {
                return Err(InsightError::AtlasFormat(format!(
                    "{}:{}: expected '<code> <name>'",
                    path.display(),
                    line_no + 1
                )))
            }
        }
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content.as_bytes()).expect("write content");
        file
    }

    #[test]
    fn test_parse_csv_labels() {
        let file = create_file(
            "Component,Difumo_names,Yeo_networks7\n1,Superior frontal sulcus,DefaultB\n2,Fusiform gyrus,VisCent\n",
        );
        let names = parse_csv_labels(file.path()).expect("parse csv");
        assert_eq!(names, vec!["Superior frontal sulcus", "Fusiform gyrus"]);
    }

    #[test]
    fn test_parse_csv_labels_missing_column() {
        let file = create_file("Component,Name\n1,Something\n");
        let err = parse_csv_labels(file.path()).expect_err("missing column");
        assert!(matches!(err, InsightError::AtlasFormat(_)));
    }

    #[test]
    fn test_parse_xml_labels() {
        let file = create_file(
            r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<atlas version="1.0">
  <header><name>Juelich Histological Atlas</name></header>
  <data>
    <label index="1" x="120" y="60" z="80">GM Broca&apos;s area BA45 L</label>
    <label index="0" x="49" y="64" z="60">GM Anterior intra-parietal sulcus hIP1 L</label>
  </data>
</atlas>"#,
        );
        let labels = parse_xml_labels(file.path()).expect("parse xml");
        assert_eq!(
            labels,
            vec![
                (0, "GM Anterior intra-parietal sulcus hIP1 L".to_string()),
                (1, "GM Broca's area BA45 L".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_xml_duplicate_index() {
        let file = create_file(
            r#"<data><label index="0">A</label><label index="0">B</label></data>"#,
        );
        assert!(parse_xml_labels(file.path()).is_err());
    }

    #[test]
    fn test_parse_xml_missing_index() {
        let file = create_file(r#"<data><label x="1">A</label></data>"#);
        let err = parse_xml_labels(file.path()).expect_err("no index");
        assert!(matches!(err, InsightError::AtlasFormat(_)));
    }

    #[test]
    fn test_parse_text_labels() {
        let file = create_file("# AAL3\n1 Precentral_L 2001\n2 Precentral_R 2002\n\n4 Frontal_Sup_2_R 2102\n");
        let labels = parse_text_labels(file.path()).expect("parse text");
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[2], (4, "Frontal_Sup_2_R".to_string()));
    }

    #[test]
    fn test_parse_text_labels_bad_line() {
        let file = create_file("1 Precentral_L\nnot-a-code\n");
        let err = parse_text_labels(file.path()).expect_err("bad line");
        assert!(err.to_string().contains(":2:"));
    }
}
