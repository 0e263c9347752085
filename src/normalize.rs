//! Turns raw detections into the response body: label files, per-class
//! counts and the human readable transcript.

use crate::{
    catalog::ClassCatalog,
    detection::{DetectionResult, NormalizedBox},
    error::{HandlerError, ParseError},
};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// One detection as stored in a label file, with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub line: usize,
    pub class_id: usize,
    pub bbox: NormalizedBox,
    /// Coordinate fields exactly as written, echoed into the transcript.
    pub coordinates: [String; 4],
}

impl LabelRecord {
    pub fn from_detection(index: usize, detection: &DetectionResult) -> Self {
        let bbox = detection.bbox;
        Self {
            line: index + 1,
            class_id: detection.class_id,
            bbox,
            coordinates: [
                bbox.center_x.to_string(),
                bbox.center_y.to_string(),
                bbox.width.to_string(),
                bbox.height.to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectCount {
    pub object_name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseBody {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub objects_with_counts: Vec<ObjectCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<DetectionResult>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelAnalysis {
    pub transcript: Vec<String>,
    pub objects_with_counts: Vec<ObjectCount>,
}

/// Parses `class_id center_x center_y width height [...]`. Anything shorter
/// than five fields is malformed, blank lines included.
pub fn parse_label_line(line_no: usize, line: &str) -> Result<LabelRecord, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(ParseError::Malformed {
            line: line_no,
            fields: fields.len(),
        });
    }

    let class_id = fields[0]
        .parse::<usize>()
        .map_err(|_| invalid(line_no, "class id", fields[0]))?;
    let coordinate = |index: usize, field: &'static str| {
        fields[index]
            .parse::<f32>()
            .map_err(|_| invalid(line_no, field, fields[index]))
    };

    Ok(LabelRecord {
        line: line_no,
        class_id,
        bbox: NormalizedBox {
            center_x: coordinate(1, "center_x")?,
            center_y: coordinate(2, "center_y")?,
            width: coordinate(3, "width")?,
            height: coordinate(4, "height")?,
        },
        coordinates: [1, 2, 3, 4].map(|index| fields[index].to_string()),
    })
}

fn invalid(line: usize, field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidNumber {
        line,
        field,
        value: value.to_string(),
    }
}

/// Parses every line of a label file. The final newline does not start a
/// line, so an empty file has no records.
pub fn parse_labels(content: &str) -> Result<Vec<LabelRecord>, ParseError> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| parse_label_line(index + 1, line))
        .collect()
}

pub fn read_label_file(path: &Path) -> Result<Vec<LabelRecord>, HandlerError> {
    let content = std::fs::read_to_string(path).map_err(|source| HandlerError::LabelFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_labels(&content)?)
}

pub fn format_label_line(class_id: usize, bbox: &NormalizedBox) -> String {
    format!(
        "{} {} {} {} {}",
        class_id, bbox.center_x, bbox.center_y, bbox.width, bbox.height
    )
}

/// Writes one label line per detection and returns once the file is flushed.
pub fn write_label_file(path: &Path, detections: &[DetectionResult]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for detection in detections {
        writeln!(writer, "{}", format_label_line(detection.class_id, &detection.bbox))?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Per-class detection counts, indexed like the catalog.
pub fn count_by_class(
    catalog: &ClassCatalog,
    records: &[LabelRecord],
) -> Result<Vec<usize>, ParseError> {
    let mut counts = vec![0usize; catalog.len()];
    for record in records {
        let slot = counts
            .get_mut(record.class_id)
            .ok_or_else(|| ParseError::UnknownClass {
                line: record.line,
                class_id: record.class_id,
            })?;
        *slot += 1;
    }
    Ok(counts)
}

/// Non-zero counts in catalog order.
pub fn summarize(catalog: &ClassCatalog, counts: &[usize]) -> Vec<ObjectCount> {
    catalog
        .iter()
        .zip(counts)
        .filter(|&(_, &count)| count > 0)
        .map(|(entry, &count)| ObjectCount {
            object_name: entry.name.clone(),
            count,
        })
        .collect()
}

pub fn transcript_line(name: &str, record: &LabelRecord) -> String {
    let [center_x, center_y, width, height] = &record.coordinates;
    format!(
        "{} (class id {}) center_x: {}, center_y: {}, width: {}, height: {}",
        name, record.class_id, center_x, center_y, width, height
    )
}

pub fn analyze(
    catalog: &ClassCatalog,
    records: Vec<LabelRecord>,
) -> Result<LabelAnalysis, ParseError> {
    let counts = count_by_class(catalog, &records)?;
    let transcript = records
        .iter()
        .map(|record| {
            let name = catalog.name(record.class_id).ok_or(ParseError::UnknownClass {
                line: record.line,
                class_id: record.class_id,
            })?;
            Ok(transcript_line(name, record))
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    Ok(LabelAnalysis {
        objects_with_counts: summarize(catalog, &counts),
        transcript,
    })
}

/// Overwrites `path` with one transcript line per detection.
pub fn write_transcript(path: &Path, transcript: &[String]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for line in transcript {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

pub fn analyze_label_file(
    catalog: &ClassCatalog,
    label_path: &Path,
    transcript_path: &Path,
) -> Result<LabelAnalysis, HandlerError> {
    let records = read_label_file(label_path)?;
    let analysis = analyze(catalog, records)?;
    write_transcript(transcript_path, &analysis.transcript).map_err(|source| {
        HandlerError::Output {
            path: transcript_path.to_path_buf(),
            source,
        }
    })?;

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClassEntry;
    use std::fs;

    fn record(line: usize, class_id: usize) -> LabelRecord {
        parse_label_line(line, &format!("{} 0.5 0.5 0.1 0.1", class_id)).unwrap()
    }

    #[test]
    fn test_person_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let label_path = dir.path().join("in.txt");
        let transcript_path = dir.path().join("label_analysis.txt");
        fs::write(&label_path, "0 0.5 0.5 0.2 0.3\n").unwrap();

        let analysis =
            analyze_label_file(&ClassCatalog::coco(), &label_path, &transcript_path).unwrap();

        assert_eq!(
            analysis.transcript,
            vec!["person (class id 0) center_x: 0.5, center_y: 0.5, width: 0.2, height: 0.3"]
        );
        assert_eq!(
            analysis.objects_with_counts,
            vec![ObjectCount {
                object_name: "person".to_string(),
                count: 1
            }]
        );
        assert_eq!(
            fs::read_to_string(&transcript_path).unwrap(),
            "person (class id 0) center_x: 0.5, center_y: 0.5, width: 0.2, height: 0.3\n"
        );
    }

    #[test]
    fn test_empty_label_file() {
        let dir = tempfile::tempdir().unwrap();
        let label_path = dir.path().join("in.txt");
        let transcript_path = dir.path().join("label_analysis.txt");
        fs::write(&label_path, "").unwrap();
        fs::write(&transcript_path, "stale content\n").unwrap();

        let analysis =
            analyze_label_file(&ClassCatalog::coco(), &label_path, &transcript_path).unwrap();

        assert!(analysis.transcript.is_empty());
        assert!(analysis.objects_with_counts.is_empty());
        assert_eq!(fs::read_to_string(&transcript_path).unwrap(), "");
    }

    #[test]
    fn test_missing_label_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = analyze_label_file(
            &ClassCatalog::coco(),
            &dir.path().join("absent.txt"),
            &dir.path().join("label_analysis.txt"),
        );

        match result {
            Err(HandlerError::LabelFile { path, source }) => {
                assert!(path.ends_with("absent.txt"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected label file error, got {:?}", other),
        }
    }

    #[test]
    fn test_counts_follow_catalog_order() {
        let records = parse_labels(
            "16 0.1 0.1 0.1 0.1\n2 0.2 0.2 0.2 0.2\n0 0.3 0.3 0.3 0.3\n16 0.4 0.4 0.4 0.4\n",
        )
        .unwrap();

        let analysis = analyze(&ClassCatalog::coco(), records).unwrap();
        let names: Vec<&str> = analysis
            .objects_with_counts
            .iter()
            .map(|c| c.object_name.as_str())
            .collect();

        assert_eq!(names, vec!["person", "car", "dog"]);
        assert_eq!(analysis.objects_with_counts[2].count, 2);
        assert!(analysis.transcript[0].starts_with("dog (class id 16)"));
    }

    #[test]
    fn test_total_count_equals_line_count() {
        let lines: String = (0..37)
            .map(|i| format!("{} 0.5 0.5 0.25 0.25\n", (i * 7) % 80))
            .collect();
        let records = parse_labels(&lines).unwrap();

        let analysis = analyze(&ClassCatalog::coco(), records).unwrap();
        let total: usize = analysis.objects_with_counts.iter().map(|c| c.count).sum();

        assert_eq!(total, 37);
        assert!(analysis.objects_with_counts.iter().all(|c| c.count > 0));
    }

    #[test]
    fn test_unknown_class_fails() {
        let records = vec![record(1, 0), record(2, 80)];
        let result = analyze(&ClassCatalog::coco(), records);

        assert_eq!(
            result,
            Err(ParseError::UnknownClass {
                line: 2,
                class_id: 80
            })
        );
    }

    #[test]
    fn test_malformed_line_fails() {
        let result = parse_labels("0 0.5 0.5 0.2 0.3\n1 0.5 0.5\n");

        assert_eq!(result, Err(ParseError::Malformed { line: 2, fields: 3 }));
    }

    #[test]
    fn test_invalid_numbers() {
        assert_eq!(
            parse_label_line(4, "-1 0.5 0.5 0.2 0.3"),
            Err(ParseError::InvalidNumber {
                line: 4,
                field: "class id",
                value: "-1".to_string()
            })
        );
        assert!(matches!(
            parse_label_line(1, "0 0.5 wide 0.2 0.3"),
            Err(ParseError::InvalidNumber {
                field: "center_y",
                ..
            })
        ));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let records = parse_labels("3 0.5 0.5 0.2 0.3 0.91\n1 0.1 0.1 0.1 0.1\n").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].class_id, 3);
        assert_eq!(records[1].line, 2);
    }

    #[test]
    fn test_blank_line_is_malformed() {
        assert_eq!(
            parse_labels("0 0.5 0.5 0.2 0.3\n   \n1 0.5 0.5 0.2 0.3\n"),
            Err(ParseError::Malformed { line: 2, fields: 0 })
        );
        assert_eq!(
            parse_labels("\n0 0.5 0.5 0.2 0.3\n"),
            Err(ParseError::Malformed { line: 1, fields: 0 })
        );
    }

    #[test]
    fn test_blank_line_in_label_file_fails_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let label_path = dir.path().join("in.txt");
        fs::write(&label_path, "0 0.5 0.5 0.2 0.3\n\n16 0.5 0.5 0.2 0.3\n").unwrap();

        let result = analyze_label_file(
            &ClassCatalog::coco(),
            &label_path,
            &dir.path().join("label_analysis.txt"),
        );

        assert!(matches!(
            result,
            Err(HandlerError::Parse(ParseError::Malformed { line: 2, fields: 0 }))
        ));
    }

    #[test]
    fn test_transcript_echoes_coordinate_text() {
        let record = parse_label_line(1, "0 0.123456789 0.5000 1e-1 0.3").unwrap();

        assert_eq!(record.bbox.width, 0.1);
        assert_eq!(
            transcript_line("person", &record),
            "person (class id 0) center_x: 0.123456789, center_y: 0.5000, width: 1e-1, height: 0.3"
        );
    }

    #[test]
    fn test_label_file_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        let detections = vec![
            DetectionResult {
                class_id: 5,
                bbox: NormalizedBox {
                    center_x: 0.25,
                    center_y: 0.75,
                    width: 0.5,
                    height: 0.125,
                },
                confidence: Some(0.8),
                keypoints: None,
            },
            DetectionResult {
                class_id: 1,
                bbox: NormalizedBox {
                    center_x: 0.1,
                    center_y: 0.2,
                    width: 0.3,
                    height: 0.4,
                },
                confidence: None,
                keypoints: None,
            },
        ];

        write_label_file(&path, &detections).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "5 0.25 0.75 0.5 0.125\n1 0.1 0.2 0.3 0.4\n"
        );
        let records = read_label_file(&path).unwrap();
        assert_eq!(records[0].bbox, detections[0].bbox);
        assert_eq!(records[1].bbox, detections[1].bbox);
    }

    #[test]
    fn test_custom_catalog() {
        let catalog = ClassCatalog::from_entries(vec![
            ClassEntry {
                name: "widget".to_string(),
                color: [0, 0, 0],
            },
            ClassEntry {
                name: "gadget".to_string(),
                color: [0, 0, 0],
            },
        ]);

        let analysis = analyze(&catalog, vec![record(1, 1), record(2, 1)]).unwrap();

        assert_eq!(
            analysis.objects_with_counts,
            vec![ObjectCount {
                object_name: "gadget".to_string(),
                count: 2
            }]
        );
    }
}
