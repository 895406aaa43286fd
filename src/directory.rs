//! Metadata document: department names, semester labels and the per-student
//! directory built from raw enrollment strings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GradeError;
use crate::ingest::derive_keys;
use crate::models::{ParseReport, RowFailure};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentInfo {
    pub name: String,
    pub dep_code: String,
}

/// Student ids in the document may have been written as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStudentId {
    Text(String),
    Number(serde_json::Number),
}

impl RawStudentId {
    pub fn as_key(&self) -> String {
        match self {
            RawStudentId::Text(s) => s.trim().to_string(),
            RawStudentId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryDocument {
    #[serde(default)]
    pub dep_code_to_name: BTreeMap<String, String>,
    #[serde(default)]
    pub dep_name_to_code: BTreeMap<String, String>,
    #[serde(default)]
    pub semesters: Vec<String>,
    #[serde(default)]
    pub student_infos: BTreeMap<String, StudentInfo>,
    #[serde(default)]
    pub student_ids: Vec<RawStudentId>,
    #[serde(default)]
    pub raw_infos: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub name: String,
    pub department: String,
}

#[derive(Debug, Clone)]
pub struct Directory {
    path: PathBuf,
    document: DirectoryDocument,
}

impl Directory {
    pub fn new(path: impl Into<PathBuf>, document: DirectoryDocument) -> Self {
        Directory {
            path: path.into(),
            document,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GradeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| GradeError::metadata(path, e))?;
        let text = decode_document_text(bytes);
        let document: DirectoryDocument =
            serde_json::from_str(&text).map_err(|e| GradeError::metadata(path, e))?;
        tracing::debug!(
            path = %path.display(),
            semesters = document.semesters.len(),
            students = document.student_infos.len(),
            "directory loaded"
        );
        Ok(Directory::new(path, document))
    }

    pub fn semesters(&self) -> &[String] {
        &self.document.semesters
    }

    pub fn department_name(&self, dep_code: &str) -> Option<&str> {
        self.document.dep_code_to_name.get(dep_code).map(String::as_str)
    }

    pub fn department_code(&self, dep_name: &str) -> Option<&str> {
        self.document.dep_name_to_code.get(dep_name).map(String::as_str)
    }

    pub fn student(&self, student_id: &str) -> Option<&StudentInfo> {
        self.document.student_infos.get(student_id)
    }

    pub fn students(&self) -> impl Iterator<Item = (&String, &StudentInfo)> {
        self.document.student_infos.iter()
    }

    /// Rebuilds `student_infos` and both department mappings from the raw
    /// enrollment arrays. The previous values are replaced, not merged.
    pub fn rebuild_students(&mut self) -> ParseReport {
        let mut report = ParseReport::default();
        let mut student_infos = BTreeMap::new();
        let mut dep_code_to_name = BTreeMap::new();

        let ids = &self.document.student_ids;
        let infos = &self.document.raw_infos;
        if ids.len() != infos.len() {
            tracing::warn!(
                student_ids = ids.len(),
                raw_infos = infos.len(),
                "raw enrollment arrays differ in length; extra entries ignored"
            );
        }

        for (raw_id, raw_info) in ids.iter().zip(infos.iter()) {
            let student_id = raw_id.as_key();
            let parsed = derive_keys(&student_id).and_then(|(_, dep_code)| {
                let text = unescape_enrollment(raw_info);
                parse_enrollment(&student_id, &text).map(|enrollment| (dep_code, enrollment))
            });

            match parsed {
                Ok((dep_code, enrollment)) => {
                    dep_code_to_name.insert(dep_code.clone(), enrollment.department);
                    student_infos.insert(
                        student_id,
                        StudentInfo {
                            name: enrollment.name,
                            dep_code,
                        },
                    );
                    report.parsed += 1;
                }
                Err(err) => {
                    tracing::warn!(student_id = %student_id, kind = ?err.kind(), "{err}");
                    report.failures.push(RowFailure::from_error(student_id, &err));
                }
            }
        }

        let dep_name_to_code = dep_code_to_name
            .iter()
            .map(|(code, name)| (name.clone(), code.clone()))
            .collect();

        self.document.student_infos = student_infos;
        self.document.dep_code_to_name = dep_code_to_name;
        self.document.dep_name_to_code = dep_name_to_code;
        report
    }

    pub fn save_to(&self, path: &Path) -> Result<(), GradeError> {
        let body = serde_json::to_string_pretty(&self.document)
            .map_err(|e| GradeError::metadata(path, e))?;
        std::fs::write(path, body).map_err(|e| GradeError::metadata(path, e))?;
        Ok(())
    }

    /// One-time parse of the raw enrollment strings, written to `out` or back
    /// over the loaded document.
    pub fn parse_and_persist(&mut self, out: Option<&Path>) -> Result<ParseReport, GradeError> {
        let report = self.rebuild_students();
        let target = out.map(Path::to_path_buf).unwrap_or_else(|| self.path.clone());
        self.save_to(&target)?;
        tracing::info!(
            path = %target.display(),
            parsed = report.parsed,
            failed = report.failures.len(),
            "directory persisted"
        );
        Ok(report)
    }
}

/// Documents written by older tooling are Latin-1; everything else is UTF-8.
pub fn decode_document_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Resolves backslash escapes (`\uXXXX`, `\UXXXXXXXX`, `\xHH` and the usual
/// single-character ones) left in raw enrollment text. Unrecognised or
/// truncated escapes are kept literally.
pub fn unescape_enrollment(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' || i + 1 >= chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let width = match chars[i + 1] {
            'x' => 2,
            'u' => 4,
            'U' => 8,
            '0'..='7' => {
                let digits = chars[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|c| c.is_digit(8))
                    .count();
                let octal: String = chars[i + 1..i + 1 + digits].iter().collect();
                let code = u32::from_str_radix(&octal, 8).unwrap_or_default();
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                i += 1 + digits;
                continue;
            }
            other => {
                let simple = match other {
                    'n' => Some('\n'),
                    't' => Some('\t'),
                    'r' => Some('\r'),
                    'a' => Some('\x07'),
                    'b' => Some('\x08'),
                    'f' => Some('\x0C'),
                    'v' => Some('\x0B'),
                    '\\' => Some('\\'),
                    '\'' => Some('\''),
                    '"' => Some('"'),
                    _ => None,
                };
                match simple {
                    Some(c) => out.push(c),
                    // line continuation
                    None if other == '\n' => {}
                    None => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                i += 2;
                continue;
            }
        };

        let Some(code) = hex_at(&chars, i + 2, width) else {
            out.push('\\');
            i += 1;
            continue;
        };
        i += 2 + width;

        if (0xD800..0xDC00).contains(&code) {
            let low = (i + 1 < chars.len() && chars[i] == '\\' && chars[i + 1] == 'u')
                .then(|| hex_at(&chars, i + 2, 4))
                .flatten()
                .filter(|low| (0xDC00..0xE000).contains(low));
            if let Some(low) = low {
                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                i += 6;
                continue;
            }
        }
        out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    out
}

fn hex_at(chars: &[char], start: usize, width: usize) -> Option<u32> {
    let digits: String = chars.get(start..start + width)?.iter().collect();
    u32::from_str_radix(&digits, 16).ok()
}

/// Splits "GIVEN FAMILY Department Name" at the first token that is not
/// entirely uppercase.
pub fn parse_enrollment(student_id: &str, text: &str) -> Result<Enrollment, GradeError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let boundary = tokens
        .iter()
        .position(|token| !is_uppercase_token(token))
        .ok_or_else(|| GradeError::UnparsableEnrollment {
            student_id: student_id.to_string(),
            text: text.to_string(),
        })?;

    Ok(Enrollment {
        name: tokens[..boundary].join(" "),
        department: tokens[boundary..].join(" "),
    })
}

/// True when the token has at least one cased letter and none are lowercase.
fn is_uppercase_token(token: &str) -> bool {
    let mut cased = false;
    for c in token.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}.json",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn raw_document() -> DirectoryDocument {
        DirectoryDocument {
            semesters: vec!["19fall".to_string(), "20spring".to_string()],
            student_ids: vec![
                RawStudentId::Text("201906020017".to_string()),
                RawStudentId::Number(serde_json::Number::from(201805010042u64)),
                RawStudentId::Text("201906020099".to_string()),
            ],
            raw_infos: vec![
                "AYSE YILMAZ Bilgisayar M\\u00fchendisli\\u011fi".to_string(),
                "MEHMET KAYA Makine M\\u00fchendisli\\u011fi".to_string(),
                "NO DEPARTMENT HERE".to_string(),
            ],
            ..DirectoryDocument::default()
        }
    }

    #[test]
    fn splits_at_first_token_with_lowercase() {
        let enrollment =
            parse_enrollment("201906020017", "JOHN SMITH Bilgisayar Mühendisliği").expect("parse");
        assert_eq!(enrollment.name, "JOHN SMITH");
        assert_eq!(enrollment.department, "Bilgisayar Mühendisliği");
    }

    #[test]
    fn all_uppercase_enrollment_is_unparsable() {
        let err = parse_enrollment("201906020017", "JOHN SMITH").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparsableEnrollment);
    }

    #[test]
    fn uncased_tokens_count_as_boundary() {
        let enrollment = parse_enrollment("201906020017", "ALI 2 Fizik").expect("parse");
        assert_eq!(enrollment.name, "ALI");
        assert_eq!(enrollment.department, "2 Fizik");
    }

    #[test]
    fn unescapes_unicode_sequences() {
        assert_eq!(
            unescape_enrollment("Bilgisayar M\\u00fchendisli\\u011fi"),
            "Bilgisayar Mühendisliği"
        );
        assert_eq!(unescape_enrollment("\\xe7ay \\U0001F600"), "çay 😀");
        assert_eq!(unescape_enrollment("\\ud83d\\ude00"), "😀");
        assert_eq!(unescape_enrollment("trailing \\"), "trailing \\");
        assert_eq!(unescape_enrollment("bad \\uZZ"), "bad \\uZZ");
    }

    #[test]
    fn unescapes_octal_and_control_sequences() {
        assert_eq!(unescape_enrollment("M\\374hendis"), "Mühendis");
        assert_eq!(unescape_enrollment("\\101\\0"), "A\0");
        assert_eq!(unescape_enrollment("\\1019"), "A9");
        assert_eq!(unescape_enrollment("a\\bb\\fc\\vd\\a"), "a\x08b\x0Cc\x0Bd\x07");
        assert_eq!(unescape_enrollment("ALI \\\nVELI"), "ALI VELI");
        assert_eq!(
            unescape_enrollment("\\N{LATIN SMALL LETTER U}"),
            "\\N{LATIN SMALL LETTER U}"
        );
    }

    #[test]
    fn latin1_documents_are_decoded() {
        let bytes = b"{\"semesters\": [\"19fall\"], \"note\": \"M\xfchendis\"}".to_vec();
        let text = decode_document_text(bytes);
        let doc: DirectoryDocument = serde_json::from_str(&text).expect("json");
        assert_eq!(doc.semesters, vec!["19fall"]);
        assert_eq!(doc.extra["note"], "Mühendis");
    }

    #[test]
    fn rebuild_replaces_mappings_and_reports_failures() {
        let mut document = raw_document();
        document.dep_code_to_name.insert("9999".into(), "Stale".into());
        document.student_infos.insert(
            "209999990001".into(),
            StudentInfo {
                name: "OLD".into(),
                dep_code: "9999".into(),
            },
        );
        let mut directory = Directory::new("unused.json", document);

        let report = directory.rebuild_students();
        assert_eq!(report.parsed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "201906020099");
        assert_eq!(report.failures[0].kind, ErrorKind::UnparsableEnrollment);

        assert!(directory.student("209999990001").is_none());
        assert_eq!(directory.department_name("9999"), None);
        assert_eq!(
            directory.department_name("0602"),
            Some("Bilgisayar Mühendisliği")
        );
        assert_eq!(directory.department_code("Makine Mühendisliği"), Some("0501"));
        let info = directory.student("201805010042").expect("numeric id parsed");
        assert_eq!(info.name, "MEHMET KAYA");
        assert_eq!(info.dep_code, "0501");
    }

    #[test]
    fn short_ids_fail_as_malformed_keys() {
        let document = DirectoryDocument {
            student_ids: vec![RawStudentId::Text("2019".into())],
            raw_infos: vec!["ALI Fizik".into()],
            ..DirectoryDocument::default()
        };
        let mut directory = Directory::new("unused.json", document);
        let report = directory.rebuild_students();
        assert_eq!(report.parsed, 0);
        assert_eq!(report.failures[0].kind, ErrorKind::MalformedKey);
    }

    #[test]
    fn parse_and_persist_round_trips_through_disk() {
        let path = temp_file("grades-directory");
        let mut document = raw_document();
        document
            .extra
            .insert("keep_me".into(), serde_json::json!({"a": 1}));
        Directory::new(&path, document)
            .save_to(&path)
            .expect("seed document");

        let mut directory = Directory::load(&path).expect("load");
        let report = directory.parse_and_persist(None).expect("persist");
        assert_eq!(report.parsed, 2);

        let reloaded = Directory::load(&path).expect("reload");
        assert_eq!(reloaded.semesters(), ["19fall", "20spring"]);
        assert_eq!(reloaded.student("201906020017").expect("student").name, "AYSE YILMAZ");
        assert_eq!(
            reloaded.department_code("Bilgisayar Mühendisliği"),
            Some("0602")
        );
        assert_eq!(reloaded.document.extra["keep_me"], serde_json::json!({"a": 1}));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_document_is_a_metadata_error() {
        let err = Directory::load(temp_file("grades-missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Metadata);
    }
}
