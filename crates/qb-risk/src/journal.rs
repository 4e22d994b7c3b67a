use crate::types::RiskAlert;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;

/// Append-only CSV mirror of the in-memory alerts.
///
/// Format: UTF-8, header `timestamp,level,code,message`, timestamps as
/// ISO-8601 seconds. Writing is best-effort; callers decide what to do with
/// an error (the gate logs one warning and keeps going on memory alone).
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn append(&self, alert: &RiskAlert) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let is_new = !self.path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if is_new {
            writeln!(file, "timestamp,level,code,message")?;
        }
        let mut line = String::new();
        let _ = write!(
            line,
            "{},{},{},{}",
            alert.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            alert.level.as_str(),
            escape(&alert.code),
            escape(&alert.message)
        );
        writeln!(file, "{line}")
    }
}

/// Quote a field when it contains CSV metacharacters.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use chrono::NaiveDate;

    fn alert(message: &str) -> RiskAlert {
        RiskAlert {
            level: RiskLevel::High,
            code: "000001".to_string(),
            message: message.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn writes_header_once_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        let journal = Journal::new(&path);

        journal.append(&alert("first")).unwrap();
        journal.append(&alert("second")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,level,code,message");
        assert_eq!(lines[1], "2024-01-02T09:30:00,high,000001,first");
        assert_eq!(lines[2], "2024-01-02T09:30:00,high,000001,second");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("deep").join("journal.csv");
        Journal::new(&path).append(&alert("x")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn quotes_fields_with_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        Journal::new(&path).append(&alert("a, b \"c\"")).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"a, b \"\"c\"\"\""));
    }
}
