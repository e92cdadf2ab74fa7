//! CSV rendering of audiences, sync failures and drift reports. Uses the `csv` crate for quoting.

use crate::domain::{DomainError, DriftReport, Edge, SyncFailure, UserRef};
use std::path::{Path, PathBuf};
use tracing::info;

fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_writer(Vec::new())
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String, csv::Error> {
    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))?;
    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

/// Format: `Id;Role`. Unknown roles are left empty.
pub fn audience_to_csv<'a>(
    audience: impl IntoIterator<Item = &'a UserRef>,
) -> Result<String, csv::Error> {
    let mut wtr = writer();
    wtr.write_record(["Id", "Role"])?;
    for user in audience {
        let role = user.role.map(|r| r.to_string()).unwrap_or_default();
        wtr.write_record([user.id.as_str(), role.as_str()])?;
    }
    wtr.flush()?;
    finish(wtr)
}

/// Format: `Relation;Owner;Counter;Op;Reason`.
pub fn failures_to_csv(failures: &[SyncFailure]) -> Result<String, csv::Error> {
    let mut wtr = writer();
    wtr.write_record(["Relation", "Owner", "Counter", "Op", "Reason"])?;
    for f in failures {
        let op = f.op.map(|op| format!("{:?}", op).to_lowercase()).unwrap_or_default();
        // Reasons come from store errors and may span lines.
        let reason = f.reason.replace('\n', " ").replace('\r', "");
        wtr.write_record([
            f.relation.name(),
            f.owner_id.as_str(),
            f.counter_id.as_deref().unwrap_or(""),
            op.as_str(),
            reason.as_str(),
        ])?;
    }
    wtr.flush()?;
    finish(wtr)
}

/// Format: `Relation;Owner;Counter;Missing on`.
pub fn drift_to_csv(report: &DriftReport) -> Result<String, csv::Error> {
    let mut wtr = writer();
    wtr.write_record(["Relation", "Owner", "Counter", "Missing on"])?;
    let mut write = |edges: &[Edge], side: &str| -> Result<(), csv::Error> {
        for e in edges {
            wtr.write_record([e.relation.name(), e.owner_id.as_str(), e.counter_id.as_str(), side])?;
        }
        Ok(())
    };
    write(&report.missing_on_counter, "counter")?;
    write(&report.missing_on_owner, "owner")?;
    wtr.flush()?;
    finish(wtr)
}

/// Writes `contents` to `<dir>/<name>`, creating the directory. Returns the file path.
pub async fn write_report(
    dir: impl AsRef<Path>,
    name: &str,
    contents: &str,
) -> Result<PathBuf, DomainError> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DomainError::Export(format!("create {}: {}", dir.display(), e)))?;
    let path = dir.join(name);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| DomainError::Export(format!("write {}: {}", path.display(), e)))?;
    info!(path = %path.display(), bytes = contents.len(), "report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EdgeOp, Relation, Role};

    #[test]
    fn test_audience_csv() {
        let audience = [
            UserRef::new("P1", Role::Professor),
            UserRef {
                id: "X9".to_string(),
                role: None,
            },
        ];
        let csv = audience_to_csv(&audience).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["Id;Role", "P1;professor", "X9;"]);
    }

    #[test]
    fn test_failure_reason_is_quoted_and_flattened() {
        let failures = vec![SyncFailure {
            relation: Relation::DepartmentStaff,
            owner_id: "D1".to_string(),
            counter_id: Some("P2".to_string()),
            op: Some(EdgeOp::Add),
            reason: "Store unavailable: 503;\nretry later".to_string(),
        }];
        let csv = failures_to_csv(&failures).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "department.staff;D1;P2;add;\"Store unavailable: 503; retry later\""
        );
    }

    #[test]
    fn test_drift_csv_marks_side() {
        let report = DriftReport {
            missing_on_counter: vec![Edge::new(Relation::MajorSubjects, "M1", "S2", EdgeOp::Add)],
            missing_on_owner: vec![Edge::new(Relation::MajorSubjects, "M1", "S3", EdgeOp::Remove)],
        };
        let csv = drift_to_csv(&report).unwrap();
        assert!(csv.contains("major.subject_ids;M1;S2;counter"));
        assert!(csv.contains("major.subject_ids;M1;S3;owner"));
    }

    #[tokio::test]
    async fn test_write_report_creates_dir() {
        let dir = std::env::temp_dir().join(format!("campus-sync-reports-{}", std::process::id()));
        let path = write_report(&dir, "audience.csv", "Id;Role\n").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "Id;Role\n");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
