//! Implements InputPort. Inquire-based operator console.
//!
//! Menus: edit a relation, year advancement, exam date check, audience preview,
//! drift audit. Every store call runs behind a spinner.

use crate::adapters::export::{audience_to_csv, drift_to_csv, failures_to_csv, write_report};
use crate::adapters::ui::progress::spinner;
use crate::domain::relations::id_set;
use crate::domain::{
    DomainError, DriftReport, EntityKind, Notification, RecipientType, ReconcileResult, Relation,
    SyncFailure,
};
use crate::ports::{InputPort, doc_id};
use crate::usecases::{AdvanceOutcome, Orchestrator};
use async_trait::async_trait;
use chrono::NaiveDate;
use inquire::error::InquireError;
use inquire::ui::{Color, RenderConfig, Styled};
use inquire::{Confirm, MultiSelect, Select, Text};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const MENU_EDIT_RELATION: &str = "Edit a relation";
const MENU_ADVANCE: &str = "Check / advance a student's year";
const MENU_EXAM_DATE: &str = "Check an exam date against active periods";
const MENU_AUDIENCE: &str = "Preview a notification audience";
const MENU_AUDIT: &str = "Audit relations for drift";
const MENU_EXIT: &str = "Exit";

static RECIPIENT_TYPES: [(&str, RecipientType); 8] = [
    ("Single user (id)", RecipientType::Id),
    ("Role", RecipientType::Role),
    ("Department (everyone)", RecipientType::Department),
    ("Department students", RecipientType::DepartmentStudents),
    ("Department professors", RecipientType::DepartmentProfessors),
    ("Major (everyone)", RecipientType::Major),
    ("Major students", RecipientType::MajorStudents),
    ("Major professors", RecipientType::MajorProfessors),
];

/// Applies the console theme to every inquire prompt.
pub fn apply_theme() {
    let config = RenderConfig::default_colored()
        .with_prompt_prefix(Styled::new("›").with_fg(Color::LightMagenta))
        .with_highlighted_option_prefix(Styled::new("»").with_fg(Color::LightYellow));
    inquire::set_global_render_config(config);
}

fn ui_err(e: InquireError) -> DomainError {
    let cancelled = matches!(
        e,
        InquireError::OperationCanceled | InquireError::OperationInterrupted
    );
    DomainError::Ui {
        message: e.to_string(),
        cancelled,
    }
}

/// Esc / Ctrl-C inside a sub-menu returns to the main menu.
fn is_cancel(e: &DomainError) -> bool {
    matches!(e, DomainError::Ui { cancelled: true, .. })
}

/// `Name (id)` for records with a name, `First Last (id)` for people.
fn label(doc: &Value) -> String {
    let id = doc_id(doc).unwrap_or("?");
    let name = match doc.get("name").and_then(Value::as_str) {
        Some(n) => n.to_string(),
        None => {
            let first = doc.get("first_name").and_then(Value::as_str).unwrap_or("");
            let last = doc.get("last_name").and_then(Value::as_str).unwrap_or("");
            format!("{} {}", first, last).trim().to_string()
        }
    };
    if name.is_empty() {
        id.to_string()
    } else {
        format!("{} ({})", name, id)
    }
}

fn print_result(result: &ReconcileResult) {
    println!(
        "{}: {} applied, {} detached, {} failed",
        result.relation,
        result.applied.len(),
        result.detached.len(),
        result.failed.len()
    );
    for f in &result.failed {
        println!("  ✗ {} {:?}: {}", f.edge.counter_id, f.edge.op, f.error);
    }
    if let Some(e) = &result.owner_error {
        println!("  ✗ owner field not written: {}", e);
    }
}

/// TUI adapter. Inquire prompts over the orchestration façade.
pub struct TuiInputPort {
    orchestrator: Arc<Orchestrator>,
    reports_dir: PathBuf,
}

impl TuiInputPort {
    pub fn new(orchestrator: Arc<Orchestrator>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            reports_dir: reports_dir.into(),
        }
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, DomainError> {
        let pb = spinner(format!("Loading {}...", kind.collection()));
        let store = self.orchestrator.reconciler().store();
        let retry = self.orchestrator.reconciler().retry_policy();
        let docs = retry.run("tui.list", || store.list(kind, None)).await;
        pb.finish_and_clear();
        Ok(docs?)
    }

    async fn edit_relation(&self) -> Result<(), DomainError> {
        let names: Vec<&str> = Relation::ALL.iter().map(|r| r.name()).collect();
        let picked = Select::new("Relation:", names).prompt().map_err(ui_err)?;
        let relation: Relation = picked.parse()?;

        let owners = self.list(relation.owner_kind()).await?;
        if owners.is_empty() {
            println!("No {} records.", relation.owner_kind());
            return Ok(());
        }
        let owner_labels: Vec<String> = owners.iter().map(label).collect();
        let owner_label = Select::new(&format!("{}:", relation.owner_kind()), owner_labels.clone())
            .prompt()
            .map_err(ui_err)?;
        let Some(owner) = owner_labels
            .iter()
            .position(|l| *l == owner_label)
            .map(|i| &owners[i])
        else {
            return Ok(());
        };
        let owner_id = doc_id(owner).unwrap_or_default().to_string();
        let current = id_set(owner, relation.owner_field());

        let counters = self.list(relation.counter_kind()).await?;
        let counter_labels: Vec<String> = counters.iter().map(label).collect();
        let defaults: Vec<usize> = counters
            .iter()
            .enumerate()
            .filter(|(_, d)| doc_id(d).is_some_and(|id| current.contains(id)))
            .map(|(i, _)| i)
            .collect();
        let chosen = MultiSelect::new(
            &format!("Members of {} for {}:", relation, owner_id),
            counter_labels.clone(),
        )
        .with_default(&defaults)
        .prompt()
        .map_err(ui_err)?;
        let desired: Vec<String> = counters
            .iter()
            .zip(&counter_labels)
            .filter(|(_, l)| chosen.contains(l))
            .filter_map(|(d, _)| doc_id(d).map(str::to_string))
            .collect();

        let pb = spinner(format!("Syncing {}...", relation));
        let result = self
            .orchestrator
            .reconciler()
            .reconcile(relation, &owner_id, desired)
            .await;
        pb.finish_and_clear();
        let result = result?;
        print_result(&result);

        if !result.is_complete() {
            println!("Saved but not fully synced. Run the same edit again to retry the failed links.");
            self.offer_failure_export(&result.sync_failures()).await?;
        }
        Ok(())
    }

    async fn offer_failure_export(&self, failures: &[SyncFailure]) -> Result<(), DomainError> {
        let export = Confirm::new("Export failures to CSV?")
            .with_default(false)
            .prompt()
            .map_err(ui_err)?;
        if export {
            let csv = failures_to_csv(failures).map_err(|e| DomainError::Export(e.to_string()))?;
            let path = write_report(&self.reports_dir, "sync_failures.csv", &csv).await?;
            println!("Written to {}", path.display());
        }
        Ok(())
    }

    async fn advance(&self) -> Result<(), DomainError> {
        let student_id = Text::new("Student id:").prompt().map_err(ui_err)?;
        let student_id = student_id.trim();
        let pb = spinner("Checking grades...");
        let decision = self.orchestrator.eligibility().advancement(student_id).await;
        pb.finish_and_clear();
        if let Err(block) = decision? {
            println!("Cannot advance: {}", block);
            return Ok(());
        }

        let go = Confirm::new("All current-year subjects passed. Advance now?")
            .with_default(true)
            .prompt()
            .map_err(ui_err)?;
        if !go {
            return Ok(());
        }
        match self.orchestrator.advance_year(student_id).await? {
            AdvanceOutcome::Advanced { from, to } => println!("Advanced from year {} to {}.", from, to),
            AdvanceOutcome::Blocked(block) => println!("Cannot advance: {}", block),
            AdvanceOutcome::FinalYear => println!("Student is already in the final year."),
        }
        Ok(())
    }

    async fn check_exam_date(&self) -> Result<(), DomainError> {
        let raw = Text::new("Exam date (YYYY-MM-DD):").prompt().map_err(ui_err)?;
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|e| DomainError::Validation(format!("invalid date '{}': {}", raw.trim(), e)))?;
        let inside = self
            .orchestrator
            .eligibility()
            .is_within_active_period(date)
            .await?;
        if inside {
            println!("{} falls inside an active exam period.", date);
        } else {
            println!("Warning: {} is outside every active exam period.", date);
        }
        Ok(())
    }

    async fn preview_audience(&self) -> Result<(), DomainError> {
        let labels: Vec<&str> = RECIPIENT_TYPES.iter().map(|(l, _)| *l).collect();
        let picked = Select::new("Recipients:", labels).prompt().map_err(ui_err)?;
        let Some((_, recipient_type)) = RECIPIENT_TYPES.iter().find(|(l, _)| *l == picked) else {
            return Ok(());
        };
        let value = Text::new("Recipient value (id or role):")
            .prompt()
            .map_err(ui_err)?;
        let draft = Notification {
            id: "preview".to_string(),
            title: String::new(),
            content: String::new(),
            recipient_type: *recipient_type,
            recipient_value: value,
            created_at: None,
        };

        let pb = spinner("Resolving audience...");
        let audience = self.orchestrator.eligibility().resolve_audience(&draft).await;
        pb.finish_and_clear();
        let audience = audience?;
        println!("{} recipient(s).", audience.len());
        for user in audience.iter().take(20) {
            let role = user.role.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string());
            println!("  {} [{}]", user.id, role);
        }
        if audience.len() > 20 {
            println!("  ... and {} more", audience.len() - 20);
        }

        if !audience.is_empty()
            && Confirm::new("Export audience to CSV?")
                .with_default(false)
                .prompt()
                .map_err(ui_err)?
        {
            let csv = audience_to_csv(&audience).map_err(|e| DomainError::Export(e.to_string()))?;
            let path = write_report(&self.reports_dir, "audience.csv", &csv).await?;
            println!("Written to {}", path.display());
        }
        Ok(())
    }

    async fn audit(&self) -> Result<(), DomainError> {
        let mut combined = DriftReport::default();
        let pb = spinner("Scanning relations...");
        for relation in Relation::distinct_links() {
            match self.orchestrator.reconciler().audit(relation).await {
                Ok(report) => {
                    combined.missing_on_counter.extend(report.missing_on_counter);
                    combined.missing_on_owner.extend(report.missing_on_owner);
                }
                Err(e) => warn!(%relation, error = %e, "audit skipped"),
            }
        }
        pb.finish_and_clear();

        if combined.is_consistent() {
            println!("No drift: every link is recorded on both sides.");
            return Ok(());
        }
        println!("{} one-sided link(s):", combined.len());
        for e in &combined.missing_on_counter {
            println!("  {} {} → {}: counter does not point back", e.relation, e.owner_id, e.counter_id);
        }
        for e in &combined.missing_on_owner {
            println!("  {} {} ← {}: owner does not list it", e.relation, e.owner_id, e.counter_id);
        }
        println!("Re-run \"Edit a relation\" for the listed owners to repair.");

        let export = Confirm::new("Export drift report to CSV?")
            .with_default(false)
            .prompt()
            .map_err(ui_err)?;
        if export {
            let csv = drift_to_csv(&combined).map_err(|e| DomainError::Export(e.to_string()))?;
            let path = write_report(&self.reports_dir, "drift.csv", &csv).await?;
            println!("Written to {}", path.display());
        }
        Ok(())
    }
}

#[async_trait]
impl InputPort for TuiInputPort {
    async fn run(&self) -> Result<(), DomainError> {
        let options = vec![
            MENU_EDIT_RELATION,
            MENU_ADVANCE,
            MENU_EXAM_DATE,
            MENU_AUDIENCE,
            MENU_AUDIT,
            MENU_EXIT,
        ];
        loop {
            let choice = match Select::new("Main menu:", options.clone()).prompt() {
                Ok(c) => c,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                    return Ok(());
                }
                Err(e) => return Err(ui_err(e)),
            };
            let outcome = match choice {
                MENU_EDIT_RELATION => self.edit_relation().await,
                MENU_ADVANCE => self.advance().await,
                MENU_EXAM_DATE => self.check_exam_date().await,
                MENU_AUDIENCE => self.preview_audience().await,
                MENU_AUDIT => self.audit().await,
                _ => return Ok(()),
            };
            match outcome {
                Ok(()) => {}
                Err(e) if is_cancel(&e) => {}
                // Operator mistakes and store errors are shown, not fatal.
                Err(e) => println!("Error: {}", e),
            }
        }
    }
}
