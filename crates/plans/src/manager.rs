//! Plan storage and lifecycle operations.
//!
//! One JSON document per plan. Active plans live under `plans/active/`,
//! terminal ones under `plans/completed/`; completing or abandoning a plan
//! moves its file.

use std::path::{Path, PathBuf};

use chrono::Utc;

use sc_domain::error::{Error, Result};

use crate::plan::{Plan, PlanStatus};

pub struct PlanManager {
    active_dir: PathBuf,
    completed_dir: PathBuf,
}

impl PlanManager {
    /// Open the plan store under `<persona_base>/plans/`.
    pub fn new(persona_base: &Path) -> Result<Self> {
        let plans_dir = persona_base.join("plans");
        let active_dir = plans_dir.join("active");
        let completed_dir = plans_dir.join("completed");
        std::fs::create_dir_all(&active_dir)?;
        std::fs::create_dir_all(&completed_dir)?;
        Ok(Self {
            active_dir,
            completed_dir,
        })
    }

    pub fn create_plan(
        &self,
        title: impl Into<String>,
        session_id: impl Into<String>,
        context: impl Into<String>,
    ) -> Result<Plan> {
        let mut plan = Plan::new(title, session_id);
        plan.context = context.into();
        plan.add_progress(format!("Plan created: {}", plan.title));
        self.save(&plan)?;
        Ok(plan)
    }

    /// Look up a plan in the active then completed directories.
    pub fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        for dir in [&self.active_dir, &self.completed_dir] {
            let path = dir.join(format!("{plan_id}.json"));
            if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                match serde_json::from_str(&raw) {
                    Ok(plan) => return Ok(Some(plan)),
                    Err(e) => {
                        tracing::warn!(plan_id, error = %e, "unreadable plan file");
                    }
                }
            }
        }
        Ok(None)
    }

    /// Persist changes to an existing plan.
    pub fn update_plan(&self, plan: &mut Plan) -> Result<()> {
        plan.updated_at = Utc::now();
        self.save(plan)
    }

    /// Active (non-terminal) plans, newest-updated first.
    pub fn list_active_plans(&self) -> Result<Vec<Plan>> {
        self.list_dir(&self.active_dir)
    }

    /// Terminal plans, newest-updated first.
    pub fn list_completed_plans(&self, limit: usize) -> Result<Vec<Plan>> {
        let mut plans = self.list_dir(&self.completed_dir)?;
        plans.truncate(limit);
        Ok(plans)
    }

    // ── lifecycle transitions ────────────────────────────────────────

    /// draft → in-review
    pub fn submit_for_review(&self, plan_id: &str) -> Result<bool> {
        self.transition(plan_id, PlanStatus::Draft, PlanStatus::InReview, "Plan submitted for review")
    }

    /// in-review → approved
    pub fn approve_plan(&self, plan_id: &str) -> Result<bool> {
        self.transition(plan_id, PlanStatus::InReview, PlanStatus::Approved, "Plan approved for execution")
    }

    /// approved → in-progress
    pub fn start_execution(&self, plan_id: &str) -> Result<bool> {
        self.transition(plan_id, PlanStatus::Approved, PlanStatus::InProgress, "Plan execution started")
    }

    /// approved | in-progress → completed, gated on every task being
    /// verified. Archives the plan file.
    pub fn complete_plan(&self, plan_id: &str, notes: impl Into<String>) -> Result<bool> {
        let Some(mut plan) = self.get_plan(plan_id)? else {
            return Ok(false);
        };
        if !matches!(plan.status, PlanStatus::Approved | PlanStatus::InProgress) {
            return Ok(false);
        }
        if !plan.all_tasks_verified() {
            let unverified: Vec<&str> = plan
                .unverified_tasks()
                .iter()
                .map(|task| task.id.as_str())
                .collect();
            tracing::warn!(
                plan_id,
                ?unverified,
                "refusing to complete plan with unverified tasks"
            );
            return Ok(false);
        }

        plan.status = PlanStatus::Completed;
        plan.completion_notes = notes.into();
        plan.add_progress("Plan completed");
        plan.updated_at = Utc::now();
        self.archive(&plan)?;
        Ok(true)
    }

    /// any non-terminal → abandoned. Archives the plan file.
    pub fn abandon_plan(&self, plan_id: &str, reason: &str) -> Result<bool> {
        let Some(mut plan) = self.get_plan(plan_id)? else {
            return Ok(false);
        };
        if plan.status.is_terminal() {
            return Ok(false);
        }
        plan.status = PlanStatus::Abandoned;
        if reason.is_empty() {
            plan.add_progress("Plan abandoned");
        } else {
            plan.add_progress(format!("Plan abandoned: {reason}"));
        }
        plan.updated_at = Utc::now();
        self.archive(&plan)?;
        Ok(true)
    }

    // ── internals ────────────────────────────────────────────────────

    fn transition(
        &self,
        plan_id: &str,
        from: PlanStatus,
        to: PlanStatus,
        note: &str,
    ) -> Result<bool> {
        let Some(mut plan) = self.get_plan(plan_id)? else {
            return Ok(false);
        };
        if plan.status != from {
            return Ok(false);
        }
        plan.status = to;
        plan.add_progress(note);
        self.update_plan(&mut plan)?;
        Ok(true)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Plan>(&raw) {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable plan");
                }
            }
        }
        plans.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(plans)
    }

    fn save(&self, plan: &Plan) -> Result<()> {
        let dir = if plan.status.is_terminal() {
            &self.completed_dir
        } else {
            &self.active_dir
        };
        let path = dir.join(format!("{}.json", plan.id));
        let json = serde_json::to_string_pretty(plan)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;
        Ok(())
    }

    fn archive(&self, plan: &Plan) -> Result<()> {
        let active = self.active_dir.join(format!("{}.json", plan.id));
        if active.exists() {
            std::fs::remove_file(&active)?;
        }
        self.save(plan)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
