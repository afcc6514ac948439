//! Point-in-time view of the appliance for `signage show`.

use std::fmt::Write as _;

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use schedule_model::Transition;
use serde::Serialize;

use crate::config::Settings;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::markers::{MarkerStore, RunState};
use crate::mode::{Decision, ModeCoordinator};
use crate::state::{Mode, PowerState, StateStore};

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub now: NaiveDateTime,
    pub run_state: RunState,
    pub mode: Option<Mode>,
    pub power: Option<PowerState>,
    pub published: Option<Fingerprint>,
    pub decision: Decision,
    pub transitions: Vec<Transition>,
    pub rejected_ranges: Vec<String>,
}

impl Overview {
    pub fn collect(
        settings: &Settings,
        markers: &dyn MarkerStore,
        state: &dyn StateStore,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let rejected_ranges = settings
            .schedule
            .rejected()
            .map(|(weekday, rejected)| format!("{weekday}: {} ({})", rejected.raw, rejected.error))
            .collect();
        Ok(Self {
            now,
            run_state: markers.run_state()?,
            mode: state.mode()?,
            power: state.power()?,
            published: state.published()?,
            decision: ModeCoordinator::evaluate(settings, now),
            transitions: settings
                .schedule
                .transitions_within(now, ChronoDuration::hours(24)),
            rejected_ranges,
        })
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let run = match &self.run_state {
            RunState::Idle { last_result: None } => "idle".to_string(),
            RunState::Idle {
                last_result: Some(result),
            } => format!("idle; last run: {}", first_line(result)),
            RunState::Processing { started: Some(at) } => format!("processing since {at}"),
            RunState::Processing { started: None } => "processing".to_string(),
            RunState::Failed { message } => format!("idle; last run failed: {}", first_line(message)),
        };
        let unknown = || "unknown".to_string();
        let _ = writeln!(out, "now:        {}", self.now.format("%a %Y-%m-%d %H:%M"));
        let _ = writeln!(out, "run:        {run}");
        let _ = writeln!(
            out,
            "mode:       {}",
            self.mode.map(|m| m.to_string()).unwrap_or_else(unknown)
        );
        let _ = writeln!(
            out,
            "power:      {}",
            self.power.map(|p| p.to_string()).unwrap_or_else(unknown)
        );
        let _ = writeln!(
            out,
            "published:  {}",
            self.published
                .as_ref()
                .map(|fp| fp.to_string())
                .unwrap_or_else(unknown)
        );
        let _ = writeln!(
            out,
            "schedule:   {} -> mode {}, power {}",
            if self.decision.active { "active" } else { "inactive" },
            self.decision.mode,
            self.decision.power
        );
        if self.transitions.is_empty() {
            let _ = writeln!(out, "next 24h:   no transitions");
        } else {
            let _ = writeln!(out, "next 24h:");
            for transition in &self.transitions {
                let _ = writeln!(
                    out,
                    "  {} {}",
                    transition.at.format("%a %H:%M"),
                    if transition.active { "on" } else { "off" }
                );
            }
        }
        for rejected in &self.rejected_ranges {
            let _ = writeln!(out, "ignored range {rejected}");
        }
        out
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
