// Plain-text presentation of sessions, drafts, and solver failures.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use squadup_core::draft::{Draft, PlayerRef};
use squadup_core::role::Role;
use squadup_core::roster::RoleCounts;
use squadup_core::session::{GuildState, Session};
use squadup_core::solver::NoSolution;

/// Full session view: header, counts, lock state, and the draft if any.
pub fn session(session: &Session, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} [{}]", session.title(), session.id());
    if let Some(description) = session.description() {
        let _ = writeln!(out, "{description}");
    }
    let _ = writeln!(out, "{}", counts(&session.roster().role_counts()));
    let _ = writeln!(out, "{}", lock_line(session, now));

    for (id, signup) in session.roster().iter() {
        let roles: Vec<String> = signup
            .roles
            .iter()
            .map(|role| match signup.class_for(*role) {
                Some(class) => format!("{role} ({class})"),
                None => role.to_string(),
            })
            .collect();
        let _ = writeln!(out, "  {} <{}>: {}", signup.display_name, id, roles.join(", "));
    }

    out.push('\n');
    match session.draft() {
        Some(d) => out.push_str(&draft(d)),
        None => out.push_str("No groups rolled yet.\n"),
    }
    out
}

pub fn counts(counts: &RoleCounts) -> String {
    format!(
        "Signups: {} (tanks {}, heals {}, dps {})",
        counts.total, counts.tanks, counts.heals, counts.dps
    )
}

fn lock_line(session: &Session, now: DateTime<Utc>) -> String {
    match session.lock_at() {
        None => "Signups open, no deadline".to_string(),
        Some(deadline) if session.is_locked(now) => {
            format!("Signups locked since {}", deadline.format("%Y-%m-%d %H:%M UTC"))
        }
        Some(deadline) => format!("Signups lock at {}", deadline.format("%Y-%m-%d %H:%M UTC")),
    }
}

/// Groups in slot order, then the bench.
pub fn draft(draft: &Draft) -> String {
    let mut out = String::new();
    for (n, group) in draft.groups.iter().enumerate() {
        let _ = writeln!(out, "Group {}", n + 1);
        for (slot, player) in group.members() {
            let who = player.map_or_else(|| "(empty)".to_string(), |p| player_label(p, slot.role()));
            let _ = writeln!(out, "  {:<5} {}", slot.role().display_str(), who);
        }
    }
    if draft.bench.is_empty() {
        out.push_str("Bench: (none)\n");
    } else {
        let names: Vec<&str> = draft.bench.iter().map(|p| p.display_name.as_str()).collect();
        let _ = writeln!(out, "Bench: {}", names.join(", "));
    }
    out
}

fn player_label(player: &PlayerRef, role: Role) -> String {
    let mut label = player.display_name.clone();
    if let Some(class) = player.class_for(role) {
        let _ = write!(label, " ({class})");
    }
    if !player.is_eligible(role) {
        label.push_str(" [off-role]");
    }
    label
}

pub fn no_solution(failure: &NoSolution) -> String {
    let mut out = format!("Could not form groups: {failure}\n");
    if !failure.bench.is_empty() {
        let names: Vec<&str> = failure.bench.iter().map(|p| p.display_name.as_str()).collect();
        let _ = writeln!(out, "Unplaced: {}", names.join(", "));
    }
    out
}

/// One line per session, newest first, current marked with `*`.
pub fn sessions(guild: &GuildState) -> String {
    let mut out = String::new();
    for session in guild.sessions_newest_first() {
        let marker = if guild.current_session_id() == Some(session.id()) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{marker} {}  {}  ({} signups)",
            session.id(),
            session.title(),
            session.roster().len()
        );
    }
    if out.is_empty() {
        out.push_str("No sessions yet.\n");
    }
    out
}
