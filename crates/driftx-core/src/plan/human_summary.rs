//! Human-readable summary renderer for Crupde plans.

use crate::plan::model::{CrupdePlan, PlanAction};

/// Render a Markdown/text summary of a [`CrupdePlan`].
///
/// Intended for previews (dry-run commits) and review displays. It is
/// informational only.
pub fn render_human_summary(plan: &CrupdePlan) -> String {
    let mut out = String::new();

    out.push_str("## Reconciliation Plan\n\n");

    let counts = plan.counts();
    out.push_str(&format!(
        "| Create | Update | Replace | Delete |\n\
         |---|---|---|---|\n\
         | {} | {} | {} | {} |\n\n",
        counts.create, counts.update, counts.replace, counts.delete
    ));

    if plan.is_empty() {
        out.push_str("_Nothing to do._\n");
        return out;
    }

    for (heading, action) in [
        ("To Create", PlanAction::Create),
        ("To Update", PlanAction::Update),
        ("To Replace", PlanAction::Replace),
        ("To Delete", PlanAction::Delete),
    ] {
        let bucket = plan.bucket(action);
        if bucket.values().all(Vec::is_empty) {
            continue;
        }
        out.push_str(&format!("### {heading}\n\n"));
        for (table, entries) in bucket {
            if entries.is_empty() {
                continue;
            }
            out.push_str(&format!("- **{}** ({})\n", table, entries.len()));
            for entry in entries {
                out.push_str(&format!("  - `{}`: {}\n", entry.id, entry.description));
            }
        }
        out.push('\n');
    }

    out
}
