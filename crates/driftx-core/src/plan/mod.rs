//! Crupde (create/update/replace/delete) plans.

pub mod human_summary;
pub mod model;

pub use human_summary::render_human_summary;
pub use model::{CrupdePlan, PlanAction, PlanCounts, PlanEntry};

impl CrupdePlan {
    /// Render this plan as Markdown text
    pub fn render_human_summary(&self) -> String {
        human_summary::render_human_summary(self)
    }
}
