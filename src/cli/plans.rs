use anyhow::{bail, Result};

use crate::config::TesseraConfig;
use crate::plans::{self, PlanTransition};

/// Print a plan and its steps in claim order.
pub fn show(config: &TesseraConfig, slug: &str, plan_id: &str) -> Result<()> {
    let store = super::open_store(config)?;
    let project = super::require_project(&store, slug)?;

    let Some(detail) = plans::get_plan(&store, &project.id, plan_id)? else {
        bail!("plan not found: {plan_id}");
    };
    let plan = &detail.plan;

    println!("{} [{}]", plan.title, plan.status);
    println!("{}", "=".repeat(40));
    println!("  id:         {}", plan.id);
    println!("  thread:     {}", plan.thread_id);
    if let Some(ref description) = plan.description {
        println!("  about:      {description}");
    }
    println!("  updated:    {}", plan.updated_at);
    println!();

    for step in &detail.steps {
        println!("  {:>8}  {:<12} {}", step.step_number, step.status.as_str(), step.description);
        if let Some(ref result) = step.result {
            println!("            -> {result}");
        }
    }
    Ok(())
}

/// Return a failed plan to idle so its failed steps can be claimed again.
pub fn reset(config: &TesseraConfig, slug: &str, plan_id: &str) -> Result<()> {
    let store = super::open_store(config)?;
    let project = super::require_project(&store, slug)?;

    match plans::reset_plan(&store, &project.id, plan_id)? {
        PlanTransition::Updated { plan } => {
            println!("Plan {} reset to {}", plan.id, plan.status);
            Ok(())
        }
        PlanTransition::InvalidState { plan_status } => {
            bail!("only failed plans can be reset (plan is {plan_status})")
        }
        PlanTransition::NotFound => bail!("plan not found: {plan_id}"),
    }
}
