use anyhow::Result;

use crate::config::TesseraConfig;
use crate::projects;

/// Create a project and print its endpoint.
pub fn add(config: &TesseraConfig, slug: &str, name: &str) -> Result<()> {
    let store = super::open_store(config)?;
    let project = projects::create(&store, slug, name)?;

    println!("Created project {} ({})", project.slug, project.name);
    println!("  id:       {}", project.id);
    println!("  endpoint: http://{}/mcp/{}", config.bind_addr(), project.slug);
    Ok(())
}

pub fn list(config: &TesseraConfig) -> Result<()> {
    let store = super::open_store(config)?;
    let all = projects::list(&store)?;

    if all.is_empty() {
        println!("No projects yet. Create one with `tessera project add <slug> <name>`.");
        return Ok(());
    }
    println!("{:<24} {:<32} CREATED", "SLUG", "NAME");
    for p in all {
        println!("{:<24} {:<32} {}", p.slug, p.name, p.created_at);
    }
    Ok(())
}
