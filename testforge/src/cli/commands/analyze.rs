//! Analyze command - list detected projects

use anyhow::Result;
use std::path::Path;
use testforge_core::adapter::{EcosystemAdapter, StandardAdapter};
use testforge_core::analysis::ProjectAnalyzer;

pub async fn execute(path: &Path) -> Result<()> {
    if !path.is_dir() {
        println!(" Path is not a directory: {}", path.display());
        return Ok(());
    }

    println!(" Analyzing repository: {}", path.display());
    let projects = ProjectAnalyzer::new().analyze(path)?;

    if projects.is_empty() {
        println!("\n No projects detected");
        return Ok(());
    }

    println!("\n Projects ({}):", projects.len());
    for project in &projects {
        let adapter = StandardAdapter::for_project(project);
        let root = project.root_in(path);

        println!("\n  {} ({})", project.name, project.path.display());
        println!("    Language: {}", project.language);
        if let Some(framework) = &project.framework {
            println!("    Framework: {framework}");
        }
        if let Some(build_tool) = &project.build_tool {
            println!("    Build tool: {build_tool}");
        }
        println!(
            "    Test framework: {}",
            project.test_framework.as_deref().unwrap_or(adapter.runner_name(project, &root))
        );
    }

    Ok(())
}
