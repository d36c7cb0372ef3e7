//! .NET diagnostics

use super::{EnvironmentHealer, HealerCore, Permission, RemedyAction, read_generated};
use crate::errors::Result;
use crate::model::{
    Ecosystem, EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use std::path::{Path, PathBuf};

/// `using` namespace prefix and the NuGet packages it needs
pub const TEST_PACKAGES: &[(&str, &[&str])] = &[
    ("Xunit", &["xunit", "xunit.runner.visualstudio", "Microsoft.NET.Test.Sdk"]),
    ("NUnit.Framework", &["NUnit", "NUnit3TestAdapter", "Microsoft.NET.Test.Sdk"]),
    ("Microsoft.VisualStudio.TestTools.UnitTesting", &["MSTest.TestFramework", "MSTest.TestAdapter", "Microsoft.NET.Test.Sdk"]),
    ("Moq", &["Moq"]),
    ("FluentAssertions", &["FluentAssertions"]),
];

/// First project file in `root`, by name
fn find_project_file(root: &Path) -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(".csproj") || n.ends_with(".fsproj"))
        .collect();
    names.sort();
    names.into_iter().next()
}

fn uses_namespace(content: &str, namespace: &str) -> bool {
    content.lines().any(|l| {
        l.trim_start()
            .strip_prefix("using ")
            .map(|rest| rest.trim_end_matches(';').trim())
            .is_some_and(|ns| ns == namespace || ns.starts_with(&format!("{namespace}.")))
    })
}

pub struct CSharpHealer {
    core: HealerCore,
}

impl CSharpHealer {
    pub fn new(core: HealerCore) -> Self {
        Self { core }
    }

    fn issue(&self, severity: Severity, code: &str, message: impl Into<String>) -> EnvironmentIssue {
        EnvironmentIssue::new(self.core.project(), Stage::EnvSetup, severity, code, message)
    }
}

impl EnvironmentHealer for CSharpHealer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::DotNet
    }

    fn core(&self) -> &HealerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HealerCore {
        &mut self.core
    }

    fn analyze(&mut self, _project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()> {
        let Some(project_file) = find_project_file(root) else {
            let issue = self
                .issue(Severity::Error, codes::DOTNET_PROJECT_MISSING, "No .csproj found")
                .with_remediation(RemediationStep::manual(
                    "Add a test project",
                    "Create one with `dotnet new xunit` and reference the project under test",
                ));
            self.core.report(issue);
            return Ok(());
        };

        let descriptor = std::fs::read_to_string(root.join(&project_file))?;
        let declared = |package: &str| descriptor.contains(&format!("Include=\"{package}\""));

        let mut missing: Vec<&str> = Vec::new();
        for (_, content) in read_generated(root, generated) {
            for (namespace, packages) in TEST_PACKAGES {
                if !uses_namespace(&content, namespace) {
                    continue;
                }
                for package in packages.iter().copied() {
                    if !declared(package) && !missing.contains(&package) {
                        missing.push(package);
                    }
                }
            }
        }

        if !missing.is_empty() {
            let command = missing
                .iter()
                .map(|p| format!("dotnet add {project_file} package {p}"))
                .collect::<Vec<_>>()
                .join(" && ");
            let issue = self
                .issue(
                    Severity::Error,
                    codes::DOTNET_TEST_PACKAGE_MISSING,
                    format!("Missing test packages: {}", missing.join(", ")),
                )
                .with_file(&project_file)
                .with_remediation(RemediationStep::command("Add packages", "Reference the test packages", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }

        if !root.join("obj").join("project.assets.json").is_file() {
            let issue = self
                .issue(Severity::Warning, codes::DOTNET_RESTORE_REQUIRED, "Packages have not been restored")
                .with_remediation(RemediationStep::command("Restore", "Restore NuGet packages", "dotnet restore"));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install("dotnet restore")]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoFixConfig, TimeoutsConfig};
    use crate::healer::HealPolicy;
    use crate::model::Language;
    use crate::testing::ScriptedRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_missing_packages_and_restore() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Shop.Tests.csproj"),
            "<Project><ItemGroup><PackageReference Include=\"xunit\" Version=\"2.7.0\" /></ItemGroup></Project>",
        )
        .unwrap();
        std::fs::write(temp.path().join("CartTests.cs"), "using Xunit;\nusing Moq;\npublic class CartTests {}\n").unwrap();

        let project = ProjectDescriptor::new("shop", ".", Language::CSharp);
        let mut healer = CSharpHealer::new(HealerCore::new(
            "shop",
            HealPolicy::from(&AutoFixConfig::default()),
            Arc::new(ScriptedRunner::new()),
            TimeoutsConfig::default(),
        ));
        healer.analyze(&project, temp.path(), &[PathBuf::from("CartTests.cs")]).unwrap();

        let found: Vec<&str> = healer.issues().iter().map(|i| i.code.as_str()).collect();
        assert_eq!(found, vec![codes::DOTNET_TEST_PACKAGE_MISSING, codes::DOTNET_RESTORE_REQUIRED]);
        assert_eq!(
            healer.issues()[0].remediation[0].command.as_deref(),
            Some(
                "dotnet add Shop.Tests.csproj package xunit.runner.visualstudio && \
                 dotnet add Shop.Tests.csproj package Microsoft.NET.Test.Sdk && \
                 dotnet add Shop.Tests.csproj package Moq"
            )
        );
    }

    #[test]
    fn test_using_matches_namespace_prefix() {
        assert!(uses_namespace("using Xunit.Abstractions;", "Xunit"));
        assert!(!uses_namespace("using XunitHelpers;", "Xunit"));
    }
}
