//! Java (Maven / Gradle) environment diagnostics

use super::{EnvironmentHealer, HealerCore, Permission, RemedyAction, read_generated};
use crate::errors::Result;
use crate::model::{
    Ecosystem, EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use std::path::{Path, PathBuf};

/// A test library recognised by the package its tests import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestLibrary {
    pub import_prefix: &'static str,
    pub group: &'static str,
    pub artifact: &'static str,
    pub version: &'static str,
}

pub const TEST_LIBRARIES: &[TestLibrary] = &[
    TestLibrary {
        import_prefix: "org.junit.jupiter",
        group: "org.junit.jupiter",
        artifact: "junit-jupiter",
        version: "5.10.2",
    },
    TestLibrary { import_prefix: "org.mockito", group: "org.mockito", artifact: "mockito-core", version: "5.11.0" },
    TestLibrary { import_prefix: "org.assertj", group: "org.assertj", artifact: "assertj-core", version: "3.25.3" },
    TestLibrary {
        import_prefix: "org.springframework.boot.test",
        group: "org.springframework.boot",
        artifact: "spring-boot-starter-test",
        version: "3.2.5",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildFile {
    Maven,
    Gradle(&'static str),
}

impl BuildFile {
    fn detect(root: &Path) -> Option<Self> {
        if root.join("pom.xml").is_file() {
            return Some(Self::Maven);
        }
        ["build.gradle.kts", "build.gradle"].into_iter().find(|f| root.join(f).is_file()).map(Self::Gradle)
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Maven => "pom.xml",
            Self::Gradle(name) => name,
        }
    }
}

/// Libraries imported by `content`, in table order
fn imported_libraries(content: &str) -> Vec<&'static TestLibrary> {
    TEST_LIBRARIES
        .iter()
        .filter(|lib| {
            content.lines().any(|l| {
                let l = l.trim_start();
                l.starts_with("import ")
                    && l.trim_start_matches("import ").trim_start_matches("static ").starts_with(lib.import_prefix)
            })
        })
        .collect()
}

fn pom_dependency(lib: &TestLibrary) -> String {
    format!(
        "    <dependency>\n      <groupId>{}</groupId>\n      <artifactId>{}</artifactId>\n      <version>{}</version>\n      <scope>test</scope>\n    </dependency>\n",
        lib.group, lib.artifact, lib.version
    )
}

/// Insert test dependencies into a pom; `None` if the pom has no anchor to insert at
pub fn add_maven_dependencies(pom: &str, libs: &[&TestLibrary]) -> Option<String> {
    let block: String = libs.iter().map(|l| pom_dependency(l)).collect();
    if let Some(pos) = pom.rfind("</dependencies>") {
        let line_start = pom[..pos].rfind('\n').map_or(0, |p| p + 1);
        return Some(format!("{}{}{}", &pom[..line_start], block, &pom[line_start..]));
    }
    let pos = pom.rfind("</project>")?;
    Some(format!("{}  <dependencies>\n{}  </dependencies>\n{}", &pom[..pos], block, &pom[pos..]))
}

/// Append test dependencies to a Gradle build script
pub fn add_gradle_dependencies(script: &str, libs: &[&TestLibrary], kotlin: bool) -> String {
    let lines: Vec<String> = libs
        .iter()
        .map(|l| {
            let coordinate = format!("{}:{}:{}", l.group, l.artifact, l.version);
            if kotlin {
                format!("    testImplementation(\"{coordinate}\")")
            } else {
                format!("    testImplementation '{coordinate}'")
            }
        })
        .collect();
    let mut out = script.trim_end().to_string();
    out.push_str("\n\ndependencies {\n");
    out.push_str(&lines.join("\n"));
    out.push_str("\n}\n");
    if libs.iter().any(|l| l.artifact == "junit-jupiter") {
        out.push_str("\ntest {\n    useJUnitPlatform()\n}\n");
    }
    out
}

pub struct JavaHealer {
    core: HealerCore,
}

impl JavaHealer {
    pub fn new(core: HealerCore) -> Self {
        Self { core }
    }

    fn issue(&self, severity: Severity, code: &str, message: impl Into<String>) -> EnvironmentIssue {
        EnvironmentIssue::new(self.core.project(), Stage::EnvSetup, severity, code, message)
    }
}

impl EnvironmentHealer for JavaHealer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Java
    }

    fn core(&self) -> &HealerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HealerCore {
        &mut self.core
    }

    fn analyze(&mut self, _project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()> {
        let Some(build) = BuildFile::detect(root) else {
            let issue = self
                .issue(Severity::Error, codes::JAVA_BUILD_DESCRIPTOR_MISSING, "Neither pom.xml nor build.gradle found")
                .with_remediation(RemediationStep::manual(
                    "Add a build descriptor",
                    "Create a Maven pom.xml or a Gradle build script for the project",
                ));
            self.core.report(issue);
            return Ok(());
        };

        let descriptor = std::fs::read_to_string(root.join(build.file_name()))?;
        let mut needed: Vec<&TestLibrary> = Vec::new();
        for (_, content) in read_generated(root, generated) {
            for lib in imported_libraries(&content) {
                if !descriptor.contains(lib.artifact) && !needed.contains(&lib) {
                    needed.push(lib);
                }
            }
        }
        if needed.is_empty() {
            return Ok(());
        }

        let listing: Vec<String> = needed.iter().map(|l| format!("{}:{}", l.group, l.artifact)).collect();
        let updated = match build {
            BuildFile::Maven => add_maven_dependencies(&descriptor, &needed),
            BuildFile::Gradle(name) => Some(add_gradle_dependencies(&descriptor, &needed, name.ends_with(".kts"))),
        };

        let issue = self
            .issue(
                Severity::Error,
                codes::JAVA_TEST_DEPENDENCY_MISSING,
                format!("Generated tests use undeclared libraries: {}", listing.join(", ")),
            )
            .with_file(build.file_name())
            .with_details(listing.join("\n"))
            .with_remediation(RemediationStep::file(
                "Declare test dependencies",
                format!("Add {} with test scope", listing.join(", ")),
                build.file_name(),
            ));

        match updated {
            Some(content) => {
                self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::write(build.file_name(), content)]);
            }
            None => {
                self.core.report(issue);
            }
        }
        Ok(())
    }
}
