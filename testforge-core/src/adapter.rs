//! Per-ecosystem command and discovery tables
//!
//! The core treats every string produced here as opaque: it is handed to the
//! command runner or compiled into a discovery glob, never parsed.

use crate::model::{Ecosystem, ProjectDescriptor, TestCategory};
use std::path::{Path, PathBuf};

/// Build/test/coverage vocabulary for one ecosystem
pub trait EcosystemAdapter: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Step run once before any category, if the toolchain has one
    fn build_command(&self, project: &ProjectDescriptor, root: &Path) -> Option<String>;

    fn test_command(&self, project: &ProjectDescriptor, root: &Path, category: TestCategory)
    -> String;

    fn coverage_command(&self, project: &ProjectDescriptor, root: &Path) -> Option<String>;

    /// Glob, relative to [`EcosystemAdapter::test_dir`], matching test files
    fn discovery_glob(&self, category: TestCategory) -> &'static str;

    /// Directory, relative to the project root, holding tests of a category
    fn test_dir(&self, project: &ProjectDescriptor, category: TestCategory) -> PathBuf;

    /// Key for `regex_utils::counts::for_runner`
    fn runner_name(&self, project: &ProjectDescriptor, root: &Path) -> &'static str;
}

/// Python interpreter for a project: the project venv when one exists
pub fn python_interpreter(root: &Path) -> String {
    let candidates: [&str; 2] = if cfg!(windows) {
        [".venv\\Scripts\\python.exe", "venv\\Scripts\\python.exe"]
    } else {
        [".venv/bin/python", "venv/bin/python"]
    };

    candidates
        .iter()
        .find(|c| root.join(c).is_file())
        .map(|c| c.to_string())
        .unwrap_or_else(|| "python3".to_string())
}

fn uses_gradle(project: &ProjectDescriptor, root: &Path) -> bool {
    project.build_tool.as_deref() == Some("gradle")
        || (!root.join("pom.xml").exists()
            && (root.join("build.gradle").exists() || root.join("build.gradle.kts").exists()))
}

fn gradle_binary(root: &Path) -> &'static str {
    if root.join("gradlew").exists() { "./gradlew" } else { "gradle" }
}

/// Default adapter table
#[derive(Debug, Clone, Copy)]
pub struct StandardAdapter {
    ecosystem: Ecosystem,
}

impl StandardAdapter {
    pub fn new(ecosystem: Ecosystem) -> Self {
        Self { ecosystem }
    }

    pub fn for_project(project: &ProjectDescriptor) -> Self {
        Self::new(project.ecosystem())
    }
}

impl EcosystemAdapter for StandardAdapter {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    fn build_command(&self, project: &ProjectDescriptor, root: &Path) -> Option<String> {
        match self.ecosystem {
            Ecosystem::Node => Some("npm run build --if-present".to_string()),
            Ecosystem::Python => None,
            Ecosystem::Java if uses_gradle(project, root) => {
                Some(format!("{} testClasses -q", gradle_binary(root)))
            }
            Ecosystem::Java => Some("mvn -B -q test-compile".to_string()),
            Ecosystem::Go => Some("go build ./...".to_string()),
            Ecosystem::DotNet => Some("dotnet build --nologo".to_string()),
        }
    }

    fn test_command(
        &self,
        project: &ProjectDescriptor,
        root: &Path,
        category: TestCategory,
    ) -> String {
        let dir = self.test_dir(project, category);
        let dir = dir.to_string_lossy();

        match self.ecosystem {
            Ecosystem::Node => format!("npx jest --ci {dir}"),
            Ecosystem::Python => {
                format!("{} -m pytest {dir} -q", python_interpreter(root))
            }
            Ecosystem::Java => {
                let filter = match category {
                    TestCategory::Unit => "*Test",
                    TestCategory::Integration => "*IT",
                    TestCategory::E2e => "*E2E*",
                };
                if uses_gradle(project, root) {
                    format!("{} test --tests '{filter}'", gradle_binary(root))
                } else {
                    format!("mvn -B test -Dtest='{filter}' -Dsurefire.failIfNoSpecifiedTests=false")
                }
            }
            Ecosystem::Go => match category {
                TestCategory::Unit => "go test -v ./...".to_string(),
                TestCategory::Integration => {
                    "go test -v -tags=integration -run Integration ./...".to_string()
                }
                TestCategory::E2e => "go test -v ./e2e/...".to_string(),
            },
            Ecosystem::DotNet => {
                let filter = match category {
                    TestCategory::Unit => "Category!=Integration&Category!=E2E",
                    TestCategory::Integration => "Category=Integration",
                    TestCategory::E2e => "Category=E2E",
                };
                format!("dotnet test --nologo --filter \"{filter}\"")
            }
        }
    }

    fn coverage_command(&self, project: &ProjectDescriptor, root: &Path) -> Option<String> {
        let command = match self.ecosystem {
            Ecosystem::Node => "npx jest --ci --coverage".to_string(),
            Ecosystem::Python => {
                format!("{} -m pytest --cov=. --cov-report=xml -q", python_interpreter(root))
            }
            Ecosystem::Java if uses_gradle(project, root) => {
                format!("{} jacocoTestReport", gradle_binary(root))
            }
            Ecosystem::Java => "mvn -B jacoco:report".to_string(),
            Ecosystem::Go => "go test -coverprofile=coverage.out ./...".to_string(),
            Ecosystem::DotNet => "dotnet test --nologo --collect:\"XPlat Code Coverage\"".to_string(),
        };
        Some(command)
    }

    fn discovery_glob(&self, category: TestCategory) -> &'static str {
        match (self.ecosystem, category) {
            (Ecosystem::Node, _) => "**/*.{test,spec}.{js,jsx,ts,tsx,mjs,cjs}",
            (Ecosystem::Python, _) => "**/*.py",
            (Ecosystem::Java, TestCategory::Unit) => "**/*Test.java",
            (Ecosystem::Java, TestCategory::Integration) => "**/*IT.java",
            (Ecosystem::Java, TestCategory::E2e) => "**/*E2E*.java",
            (Ecosystem::Go, TestCategory::Integration) => "**/*integration_test.go",
            (Ecosystem::Go, _) => "**/*_test.go",
            (Ecosystem::DotNet, TestCategory::Unit) => "**/*Tests.cs",
            (Ecosystem::DotNet, TestCategory::Integration) => "**/*IntegrationTests.cs",
            (Ecosystem::DotNet, TestCategory::E2e) => "**/*E2ETests.cs",
        }
    }

    fn test_dir(&self, _project: &ProjectDescriptor, category: TestCategory) -> PathBuf {
        match self.ecosystem {
            Ecosystem::Node | Ecosystem::Python => PathBuf::from("tests").join(category.as_str()),
            Ecosystem::Java => PathBuf::from("src/test/java"),
            Ecosystem::Go => match category {
                TestCategory::E2e => PathBuf::from("e2e"),
                _ => PathBuf::from("."),
            },
            Ecosystem::DotNet => PathBuf::from("tests"),
        }
    }

    fn runner_name(&self, project: &ProjectDescriptor, root: &Path) -> &'static str {
        match self.ecosystem {
            Ecosystem::Node => "jest",
            Ecosystem::Python => "pytest",
            Ecosystem::Java if uses_gradle(project, root) => "gradle",
            Ecosystem::Java => "maven",
            Ecosystem::Go => "go",
            Ecosystem::DotNet => "dotnet",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Language;
    use tempfile::TempDir;

    #[test]
    fn test_python_uses_venv_when_present() {
        let temp = TempDir::new().unwrap();
        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let adapter = StandardAdapter::for_project(&project);

        let command = adapter.test_command(&project, temp.path(), TestCategory::Unit);
        assert!(command.starts_with("python3 -m pytest"));
        assert!(command.contains("tests/unit"));

        let bin = if cfg!(windows) { ".venv/Scripts" } else { ".venv/bin" };
        std::fs::create_dir_all(temp.path().join(bin)).unwrap();
        let exe = if cfg!(windows) { "python.exe" } else { "python" };
        std::fs::write(temp.path().join(bin).join(exe), "").unwrap();

        let command = adapter.test_command(&project, temp.path(), TestCategory::Unit);
        assert!(command.contains(".venv"));
    }

    #[test]
    fn test_java_build_tool_selection() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("build.gradle"), "").unwrap();

        let mut project = ProjectDescriptor::new("svc", ".", Language::Java);
        let adapter = StandardAdapter::for_project(&project);
        assert!(adapter.test_command(&project, temp.path(), TestCategory::Unit).starts_with("gradle"));
        assert_eq!(adapter.runner_name(&project, temp.path()), "gradle");

        project.build_tool = Some("maven".to_string());
        std::fs::write(temp.path().join("pom.xml"), "").unwrap();
        assert!(adapter.test_command(&project, temp.path(), TestCategory::Unit).starts_with("mvn"));
        assert_eq!(adapter.runner_name(&project, temp.path()), "maven");
    }

    #[test]
    fn test_node_table() {
        let project = ProjectDescriptor::new("web", "web", Language::TypeScript);
        let adapter = StandardAdapter::for_project(&project);
        assert_eq!(adapter.runner_name(&project, Path::new("web")), "jest");
        assert_eq!(adapter.test_dir(&project, TestCategory::E2e), PathBuf::from("tests/e2e"));
        assert!(adapter.discovery_glob(TestCategory::Unit).contains("test,spec"));
    }
}
