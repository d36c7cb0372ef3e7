//! Repository scanning and project detection
//!
//! Every directory holding a build descriptor becomes one [`ProjectDescriptor`].
//! Results are in sorted path order so repeated scans agree.

use crate::errors::{Result, TestForgeError};
use crate::model::{Ecosystem, Language, ProjectDescriptor};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Dependency, build and tool directories never scanned or searched
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "coverage",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    "target",
    "bin",
    "obj",
    ".next",
    ".gradle",
    "vendor",
    ".testforge",
];

pub fn is_ignored_dir(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| IGNORED_DIRS.contains(&n))
}

const NODE_FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "nextjs"),
    ("@nestjs/core", "nestjs"),
    ("@angular/core", "angular"),
    ("react", "react"),
    ("vue", "vue"),
    ("express", "express"),
    ("fastify", "fastify"),
    ("koa", "koa"),
];

const NODE_TEST_FRAMEWORKS: &[&str] = &["jest", "vitest", "mocha"];

const PYTHON_FRAMEWORKS: &[&str] = &["fastapi", "flask", "django"];

const GO_FRAMEWORKS: &[(&str, &str)] = &[
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo", "echo"),
    ("github.com/gofiber/fiber", "fiber"),
    ("github.com/go-chi/chi", "chi"),
];

const DOTNET_TEST_FRAMEWORKS: &[(&str, &str)] =
    &[("xunit", "xunit"), ("nunit", "nunit"), ("MSTest", "mstest")];

pub struct ProjectAnalyzer {
    max_depth: usize,
}

impl Default for ProjectAnalyzer {
    fn default() -> Self {
        Self { max_depth: 6 }
    }
}

impl ProjectAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&self, repo_root: &Path) -> Result<Vec<ProjectDescriptor>> {
        if !repo_root.is_dir() {
            return Err(TestForgeError::analysis(format!(
                "{} is not a directory",
                repo_root.display()
            )));
        }

        let repo_name = repo_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repository")
            .to_string();

        let mut projects: Vec<ProjectDescriptor> = Vec::new();
        let mut names = HashSet::new();

        let walker = WalkDir::new(repo_root)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| TestForgeError::analysis(e.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            let rel = dir.strip_prefix(repo_root).unwrap_or(dir).to_path_buf();

            for mut project in detect_in_dir(dir, &rel, &repo_name) {
                let nested = projects.iter().any(|p| {
                    p.ecosystem() == project.ecosystem() && p.path != rel && is_ancestor(&p.path, &rel)
                });
                if nested {
                    debug!("Skipping nested {:?} project at {}", project.ecosystem(), rel.display());
                    continue;
                }
                if !names.insert(project.name.clone()) {
                    project.name = format!("{}-{}", project.name, ecosystem_suffix(project.ecosystem()));
                    names.insert(project.name.clone());
                }
                debug!("Detected {} project {} at {}", project.language, project.name, rel.display());
                projects.push(project);
            }
        }

        info!("Detected {} project(s) in {}", projects.len(), repo_root.display());
        Ok(projects)
    }
}

fn is_ancestor(ancestor: &Path, path: &Path) -> bool {
    ancestor.as_os_str().is_empty() || path.starts_with(ancestor)
}

fn ecosystem_suffix(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Node => "node",
        Ecosystem::Python => "python",
        Ecosystem::Java => "java",
        Ecosystem::Go => "go",
        Ecosystem::DotNet => "dotnet",
    }
}

fn read_lower(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default().to_lowercase()
}

fn detect_in_dir(dir: &Path, rel: &Path, repo_name: &str) -> Vec<ProjectDescriptor> {
    let name = if rel.as_os_str().is_empty() {
        repo_name.to_string()
    } else {
        rel.to_string_lossy().replace('\\', "/")
    };
    let mut found = Vec::new();

    if dir.join("package.json").is_file() {
        found.push(detect_node(dir, &name, rel));
    }

    let python_markers = ["pyproject.toml", "requirements.txt", "setup.py", "Pipfile"];
    if python_markers.iter().any(|m| dir.join(m).is_file()) {
        found.push(detect_python(dir, &name, rel, &python_markers));
    }

    if dir.join("pom.xml").is_file()
        || dir.join("build.gradle").is_file()
        || dir.join("build.gradle.kts").is_file()
    {
        found.push(detect_java(dir, &name, rel));
    }

    if dir.join("go.mod").is_file() {
        let go_mod = std::fs::read_to_string(dir.join("go.mod")).unwrap_or_default();
        let mut project = ProjectDescriptor::new(&name, rel, Language::Go);
        project.build_tool = Some("go".to_string());
        project.test_framework = Some("go test".to_string());
        project.framework = GO_FRAMEWORKS
            .iter()
            .find(|(module, _)| go_mod.contains(module))
            .map(|(_, fw)| fw.to_string());
        found.push(project);
    }

    if let Some(descriptor) = dotnet_descriptor(dir) {
        let text = std::fs::read_to_string(&descriptor).unwrap_or_default();
        let mut project = ProjectDescriptor::new(&name, rel, Language::CSharp);
        project.build_tool = Some("dotnet".to_string());
        project.framework = text.contains("Microsoft.NET.Sdk.Web").then(|| "aspnetcore".to_string());
        project.test_framework = DOTNET_TEST_FRAMEWORKS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, fw)| fw.to_string());
        found.push(project);
    }

    found
}

fn detect_node(dir: &Path, name: &str, rel: &Path) -> ProjectDescriptor {
    let manifest: serde_json::Value = std::fs::read_to_string(dir.join("package.json"))
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    let deps = node_dependencies(&manifest);
    let has = |dep: &str| deps.iter().any(|d| d == dep);

    let language = if dir.join("tsconfig.json").is_file() || has("typescript") {
        Language::TypeScript
    } else {
        Language::JavaScript
    };

    let mut project = ProjectDescriptor::new(name, rel, language);
    project.framework = NODE_FRAMEWORKS.iter().find(|(dep, _)| has(dep)).map(|(_, fw)| fw.to_string());
    project.test_framework = NODE_TEST_FRAMEWORKS.iter().find(|fw| has(fw)).map(|fw| fw.to_string());
    project.build_tool = Some(
        if dir.join("pnpm-lock.yaml").exists() {
            "pnpm"
        } else if dir.join("yarn.lock").exists() {
            "yarn"
        } else {
            "npm"
        }
        .to_string(),
    );
    project
}

/// Names from `dependencies` and `devDependencies`
pub fn node_dependencies(manifest: &serde_json::Value) -> Vec<String> {
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|section| manifest.get(section).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn detect_python(dir: &Path, name: &str, rel: &Path, markers: &[&str]) -> ProjectDescriptor {
    let text: String = markers.iter().map(|m| read_lower(&dir.join(m))).collect::<Vec<_>>().join("\n");

    let mut project = ProjectDescriptor::new(name, rel, Language::Python);
    project.framework = PYTHON_FRAMEWORKS.iter().find(|fw| text.contains(*fw)).map(|fw| fw.to_string());
    project.test_framework = Some("pytest".to_string());
    project.build_tool = Some(if text.contains("[tool.poetry]") { "poetry" } else { "pip" }.to_string());
    project
}

fn detect_java(dir: &Path, name: &str, rel: &Path) -> ProjectDescriptor {
    let (build_tool, descriptor) = if dir.join("pom.xml").is_file() {
        ("maven", dir.join("pom.xml"))
    } else if dir.join("build.gradle.kts").is_file() {
        ("gradle", dir.join("build.gradle.kts"))
    } else {
        ("gradle", dir.join("build.gradle"))
    };
    let text = read_lower(&descriptor);

    let mut project = ProjectDescriptor::new(name, rel, Language::Java);
    project.build_tool = Some(build_tool.to_string());
    project.framework = text.contains("spring-boot").then(|| "spring-boot".to_string());
    project.test_framework = Some(if text.contains("junit:junit") { "junit4" } else { "junit5" }.to_string());
    project
}

fn dotnet_descriptor(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("csproj" | "sln")))
        .collect();
    entries.sort();
    // Prefer a project file over a solution
    entries
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "csproj"))
        .or_else(|| entries.first())
        .cloned()
}
