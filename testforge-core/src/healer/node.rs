//! Node / TypeScript environment diagnostics

use super::{EnvironmentHealer, HealerCore, Permission, RemedyAction, read_generated};
use crate::analysis::node_dependencies;
use crate::errors::Result;
use crate::model::{
    Ecosystem, EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Packages published as ES modules only; Jest must transform them
pub const ESM_ONLY_PACKAGES: &[&str] = &[
    "node-fetch",
    "chalk",
    "nanoid",
    "p-limit",
    "p-map",
    "got",
    "ky",
    "execa",
    "strip-ansi",
    "lodash-es",
    "d3",
    "uuid",
    "query-string",
];

const JEST_CONFIG_FILES: &[&str] =
    &["jest.config.js", "jest.config.ts", "jest.config.mjs", "jest.config.cjs", "jest.config.json"];

pub struct NodeHealer {
    core: HealerCore,
}

impl NodeHealer {
    pub fn new(core: HealerCore) -> Self {
        Self { core }
    }

    fn issue(&self, severity: Severity, code: &str, message: impl Into<String>) -> EnvironmentIssue {
        EnvironmentIssue::new(self.core.project(), Stage::EnvSetup, severity, code, message)
    }
}

/// Package manager install command prefix for a project
pub fn package_manager(project: &ProjectDescriptor) -> &'static str {
    match project.build_tool.as_deref() {
        Some("yarn") => "yarn",
        Some("pnpm") => "pnpm",
        _ => "npm",
    }
}

pub fn dev_install_command(project: &ProjectDescriptor, packages: &[&str]) -> String {
    let list = packages.join(" ");
    match package_manager(project) {
        "yarn" => format!("yarn add --dev {list}"),
        "pnpm" => format!("pnpm add -D {list}"),
        _ => format!("npm install --save-dev {list}"),
    }
}

pub fn existing_jest_config(root: &Path) -> Option<PathBuf> {
    JEST_CONFIG_FILES.iter().map(|f| root.join(f)).find(|p| p.is_file())
}

/// Config written when a project has none
pub fn default_jest_config(typescript: bool, esm_packages: &[&str]) -> String {
    let mut out = String::from("/** @type {import('jest').Config} */\nmodule.exports = {\n");
    out.push_str("  testEnvironment: 'node',\n");
    if typescript {
        out.push_str("  preset: 'ts-jest',\n");
    }
    out.push_str("  testMatch: ['**/?(*.)+(spec|test).[jt]s?(x)'],\n");
    out.push_str("  testPathIgnorePatterns: ['/node_modules/', '/dist/'],\n");
    if !esm_packages.is_empty() {
        out.push_str(&format!(
            "  transformIgnorePatterns: ['/node_modules/(?!({})/)'],\n",
            esm_packages.join("|")
        ));
    }
    out.push_str("};\n");
    out
}

const DEFAULT_TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "ES2020",
    "module": "commonjs",
    "esModuleInterop": true,
    "strict": false,
    "skipLibCheck": true,
    "types": ["jest", "node"]
  }
}
"#;

impl EnvironmentHealer for NodeHealer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Node
    }

    fn core(&self) -> &HealerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HealerCore {
        &mut self.core
    }

    fn analyze(&mut self, project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()> {
        let manifest_path = root.join("package.json");
        if !manifest_path.is_file() {
            let issue = self
                .issue(Severity::Error, codes::NODE_PACKAGE_JSON_MISSING, "package.json not found")
                .with_file("package.json")
                .with_remediation(RemediationStep::command("Initialize package", "Create a package.json", "npm init -y"));
            self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::install("npm init -y")]);
            return Ok(());
        }

        let manifest = match std::fs::read_to_string(&manifest_path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string()))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Unreadable package.json in {}: {}", root.display(), e);
                let issue = self
                    .issue(Severity::Error, codes::NODE_PACKAGE_JSON_INVALID, "package.json is not valid JSON")
                    .with_file("package.json")
                    .with_details(e)
                    .with_remediation(RemediationStep::manual(
                        "Fix package.json",
                        "Repair the manifest so npm and jest can read it",
                    ));
                self.core.report(issue);
                return Ok(());
            }
        };
        let deps = node_dependencies(&manifest);
        let has = |name: &str| deps.iter().any(|d| d == name);
        let install_all = format!("{} install", package_manager(project));

        if !root.join("node_modules").is_dir() {
            let issue = self
                .issue(Severity::Error, codes::NODE_DEPENDENCIES_NOT_INSTALLED, "node_modules is missing")
                .with_remediation(RemediationStep::command("Install dependencies", "Install packages", &install_all));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(&install_all)]);
        }

        let uses_other_runner = matches!(project.test_framework.as_deref(), Some("vitest" | "mocha"));
        if uses_other_runner {
            return Ok(());
        }

        let ts_tests: Vec<&PathBuf> = generated
            .iter()
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("ts" | "tsx")))
            .collect();
        let typescript = !ts_tests.is_empty() || root.join("tsconfig.json").is_file();

        if !has("jest") {
            let mut packages = vec!["jest", "@types/jest"];
            if typescript {
                packages.extend(["ts-jest", "typescript"]);
            }
            let command = dev_install_command(project, &packages);
            let issue = self
                .issue(Severity::Error, codes::JEST_NOT_INSTALLED, "jest is not a project dependency")
                .with_remediation(RemediationStep::command("Install jest", "Add jest as a dev dependency", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }

        let esm_packages: Vec<&str> = ESM_ONLY_PACKAGES.iter().copied().filter(|p| has(p)).collect();
        let config_path = existing_jest_config(root);
        let inline_config = manifest.get("jest").is_some();

        match (&config_path, inline_config) {
            (None, false) => {
                // A module-type package cannot load a CommonJS config from .js
                let module_type = manifest.get("type").and_then(|t| t.as_str()) == Some("module");
                let file = if module_type { "jest.config.cjs" } else { "jest.config.js" };
                let issue = self
                    .issue(Severity::Warning, codes::JEST_CONFIG_MISSING, "No Jest configuration found")
                    .with_file(file)
                    .with_remediation(RemediationStep::file("Create Jest config", "Add a jest config", file));
                self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::write(
                    file,
                    default_jest_config(typescript, &esm_packages),
                )]);
            }
            _ if !esm_packages.is_empty() => {
                let config_text = config_path
                    .as_ref()
                    .and_then(|p| std::fs::read_to_string(p).ok())
                    .unwrap_or_else(|| manifest.get("jest").map(|j| j.to_string()).unwrap_or_default());
                if !config_text.contains("transformIgnorePatterns") {
                    let issue = self
                        .issue(
                            Severity::Warning,
                            codes::ESM_DEPENDENCY_TRANSFORM_REQUIRED,
                            format!("ESM-only dependencies need transforming: {}", esm_packages.join(", ")),
                        )
                        .with_remediation(RemediationStep::manual(
                            "Transform ESM dependencies",
                            format!(
                                "Add transformIgnorePatterns: ['/node_modules/(?!({})/)'] to the Jest config",
                                esm_packages.join("|")
                            ),
                        ));
                    self.core.report(issue);
                }
            }
            _ => {}
        }

        if !ts_tests.is_empty() && !has("ts-jest") && !has("@babel/preset-typescript") {
            let command = dev_install_command(project, &["ts-jest", "@types/jest", "typescript"]);
            let issue = self
                .issue(
                    Severity::Error,
                    codes::TS_TRANSFORM_MISSING,
                    "TypeScript tests need ts-jest or a TypeScript Babel preset",
                )
                .with_details(ts_tests.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join("\n"))
                .with_remediation(RemediationStep::command("Install ts-jest", "Add the TypeScript transform", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }

        if !ts_tests.is_empty() && !root.join("tsconfig.json").is_file() {
            let issue = self
                .issue(Severity::Warning, codes::TSCONFIG_MISSING, "tsconfig.json not found")
                .with_file("tsconfig.json")
                .with_remediation(RemediationStep::file("Create tsconfig", "Add a minimal tsconfig", "tsconfig.json"));
            self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::write("tsconfig.json", DEFAULT_TSCONFIG)]);
        }

        // Test files importing ESM-only packages the manifest never declared
        for (rel, content) in read_generated(root, generated) {
            if let Some(pkg) = ESM_ONLY_PACKAGES.iter().find(|p| {
                !has(p) && (content.contains(&format!("'{p}'")) || content.contains(&format!("\"{p}\"")))
            }) {
                let command = dev_install_command(project, &[*pkg]);
                let issue = self
                    .issue(Severity::Warning, codes::MISSING_PACKAGE, format!("Test imports undeclared package {pkg}"))
                    .with_file(&rel)
                    .with_remediation(RemediationStep::command("Install package", "Add the package", &command));
                self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
            }
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

    fn healer(runner: Arc<ScriptedRunner>) -> NodeHealer {
        NodeHealer::new(HealerCore::new(
            "web",
            HealPolicy::from(&AutoFixConfig::default()),
            runner,
            TimeoutsConfig::default(),
        ))
    }

    fn codes_of(healer: &NodeHealer) -> Vec<&str> {
        healer.issues().iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{"dependencies":{"chalk":"5"}}"#).unwrap();
        std::fs::create_dir_all(temp.path().join("tests/unit")).unwrap();
        std::fs::write(temp.path().join("tests/unit/a.test.ts"), "test('a', () => {});").unwrap();

        let project = ProjectDescriptor::new("web", ".", Language::TypeScript);
        let generated = vec![PathBuf::from("tests/unit/a.test.ts")];
        let mut healer = healer(Arc::new(ScriptedRunner::new()));

        healer.analyze(&project, temp.path(), &generated).unwrap();
        let first = healer.issues().len();
        healer.analyze(&project, temp.path(), &generated).unwrap();

        assert_eq!(healer.issues().len(), first);
        assert_eq!(
            codes_of(&healer),
            vec![
                codes::NODE_DEPENDENCIES_NOT_INSTALLED,
                codes::JEST_NOT_INSTALLED,
                codes::JEST_CONFIG_MISSING,
                codes::TS_TRANSFORM_MISSING,
                codes::TSCONFIG_MISSING,
            ]
        );
    }

    #[tokio::test]
    async fn test_heal_writes_jest_config_with_esm_transform() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"type":"module","dependencies":{"node-fetch":"3"},"devDependencies":{"jest":"29"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules")).unwrap();

        let project = ProjectDescriptor::new("web", ".", Language::JavaScript);
        let runner = Arc::new(ScriptedRunner::new());
        let mut healer = healer(runner.clone());

        healer.analyze(&project, temp.path(), &[]).unwrap();
        healer.heal(temp.path()).await.unwrap();

        let config = std::fs::read_to_string(temp.path().join("jest.config.cjs")).unwrap();
        assert!(config.contains("transformIgnorePatterns: ['/node_modules/(?!(node-fetch)/)']"));
        assert!(healer.issues().iter().all(|i| i.auto_fixed));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_existing_config_without_transform_reports_esm() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"dependencies":{"nanoid":"5"},"devDependencies":{"jest":"29"}}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("jest.config.js"), "module.exports = {};").unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules")).unwrap();

        let project = ProjectDescriptor::new("web", ".", Language::JavaScript);
        let mut healer = healer(Arc::new(ScriptedRunner::new()));
        healer.analyze(&project, temp.path(), &[]).unwrap();

        assert_eq!(codes_of(&healer), vec![codes::ESM_DEPENDENCY_TRANSFORM_REQUIRED]);
        assert!(healer.issues()[0].remediation[0].description.contains("nanoid"));
    }

    #[test]
    fn test_malformed_manifest_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{ "name": "web", "#).unwrap();

        let project = ProjectDescriptor::new("web", ".", Language::JavaScript);
        let mut healer = healer(Arc::new(ScriptedRunner::new()));
        healer.analyze(&project, temp.path(), &[]).unwrap();

        assert_eq!(codes_of(&healer), vec![codes::NODE_PACKAGE_JSON_INVALID]);
        assert_eq!(healer.issues()[0].severity, Severity::Error);
        assert!(healer.issues()[0].details.is_some());
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let project = ProjectDescriptor::new("web", ".", Language::JavaScript);
        let mut healer = healer(Arc::new(ScriptedRunner::new()));
        healer.analyze(&project, temp.path(), &[]).unwrap();
        assert_eq!(codes_of(&healer), vec![codes::NODE_PACKAGE_JSON_MISSING]);
    }
}
