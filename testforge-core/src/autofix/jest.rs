//! Jest discovery profile

use super::{Classified, FailureSignature, FixContext, FixKind, FixProfile, FixResult};
use crate::errors::Result;
use crate::healer::node::{dev_install_command, default_jest_config, existing_jest_config};
use crate::healer::{Permission, RemedyAction};
use crate::model::{ProjectDescriptor, RemediationStep, codes};
use crate::runner::CommandOutput;
use crate::validator::imports::suggest_specifier;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_utils::counts;
use std::path::{Path, PathBuf};

static SIGNATURES: Lazy<Vec<FailureSignature>> = Lazy::new(|| {
    vec![
        FailureSignature::new(
            codes::JEST_RUNNER_MISSING,
            r"(?i)jest: (?:command )?not found|could not determine executable to run|'jest' is not recognized|Cannot find module '[^']*jest-cli",
            "The jest binary is not available",
            Some(FixKind::InstallRunner),
        ),
        FailureSignature::new(
            codes::RELATIVE_IMPORT_NOT_FOUND,
            r"Cannot find module '(\.{1,2}/[^']+)' from '([^']+)'",
            "A test imports a relative module that does not exist",
            Some(FixKind::RewriteImport),
        ),
        FailureSignature::new(
            codes::MISSING_PACKAGE,
            r"Cannot find module '([^'./][^']*)'",
            "A test imports a package that is not installed",
            Some(FixKind::InstallPackage),
        ),
        FailureSignature::new(
            codes::TS_SYNTAX_UNSUPPORTED,
            r"SyntaxError: (\S+\.tsx?): (?:Missing semicolon|Unexpected token|Unexpected reserved word)",
            "TypeScript test files are not transformed",
            Some(FixKind::TypeScriptTransform),
        ),
        FailureSignature::new(
            codes::ESM_SYNTAX_UNSUPPORTED,
            r"SyntaxError: (?:Cannot use import statement outside a module|Unexpected token 'export')",
            "ES module syntax is not transformed",
            Some(FixKind::EsmTransform),
        ),
        FailureSignature::new(
            codes::JEST_CONFIG_INVALID,
            r"(?i)● Validation Error|Error: Jest: Failed to parse|Multiple configurations found|Error while loading config",
            "The Jest configuration is invalid",
            None,
        ),
        FailureSignature::new(
            codes::TEST_SYNTAX_ERROR,
            r"SyntaxError: (\S+?\.[cm]?jsx?): |(\S+?\.tsx?):\d+:\d+ - error TS1\d{3}",
            "A generated test has a syntax error",
            Some(FixKind::RegenerateFile),
        ),
    ]
});

/// `@scope/pkg/sub` -> `@scope/pkg`, `pkg/sub` -> `pkg`
pub fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}

const BABEL_CONFIG_FILES: &[&str] = &["babel.config.js", "babel.config.cjs", "babel.config.json", ".babelrc"];

const BABEL_CONFIG: &str = "module.exports = {\n  presets: [['@babel/preset-env', { targets: { node: 'current' } }]],\n};\n";

fn is_module_package(root: &Path) -> bool {
    std::fs::read_to_string(root.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .is_some_and(|manifest| manifest.get("type").and_then(|t| t.as_str()) == Some("module"))
}

pub struct JestProfile;

impl JestProfile {
    async fn rewrite_import(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> Result<FixResult> {
        let Some(specifier) = failure.capture(0) else {
            return Ok(FixResult::CannotFix("no import in failure output".to_string()));
        };

        let mut actions = Vec::new();
        let mut rewritten: Vec<PathBuf> = Vec::new();
        for file in ctx.test_files {
            let Ok(content) = std::fs::read_to_string(ctx.root.join(file)) else {
                continue;
            };
            let quoted = [format!("'{specifier}'"), format!("\"{specifier}\"")];
            if !quoted.iter().any(|q| content.contains(q.as_str())) {
                continue;
            }
            let Some(corrected) = suggest_specifier(&ctx.root.join(file), specifier, ctx.root) else {
                continue;
            };
            let updated = content
                .replace(&quoted[0], &format!("'{corrected}'"))
                .replace(&quoted[1], &format!("\"{corrected}\""));
            actions.push(RemedyAction::write(file, updated));
            rewritten.push(file.clone());
        }

        if actions.is_empty() {
            return Ok(FixResult::CannotFix(format!("no module matching '{specifier}' exists")));
        }
        let listing: Vec<String> = rewritten.iter().map(|f| f.display().to_string()).collect();
        let issue = ctx
            .issue(failure)
            .with_file(&rewritten[0])
            .with_details(format!("'{specifier}' rewritten in {}", listing.join(", ")));
        Ok(ctx.remediate(issue, None, actions).await)
    }

    async fn install(
        &self,
        ctx: &mut FixContext<'_>,
        failure: &Classified,
        packages: &[&str],
        mut extra: Vec<RemedyAction>,
    ) -> FixResult {
        let command = dev_install_command(ctx.project, packages);
        let issue = ctx.issue(failure).with_remediation(RemediationStep::command(
            "Install packages",
            format!("Add {} as dev dependencies", packages.join(", ")),
            &command,
        ));
        let mut actions = vec![RemedyAction::install(command)];
        actions.append(&mut extra);
        ctx.remediate(issue, Some(Permission::InstallDependencies), actions).await
    }
}

#[async_trait]
impl FixProfile for JestProfile {
    fn name(&self) -> &'static str {
        "jest"
    }

    fn discovery_command(&self, _project: &ProjectDescriptor, _root: &Path, test_dir: &Path) -> String {
        format!("npx jest --ci {}", test_dir.to_string_lossy().replace('\\', "/"))
    }

    fn tests_discovered(&self, output: &CommandOutput) -> bool {
        counts::jest(&output.combined()).is_some_and(|c| c.run > 0)
    }

    fn signatures(&self) -> &'static [FailureSignature] {
        &SIGNATURES
    }

    async fn apply_fix(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> Result<FixResult> {
        let Some(fix) = failure.fix else {
            return Ok(FixResult::CannotFix(format!("no handler for {}", failure.code)));
        };

        let result = match fix {
            FixKind::InstallRunner => self.install(ctx, failure, &["jest", "@types/jest"], Vec::new()).await,
            FixKind::RewriteImport => return self.rewrite_import(ctx, failure).await,
            FixKind::InstallPackage => {
                let Some(specifier) = failure.capture(0) else {
                    return Ok(FixResult::CannotFix("no package in failure output".to_string()));
                };
                let package = package_name(specifier).to_string();
                self.install(ctx, failure, &[package.as_str()], Vec::new()).await
            }
            FixKind::TypeScriptTransform => {
                let mut extra = Vec::new();
                match existing_jest_config(ctx.root) {
                    None => extra.push(RemedyAction::write(
                        if is_module_package(ctx.root) { "jest.config.cjs" } else { "jest.config.js" },
                        default_jest_config(true, &[]),
                    )),
                    Some(path) => {
                        let text = std::fs::read_to_string(&path).unwrap_or_default();
                        if !text.contains("ts-jest") {
                            return Ok(FixResult::CannotFix(format!(
                                "{} exists but does not use ts-jest",
                                path.display()
                            )));
                        }
                    }
                }
                self.install(ctx, failure, &["ts-jest", "typescript", "@types/jest"], extra).await
            }
            FixKind::EsmTransform => {
                if failure.excerpt.contains("node_modules") {
                    return Ok(FixResult::CannotFix(
                        "an ES module dependency needs transformIgnorePatterns in the Jest config".to_string(),
                    ));
                }
                let mut extra = Vec::new();
                if !BABEL_CONFIG_FILES.iter().any(|f| ctx.root.join(f).is_file()) {
                    let file = if is_module_package(ctx.root) { "babel.config.cjs" } else { "babel.config.js" };
                    extra.push(RemedyAction::write(file, BABEL_CONFIG));
                }
                self.install(ctx, failure, &["babel-jest", "@babel/core", "@babel/preset-env"], extra).await
            }
            FixKind::RegenerateFile => {
                let Some(file) = failure.capture(0).and_then(|f| ctx.test_file(f)) else {
                    return Ok(FixResult::CannotFix("syntax error outside the generated tests".to_string()));
                };
                return ctx.regenerate(failure, &file, None).await;
            }
            other => FixResult::CannotFix(format!("{other:?} does not apply to jest")),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofix::{AutoFixLoop, LoopOutcome, LoopState, classify};
    use crate::config::Config;
    use crate::healer::EnvironmentHealer;
    use crate::healer::{HealPolicy, HealerCore, node::NodeHealer};
    use crate::model::Language;
    use crate::testing::{ScriptedRunner, StubGenerator};
    use std::sync::Arc;
    use tempfile::TempDir;

    const PASSED: &str = "PASS tests/unit/cart.test.js\nTests:       2 passed, 2 total\nTime: 0.5 s";

    fn node_project(root: &Path) {
        std::fs::write(root.join("package.json"), r#"{"devDependencies":{"jest":"29"}}"#).unwrap();
        std::fs::write(root.join("jest.config.js"), "module.exports = {};\n").unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::create_dir_all(root.join("tests/unit")).unwrap();
    }

    fn healer(runner: Arc<ScriptedRunner>, config: &Config) -> NodeHealer {
        NodeHealer::new(HealerCore::new(
            "web",
            HealPolicy::from(&config.auto_fix),
            runner,
            config.timeouts.clone(),
        ))
    }

    async fn run_loop(
        root: &Path,
        runner: Arc<ScriptedRunner>,
        config: &Config,
        files: &[PathBuf],
    ) -> (LoopOutcome, NodeHealer) {
        let project = ProjectDescriptor::new("web", ".", Language::JavaScript);
        let generator = StubGenerator::new();
        let mut healer = healer(runner.clone(), config);
        let test_dir = PathBuf::from("tests/unit");
        let mut ctx = FixContext {
            project: &project,
            root,
            test_dir: &test_dir,
            test_files: files,
            healer: &mut healer,
            generator: &generator,
            config,
        };
        let outcome =
            AutoFixLoop::new(&JestProfile, runner.as_ref(), config.auto_fix.max_iterations).run(&mut ctx).await;
        (outcome, healer)
    }

    #[test]
    fn test_classify_fixtures() {
        let table = JestProfile.signatures();
        let relative = "FAIL tests/unit/cart.test.js\n  ● Test suite failed to run\n\n    Cannot find module '../cart' from 'tests/unit/cart.test.js'";
        let hit = classify(table, relative).unwrap();
        assert_eq!(hit.code, codes::RELATIVE_IMPORT_NOT_FOUND);
        assert_eq!(hit.captures, vec!["../cart", "tests/unit/cart.test.js"]);

        let package = "Cannot find module 'supertest' from 'tests/unit/api.test.js'";
        assert_eq!(classify(table, package).unwrap().code, codes::MISSING_PACKAGE);

        let ts = "SyntaxError: /app/tests/unit/cart.test.ts: Missing semicolon. (3:9)";
        assert_eq!(classify(table, ts).unwrap().code, codes::TS_SYNTAX_UNSUPPORTED);

        let esm = "Jest encountered an unexpected token\n    SyntaxError: Cannot use import statement outside a module";
        assert_eq!(classify(table, esm).unwrap().code, codes::ESM_SYNTAX_UNSUPPORTED);

        let broken = "SyntaxError: /app/tests/unit/a.test.js: Unexpected token (4:2)";
        let hit = classify(table, broken).unwrap();
        assert_eq!(hit.code, codes::TEST_SYNTAX_ERROR);
        assert_eq!(hit.capture(0), Some("/app/tests/unit/a.test.js"));

        assert_eq!(classify(table, "sh: 1: jest: not found").unwrap().code, codes::JEST_RUNNER_MISSING);
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("lodash/fp"), "lodash");
        assert_eq!(package_name("@testing-library/react/pure"), "@testing-library/react");
        assert_eq!(package_name("@scope"), "@scope");
    }

    #[tokio::test]
    async fn test_no_handler_is_hard_blocker_after_one_iteration() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        let runner = Arc::new(
            ScriptedRunner::new().on("npx jest", CommandOutput::new(1, "", "● Validation Error:\n\n  Unknown option \"tesMatch\"")),
        );
        let config = Config::default();

        let (outcome, healer) = run_loop(temp.path(), runner.clone(), &config, &[]).await;

        assert_eq!(outcome.terminal, LoopState::HardBlocker);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(runner.count("npx jest"), 1);
        let issue = healer.issues().iter().find(|i| i.code == codes::JEST_CONFIG_INVALID).unwrap();
        assert!(!issue.auto_fixed);
    }

    #[tokio::test]
    async fn test_missing_package_installed_then_success() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        let runner = Arc::new(ScriptedRunner::new().on_sequence("npx jest", vec![
            CommandOutput::new(1, "", "Cannot find module 'supertest' from 'tests/unit/api.test.js'"),
            CommandOutput::new(0, "", PASSED),
        ]));
        let config = Config::default();

        let (outcome, healer) = run_loop(temp.path(), runner.clone(), &config, &[]).await;

        assert_eq!(outcome.terminal, LoopState::Success);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(runner.count("npm install --save-dev supertest"), 1);
        let issue = healer.issues().iter().find(|i| i.code == codes::MISSING_PACKAGE).unwrap();
        assert!(issue.auto_fixed);
        assert!(healer.actions().iter().any(|a| a.success && a.command.contains("supertest")));
    }

    #[tokio::test]
    async fn test_loop_stops_at_iteration_budget() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        let failures: Vec<CommandOutput> = (0..10)
            .map(|n| CommandOutput::new(1, "", format!("Cannot find module 'pkg{n}' from 'tests/unit/a.test.js'")))
            .collect();
        let runner = Arc::new(ScriptedRunner::new().on_sequence("npx jest", failures));
        let mut config = Config::default();
        config.auto_fix.max_iterations = 3;

        let (outcome, _) = run_loop(temp.path(), runner.clone(), &config, &[]).await;

        assert_eq!(outcome.terminal, LoopState::Exhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(runner.count("npx jest"), 3);
    }

    #[tokio::test]
    async fn test_repeated_failure_is_hard_blocker() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("npx jest", CommandOutput::new(1, "", "Cannot find module 'left-pad' from 'tests/unit/a.test.js'")),
        );
        let config = Config::default();

        let (outcome, _) = run_loop(temp.path(), runner.clone(), &config, &[]).await;

        assert_eq!(outcome.terminal, LoopState::HardBlocker);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(runner.count("npm install --save-dev left-pad"), 1);
    }

    #[tokio::test]
    async fn test_relative_import_rewritten_across_tests() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/cart.js"), "module.exports = {};\n").unwrap();
        let files = vec![PathBuf::from("tests/unit/cart.test.js"), PathBuf::from("tests/unit/total.test.js")];
        for file in &files {
            std::fs::write(temp.path().join(file), "const cart = require('../cart');\n").unwrap();
        }
        let runner = Arc::new(ScriptedRunner::new().on_sequence("npx jest", vec![
            CommandOutput::new(1, "", "Cannot find module '../cart' from 'tests/unit/cart.test.js'"),
            CommandOutput::new(1, "", PASSED),
        ]));
        let config = Config::default();

        let (outcome, healer) = run_loop(temp.path(), runner, &config, &files).await;

        assert_eq!(outcome.terminal, LoopState::Success);
        for file in &files {
            let content = std::fs::read_to_string(temp.path().join(file)).unwrap();
            assert_eq!(content, "const cart = require('../../src/cart');\n");
        }
        assert!(healer.issues().iter().any(|i| i.code == codes::RELATIVE_IMPORT_NOT_FOUND && i.auto_fixed));
    }

    #[tokio::test]
    async fn test_timeout_is_hard_blocker() {
        let temp = TempDir::new().unwrap();
        node_project(temp.path());
        let runner = Arc::new(ScriptedRunner::new().on_timeout("npx jest"));
        let config = Config::default();

        let (outcome, healer) = run_loop(temp.path(), runner, &config, &[]).await;

        assert_eq!(outcome.terminal, LoopState::HardBlocker);
        assert_eq!(healer.issues()[0].code, codes::AUTOFIX_TIMEOUT);
    }
}
