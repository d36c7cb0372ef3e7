//! Classification of test runs that failed before a single test executed
//!
//! The table is ordered; the first matching signature names the issue. A run
//! yields exactly one issue, the generic one only when nothing matched.

use crate::autofix::{FailureSignature, classify};
use crate::model::{EnvironmentIssue, RemediationStep, Severity, Stage, codes};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static SIGNATURES: Lazy<Vec<FailureSignature>> = Lazy::new(|| {
    vec![
        FailureSignature::new(
            codes::TS_IN_UNTRANSPILED_RUNNER,
            r#"SyntaxError: \S+\.tsx?: |Unknown file extension "\.tsx?"|Support for the experimental syntax '(?:flow|typescript)'|Unexpected token ':'[\s\S]{0,200}\.tsx?"#,
            "TypeScript tests run without a TypeScript transform",
            None,
        ),
        FailureSignature::new(
            codes::ESM_MODULE_SYNTAX,
            r"Cannot use import statement outside a module|Unexpected token 'export'|require\(\) of ES Module",
            "ES module syntax reached a CommonJS test runner",
            None,
        ),
        FailureSignature::new(
            codes::MISSING_TEST_UTILITY,
            r"Cannot find module '(@testing-library/[\w-]+|supertest|jest-environment-jsdom|ts-jest|msw|nock)'|No module named '(pytest_asyncio|pytest_mock|httpx|faker|factory|freezegun|responses)'|fixture '(mocker)' not found",
            "A test utility is not installed as a dev dependency",
            None,
        ),
        FailureSignature::new(
            codes::INVALID_MOCK_PATTERN,
            r"The module factory of `jest\.mock\(\)` is not allowed to reference any out-of-scope variables|Cannot spy (?:on )?the (\S+) property because it is not a function|UnfinishedStubbingException|MissingMethodInvocationException|WrongTypeOfReturnValue",
            "A test uses an invalid mocking pattern",
            None,
        ),
        FailureSignature::new(
            codes::BUILD_COMPILE_FAILURE,
            r"COMPILATION ERROR|Compilation failed|error CS\d{4}|\[build failed\]|cannot find symbol|error TS\d{4}|compileTestJava FAILED",
            "Tests do not compile",
            None,
        ),
        FailureSignature::new(
            codes::MISSING_TEST_RUNNER,
            r"(?:jest|npx|pytest|mvn|gradle|go|dotnet): (?:command )?not found|'(?:jest|mvn|gradle|go|dotnet)' is not recognized|No module named pytest|could not determine executable to run",
            "The test runner is not installed",
            None,
        ),
    ]
});

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:error|fail(?:ed|ure)?|exception)\b|^E\s{2,}|●|^\s*--- FAIL")
        .expect("Invalid regex pattern")
});

fn remediation(code: &str, command: &str) -> RemediationStep {
    match code {
        codes::TS_IN_UNTRANSPILED_RUNNER => RemediationStep::manual(
            "Add a TypeScript transform",
            "Install ts-jest and set `preset: 'ts-jest'` in the Jest config",
        ),
        codes::ESM_MODULE_SYNTAX => RemediationStep::manual(
            "Transform ES modules",
            "Configure babel-jest or list the ESM packages in transformIgnorePatterns",
        ),
        codes::MISSING_TEST_UTILITY => RemediationStep::manual(
            "Install the test utility",
            "Add the missing package to the project's dev dependencies",
        ),
        codes::INVALID_MOCK_PATTERN => RemediationStep::manual(
            "Fix the mock",
            "Only reference variables prefixed with `mock` inside mock factories and stub real methods",
        ),
        codes::BUILD_COMPILE_FAILURE => RemediationStep::manual(
            "Fix compile errors",
            "Generated tests reference symbols that do not exist in the project",
        ),
        codes::MISSING_TEST_RUNNER => RemediationStep::manual(
            "Install the test runner",
            "Install the runner the test command invokes",
        ),
        _ => RemediationStep::command("Run the tests manually", "Inspect the full runner output", command),
    }
}

/// The single issue describing why `command` ran no tests
pub fn analyze(project: &str, test_dir: &Path, command: &str, output: &str) -> EnvironmentIssue {
    match classify(&SIGNATURES, output) {
        Some(hit) => EnvironmentIssue::new(project, Stage::Execution, Severity::Error, hit.code, hit.message)
            .with_file(test_dir)
            .with_details(hit.excerpt)
            .with_remediation(remediation(hit.code, command)),
        None => EnvironmentIssue::new(
            project,
            Stage::Execution,
            Severity::Error,
            codes::TEST_EXECUTION_FAILED,
            "Test command failed before any test ran",
        )
        .with_file(test_dir)
        .with_details(error_lines(output, 20).join("\n"))
        .with_remediation(remediation(codes::TEST_EXECUTION_FAILED, command)),
    }
}

/// Up to `max` lines that look like errors
pub fn error_lines(output: &str, max: usize) -> Vec<String> {
    output
        .lines()
        .filter(|l| ERROR_LINE.is_match(l))
        .map(|l| l.trim_end().to_string())
        .take(max)
        .collect()
}
