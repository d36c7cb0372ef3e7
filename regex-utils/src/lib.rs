//! Regex utilities for testforge
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Module-reference extraction for generated test sources
pub mod imports {
    use super::*;

    /// ES-style `... from './x'` clauses
    pub static ES_FROM: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"\bfrom\s+(['"])([^'"\n]+)['"]"#).expect("Invalid regex pattern")
    });

    /// Side-effect imports such as `import './setup'`
    pub static ES_BARE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?m)^\s*import\s+(['"])([^'"\n]+)['"]"#).expect("Invalid regex pattern")
    });

    /// Call-style references: `require('./x')`, `import('./x')`, `jest.mock('./x')`
    pub static CALL_FORM: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"\b(?:require|import|jest\.mock|vi\.mock)\s*\(\s*(['"])([^'"\n]+)['"]"#)
            .expect("Invalid regex pattern")
    });

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ImportForm {
        EsModule,
        Call,
    }

    /// A quoted module reference found in source text
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ImportRef {
        pub specifier: String,
        pub quote: char,
        /// Byte offset of the specifier (inside the quotes)
        pub offset: usize,
        /// 1-based line number
        pub line: usize,
        pub form: ImportForm,
    }

    /// Extract every quoted module reference, ordered by position
    pub fn extract(content: &str) -> Vec<ImportRef> {
        let mut refs = Vec::new();

        let sources: [(&Lazy<Regex>, ImportForm); 3] = [
            (&ES_FROM, ImportForm::EsModule),
            (&ES_BARE, ImportForm::EsModule),
            (&CALL_FORM, ImportForm::Call),
        ];

        for (pattern, form) in sources {
            for caps in pattern.captures_iter(content) {
                let (Some(quote), Some(spec)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                if refs.iter().any(|r: &ImportRef| r.offset == spec.start()) {
                    continue;
                }
                refs.push(ImportRef {
                    specifier: spec.as_str().to_string(),
                    quote: quote.as_str().chars().next().unwrap_or('\''),
                    offset: spec.start(),
                    line: content[..spec.start()].matches('\n').count() + 1,
                    form,
                });
            }
        }

        refs.sort_by_key(|r| r.offset);
        refs
    }

    /// Relative references point into the project; everything else is a package
    pub fn is_relative(specifier: &str) -> bool {
        specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
    }
}

/// Pass/fail count parsing for test runner output
pub mod counts {
    use super::*;

    /// Tests executed by one runner invocation
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TestCounts {
        pub run: u32,
        pub passed: u32,
        pub failed: u32,
        pub skipped: u32,
    }

    static JEST_SUMMARY: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)^Tests:\s+(.*?)(\d+) total").expect("Invalid regex pattern")
    });

    static COUNT_ITEM: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\d+) (passed|failed|skipped|todo|errors?|xfailed|xpassed|deselected)")
            .expect("Invalid regex pattern")
    });

    static PYTEST_SUMMARY: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)^=*\s*((?:\d+ \w+,? ?)+) in [\d.]+s").expect("Invalid regex pattern")
    });

    static PYTEST_NONE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)no tests ran in [\d.]+s|collected 0 items").expect("Invalid regex pattern")
    });

    static GO_RESULT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)^\s*--- (PASS|FAIL|SKIP):").expect("Invalid regex pattern")
    });

    static GO_NO_FILES: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\[no test files\]").expect("Invalid regex pattern")
    });

    static SUREFIRE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)")
            .expect("Invalid regex pattern")
    });

    static GRADLE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\d+) tests? completed, (\d+) failed(?:, (\d+) skipped)?")
            .expect("Invalid regex pattern")
    });

    static DOTNET: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?:Passed|Failed)!\s+-\s+Failed:\s+(\d+),\s+Passed:\s+(\d+),\s+Skipped:\s+(\d+),\s+Total:\s+(\d+)",
        )
        .expect("Invalid regex pattern")
    });

    fn num(caps: &regex::Captures<'_>, idx: usize) -> u32 {
        caps.get(idx).and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
    }

    /// `Tests:       1 failed, 2 passed, 3 total`
    pub fn jest(output: &str) -> Option<TestCounts> {
        let caps = JEST_SUMMARY.captures_iter(output).last()?;
        let mut counts = TestCounts::default();

        for item in COUNT_ITEM.captures_iter(caps.get(1).map_or("", |m| m.as_str())) {
            let n = num(&item, 1);
            match &item[2] {
                "passed" => counts.passed += n,
                "failed" => counts.failed += n,
                "skipped" | "todo" => counts.skipped += n,
                _ => {}
            }
        }

        counts.run = counts.passed + counts.failed;
        Some(counts)
    }

    /// `3 passed, 1 failed, 1 error in 0.12s`
    pub fn pytest(output: &str) -> Option<TestCounts> {
        let Some(caps) = PYTEST_SUMMARY.captures_iter(output).last() else {
            return PYTEST_NONE.is_match(output).then(TestCounts::default);
        };
        let mut counts = TestCounts::default();

        for item in COUNT_ITEM.captures_iter(&caps[1]) {
            let n = num(&item, 1);
            match &item[2] {
                "passed" | "xpassed" => counts.passed += n,
                "failed" | "error" | "errors" => counts.failed += n,
                "skipped" | "xfailed" | "deselected" => counts.skipped += n,
                _ => {}
            }
        }

        counts.run = counts.passed + counts.failed;
        Some(counts)
    }

    /// Counts `--- PASS:` / `--- FAIL:` lines from `go test -v`
    pub fn go(output: &str) -> Option<TestCounts> {
        let mut counts = TestCounts::default();
        let mut seen = false;

        for caps in GO_RESULT.captures_iter(output) {
            seen = true;
            match &caps[1] {
                "PASS" => counts.passed += 1,
                "FAIL" => counts.failed += 1,
                _ => counts.skipped += 1,
            }
        }

        if !seen && !GO_NO_FILES.is_match(output) {
            return None;
        }

        counts.run = counts.passed + counts.failed;
        Some(counts)
    }

    /// Maven Surefire/Failsafe; the last line is the aggregate
    pub fn maven(output: &str) -> Option<TestCounts> {
        let caps = SUREFIRE.captures_iter(output).last()?;
        let total = num(&caps, 1);
        let failed = num(&caps, 2) + num(&caps, 3);
        let skipped = num(&caps, 4);
        let run = total.saturating_sub(skipped);

        Some(TestCounts { run, passed: run.saturating_sub(failed), failed, skipped })
    }

    /// Gradle only prints counts when something failed
    pub fn gradle(output: &str) -> Option<TestCounts> {
        let caps = GRADLE.captures_iter(output).last()?;
        let completed = num(&caps, 1);
        let failed = num(&caps, 2);
        let skipped = num(&caps, 3);
        let run = completed.saturating_sub(skipped);

        Some(TestCounts { run, passed: run.saturating_sub(failed), failed, skipped })
    }

    /// `dotnet test`; one summary line per test project, summed
    pub fn dotnet(output: &str) -> Option<TestCounts> {
        let mut counts = TestCounts::default();
        let mut seen = false;

        for caps in DOTNET.captures_iter(output) {
            seen = true;
            counts.failed += num(&caps, 1);
            counts.passed += num(&caps, 2);
            counts.skipped += num(&caps, 3);
        }

        if !seen {
            return None;
        }

        counts.run = counts.passed + counts.failed;
        Some(counts)
    }

    /// Dispatch by runner name as reported by the ecosystem adapter
    pub fn for_runner(runner: &str, output: &str) -> Option<TestCounts> {
        match runner {
            "jest" => jest(output),
            "pytest" => pytest(output),
            "go" => go(output),
            "maven" => maven(output),
            "gradle" => gradle(output),
            "dotnet" => dotnet(output),
            _ => None,
        }
    }
}
