//! Test generation collaborator
//!
//! Produces candidate `(path, content)` pairs per project and category. Output
//! is untrusted: everything returned here goes through the artifact validator
//! before it touches the project tree.

use crate::adapter::EcosystemAdapter;
use crate::analysis::is_ignored_dir;
use crate::config::GenerationConfig;
use crate::errors::{Result, TestForgeError};
use crate::model::{Language, ProjectDescriptor, TestCategory};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A generated test file, path relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub content: String,
    pub category: TestCategory,
}

pub struct GenerationRequest<'a> {
    pub project: &'a ProjectDescriptor,
    pub root: &'a Path,
    pub categories: &'a [TestCategory],
    pub adapter: &'a dyn EcosystemAdapter,
}

/// Ask for a replacement of one broken test file
pub struct RegenerationRequest<'a> {
    pub project: &'a ProjectDescriptor,
    pub root: &'a Path,
    pub file: &'a Path,
    pub current_content: &'a str,
    pub error: &'a str,
    /// Extra source the model needs, such as a failing model definition
    pub context: Option<&'a str>,
}

#[async_trait]
pub trait TestGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<CandidateFile>>;

    /// Full replacement content for a single file
    async fn regenerate(&self, request: &RegenerationRequest<'_>) -> Result<String>;
}

/// Generates nothing; existing tests are still healed and run
#[derive(Debug, Clone, Default)]
pub struct NoopGenerator;

#[async_trait]
impl TestGenerator for NoopGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<CandidateFile>> {
        debug!("Generation disabled for {}", request.project.name);
        Ok(Vec::new())
    }

    async fn regenerate(&self, request: &RegenerationRequest<'_>) -> Result<String> {
        Err(TestForgeError::generation(&request.project.name, "generation is disabled"))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions generator
pub struct LlmTestGenerator {
    client: Client,
    config: GenerationConfig,
}

impl LlmTestGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TestForgeError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn chat_completion(&self, project: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| TestForgeError::generation(project, "no API key configured"))?;

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TestForgeError::generation(project, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TestForgeError::generation(project, format!("API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TestForgeError::generation(project, format!("bad response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TestForgeError::generation(project, "empty completion"))
    }

    /// Bounded sample of non-test source files
    fn sample_sources(&self, project: &ProjectDescriptor, root: &Path) -> Vec<(PathBuf, String)> {
        let extensions = source_extensions(project.language);
        let mut sources = Vec::new();
        let mut total = 0usize;

        let walker = WalkDir::new(root)
            .max_depth(8)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored_dir(e.file_name())));

        for entry in walker.filter_map(|e| e.ok()) {
            if sources.len() >= self.config.max_source_files {
                break;
            }
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            if !entry.file_type().is_file() || !extensions.contains(&ext) || looks_like_test(path) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(path) else { continue };
            if total + content.len() > self.config.max_source_bytes {
                continue;
            }
            total += content.len();
            let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            sources.push((rel, content));
        }

        sources
    }
}

#[async_trait]
impl TestGenerator for LlmTestGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<CandidateFile>> {
        let project = request.project;
        let sources = self.sample_sources(project, request.root);
        if sources.is_empty() {
            warn!("No source files sampled for {}", project.name);
            return Ok(Vec::new());
        }

        let mut source_block = String::new();
        for (path, content) in &sources {
            source_block.push_str(&format!("--- {} ---\n{}\n", path.display(), content));
        }

        let mut candidates = Vec::new();
        for &category in request.categories {
            let test_dir = request.adapter.test_dir(project, category);
            let prompt = format!(
                "Write {category} tests for the {lang} project `{name}` using {framework}.\n\
                 Place every file under `{dir}`. Start each fenced code block with a \
                 comment line `filename: <path relative to project root>`.\n\
                 Only import modules that exist in the sources below.\n\n{source_block}",
                lang = project.language,
                name = project.name,
                framework = project.test_framework.as_deref().unwrap_or("the default test runner"),
                dir = test_dir.display(),
            );

            let response = self
                .chat_completion(
                    &project.name,
                    vec![
                        ChatMessage::system("You write runnable automated tests. Reply with code blocks only."),
                        ChatMessage::user(prompt),
                    ],
                )
                .await?;

            let files = extract_candidates(&response, category, &test_dir, project.language);
            info!("Generated {} {} test file(s) for {}", files.len(), category, project.name);
            candidates.extend(files);
        }

        Ok(candidates)
    }

    async fn regenerate(&self, request: &RegenerationRequest<'_>) -> Result<String> {
        let mut prompt = format!(
            "The test file `{}` fails with:\n\n{}\n\nCurrent content:\n```\n{}\n```\n",
            request.file.display(),
            request.error,
            request.current_content
        );
        if let Some(context) = request.context {
            prompt.push_str(&format!("\nRelevant source:\n```\n{context}\n```\n"));
        }
        prompt.push_str("\nReturn the complete corrected file in one code block.");

        let response = self
            .chat_completion(
                &request.project.name,
                vec![
                    ChatMessage::system("You repair broken automated tests. Reply with code only."),
                    ChatMessage::user(prompt),
                ],
            )
            .await?;

        let content = first_code_block(&response).unwrap_or_else(|| response.trim().to_string());
        if content.is_empty() {
            return Err(TestForgeError::generation(&request.project.name, "empty regeneration"));
        }
        Ok(content)
    }
}

fn source_extensions(language: Language) -> &'static [&'static str] {
    match language {
        Language::TypeScript => &["ts", "tsx", "js", "jsx"],
        Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
        Language::Python => &["py"],
        Language::Java => &["java"],
        Language::Go => &["go"],
        Language::CSharp => &["cs"],
    }
}

fn default_extension(language: Language) -> &'static str {
    match language {
        Language::TypeScript => "test.ts",
        Language::JavaScript => "test.js",
        Language::Python => "py",
        Language::Java => "java",
        Language::Go => "go",
        Language::CSharp => "cs",
    }
}

fn looks_like_test(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with("test_")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.ends_with("_test.py")
        || name.ends_with("_test.go")
        || name.ends_with("Test.java")
        || name.ends_with("Tests.cs")
        || path.components().any(|c| matches!(c.as_os_str().to_str(), Some("tests" | "test" | "__tests__")))
}

/// Relative, non-escaping paths only
fn sanitize_path(raw: &str) -> Option<PathBuf> {
    let path = PathBuf::from(raw.trim().trim_matches('`'));
    if path.as_os_str().is_empty() {
        return None;
    }
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)).then_some(path)
}

fn header_path(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let body = trimmed.strip_prefix("//").or_else(|| trimmed.strip_prefix('#'))?.trim();
    body.strip_prefix("filename:").or_else(|| body.strip_prefix("file:")).map(str::trim)
}

/// Split a completion into candidate files.
///
/// Blocks whose first line is a `// filename:` or `# filename:` header take
/// that path; others are numbered under `test_dir`.
pub fn extract_candidates(
    response: &str,
    category: TestCategory,
    test_dir: &Path,
    language: Language,
) -> Vec<CandidateFile> {
    let mut files = Vec::new();
    let mut in_block = false;
    let mut code = String::new();
    let mut path: Option<PathBuf> = None;

    for line in response.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                if !code.trim().is_empty() {
                    let n = files.len() + 1;
                    let path = path.take().unwrap_or_else(|| {
                        let stem = match language {
                            Language::Java => format!("Generated{n}Test"),
                            Language::CSharp => format!("Generated{n}Tests"),
                            Language::Go => format!("generated{n}_test"),
                            _ => format!("test_generated_{category}_{n}"),
                        };
                        test_dir.join(format!("{stem}.{}", default_extension(language)))
                    });
                    files.push(CandidateFile { path, content: std::mem::take(&mut code), category });
                }
                code.clear();
                path = None;
                in_block = false;
            } else {
                in_block = true;
            }
            continue;
        }

        if in_block {
            if code.is_empty() && path.is_none() {
                if let Some(raw) = header_path(line) {
                    path = sanitize_path(raw);
                    continue;
                }
            }
            code.push_str(line);
            code.push('\n');
        }
    }

    files
}

fn first_code_block(response: &str) -> Option<String> {
    let start = response.find("```")?;
    let after = &response[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    let block: String = body[..end]
        .lines()
        .enumerate()
        .filter(|(i, l)| !(*i == 0 && header_path(l).is_some()))
        .map(|(_, l)| format!("{l}\n"))
        .collect();
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_with_headers() {
        let response = "Here you go:\n\
            ```ts\n// filename: tests/unit/math.test.ts\nimport { add } from '../../src/math';\ntest('adds', () => {});\n```\n\
            ```python\n# filename: tests/unit/test_math.py\nassert True\n```\n";

        let files = extract_candidates(response, TestCategory::Unit, Path::new("tests/unit"), Language::TypeScript);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("tests/unit/math.test.ts"));
        assert!(files[0].content.starts_with("import { add }"));
        assert_eq!(files[1].path, PathBuf::from("tests/unit/test_math.py"));
    }

    #[test]
    fn test_extract_without_header_uses_test_dir() {
        let response = "```\nassert 1 == 1\n```";
        let files = extract_candidates(response, TestCategory::E2e, Path::new("tests/e2e"), Language::Python);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("tests/e2e/test_generated_e2e_1.py"));
        assert_eq!(files[0].category, TestCategory::E2e);
    }

    #[test]
    fn test_escaping_header_is_ignored() {
        let response = "```\n// filename: ../../etc/passwd\nconsole.log(1)\n```";
        let files = extract_candidates(response, TestCategory::Unit, Path::new("tests/unit"), Language::JavaScript);
        assert_eq!(files[0].path, PathBuf::from("tests/unit/test_generated_unit_1.test.js"));
    }

    #[test]
    fn test_first_code_block() {
        let response = "Fixed:\n```python\n# filename: tests/test_a.py\nimport os\n```\ntrailing";
        assert_eq!(first_code_block(response).unwrap(), "import os\n");
        assert!(first_code_block("no code").is_none());
    }

    #[test]
    fn test_sample_sources_in_root_named_like_build_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("build");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        std::fs::write(root.join("src/cart.py"), "def total():\n    return 0\n").unwrap();
        std::fs::write(root.join("node_modules/left-pad/index.py"), "x = 1\n").unwrap();

        let generator = LlmTestGenerator::new(GenerationConfig::default()).unwrap();
        let project = ProjectDescriptor::new("build", "build", Language::Python);
        let sources = generator.sample_sources(&project, &root);

        let paths: Vec<PathBuf> = sources.into_iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec![PathBuf::from("src/cart.py")]);
    }

    #[test]
    fn test_looks_like_test() {
        assert!(looks_like_test(Path::new("src/app.test.ts")));
        assert!(looks_like_test(Path::new("tests/helpers.py")));
        assert!(!looks_like_test(Path::new("src/app.ts")));
    }
}
