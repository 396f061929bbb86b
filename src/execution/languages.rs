//! Language registry for sandboxed builds and runs.
//!
//! Each language maps to a base runtime image, the file name the source is
//! materialised as, and the command that builds (if needed) and runs it
//! inside the sandbox with `input.txt` on stdin.

use std::collections::HashMap;
use std::path::Path;

use crate::error::JudgeError;

/// Exit code reserved for build-step failures.
///
/// The combined command exits with this code when the compiler fails, so a
/// compile error can be told apart from a program that crashes at runtime.
pub const BUILD_FAILURE_EXIT_CODE: i64 = 97;

/// Line written to stderr by the combined command when the build step fails.
///
/// A program may itself exit with [`BUILD_FAILURE_EXIT_CODE`]; only the exit
/// code together with this marker means the build failed.
pub const BUILD_FAILURE_MARKER: &str = "__ELITECODE_BUILD_FAILED__";

/// File name the test input is written to inside the sandbox.
pub const INPUT_FILE_NAME: &str = "input.txt";

/// Working directory of every sandboxed run.
pub const WORKSPACE_DIR: &str = "/workspace";

/// How one language is built and executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Canonical language name (e.g. "cpp").
    pub name: String,
    /// Base runtime image (e.g. "gcc:13").
    pub image: String,
    /// File name the source code is written to.
    pub source_file: String,
    /// Shell command compiling the source, if the language needs one.
    pub build_command: Option<String>,
    /// Shell command running the program; stdin is redirected from the input file.
    pub run_command: String,
    /// Source file extensions used for auto-detection.
    pub extensions: Vec<String>,
}

impl LanguageSpec {
    /// Creates an interpreted language spec with no build step.
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        source_file: impl Into<String>,
        run_command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            source_file: source_file.into(),
            build_command: None,
            run_command: run_command.into(),
            extensions: Vec::new(),
        }
    }

    /// Sets the build command.
    pub fn with_build(mut self, build_command: impl Into<String>) -> Self {
        self.build_command = Some(build_command.into());
        self
    }

    /// Sets the file extensions recognised for this language.
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Whether the language compiles before running.
    pub fn has_build_step(&self) -> bool {
        self.build_command.is_some()
    }

    /// Combined build+run command line, as passed to `sh -c`.
    pub fn shell_command(&self) -> String {
        let run = format!("{} < {}", self.run_command, INPUT_FILE_NAME);
        match &self.build_command {
            Some(build) => format!(
                "{build} || {{ echo {BUILD_FAILURE_MARKER} >&2; exit {BUILD_FAILURE_EXIT_CODE}; }}; {run}"
            ),
            None => run,
        }
    }

    /// Container command vector.
    pub fn command(&self) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.shell_command()]
    }
}

/// Registry of languages the sandbox knows how to run.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageSpec>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the platform's built-in languages.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            LanguageSpec::new("c", "gcc:13", "main.c", "./main")
                .with_build("gcc -O2 -std=c17 -o main main.c -lm")
                .with_extensions(&["c"]),
        );
        registry.register(
            LanguageSpec::new("cpp", "gcc:13", "main.cpp", "./main")
                .with_build("g++ -O2 -std=c++17 -o main main.cpp")
                .with_extensions(&["cpp", "cc", "cxx"]),
        );
        registry.register(
            LanguageSpec::new("python", "python:3.12-slim", "main.py", "python3 main.py")
                .with_extensions(&["py"]),
        );
        registry.register(
            LanguageSpec::new("java", "eclipse-temurin:21-jdk", "Main.java", "java Main")
                .with_build("javac Main.java")
                .with_extensions(&["java"]),
        );
        registry.register(
            LanguageSpec::new("javascript", "node:20-slim", "main.js", "node main.js")
                .with_extensions(&["js", "mjs"]),
        );
        registry.register(
            LanguageSpec::new("go", "golang:1.22", "main.go", "./main")
                .with_build("GOCACHE=/tmp/gocache go build -o main main.go")
                .with_extensions(&["go"]),
        );
        registry.register(
            LanguageSpec::new("rust", "rust:1.79-slim", "main.rs", "./main")
                .with_build("rustc -O -o main main.rs")
                .with_extensions(&["rs"]),
        );

        registry.alias("c++", "cpp");
        registry.alias("py", "python");
        registry.alias("python3", "python");
        registry.alias("js", "javascript");
        registry.alias("node", "javascript");
        registry.alias("golang", "go");
        registry.alias("rs", "rust");

        registry
    }

    /// Adds or replaces a language.
    pub fn register(&mut self, spec: LanguageSpec) {
        self.languages.insert(spec.name.clone(), spec);
    }

    /// Registers an alternative name for a language.
    pub fn alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.to_ascii_lowercase(), canonical.to_string());
    }

    /// Resolves a language identifier (case-insensitive, aliases allowed).
    pub fn resolve(&self, language: &str) -> Result<&LanguageSpec, JudgeError> {
        let key = language.trim().to_ascii_lowercase();
        let canonical = self.aliases.get(&key).unwrap_or(&key);
        self.languages
            .get(canonical)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language.to_string()))
    }

    /// Detects the language of a source file from its extension.
    pub fn detect(&self, path: &Path) -> Option<&LanguageSpec> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.languages
            .values()
            .find(|spec| spec.extensions.iter().any(|e| *e == ext))
    }

    /// Canonical names of all registered languages, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.languages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
