use grep_regex::RegexMatcher;
use grep_searcher::{Searcher, Sink, SinkMatch};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// A source-level rule enforced on every file under src/.
struct Rule {
    pattern: &'static str,
    what: &'static str,
    advice: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        what: "#[allow(dead_code)] attributes",
        advice: "Either use the code (removing the attribute) or remove it completely.",
    },
    Rule {
        pattern: r"#\s*\[\s*ignore\b",
        what: "#[ignore] test attributes",
        advice: "Fix or delete the test instead of skipping it.",
    },
    Rule {
        pattern: r"\blet\s+_\s*=",
        what: "`let _ =` discards",
        advice: "Handle the value (or its error) explicitly instead of dropping it.",
    },
];

// Collects every matching line of one file for one rule.
struct ViolationCollector<'r> {
    rule: &'r Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl<'r> ViolationCollector<'r> {
    fn new(rule: &'r Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.what,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!(
            "\n⚠️ {} are forbidden in this project.\n   {}\n",
            self.rule.what, self.rule.advice
        ));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        // Mentions inside comments are fine.
        if !line_text.trim_start().starts_with("//") {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn scan(rule: &Rule, files: &[PathBuf]) -> Vec<String> {
    let matcher = match RegexMatcher::new_line_matcher(rule.pattern) {
        Ok(matcher) => matcher,
        Err(e) => return vec![format!("Error creating regex matcher for {}: {e}", rule.what)],
    };
    let mut searcher = Searcher::new();
    let mut all_violations = Vec::new();
    for path in files {
        let mut collector = ViolationCollector::new(rule, path);
        if searcher.search_path(&matcher, path, &mut collector).is_err() {
            continue;
        }
        if let Some(error_message) = collector.check_and_get_error_message() {
            all_violations.push(error_message);
        }
    }
    all_violations
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    if std::env::var("OPTCHAIN_SKIP_LINT_CHECKS").is_ok() || std::env::var("DOCS_RS").is_ok() {
        return;
    }

    let files: Vec<PathBuf> = WalkDir::new("src")
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect();

    let all_violations: Vec<String> = RULES.iter().flat_map(|rule| scan(rule, &files)).collect();
    if !all_violations.is_empty() {
        for violation in &all_violations {
            eprintln!("{violation}");
        }
        std::process::exit(1);
    }
}
