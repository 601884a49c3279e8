use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Closed set of languages the splitter and index understand.
///
/// Unknown suffixes map to [`Language::Plain`]; the suffix table below is
/// data, not logic, so a new language never touches the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Python,
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    Rust,
    Cpp,
    C,
    Markdown,
    Json,
    Yaml,
    Xml,
    Html,
    Css,
    Sql,
    Shell,
    #[default]
    Plain,
}

/// Suffix → language table. Compared against the lower-cased path suffix.
const SUFFIX_TABLE: &[(&str, Language)] = &[
    (".go", Language::Go),
    (".py", Language::Python),
    (".js", Language::JavaScript),
    (".mjs", Language::JavaScript),
    (".jsx", Language::JavaScript),
    (".ts", Language::TypeScript),
    (".tsx", Language::TypeScript),
    (".java", Language::Java),
    (".cs", Language::CSharp),
    (".rs", Language::Rust),
    (".cpp", Language::Cpp),
    (".cc", Language::Cpp),
    (".cxx", Language::Cpp),
    (".hpp", Language::Cpp),
    (".c", Language::C),
    (".h", Language::C),
    (".md", Language::Markdown),
    (".markdown", Language::Markdown),
    (".json", Language::Json),
    (".yaml", Language::Yaml),
    (".yml", Language::Yaml),
    (".xml", Language::Xml),
    (".html", Language::Html),
    (".htm", Language::Html),
    (".css", Language::Css),
    (".sql", Language::Sql),
    (".sh", Language::Shell),
    (".bash", Language::Shell),
    (".zsh", Language::Shell),
    (".txt", Language::Plain),
];

impl Language {
    /// Pure function of the lower-cased path suffix.
    pub fn deduce(path: &str) -> Language {
        let lower = path.to_lowercase();
        for (suffix, lang) in SUFFIX_TABLE {
            if lower.ends_with(suffix) {
                return *lang;
            }
        }
        Language::Plain
    }

    /// Wire-format tag stored in chunk metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Rust => "rust",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Xml => "xml",
            Language::Html => "html",
            Language::Css => "css",
            Language::Sql => "sql",
            Language::Shell => "shell",
            Language::Plain => "plain",
        }
    }

    /// Whether `line` begins a top-level declaration the splitter prefers to
    /// cut at. Pure and side-effect-free.
    pub fn is_boundary(&self, line: &str) -> bool {
        match self {
            Language::Markdown => line.starts_with('#'),
            Language::Go
            | Language::Java
            | Language::JavaScript
            | Language::TypeScript
            | Language::CSharp
            | Language::Rust
            | Language::C
            | Language::Cpp => is_declaration_line(line),
            Language::Python => is_python_declaration_line(line),
            _ => false,
        }
    }
}

fn decl_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            // Go/Rust/JS/TS: func Foo, fn foo, function foo, class Foo, struct X, impl Y, interface Z, enum W
            Regex::new(r"^(function|class|func|fn|struct|impl|trait|interface|enum|type)\s+[A-Za-z0-9_]").unwrap(),
            // Java/C#: [modifiers] class/interface/enum/record Name
            Regex::new(r"^(?:public|private|protected|internal|abstract|final|sealed|static)\s+(?:\w+\s+)*?(class|interface|enum|record|struct)\s+[A-Za-z0-9_]").unwrap(),
            // Rust with visibility: pub fn, pub(crate) struct, pub async fn ...
            Regex::new(r"^pub(?:\([^)]*\))?\s+(?:async\s+|unsafe\s+)*(fn|struct|enum|trait|mod|type)\s+[A-Za-z0-9_]").unwrap(),
            // Exported JS/TS: export [default] function/class/const
            Regex::new(r"^export\s+(?:default\s+)?(function|class|const|interface|enum|type)\b").unwrap(),
        ]
    })
}

fn is_declaration_line(line: &str) -> bool {
    // Cheap prefilter to avoid regex cost on most lines.
    let t = line.trim_start();
    if t.is_empty() {
        return false;
    }
    if !(t.starts_with("func")
        || t.starts_with("fn")
        || t.starts_with("function")
        || t.starts_with("class")
        || t.starts_with("struct")
        || t.starts_with("impl")
        || t.starts_with("trait")
        || t.starts_with("interface")
        || t.starts_with("enum")
        || t.starts_with("type")
        || t.starts_with("pub")
        || t.starts_with("export")
        || t.starts_with("public")
        || t.starts_with("private")
        || t.starts_with("protected")
        || t.starts_with("internal")
        || t.starts_with("abstract")
        || t.starts_with("final")
        || t.starts_with("sealed")
        || t.starts_with("static"))
    {
        return false;
    }
    decl_regexes().iter().any(|re| re.is_match(t))
}

fn is_python_declaration_line(line: &str) -> bool {
    // Only top-level defs count; indented defs are methods inside a block.
    line.starts_with("def ")
        || line.starts_with("class ")
        || line.starts_with("async def ")
        || line.starts_with("@")
}
