//! Heuristic categorization of Python snippets, used to file saved code.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const IMPORT_WEIGHT: f64 = 3.0;
const STRUCTURE_WEIGHT: f64 = 2.0;
const KEYWORD_WEIGHT: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeCategory {
    DataAnalysis,
    WebDevelopment,
    MachineLearning,
    Automation,
    Database,
    FileProcessing,
    Algorithms,
    System,
    Networking,
    Gui,
    #[default]
    General,
}

impl CodeCategory {
    pub const SCORED: [CodeCategory; 10] = [
        Self::DataAnalysis,
        Self::WebDevelopment,
        Self::MachineLearning,
        Self::Automation,
        Self::Database,
        Self::FileProcessing,
        Self::Algorithms,
        Self::System,
        Self::Networking,
        Self::Gui,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataAnalysis => "data_analysis",
            Self::WebDevelopment => "web_development",
            Self::MachineLearning => "machine_learning",
            Self::Automation => "automation",
            Self::Database => "database",
            Self::FileProcessing => "file_processing",
            Self::Algorithms => "algorithms",
            Self::System => "system",
            Self::Networking => "networking",
            Self::Gui => "gui",
            Self::General => "general",
        }
    }
}

impl fmt::Display for CodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Keywords {
    high: &'static [&'static str],
    medium: &'static [&'static str],
    low: &'static [&'static str],
}

fn keywords(category: CodeCategory) -> Keywords {
    match category {
        CodeCategory::DataAnalysis => Keywords {
            high: &["pandas", "numpy", "matplotlib", "seaborn", "dataframe", "plot", "visualization"],
            medium: &["data", "analysis", "statistics", "csv", "excel", "chart", "graph"],
            low: &["series", "column", "row", "figure", "axis"],
        },
        CodeCategory::WebDevelopment => Keywords {
            high: &["flask", "django", "fastapi", "http", "request", "response", "api"],
            medium: &["html", "css", "javascript", "route", "endpoint", "server", "client"],
            low: &["get", "post", "template", "static", "render"],
        },
        CodeCategory::MachineLearning => Keywords {
            high: &["sklearn", "tensorflow", "keras", "pytorch", "model", "train", "predict"],
            medium: &["classifier", "regression", "neural", "network", "accuracy", "precision", "recall"],
            low: &["feature", "label", "dataset", "batch", "epoch"],
        },
        CodeCategory::Automation => Keywords {
            high: &["selenium", "beautifulsoup", "scrape", "automate", "schedule", "cron", "task"],
            medium: &["browser", "headless", "parse", "extract", "collect", "periodic"],
            low: &["click", "fill", "submit", "download"],
        },
        CodeCategory::Database => Keywords {
            high: &["sql", "sqlite", "mysql", "postgresql", "mongodb", "query", "database"],
            medium: &["table", "schema", "index", "join", "select", "insert", "update"],
            low: &["record", "field", "column", "row", "primary", "foreign", "key"],
        },
        CodeCategory::FileProcessing => Keywords {
            high: &["file", "open", "read", "write", "json", "csv", "xml"],
            medium: &["path", "directory", "folder", "parse", "format", "encode", "decode"],
            low: &["line", "content", "text", "binary", "stream"],
        },
        CodeCategory::Algorithms => Keywords {
            high: &["algorithm", "sort", "search", "graph", "tree", "recursion", "dynamic"],
            medium: &["complexity", "optimization", "efficient", "performance", "structure"],
            low: &["iterate", "traverse", "compute", "calculate"],
        },
        CodeCategory::System => Keywords {
            high: &["os", "system", "process", "thread", "subprocess", "command", "shell"],
            medium: &["environment", "variable", "path", "platform", "service", "daemon"],
            low: &["execute", "run", "terminate", "kill", "status"],
        },
        CodeCategory::Networking => Keywords {
            high: &["socket", "http", "tcp", "udp", "ip", "request", "response"],
            medium: &["client", "server", "protocol", "packet", "connection", "url"],
            low: &["port", "host", "domain", "address", "send", "receive"],
        },
        CodeCategory::Gui => Keywords {
            high: &["tkinter", "pyqt", "pyside", "kivy", "gui", "widget", "window"],
            medium: &["button", "label", "frame", "canvas", "event", "interface"],
            low: &["click", "display", "show", "hide", "layout"],
        },
        CodeCategory::General => Keywords {
            high: &[],
            medium: &[],
            low: &[],
        },
    }
}

fn import_roots(category: CodeCategory) -> &'static str {
    match category {
        CodeCategory::DataAnalysis => "pandas|numpy|matplotlib|seaborn|plotly",
        CodeCategory::WebDevelopment => "flask|django|fastapi|requests|aiohttp|tornado|bottle",
        CodeCategory::MachineLearning => "sklearn|tensorflow|keras|torch|xgboost",
        CodeCategory::Automation => "selenium|bs4|scrapy|schedule",
        CodeCategory::Database => "sqlite3|mysql|psycopg2|pymongo|sqlalchemy",
        CodeCategory::System => "os|sys|subprocess|platform|shutil",
        CodeCategory::Networking => "socket|http|urllib|requests",
        CodeCategory::Gui => "tkinter|PyQt5|PySide2|kivy",
        _ => "",
    }
}

fn structure_patterns(category: CodeCategory) -> &'static [&'static str] {
    match category {
        CodeCategory::DataAnalysis => &[
            r"\.plot\(",
            r"\.DataFrame\(",
            r"\.read_csv\(",
            r"\.read_excel\(",
        ],
        CodeCategory::WebDevelopment => &[
            r"@app\.route\(",
            r"@app\.get\(",
            r"@app\.post\(",
            r"Flask\(__name__\)",
            r"render_template\(",
        ],
        CodeCategory::MachineLearning => &[
            r"\.fit\(",
            r"\.predict\(",
            r"train_test_split\(",
            r"\.compile\(",
            r"\.evaluate\(",
        ],
        CodeCategory::Automation => &[
            r"\.find_element\(",
            r"\.click\(\)",
            r"\.send_keys\(",
            r"BeautifulSoup\(",
        ],
        CodeCategory::Database => &[
            r"\.execute\(",
            r"\.cursor\(\)",
            r"\.commit\(\)",
            r"\.connect\(",
        ],
        _ => &[],
    }
}

struct Patterns {
    imports: Vec<(CodeCategory, Vec<Regex>)>,
    structure: Vec<(CodeCategory, Vec<Regex>)>,
    comment: Regex,
    docstring_double: Regex,
    docstring_single: Regex,
    whitespace: Regex,
    word: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    let imports = CodeCategory::SCORED
        .iter()
        .filter(|category| !import_roots(**category).is_empty())
        .map(|category| {
            let roots = import_roots(*category);
            let patterns = vec![
                Regex::new(&format!(r"\bimport\s+({roots})\b")).expect("regex"),
                Regex::new(&format!(r"\bfrom\s+({roots})(\.\w+)?\s+import\b")).expect("regex"),
            ];
            (*category, patterns)
        })
        .collect();
    let structure = CodeCategory::SCORED
        .iter()
        .map(|category| {
            let patterns = structure_patterns(*category)
                .iter()
                .map(|pattern| Regex::new(pattern).expect("regex"))
                .collect();
            (*category, patterns)
        })
        .collect();
    Patterns {
        imports,
        structure,
        comment: Regex::new(r"(?m)#.*$").expect("regex"),
        docstring_double: Regex::new(r#"(?s)""".*?""""#).expect("regex"),
        docstring_single: Regex::new(r"(?s)'''.*?'''").expect("regex"),
        whitespace: Regex::new(r"\s+").expect("regex"),
        word: Regex::new(r"[a-z]+").expect("regex"),
    }
});

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Categorization {
    pub category: CodeCategory,
    /// Share of the total score held by `category`, in `[0, 1]`.
    pub confidence: f64,
    /// Normalized score per scored category, in declaration order.
    pub scores: Vec<(CodeCategory, f64)>,
}

/// Stateless: the same snippet always lands in the same category.
#[derive(Clone, Copy, Debug, Default)]
pub struct CodeCategorizer;

impl CodeCategorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn categorize(&self, code: &str) -> Categorization {
        let code = normalize(code);
        let imports = normalized(matches_per_category(&PATTERNS.imports, &code));
        let structure = normalized(matches_per_category(&PATTERNS.structure, &code));
        let keywords = normalized(keyword_scores(&code));

        let raw: Vec<(CodeCategory, f64)> = CodeCategory::SCORED
            .iter()
            .enumerate()
            .map(|(idx, category)| {
                let score = IMPORT_WEIGHT * imports[idx]
                    + STRUCTURE_WEIGHT * structure[idx]
                    + KEYWORD_WEIGHT * keywords[idx];
                (*category, score)
            })
            .collect();

        let total: f64 = raw.iter().map(|(_, score)| score).sum();
        if total <= 0.0 {
            return Categorization {
                category: CodeCategory::General,
                confidence: 0.0,
                scores: raw.into_iter().map(|(category, _)| (category, 0.0)).collect(),
            };
        }

        let scores: Vec<(CodeCategory, f64)> = raw
            .into_iter()
            .map(|(category, score)| (category, score / total))
            .collect();
        let (category, confidence) = scores.iter().fold(
            (CodeCategory::General, 0.0),
            |best, (category, score)| {
                if *score > best.1 { (*category, *score) } else { best }
            },
        );
        Categorization {
            category,
            confidence,
            scores,
        }
    }

    /// Top `top_n` categories by normalized score.
    pub fn suggestions(&self, code: &str, top_n: usize) -> Vec<(CodeCategory, f64)> {
        let mut scores = self.categorize(code).scores;
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores.truncate(top_n);
        scores
    }
}

fn normalize(code: &str) -> String {
    let code = PATTERNS.comment.replace_all(code, "");
    let code = PATTERNS.docstring_double.replace_all(&code, "");
    let code = PATTERNS.docstring_single.replace_all(&code, "");
    PATTERNS.whitespace.replace_all(&code, " ").into_owned()
}

fn matches_per_category(table: &[(CodeCategory, Vec<Regex>)], code: &str) -> Vec<f64> {
    CodeCategory::SCORED
        .iter()
        .map(|category| {
            table
                .iter()
                .filter(|(owner, _)| owner == category)
                .flat_map(|(_, patterns)| patterns)
                .map(|pattern| pattern.find_iter(code).count() as f64)
                .sum()
        })
        .collect()
}

/// Keywords count only as whole words; `_` and digits split words, so
/// `read_csv` contributes `read` and `csv` while `positions` contributes nothing for `os`.
fn keyword_scores(code: &str) -> Vec<f64> {
    let lower = code.to_lowercase();
    let mut words: HashMap<&str, usize> = HashMap::new();
    for word in PATTERNS.word.find_iter(&lower) {
        *words.entry(word.as_str()).or_default() += 1;
    }
    CodeCategory::SCORED
        .iter()
        .map(|category| {
            let table = keywords(*category);
            let count = |list: &[&str]| -> f64 {
                list.iter()
                    .map(|keyword| words.get(keyword).copied().unwrap_or_default() as f64)
                    .sum()
            };
            3.0 * count(table.high) + 2.0 * count(table.medium) + count(table.low)
        })
        .collect()
}

fn normalized(scores: Vec<f64>) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total <= 0.0 {
        return scores;
    }
    scores.into_iter().map(|score| score / total).collect()
}
