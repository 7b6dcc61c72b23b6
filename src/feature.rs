//! Feature files: parsing, outline expansion and scenario selection
//!
//! The supported language is the usual given/when/then subset:
//!
//! ```text
//! @smoke
//! Feature: Deploy runtimes
//!
//!   Background:
//!     Given Kogito operator is deployed
//!
//!   @quarkus
//!   Scenario Outline: Deploy <runtime> example
//!     When Deploy <runtime> runtime "example"
//!       | native | <native> |
//!     Then Runtime "example" has 1 pod running within 10 minutes
//!
//!     Examples:
//!       | runtime | native   |
//!       | quarkus | disabled |
//! ```
//!
//! Outlines are expanded at parse time, and background steps are prepended
//! to every scenario, so the runner only ever sees flat step lists.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::RunConfig;
use crate::steps::table::DataTable;
use crate::steps::Payload;

/// Errors from loading feature files or building filters
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("{location}:{line}: {message}")]
    Syntax {
        location: String,
        line: usize,
        message: String,
    },

    #[error("invalid filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
}

/// Step keyword as written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Given,
    When,
    Then,
    And,
    But,
}

impl Keyword {
    fn strip(line: &str) -> Option<(Keyword, &str)> {
        const KEYWORDS: [(&str, Keyword); 6] = [
            ("Given ", Keyword::Given),
            ("When ", Keyword::When),
            ("Then ", Keyword::Then),
            ("And ", Keyword::And),
            ("But ", Keyword::But),
            ("* ", Keyword::And),
        ];
        KEYWORDS
            .iter()
            .find_map(|(prefix, keyword)| line.strip_prefix(prefix).map(|rest| (*keyword, rest.trim())))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Given => "Given",
            Keyword::When => "When",
            Keyword::Then => "Then",
            Keyword::And => "And",
            Keyword::But => "But",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub keyword: Keyword,
    pub text: String,
    pub payload: Payload,
    pub line: usize,
}

impl Step {
    fn substitute(&self, values: &BTreeMap<&str, &str>) -> Step {
        let apply = |s: &str| substitute(s, values);
        Step {
            keyword: self.keyword,
            text: apply(&self.text),
            payload: match &self.payload {
                Payload::None => Payload::None,
                Payload::Table(table) => Payload::Table(table.map_cells(apply)),
                Payload::DocString(text) => Payload::DocString(apply(text)),
            },
            line: self.line,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.keyword.as_str(), self.text)
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("placeholder regex is valid"));

/// Replace every `<name>` whose name is a column of the example row
///
/// One pass: a substituted value is never scanned again.
fn substitute(text: &str, values: &BTreeMap<&str, &str>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// One runnable scenario, background included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub feature: String,
    pub name: String,
    /// Feature, scenario and examples tags, without `@`
    pub tags: Vec<String>,
    /// Background steps first
    pub steps: Vec<Step>,
    /// File (or feature name) and line of the scenario or example row
    pub location: String,
    pub line: usize,
}

impl Scenario {
    /// Stable identifier for reports
    pub fn id(&self) -> String {
        format!("{}:{}", self.location, self.line)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim_start_matches('@');
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub path: Option<PathBuf>,
    pub tags: Vec<String>,
    pub scenarios: Vec<Scenario>,
}

impl Feature {
    /// Every step text of every scenario, for sealing the registry
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.scenarios
            .iter()
            .flat_map(|s| s.steps.iter().map(|step| step.text.as_str()))
    }
}

enum Block {
    None,
    Background,
    Scenario(ScenarioDraft),
}

struct ScenarioDraft {
    name: String,
    tags: Vec<String>,
    steps: Vec<Step>,
    line: usize,
    outline: bool,
    examples: Vec<ExamplesDraft>,
}

struct ExamplesDraft {
    tags: Vec<String>,
    rows: Vec<(usize, Vec<String>)>,
}

fn syntax(location: &str, line: usize, message: impl Into<String>) -> FeatureError {
    FeatureError::Syntax {
        location: location.to_string(),
        line,
        message: message.into(),
    }
}

struct Parser<'a> {
    location: &'a str,
    feature: Option<(String, Vec<String>)>,
    background: Vec<Step>,
    block: Block,
    pending_tags: Vec<String>,
    scenarios: Vec<Scenario>,
}

impl<'a> Parser<'a> {
    fn error(&self, line: usize, message: impl Into<String>) -> FeatureError {
        syntax(self.location, line, message)
    }

    fn feature_name(&self) -> &str {
        self.feature.as_ref().map(|(n, _)| n.as_str()).unwrap_or_default()
    }

    fn feature_tags(&self) -> &[String] {
        self.feature.as_ref().map(|(_, t)| t.as_slice()).unwrap_or_default()
    }

    /// Close the current scenario, expanding it if it is an outline
    fn finish_block(&mut self) -> Result<(), FeatureError> {
        let Block::Scenario(draft) = std::mem::replace(&mut self.block, Block::None) else {
            return Ok(());
        };

        let feature = self.feature_name().to_string();
        let mut tags: Vec<String> = self.feature_tags().to_vec();
        tags.extend(draft.tags.iter().cloned());

        if !draft.outline {
            self.scenarios.push(Scenario {
                feature: feature.clone(),
                name: draft.name,
                tags,
                steps: self.background.iter().cloned().chain(draft.steps).collect(),
                location: self.location.to_string(),
                line: draft.line,
            });
            return Ok(());
        }

        if draft.examples.iter().all(|e| e.rows.len() < 2) {
            return Err(self.error(draft.line, format!("Scenario Outline '{}' has no examples", draft.name)));
        }

        for examples in &draft.examples {
            let Some(((_, header), rows)) = examples.rows.split_first() else {
                continue;
            };
            for (line, row) in rows {
                if row.len() != header.len() {
                    return Err(self.error(
                        *line,
                        format!("example row has {} cells, header has {}", row.len(), header.len()),
                    ));
                }
                let values: BTreeMap<&str, &str> = header
                    .iter()
                    .map(String::as_str)
                    .zip(row.iter().map(String::as_str))
                    .collect();

                let mut row_tags = tags.clone();
                row_tags.extend(examples.tags.iter().cloned());
                self.scenarios.push(Scenario {
                    feature: feature.clone(),
                    name: substitute(&draft.name, &values),
                    tags: row_tags,
                    steps: self
                        .background
                        .iter()
                        .cloned()
                        .chain(draft.steps.iter().map(|s| s.substitute(&values)))
                        .collect(),
                    location: self.location.to_string(),
                    line: *line,
                });
            }
        }
        Ok(())
    }

    fn steps_mut(&mut self, line: usize) -> Result<&mut Vec<Step>, FeatureError> {
        let location = self.location;
        match &mut self.block {
            Block::Background => Ok(&mut self.background),
            Block::Scenario(draft) if draft.examples.is_empty() => Ok(&mut draft.steps),
            Block::Scenario(_) => Err(syntax(location, line, "step after Examples")),
            Block::None => Err(syntax(location, line, "step outside a scenario")),
        }
    }

    fn last_step(&mut self, line: usize, what: &str) -> Result<&mut Step, FeatureError> {
        let location = self.location;
        self.steps_mut(line)?
            .last_mut()
            .ok_or_else(|| syntax(location, line, format!("{what} without a step")))
    }

    fn table_row(&mut self, line: usize, cells: Vec<String>) -> Result<(), FeatureError> {
        if let Block::Scenario(draft) = &mut self.block {
            if let Some(examples) = draft.examples.last_mut() {
                examples.rows.push((line, cells));
                return Ok(());
            }
        }

        let location = self.location;
        let step = self.last_step(line, "table")?;
        let mut rows = match &step.payload {
            Payload::None => Vec::new(),
            Payload::Table(table) => table.rows().to_vec(),
            Payload::DocString(_) => {
                return Err(syntax(location, line, "step has both a doc string and a table"));
            }
        };
        rows.push(cells);
        step.payload = Payload::Table(DataTable::new(rows));
        Ok(())
    }

    fn doc_string(&mut self, line: usize, text: String) -> Result<(), FeatureError> {
        let location = self.location;
        let step = self.last_step(line, "doc string")?;
        if step.payload != Payload::None {
            return Err(syntax(location, line, "step already has a payload"));
        }
        step.payload = Payload::DocString(text);
        Ok(())
    }
}

fn header<'l>(line: &'l str, keywords: &[&str]) -> Option<&'l str> {
    keywords
        .iter()
        .find_map(|k| line.strip_prefix(k).and_then(|rest| rest.strip_prefix(':')))
        .map(str::trim)
}

/// Cells of a `| a | b |` row; `\|` is a literal bar
fn table_cells(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|');
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('|') => cell.push('|'),
                Some('n') => cell.push('\n'),
                Some(other) => {
                    cell.push('\\');
                    cell.push(other);
                }
                None => cell.push('\\'),
            },
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            c => cell.push(c),
        }
    }
    if !cell.trim().is_empty() {
        cells.push(cell.trim().to_string());
    }
    cells
}

/// Parse one feature file's text
///
/// `location` names the source in errors and scenario ids.
pub fn parse(source: &str, location: &str) -> Result<Feature, FeatureError> {
    let mut parser = Parser {
        location,
        feature: None,
        background: Vec::new(),
        block: Block::None,
        pending_tags: Vec::new(),
        scenarios: Vec::new(),
    };

    let mut lines = source.lines().enumerate().map(|(i, l)| (i + 1, l));
    while let Some((number, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('@') {
            parser.pending_tags.extend(
                line.split_whitespace()
                    .take_while(|t| !t.starts_with('#'))
                    .map(|t| t.trim_start_matches('@').to_string()),
            );
            continue;
        }

        if let Some(name) = header(line, &["Feature"]) {
            if parser.feature.is_some() {
                return Err(parser.error(number, "second Feature in one file"));
            }
            parser.feature = Some((name.to_string(), std::mem::take(&mut parser.pending_tags)));
            continue;
        }

        if header(line, &["Background"]).is_some() {
            if parser.feature.is_none() {
                return Err(parser.error(number, "Background before Feature"));
            }
            parser.finish_block()?;
            parser.block = Block::Background;
            continue;
        }

        let outline = header(line, &["Scenario Outline", "Scenario Template"]);
        let plain = header(line, &["Scenario", "Example"]);
        if let Some((name, is_outline)) = outline.map(|n| (n, true)).or(plain.map(|n| (n, false))) {
            if parser.feature.is_none() {
                return Err(parser.error(number, "Scenario before Feature"));
            }
            parser.finish_block()?;
            parser.block = Block::Scenario(ScenarioDraft {
                name: name.to_string(),
                tags: std::mem::take(&mut parser.pending_tags),
                steps: Vec::new(),
                line: number,
                outline: is_outline,
                examples: Vec::new(),
            });
            continue;
        }

        if header(line, &["Examples", "Scenarios"]).is_some() {
            let tags = std::mem::take(&mut parser.pending_tags);
            match &mut parser.block {
                Block::Scenario(draft) if draft.outline => {
                    draft.examples.push(ExamplesDraft { tags, rows: Vec::new() });
                }
                _ => return Err(parser.error(number, "Examples outside a Scenario Outline")),
            }
            continue;
        }

        if let Some((keyword, text)) = Keyword::strip(line) {
            parser.steps_mut(number)?.push(Step {
                keyword,
                text: text.to_string(),
                payload: Payload::None,
                line: number,
            });
            continue;
        }

        if line.starts_with('|') {
            parser.table_row(number, table_cells(line))?;
            continue;
        }

        if let Some(delimiter) = ["\"\"\"", "```"].into_iter().find(|d| line.starts_with(d)) {
            let indent = raw.len() - raw.trim_start().len();
            let mut body = Vec::new();
            let mut closed = false;
            for (_, doc_line) in lines.by_ref() {
                if doc_line.trim() == delimiter {
                    closed = true;
                    break;
                }
                // strip at most the delimiter's indentation
                let start = doc_line
                    .char_indices()
                    .find(|&(i, c)| i >= indent || !c.is_whitespace())
                    .map_or(doc_line.len(), |(i, _)| i);
                body.push(&doc_line[start..]);
            }
            if !closed {
                return Err(parser.error(number, "unterminated doc string"));
            }
            parser.doc_string(number, body.join("\n"))?;
            continue;
        }

        // Free-form description under a Feature or Scenario header
        if matches!(parser.block, Block::Scenario(ref d) if !d.steps.is_empty()) {
            return Err(parser.error(number, format!("unexpected line '{line}'")));
        }
    }

    parser.finish_block()?;
    let (name, tags) = parser
        .feature
        .take()
        .ok_or_else(|| parser.error(1, "no Feature"))?;

    Ok(Feature {
        name,
        path: None,
        tags,
        scenarios: parser.scenarios,
    })
}

/// Load a feature file, or every `.feature` file below a directory
///
/// Files are read in path order so runs are reproducible.
pub fn load(path: &Path) -> Result<Vec<Feature>, FeatureError> {
    let io = |p: &Path, e: std::io::Error| FeatureError::Io {
        path: p.to_path_buf(),
        reason: e.to_string(),
    };

    let mut files = Vec::new();
    if path.is_dir() {
        collect_feature_files(path, &mut files).map_err(|e| io(path, e))?;
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    files
        .into_iter()
        .map(|file| {
            let source = std::fs::read_to_string(&file).map_err(|e| io(&file, e))?;
            let mut feature = parse(&source, &file.display().to_string())?;
            feature.path = Some(file);
            Ok(feature)
        })
        .collect()
}

fn collect_feature_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_feature_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "feature") {
            out.push(path);
        }
    }
    Ok(())
}

/// One `--tags` expression: alternatives separated by commas
#[derive(Debug, Clone, PartialEq, Eq)]
struct TagAlternatives(Vec<(bool, String)>);

impl TagAlternatives {
    fn parse(filter: &str) -> Result<Self, FeatureError> {
        let alternatives = filter
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|term| {
                let (negated, tag) = match term.strip_prefix('~').or_else(|| term.strip_prefix("not ")) {
                    Some(rest) => (true, rest.trim()),
                    None => (false, term),
                };
                let tag = tag.trim_start_matches('@');
                if tag.is_empty() || tag.contains(char::is_whitespace) {
                    return Err(FeatureError::Filter {
                        filter: filter.to_string(),
                        reason: format!("'{term}' is not a tag"),
                    });
                }
                Ok((negated, tag.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if alternatives.is_empty() {
            return Err(FeatureError::Filter {
                filter: filter.to_string(),
                reason: "empty tag expression".to_string(),
            });
        }
        Ok(Self(alternatives))
    }

    fn matches(&self, scenario: &Scenario) -> bool {
        self.0
            .iter()
            .any(|(negated, tag)| scenario.has_tag(tag) != *negated)
    }
}

/// Which scenarios a run executes
///
/// Every tag expression must hold (alternatives inside one expression are
/// OR-ed); when name patterns are given, at least one must match.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    tags: Vec<TagAlternatives>,
    names: Vec<Regex>,
}

impl ScenarioFilter {
    pub fn new<T, N>(tags: T, names: N) -> Result<Self, FeatureError>
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let tags = tags
            .into_iter()
            .map(|t| TagAlternatives::parse(t.as_ref()))
            .collect::<Result<_, _>>()?;
        let names = names
            .into_iter()
            .map(|n| {
                Regex::new(n.as_ref()).map_err(|e| FeatureError::Filter {
                    filter: n.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { tags, names })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, FeatureError> {
        Self::new(&config.tag_filters, &config.name_filters)
    }

    pub fn matches(&self, scenario: &Scenario) -> bool {
        self.tags.iter().all(|t| t.matches(scenario))
            && (self.names.is_empty() || self.names.iter().any(|n| n.is_match(&scenario.name)))
    }

    /// Selected scenarios of `features`, in file order
    pub fn select<'f>(&self, features: &'f [Feature]) -> Vec<&'f Scenario> {
        features
            .iter()
            .flat_map(|f| f.scenarios.iter())
            .filter(|s| self.matches(s))
            .collect()
    }
}
