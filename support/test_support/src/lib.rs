use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    RenderSuccess,
    CompileError,
    RenderError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub output_file: Option<String>,
    pub error_contains: Option<String>,
}

/// Declarative form of one compiled code, mirroring the factory surface
/// the parser would drive. Section bodies nest recursively.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum CodeSpec {
    Write(String),
    Value(ValueSpec),
    Iterable(SectionSpec),
    IfIterable(SectionSpec),
    Inverted(SectionSpec),
    Function(SectionSpec),
    Name(SectionSpec),
    Partial(String),
    Extend(SectionSpec),
}

fn default_encoded() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValueSpec {
    pub name: String,
    #[serde(default = "default_encoded")]
    pub encoded: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SectionSpec {
    pub name: String,
    #[serde(default)]
    pub body: Vec<CodeSpec>,
}

/// One named template of a case; earlier templates are registered first so
/// later ones can resolve them as partials/parents.
#[derive(Debug, Deserialize, Clone)]
pub struct TemplateSpec {
    pub name: String,
    pub codes: Vec<CodeSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub templates: Vec<TemplateSpec>,
    pub root: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub roundtrip: bool,
    pub expected: ExpectedOutcome,
}

/// Scope data as written in a case's `data.yaml`. Sequences hold mappings
/// only, matching the engine's list-of-scopes model.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<BTreeMap<String, DataValue>>),
    Map(BTreeMap<String, DataValue>),
}

pub type ScopeData = BTreeMap<String, DataValue>;

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    /// The case's scope data, if a `data.yaml` is present.
    pub fn data(&self) -> Result<Option<ScopeData>> {
        let data_path = self.dir.join("data.yaml");
        if !data_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&data_path)
            .with_context(|| format!("Reading {}", data_path.display()))?;
        let data = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing {}", data_path.display()))?;
        Ok(Some(data))
    }
}

pub fn load_cases(templates_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in fs::read_dir(templates_dir)
        .with_context(|| format!("Reading {}", templates_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        ensure!(
            spec.templates.iter().any(|template| template.name == spec.root),
            "Case {} root '{}' is not one of its templates",
            case_name,
            spec.root
        );

        cases.push(Case {
            name: case_name,
            dir: path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        templates_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}
