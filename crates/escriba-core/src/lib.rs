pub mod compile;
pub mod format;
pub mod resolve;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

// --- Template model (matching the editor's types.ts) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockFormat {
    Richtext,
    Plaintext,
}

impl Default for BlockFormat {
    fn default() -> Self {
        BlockFormat::Richtext
    }
}

/// Per-kind payload of a block. The tag mirrors the `type` field the editor
/// writes, so a variable block cannot exist without its kind-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockKind {
    Static,
    #[serde(rename_all = "camelCase")]
    Variable {
        /// Display name shown in the editor palette.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variable_name: Option<String>,
        /// Dotted path into the proposal context, e.g. "client.group_name".
        /// Legacy templates may omit it; compilation degrades to the
        /// placeholder text with a warning.
        #[serde(default)]
        source: String,
    },
    Dynamic {
        /// Drafting instructions forwarded to the AI collaborator.
        #[serde(default)]
        instructions: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBlock {
    pub id: String,
    /// Authored content, or the placeholder shown until the block resolves.
    #[serde(default)]
    pub content: String,
    /// Render position. Ties keep their array order; gaps are fine.
    #[serde(default)]
    pub order: i64,
    /// Whether a resolution gap should be called out as required.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub format: BlockFormat,
    #[serde(flatten)]
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSchema {
    #[serde(default = "default_schema_version")]
    pub version: String,
    #[serde(default)]
    pub blocks: Vec<TemplateBlock>,
}

fn default_schema_version() -> String {
    "1".to_string()
}

// --- Proposal context (snake_case: these mirror the database columns) ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Annual revenue in MXN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityInfo {
    #[serde(default)]
    pub legal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfc: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Overrides the catalog fee when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_fee: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalInfo {
    /// ISO date (YYYY-MM-DD) of the proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_retainer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retainer_months: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    /// Reusable boilerplate paragraphs keyed by slug, e.g. "confidentiality".
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub boilerplate: BTreeMap<String, String>,
}

/// Read-only snapshot assembled by the CRUD layer for one compilation.
/// The compiler never mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileContext {
    #[serde(default)]
    pub client: ClientInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub proposal: ProposalInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firm: Option<FirmInfo>,
}

// --- Compiled output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompiledKind {
    Static,
    Variable,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CompiledKind,
    pub compiled_content: String,
    pub original_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub was_compiled: bool,
    #[serde(default)]
    pub format: BlockFormat,
}

/// Output of one compilation pass. Built fresh every time; only snapshots
/// of the assembled document are ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledDocument {
    pub blocks: Vec<CompiledBlock>,
    pub warnings: Vec<String>,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledDocument {
    pub fn block(&self, id: &str) -> Option<&CompiledBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Ids of blocks whose final text comes from the AI collaborator.
    pub fn dynamic_ids(&self) -> Vec<String> {
        self.blocks
            .iter()
            .filter(|b| b.kind == CompiledKind::Dynamic)
            .map(|b| b.id.clone())
            .collect()
    }
}

/// Persisted result of an explicit "save version" action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSnapshot {
    pub html: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

impl ProposalSnapshot {
    pub fn new(html: String, warnings: Vec<String>) -> Self {
        Self {
            html,
            warnings,
            saved_at: Utc::now(),
        }
    }
}

// --- Storage ---

/// Resolve the global templates directory (~/.escriba/).
pub fn templates_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".escriba")
}

/// List all template names (without .tpl extension), sorted.
pub fn list_templates() -> Result<Vec<String>, String> {
    let dir = templates_dir();
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<String> = fs::read_dir(&dir)
        .map_err(|e| e.to_string())?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_suffix(".tpl")
                .filter(|n| !n.ends_with(".snapshot"))
                .map(|n| n.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Read a template as raw JSON string (for the frontend).
pub fn read_template_raw(name: &str) -> Result<String, String> {
    let path = templates_dir().join(format!("{}.tpl", name));
    fs::read_to_string(&path).map_err(|e| e.to_string())
}

/// Read a template as typed TemplateSchema.
pub fn read_template(name: &str) -> Result<TemplateSchema, String> {
    let raw = read_template_raw(name)?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Write a template from raw JSON string.
///
/// Uses atomic write (temp file + rename) so the directory watcher sees one
/// event per save instead of truncate + write, which lets the app suppress
/// its own writes without a timing window that would swallow external edits.
pub fn write_template_raw(name: &str, data: &str) -> Result<(), String> {
    let dir = templates_dir();
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let tmp = dir.join(format!(".{}.tpl.tmp", name));
    let path = dir.join(format!("{}.tpl", name));
    fs::write(&tmp, data).map_err(|e| e.to_string())?;
    fs::rename(&tmp, &path).map_err(|e| e.to_string())
}

/// Write a template from a typed TemplateSchema.
pub fn write_template(name: &str, schema: &TemplateSchema) -> Result<(), String> {
    let json = serde_json::to_string_pretty(schema).map_err(|e| e.to_string())?;
    write_template_raw(name, &json)
}

/// Delete a template by name.
pub fn delete_template(name: &str) -> Result<(), String> {
    let path = templates_dir().join(format!("{}.tpl", name));
    if path.exists() {
        fs::remove_file(&path).map_err(|e| e.to_string())
    } else {
        Ok(())
    }
}

// --- Proposal snapshots (explicit "save version") ---

/// Save the assembled document for a proposal. Overwrites the previous
/// snapshot; mid-session draft state is never persisted.
pub fn save_snapshot(name: &str, snapshot: &ProposalSnapshot) -> Result<(), String> {
    let dir = templates_dir();
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(snapshot).map_err(|e| e.to_string())?;
    let path = dir.join(format!("{}.snapshot.tpl", name));
    fs::write(&path, json).map_err(|e| e.to_string())
}

/// Read the saved snapshot for a proposal. Returns None if none exists.
pub fn read_snapshot(name: &str) -> Option<ProposalSnapshot> {
    let path = templates_dir().join(format!("{}.snapshot.tpl", name));
    let raw = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&raw).ok()
}

// --- AI Settings ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    /// Template analysis demotes proposed blocks below this confidence
    /// to static blocks.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: String::new(),
            api_key: String::new(),
            model: String::new(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

fn default_confidence_floor() -> f32 {
    0.7
}

fn settings_path() -> PathBuf {
    templates_dir().join("settings.json")
}

pub fn read_settings() -> AiSettings {
    let path = settings_path();
    if !path.exists() {
        return AiSettings::default();
    }
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn write_settings(settings: &AiSettings) -> Result<(), String> {
    let dir = templates_dir();
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(settings).map_err(|e| e.to_string())?;
    fs::write(settings_path(), json).map_err(|e| e.to_string())
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}

/// Generate the next block ID by scanning existing blocks.
/// Follows the editor pattern: "block-{N}" with N incrementing.
pub fn next_block_id(schema: &TemplateSchema) -> String {
    let max = schema
        .blocks
        .iter()
        .filter_map(|b| b.id.strip_prefix("block-").and_then(|s| s.parse::<u64>().ok()))
        .max()
        .unwrap_or(0);
    format!("block-{}", max + 1)
}
