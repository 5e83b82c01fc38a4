pub mod engine;
mod parse;
mod prompt;
pub mod session;

use serde::{Deserialize, Serialize};

use escriba_core::{AiSettings, CompileContext, TemplateSchema};

pub use session::{BlockState, BlockView, DraftSession, EditBuffer, SessionView};

/// One dynamic block to draft. `context` is the serialized proposal context
/// (see [`context_summary`]); it rides along per block so requests stay
/// self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub block_id: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub context: String,
}

/// Per-block outcome of a generation batch. Every requested block id appears
/// exactly once in the batch response, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedBlock {
    pub block_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialize the proposal context once for a batch of generation requests.
pub fn context_summary(context: &CompileContext) -> String {
    prompt::serialize_context(context)
}

/// Draft every requested block, one LLM call per block, all launched
/// together. A configuration problem fails the whole batch; a single
/// block's failure is recorded in its result and the rest proceed.
pub async fn generate_blocks(
    settings: &AiSettings,
    requests: &[GenerationRequest],
) -> Result<Vec<GeneratedBlock>, String> {
    if !escriba_core::ai_configured(settings) {
        return Err("AI provider is not configured".to_string());
    }
    if requests.is_empty() {
        return Ok(vec![]);
    }

    eprintln!(
        "[escriba-draft] drafting {} block(s) via {} ({})",
        requests.len(),
        settings.provider,
        settings.model
    );

    let system = prompt::draft_system();
    let calls = requests.iter().map(|request| {
        let system = system.clone();
        async move {
            let user_msg = prompt::draft_user(request);
            match engine::generate(settings, &system, &user_msg).await {
                Ok(raw) => GeneratedBlock {
                    block_id: request.block_id.clone(),
                    success: true,
                    content: Some(parse::clean_generated(&raw)),
                    error: None,
                },
                Err(e) => {
                    eprintln!("[escriba-draft] block {} failed: {}", request.block_id, e);
                    GeneratedBlock {
                        block_id: request.block_id.clone(),
                        success: false,
                        content: None,
                        error: Some(e),
                    }
                }
            }
        }
    });

    Ok(futures::future::join_all(calls).await)
}

/// Interactive single-text revision: apply `instruction` to `original`.
pub async fn rewrite(
    settings: &AiSettings,
    original: &str,
    instruction: &str,
    context: Option<&str>,
) -> Result<String, String> {
    if !escriba_core::ai_configured(settings) {
        return Err("AI provider is not configured".to_string());
    }
    let user_msg = prompt::rewrite_user(original, instruction, context);
    let raw = engine::generate(settings, &prompt::rewrite_system(), &user_msg).await?;
    Ok(parse::clean_generated(&raw))
}

/// Segment an existing document into a draft template schema.
///
/// Transport problems surface as Err; unparseable model output degrades to
/// an empty block list so the editor can fall back to manual blocking.
/// Proposed blocks under `settings.confidence_floor` come back as static.
pub async fn analyze_template(
    settings: &AiSettings,
    document: &str,
) -> Result<TemplateSchema, String> {
    if !escriba_core::ai_configured(settings) {
        return Err("AI provider is not configured".to_string());
    }

    eprintln!(
        "[escriba-draft] analyzing document via {} ({})",
        settings.provider, settings.model
    );

    let raw = engine::generate(
        settings,
        &prompt::analyze_system(),
        &prompt::analyze_user(document),
    )
    .await?;

    let blocks = parse::parse_analysis(&raw, settings.confidence_floor);
    eprintln!("[escriba-draft] parsed {} block(s)", blocks.len());

    Ok(TemplateSchema {
        version: "1".to_string(),
        blocks,
    })
}
