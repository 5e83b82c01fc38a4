use escriba_core::{BlockFormat, BlockKind, TemplateBlock};

/// Strip markdown fencing and surrounding noise from a drafted section.
/// Models occasionally wrap HTML output in ``` fences despite instructions.
pub fn clean_generated(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string ("html", "text", ...) on the opening fence.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
        .to_string()
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    variable_name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parse raw analysis output into template blocks.
/// Returns an empty vec on total parse failure (graceful degradation).
///
/// Proposed blocks below `confidence_floor` are demoted to static, as is
/// any "variable" proposal without a usable source path.
pub fn parse_analysis(raw: &str, confidence_floor: f32) -> Vec<TemplateBlock> {
    let json_str = match extract_json_array(raw) {
        Some(s) => s,
        None => return vec![],
    };

    // Try full array parse first
    let llm_blocks: Vec<LlmBlock> = match serde_json::from_str(&json_str) {
        Ok(blocks) => blocks,
        Err(_) => {
            // Fall back to object-by-object extraction
            parse_object_by_object(&json_str)
        }
    };

    llm_blocks
        .into_iter()
        .enumerate()
        .map(|(i, lb)| {
            let confident = lb.confidence.map_or(true, |c| c >= confidence_floor);
            let kind = if !confident {
                BlockKind::Static
            } else {
                match lb.block_type.as_str() {
                    "variable" => {
                        let source = lb.source.unwrap_or_default();
                        if source.trim().is_empty() {
                            BlockKind::Static
                        } else {
                            BlockKind::Variable {
                                variable_name: lb.variable_name,
                                source,
                            }
                        }
                    }
                    "dynamic" => BlockKind::Dynamic {
                        instructions: lb.instructions.unwrap_or_default(),
                    },
                    _ => BlockKind::Static,
                }
            };
            TemplateBlock {
                id: format!("block-{}", i + 1),
                content: lb.content,
                order: i as i64,
                required: false,
                format: BlockFormat::Richtext,
                kind,
            }
        })
        .collect()
}

/// Extract the JSON array substring from raw LLM output.
fn extract_json_array(raw: &str) -> Option<String> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// Salvage individual objects from a malformed JSON array.
fn parse_object_by_object(json_str: &str) -> Vec<LlmBlock> {
    let inner = json_str
        .trim()
        .strip_prefix('[')
        .unwrap_or(json_str)
        .strip_suffix(']')
        .unwrap_or(json_str);

    let mut blocks = Vec::new();
    let mut depth = 0;
    let mut start = None;

    for (i, ch) in inner.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let obj_str = &inner[s..=i];
                        if let Ok(block) = serde_json::from_str::<LlmBlock>(obj_str) {
                            blocks.push(block);
                        }
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    blocks
}
