use chrono::Utc;
use serde_json::Value;

use crate::format::{escape_html, format_value};
use crate::resolve::resolve;
use crate::{
    BlockFormat, BlockKind, CompileContext, CompiledBlock, CompiledDocument, CompiledKind,
    TemplateBlock, TemplateSchema,
};

/// Context serialized once per compilation so every block shares one
/// path-addressable view of the proposal data.
pub struct ResolvedContext {
    json: Value,
}

impl ResolvedContext {
    pub fn new(context: &CompileContext) -> Self {
        let json = serde_json::to_value(context).unwrap_or(Value::Null);
        Self { json }
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        resolve(path, &self.json)
    }
}

/// Compile one block against the context. Pure and total: data problems
/// degrade to the authored placeholder plus a warning, never an error.
pub fn compile_block(
    block: &TemplateBlock,
    context: &ResolvedContext,
) -> (CompiledBlock, Vec<String>) {
    let mut warnings = Vec::new();

    let (kind, compiled_content, was_compiled, source, instructions) = match &block.kind {
        BlockKind::Static => (CompiledKind::Static, block.content.clone(), false, None, None),
        BlockKind::Variable { source, .. } => {
            let path = source.trim();
            let resolved = if path.is_empty() {
                None
            } else {
                context.lookup(path)
            };
            match resolved {
                Some(value) => {
                    let mut text = format_value(path, value);
                    if block.format == BlockFormat::Richtext {
                        // The value is data being dropped into HTML.
                        text = escape_html(&text);
                    }
                    (
                        CompiledKind::Variable,
                        text,
                        true,
                        Some(source.clone()),
                        None,
                    )
                }
                None => {
                    warnings.push(gap_warning(block, path));
                    (
                        CompiledKind::Variable,
                        block.content.clone(),
                        false,
                        Some(source.clone()),
                        None,
                    )
                }
            }
        }
        BlockKind::Dynamic { instructions } => (
            CompiledKind::Dynamic,
            block.content.clone(),
            false,
            None,
            Some(instructions.clone()),
        ),
    };

    (
        CompiledBlock {
            id: block.id.clone(),
            kind,
            compiled_content,
            original_content: block.content.clone(),
            source,
            instructions,
            was_compiled,
            format: block.format,
        },
        warnings,
    )
}

fn gap_warning(block: &TemplateBlock, path: &str) -> String {
    if path.is_empty() {
        return format!(
            "Variable block '{}' has no source path; kept its placeholder text",
            block.id
        );
    }
    if block.required {
        format!("Required variable '{}' was not found in the proposal data", path)
    } else {
        format!("Variable '{}' was not found in the proposal data", path)
    }
}

/// Compile a whole template. Returns None when the schema has no blocks;
/// the caller falls back to the non-templated document in that case.
///
/// Blocks are stable-sorted by `order` (ties keep authored sequence),
/// compiled in sequence, and their warnings concatenated in block order.
/// Identical inputs produce identical output apart from `compiled_at`.
pub fn compile_template(
    schema: &TemplateSchema,
    context: &CompileContext,
) -> Option<CompiledDocument> {
    if schema.blocks.is_empty() {
        return None;
    }

    let resolved = ResolvedContext::new(context);

    let mut ordered: Vec<&TemplateBlock> = schema.blocks.iter().collect();
    ordered.sort_by_key(|b| b.order);

    let mut blocks = Vec::with_capacity(ordered.len());
    let mut warnings = Vec::new();
    for block in ordered {
        let (compiled, mut block_warnings) = compile_block(block, &resolved);
        blocks.push(compiled);
        warnings.append(&mut block_warnings);
    }

    Some(CompiledDocument {
        blocks,
        warnings,
        compiled_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientInfo, ProposalInfo};

    fn block(id: &str, order: i64, kind: BlockKind) -> TemplateBlock {
        TemplateBlock {
            id: id.to_string(),
            content: String::new(),
            order,
            required: false,
            format: BlockFormat::Richtext,
            kind,
        }
    }

    fn static_block(id: &str, order: i64, content: &str) -> TemplateBlock {
        TemplateBlock {
            content: content.to_string(),
            ..block(id, order, BlockKind::Static)
        }
    }

    fn variable_block(id: &str, order: i64, source: &str, placeholder: &str) -> TemplateBlock {
        TemplateBlock {
            content: placeholder.to_string(),
            ..block(
                id,
                order,
                BlockKind::Variable {
                    variable_name: None,
                    source: source.to_string(),
                },
            )
        }
    }

    fn dynamic_block(id: &str, order: i64, instructions: &str) -> TemplateBlock {
        block(
            id,
            order,
            BlockKind::Dynamic {
                instructions: instructions.to_string(),
            },
        )
    }

    fn sample_context() -> CompileContext {
        CompileContext {
            client: ClientInfo {
                group_name: "ACME".to_string(),
                ..Default::default()
            },
            proposal: ProposalInfo {
                date: Some("2026-08-05".to_string()),
                total_fee: Some(185000.0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn static_block_passes_through_verbatim() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = static_block("b1", 0, "<p>Estimado <b>cliente</b>:</p>");
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "<p>Estimado <b>cliente</b>:</p>");
        assert!(!compiled.was_compiled);
        assert!(warnings.is_empty());

        let empty = static_block("b2", 1, "");
        let (compiled, warnings) = compile_block(&empty, &ctx);
        assert_eq!(compiled.compiled_content, "");
        assert!(warnings.is_empty());
    }

    #[test]
    fn variable_block_substitutes_resolved_value() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = variable_block("b2", 0, "client.group_name", "[Nombre]");
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "ACME");
        assert!(compiled.was_compiled);
        assert!(warnings.is_empty());
    }

    #[test]
    fn variable_block_falls_back_to_placeholder_with_one_warning() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = variable_block("b2", 0, "client.nonexistent", "[Nombre del Cliente]");
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "[Nombre del Cliente]");
        assert!(!compiled.was_compiled);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("client.nonexistent"));
    }

    #[test]
    fn required_gap_is_still_a_warning_not_an_error() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = TemplateBlock {
            required: true,
            ..variable_block("b2", 0, "firm.name", "[Despacho]")
        };
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "[Despacho]");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Required variable"));
        assert!(warnings[0].contains("firm.name"));
    }

    #[test]
    fn empty_source_degrades_like_a_gap() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = variable_block("b7", 0, "", "[???]");
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "[???]");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("b7"));
    }

    #[test]
    fn money_value_is_formatted_and_marked_compiled() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = variable_block("fee", 0, "proposal.total_fee", "[Honorarios]");
        let (compiled, _) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "$185,000.00");
    }

    #[test]
    fn richtext_substitution_escapes_the_value() {
        let mut context = sample_context();
        context.client.group_name = "Pérez & Hijos <SA>".to_string();
        let ctx = ResolvedContext::new(&context);
        let raw = variable_block("b2", 0, "client.group_name", "[Nombre]");
        let (compiled, _) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "Pérez &amp; Hijos &lt;SA&gt;");

        let plain = TemplateBlock {
            format: BlockFormat::Plaintext,
            ..variable_block("b3", 1, "client.group_name", "[Nombre]")
        };
        let (compiled, _) = compile_block(&plain, &ctx);
        assert_eq!(compiled.compiled_content, "Pérez & Hijos <SA>");
    }

    #[test]
    fn dynamic_block_keeps_placeholder_and_instructions() {
        let ctx = ResolvedContext::new(&sample_context());
        let raw = dynamic_block("b3", 0, "Redacta antecedentes");
        let (compiled, warnings) = compile_block(&raw, &ctx);
        assert_eq!(compiled.compiled_content, "");
        assert_eq!(compiled.instructions.as_deref(), Some("Redacta antecedentes"));
        assert!(!compiled.was_compiled);
        assert!(warnings.is_empty());
    }

    #[test]
    fn empty_schema_returns_none() {
        let schema = TemplateSchema::default();
        assert!(compile_template(&schema, &sample_context()).is_none());
    }

    #[test]
    fn full_scenario_compiles_in_order() {
        let schema = TemplateSchema {
            version: "1".to_string(),
            blocks: vec![
                static_block("b1", 0, "Estimado cliente:"),
                variable_block("b2", 1, "client.group_name", "[Nombre]"),
                dynamic_block("b3", 2, "Redacta antecedentes"),
            ],
        };
        let doc = compile_template(&schema, &sample_context()).unwrap();
        assert_eq!(doc.blocks.len(), 3);
        assert_eq!(doc.blocks[0].compiled_content, "Estimado cliente:");
        assert_eq!(doc.blocks[1].compiled_content, "ACME");
        assert_eq!(doc.blocks[2].compiled_content, "");
        assert!(doc.warnings.is_empty());
        assert_eq!(doc.dynamic_ids(), vec!["b3".to_string()]);
    }

    #[test]
    fn blocks_sort_by_order_with_stable_ties() {
        let schema = TemplateSchema {
            version: "1".to_string(),
            blocks: vec![
                static_block("tail", 10, "fin"),
                static_block("first-tie", 1, "a"),
                static_block("second-tie", 1, "b"),
                static_block("head", 0, "inicio"),
            ],
        };
        let doc = compile_template(&schema, &sample_context()).unwrap();
        let ids: Vec<&str> = doc.blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["head", "first-tie", "second-tie", "tail"]);
    }

    #[test]
    fn reordering_blocks_moves_warnings_without_changing_their_text() {
        let resolvable = variable_block("ok", 0, "client.group_name", "[Nombre]");
        let gap_a = variable_block("gap-a", 1, "client.missing_field", "[???]");
        let gap_b = variable_block("gap-b", 2, "firm.name", "[Despacho]");

        let forward = TemplateSchema {
            version: "1".to_string(),
            blocks: vec![resolvable.clone(), gap_a.clone(), gap_b.clone()],
        };
        let swapped = TemplateSchema {
            version: "1".to_string(),
            blocks: vec![
                resolvable,
                TemplateBlock { order: 2, ..gap_a },
                TemplateBlock { order: 1, ..gap_b },
            ],
        };

        let a = compile_template(&forward, &sample_context()).unwrap();
        let b = compile_template(&swapped, &sample_context()).unwrap();

        // Same warning texts, sequence follows block order.
        assert_eq!(a.warnings.len(), 2);
        assert_eq!(b.warnings.len(), 2);
        assert_eq!(a.warnings[0], b.warnings[1]);
        assert_eq!(a.warnings[1], b.warnings[0]);
        assert!(a.warnings[0].contains("client.missing_field"));
    }

    #[test]
    fn compilation_is_deterministic_apart_from_timestamp() {
        let schema = TemplateSchema {
            version: "1".to_string(),
            blocks: vec![
                static_block("b1", 0, "Estimado cliente:"),
                variable_block("b2", 1, "client.group_name", "[Nombre]"),
                variable_block("b4", 2, "proposal.missing", "[Pendiente]"),
                dynamic_block("b3", 3, "Redacta antecedentes"),
            ],
        };
        let context = sample_context();
        let first = compile_template(&schema, &context).unwrap();
        let second = compile_template(&schema, &context).unwrap();
        assert_eq!(first.blocks, second.blocks);
        assert_eq!(first.warnings, second.warnings);
    }
}
