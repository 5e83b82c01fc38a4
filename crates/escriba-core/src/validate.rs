use std::collections::HashSet;

use crate::TemplateSchema;

/// Check a schema before compilation. Data-quality problems inside a block
/// (a missing source path, say) degrade at compile time instead; this only
/// rejects shapes the rest of the pipeline cannot index reliably.
pub fn validate_schema(schema: &TemplateSchema) -> Result<(), String> {
    let mut seen: HashSet<&str> = HashSet::new();
    for block in &schema.blocks {
        if block.id.trim().is_empty() {
            return Err("Template contains a block with an empty id".to_string());
        }
        if !seen.insert(block.id.as_str()) {
            return Err(format!(
                "Template contains duplicate block id '{}'. Block ids must be unique within a template.",
                block.id
            ));
        }
    }
    Ok(())
}
