use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use escriba_core::format::escape_html;
use escriba_core::{BlockFormat, CompiledBlock, CompiledDocument, CompiledKind};
use serde::Serialize;

use crate::GeneratedBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Pending,
    Generating,
    Generated,
    Failed,
}

/// One block's generated text under the editor's unidirectional sync rule:
/// while a local edit is open, upstream updates (a regeneration landing)
/// are held in `upstream` and only become visible when the edit is
/// committed or cancelled.
#[derive(Debug, Clone)]
pub struct EditBuffer {
    upstream: String,
    draft: String,
    editing: bool,
}

impl EditBuffer {
    pub fn new(value: String) -> Self {
        Self {
            draft: value.clone(),
            upstream: value,
            editing: false,
        }
    }

    /// The text the renderer should show right now.
    pub fn current(&self) -> &str {
        if self.editing {
            &self.draft
        } else {
            &self.upstream
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// A new value arrived from generation. Visible immediately unless an
    /// edit is open, in which case it waits behind the draft.
    pub fn sync_upstream(&mut self, value: String) {
        if !self.editing {
            self.draft = value.clone();
        }
        self.upstream = value;
    }

    pub fn begin_edit(&mut self) {
        if !self.editing {
            self.draft = self.upstream.clone();
            self.editing = true;
        }
    }

    pub fn set_draft(&mut self, value: String) {
        if self.editing {
            self.draft = value;
        }
    }

    /// The edit wins: the draft becomes the block's text, including over any
    /// regeneration that landed while the edit was open.
    pub fn commit(&mut self) {
        if self.editing {
            self.upstream = self.draft.clone();
            self.editing = false;
        }
    }

    /// Discard the draft and show the latest upstream value.
    pub fn cancel(&mut self) {
        if self.editing {
            self.draft = self.upstream.clone();
            self.editing = false;
        }
    }
}

/// Client-held drafting state layered over one compiled document.
///
/// Generated content always takes precedence over the compiler's placeholder
/// for display; the renderer and exporter must go through
/// [`DraftSession::effective_content`], never the compiled content directly.
/// Rebuilt per editing session; never persisted mid-session.
#[derive(Debug)]
pub struct DraftSession {
    doc: CompiledDocument,
    content: HashMap<String, EditBuffer>,
    errors: HashMap<String, String>,
    in_flight: HashSet<String>,
    batch_error: Option<String>,
}

impl DraftSession {
    pub fn new(doc: CompiledDocument) -> Self {
        Self {
            doc,
            content: HashMap::new(),
            errors: HashMap::new(),
            in_flight: HashSet::new(),
            batch_error: None,
        }
    }

    pub fn document(&self) -> &CompiledDocument {
        &self.doc
    }

    /// Dynamic blocks with no generated content yet, in document order.
    /// A block that is mid-generation still counts as pending.
    pub fn pending_blocks(&self) -> Vec<String> {
        self.doc
            .blocks
            .iter()
            .filter(|b| b.kind == CompiledKind::Dynamic && !self.content.contains_key(&b.id))
            .map(|b| b.id.clone())
            .collect()
    }

    /// Accept block ids for a generation batch. Ids already in flight are
    /// refused (no overlapping batches per block), as are ids that are not
    /// dynamic blocks of this document. Accepted ids are marked in flight.
    pub fn begin_generation(&mut self, ids: &[String]) -> Vec<String> {
        self.batch_error = None;
        let mut accepted = Vec::new();
        for id in ids {
            let is_dynamic = self
                .doc
                .block(id)
                .map_or(false, |b| b.kind == CompiledKind::Dynamic);
            if !is_dynamic || self.in_flight.contains(id) || accepted.contains(id) {
                continue;
            }
            self.in_flight.insert(id.clone());
            accepted.push(id.clone());
        }
        accepted
    }

    /// Fold batch results into the session. Successes overwrite any earlier
    /// generation for the same block (regeneration is idempotent); failures
    /// keep whatever content existed and record the error for display.
    /// Partial success is the normal case, not an aggregate failure.
    pub fn merge_results(&mut self, results: Vec<GeneratedBlock>) {
        for result in results {
            self.in_flight.remove(&result.block_id);
            let content = if result.success { result.content } else { None };
            match content {
                Some(text) => {
                    self.errors.remove(&result.block_id);
                    match self.content.entry(result.block_id) {
                        Entry::Occupied(mut entry) => entry.get_mut().sync_upstream(text),
                        Entry::Vacant(entry) => {
                            entry.insert(EditBuffer::new(text));
                        }
                    }
                }
                None => {
                    let message = result
                        .error
                        .unwrap_or_else(|| "generation returned no content".to_string());
                    self.errors.insert(result.block_id, message);
                }
            }
        }
    }

    /// The whole batch failed in transport; nothing per-block arrived.
    /// No content changes, every in-flight mark is released for retry.
    pub fn batch_failed(&mut self, error: &str) {
        self.in_flight.clear();
        self.batch_error = Some(error.to_string());
    }

    pub fn batch_error(&self) -> Option<&str> {
        self.batch_error.as_deref()
    }

    pub fn generation_error(&self, id: &str) -> Option<&str> {
        self.errors.get(id).map(|s| s.as_str())
    }

    /// The text to render for a block: the generated override when one
    /// exists, else the compiled placeholder.
    pub fn effective_content<'a>(&'a self, block: &'a CompiledBlock) -> &'a str {
        if block.kind == CompiledKind::Dynamic {
            if let Some(buffer) = self.content.get(&block.id) {
                return buffer.current();
            }
        }
        &block.compiled_content
    }

    pub fn block_state(&self, id: &str) -> Option<BlockState> {
        let block = self.doc.block(id)?;
        if block.kind != CompiledKind::Dynamic {
            return None;
        }
        Some(if self.in_flight.contains(id) {
            BlockState::Generating
        } else if self.content.contains_key(id) {
            BlockState::Generated
        } else if self.errors.contains_key(id) {
            BlockState::Failed
        } else {
            BlockState::Pending
        })
    }

    pub fn is_complete(&self) -> bool {
        self.pending_blocks().is_empty()
    }

    // --- Manual edits over generated content ---

    pub fn begin_edit(&mut self, id: &str) -> Result<(), String> {
        match self.content.get_mut(id) {
            Some(buffer) => {
                buffer.begin_edit();
                Ok(())
            }
            None => Err(format!("block '{}' has no generated content to edit", id)),
        }
    }

    pub fn set_draft(&mut self, id: &str, text: String) -> Result<(), String> {
        match self.content.get_mut(id) {
            Some(buffer) if buffer.is_editing() => {
                buffer.set_draft(text);
                Ok(())
            }
            Some(_) => Err(format!("block '{}' is not being edited", id)),
            None => Err(format!("block '{}' has no generated content to edit", id)),
        }
    }

    pub fn commit_edit(&mut self, id: &str) -> Result<(), String> {
        match self.content.get_mut(id) {
            Some(buffer) => {
                buffer.commit();
                Ok(())
            }
            None => Err(format!("block '{}' has no generated content to edit", id)),
        }
    }

    pub fn cancel_edit(&mut self, id: &str) -> Result<(), String> {
        match self.content.get_mut(id) {
            Some(buffer) => {
                buffer.cancel();
                Ok(())
            }
            None => Err(format!("block '{}' has no generated content to edit", id)),
        }
    }

    /// Assemble the final document body. Refuses while dynamic blocks are
    /// still pending, naming the unfinished sections.
    pub fn assembled_html(&self) -> Result<String, String> {
        let pending = self.pending_blocks();
        if !pending.is_empty() {
            return Err(format!(
                "Proposal still has unfinished sections: {}",
                pending.join(", ")
            ));
        }
        let mut out = String::new();
        for block in &self.doc.blocks {
            let text = self.effective_content(block);
            if text.is_empty() {
                continue;
            }
            match block.format {
                BlockFormat::Richtext => out.push_str(text),
                BlockFormat::Plaintext => {
                    out.push_str("<p>");
                    out.push_str(&escape_html(text));
                    out.push_str("</p>");
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Serializable snapshot for the frontend.
    pub fn view(&self) -> SessionView {
        let blocks = self
            .doc
            .blocks
            .iter()
            .map(|block| BlockView {
                id: block.id.clone(),
                kind: block.kind,
                content: self.effective_content(block).to_string(),
                state: self.block_state(&block.id),
                error: self.generation_error(&block.id).map(|s| s.to_string()),
                editing: self
                    .content
                    .get(&block.id)
                    .map_or(false, |b| b.is_editing()),
            })
            .collect();
        SessionView {
            blocks,
            warnings: self.doc.warnings.clone(),
            is_complete: self.is_complete(),
            batch_error: self.batch_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CompiledKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BlockState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub editing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub blocks: Vec<BlockView>,
    pub warnings: Vec<String>,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_error: Option<String>,
}
