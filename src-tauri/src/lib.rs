use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use notify::{recommended_watcher, EventKind, RecursiveMode, Watcher};
use tauri::{Emitter, Manager};

use escriba_core::compile::compile_template;
use escriba_core::validate::validate_schema;
use escriba_core::{CompileContext, ProposalSnapshot, TemplateSchema};
use escriba_draft::{DraftSession, GenerationRequest};

/// Tracks template names recently written by the UI with timestamps, so the
/// directory watcher can suppress ALL events from a single UI write (atomic
/// writes on Linux fire multiple inotify events: one for the temp file, one
/// for the rename).
struct SelfWrites(Arc<Mutex<HashMap<String, Instant>>>);

/// Managed state wrapping the AI settings.
struct SettingsState(Arc<Mutex<escriba_core::AiSettings>>);

/// The proposal currently being drafted: the session layered over the last
/// compilation, plus the context summary the AI prompts reuse per block.
struct ActiveProposal {
    session: DraftSession,
    context_summary: String,
}

struct ProposalState(Arc<Mutex<Option<ActiveProposal>>>);

// --- Template CRUD ---

#[tauri::command]
fn list_templates() -> Result<Vec<String>, String> {
    escriba_core::list_templates()
}

#[tauri::command]
fn read_template(name: String) -> Result<String, String> {
    let raw = escriba_core::read_template_raw(&name)?;
    // Migrate legacy templates whose blocks predate the typed kind field:
    // untyped blocks become static blocks.
    let mut val: serde_json::Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    let mut migrated = false;
    if let Some(blocks) = val.get_mut("blocks").and_then(|b| b.as_array_mut()) {
        for block in blocks {
            if block.get("type").is_none() {
                if let Some(obj) = block.as_object_mut() {
                    obj.insert(
                        "type".to_string(),
                        serde_json::Value::String("static".to_string()),
                    );
                    migrated = true;
                }
            }
        }
    }
    if migrated {
        let updated = serde_json::to_string_pretty(&val).map_err(|e| e.to_string())?;
        escriba_core::write_template_raw(&name, &updated)?;
        Ok(updated)
    } else {
        Ok(raw)
    }
}

#[tauri::command]
fn write_template(
    name: String,
    data: String,
    state: tauri::State<'_, SelfWrites>,
) -> Result<(), String> {
    // Duplicate block ids are rejected here, before anything downstream
    // indexes by id.
    let schema: TemplateSchema =
        serde_json::from_str(&data).map_err(|e| format!("invalid template: {e}"))?;
    validate_schema(&schema)?;
    state.0.lock().unwrap().insert(name.clone(), Instant::now());
    escriba_core::write_template_raw(&name, &data)
}

#[tauri::command]
fn delete_template(name: String, state: tauri::State<'_, SelfWrites>) -> Result<(), String> {
    state.0.lock().unwrap().insert(name.clone(), Instant::now());
    escriba_core::delete_template(&name)
}

#[tauri::command]
fn next_block_id(name: String) -> Result<String, String> {
    let schema = escriba_core::read_template(&name)?;
    Ok(escriba_core::next_block_id(&schema))
}

// --- Compilation & drafting session ---

#[tauri::command]
fn compile_proposal(
    template: String,
    context: String,
    state: tauri::State<'_, ProposalState>,
) -> Result<serde_json::Value, String> {
    let schema: TemplateSchema =
        serde_json::from_str(&template).map_err(|e| format!("invalid template: {e}"))?;
    validate_schema(&schema)?;
    let context: CompileContext =
        serde_json::from_str(&context).map_err(|e| format!("invalid context: {e}"))?;

    match compile_template(&schema, &context) {
        Some(doc) => {
            let value = serde_json::to_value(&doc).map_err(|e| e.to_string())?;
            let context_summary = escriba_draft::context_summary(&context);
            *state.0.lock().unwrap() = Some(ActiveProposal {
                session: DraftSession::new(doc),
                context_summary,
            });
            Ok(value)
        }
        // No blocks: the caller renders the non-templated fallback document.
        None => {
            *state.0.lock().unwrap() = None;
            Ok(serde_json::Value::Null)
        }
    }
}

#[tauri::command]
fn session_view(state: tauri::State<'_, ProposalState>) -> Result<serde_json::Value, String> {
    let guard = state.0.lock().unwrap();
    let active = guard.as_ref().ok_or("no active proposal session")?;
    serde_json::to_value(active.session.view()).map_err(|e| e.to_string())
}

/// Run one generation batch. The session lock is held only to collect the
/// accepted ids and to merge results, never across the network calls.
async fn drive_batch(
    state: Arc<Mutex<Option<ActiveProposal>>>,
    settings: escriba_core::AiSettings,
    ids: Option<Vec<String>>,
) -> Result<serde_json::Value, String> {
    let requests = {
        let mut guard = state.lock().unwrap();
        let active = guard.as_mut().ok_or("no active proposal session")?;
        let targets = match ids {
            Some(ids) => ids,
            None => active.session.pending_blocks(),
        };
        if targets.is_empty() {
            return serde_json::to_value(active.session.view()).map_err(|e| e.to_string());
        }
        let accepted = active.session.begin_generation(&targets);
        if accepted.is_empty() {
            return Err("requested sections are already being drafted".to_string());
        }
        let doc = active.session.document();
        accepted
            .iter()
            .filter_map(|id| doc.block(id))
            .map(|block| GenerationRequest {
                block_id: block.id.clone(),
                instructions: block.instructions.clone().unwrap_or_default(),
                placeholder: block.compiled_content.clone(),
                context: active.context_summary.clone(),
            })
            .collect::<Vec<_>>()
    };

    let outcome = escriba_draft::generate_blocks(&settings, &requests).await;

    let mut guard = state.lock().unwrap();
    let active = guard.as_mut().ok_or("no active proposal session")?;
    match outcome {
        Ok(results) => {
            active.session.merge_results(results);
            serde_json::to_value(active.session.view()).map_err(|e| e.to_string())
        }
        Err(e) => {
            active.session.batch_failed(&e);
            Err(e)
        }
    }
}

#[tauri::command]
async fn generate_pending(
    state: tauri::State<'_, ProposalState>,
    settings: tauri::State<'_, SettingsState>,
) -> Result<serde_json::Value, String> {
    let settings = settings.0.lock().unwrap().clone();
    drive_batch(state.0.clone(), settings, None).await
}

#[tauri::command]
async fn regenerate_blocks(
    ids: Vec<String>,
    state: tauri::State<'_, ProposalState>,
    settings: tauri::State<'_, SettingsState>,
) -> Result<serde_json::Value, String> {
    let settings = settings.0.lock().unwrap().clone();
    drive_batch(state.0.clone(), settings, Some(ids)).await
}

// --- Manual edits over generated sections ---

fn with_session<T>(
    state: &tauri::State<'_, ProposalState>,
    f: impl FnOnce(&mut DraftSession) -> Result<T, String>,
) -> Result<T, String> {
    let mut guard = state.0.lock().unwrap();
    let active = guard.as_mut().ok_or("no active proposal session")?;
    f(&mut active.session)
}

#[tauri::command]
fn begin_block_edit(id: String, state: tauri::State<'_, ProposalState>) -> Result<(), String> {
    with_session(&state, |session| session.begin_edit(&id))
}

#[tauri::command]
fn set_block_draft(
    id: String,
    text: String,
    state: tauri::State<'_, ProposalState>,
) -> Result<(), String> {
    with_session(&state, |session| session.set_draft(&id, text))
}

#[tauri::command]
fn commit_block_edit(id: String, state: tauri::State<'_, ProposalState>) -> Result<(), String> {
    with_session(&state, |session| session.commit_edit(&id))
}

#[tauri::command]
fn cancel_block_edit(id: String, state: tauri::State<'_, ProposalState>) -> Result<(), String> {
    with_session(&state, |session| session.cancel_edit(&id))
}

// --- AI collaborators ---

#[tauri::command]
async fn rewrite_text(
    original: String,
    instruction: String,
    context: Option<String>,
    settings: tauri::State<'_, SettingsState>,
) -> Result<String, String> {
    let settings = settings.0.lock().unwrap().clone();
    escriba_draft::rewrite(&settings, &original, &instruction, context.as_deref()).await
}

#[tauri::command]
async fn analyze_template(
    document: String,
    settings: tauri::State<'_, SettingsState>,
) -> Result<String, String> {
    let settings = settings.0.lock().unwrap().clone();
    let schema = escriba_draft::analyze_template(&settings, &document).await?;
    serde_json::to_string(&schema).map_err(|e| e.to_string())
}

// --- Export ---

#[tauri::command]
fn export_proposal(name: String, state: tauri::State<'_, ProposalState>) -> Result<(), String> {
    let guard = state.0.lock().unwrap();
    let active = guard.as_ref().ok_or("no active proposal session")?;
    let html = active.session.assembled_html()?;
    let warnings = active.session.document().warnings.clone();
    escriba_core::save_snapshot(&name, &ProposalSnapshot::new(html, warnings))
}

#[tauri::command]
fn read_snapshot(name: String) -> Result<serde_json::Value, String> {
    match escriba_core::read_snapshot(&name) {
        Some(snapshot) => serde_json::to_value(&snapshot).map_err(|e| e.to_string()),
        None => Ok(serde_json::Value::Null),
    }
}

// --- Settings ---

#[tauri::command]
fn get_ai_settings(state: tauri::State<'_, SettingsState>) -> Result<serde_json::Value, String> {
    let settings = state.0.lock().unwrap().clone();
    let configured = escriba_core::ai_configured(&settings);
    // Mask API key — only send whether it's set
    Ok(serde_json::json!({
        "provider": settings.provider,
        "model": settings.model,
        "hasKey": !settings.api_key.is_empty(),
        "confidenceFloor": settings.confidence_floor,
        "configured": configured,
    }))
}

#[tauri::command]
fn save_ai_settings(
    provider: String,
    api_key: String,
    model: String,
    confidence_floor: Option<f32>,
    state: tauri::State<'_, SettingsState>,
) -> Result<(), String> {
    let mut settings = state.0.lock().unwrap();
    settings.provider = provider;
    settings.model = model;
    // Empty key means "keep existing"
    if !api_key.is_empty() {
        settings.api_key = api_key;
    }
    if let Some(floor) = confidence_floor {
        settings.confidence_floor = floor.clamp(0.0, 1.0);
    }
    escriba_core::write_settings(&settings)
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let self_writes = Arc::new(Mutex::new(HashMap::<String, Instant>::new()));
    let settings = escriba_core::read_settings();
    let settings_state = Arc::new(Mutex::new(settings));
    let proposal_state: Arc<Mutex<Option<ActiveProposal>>> = Arc::new(Mutex::new(None));

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .manage(SelfWrites(self_writes.clone()))
        .manage(SettingsState(settings_state))
        .manage(ProposalState(proposal_state))
        .setup(move |app| {
            let handle = app.handle().clone();
            let writes = self_writes.clone();
            let dir = escriba_core::templates_dir();
            let _ = std::fs::create_dir_all(&dir);

            // Track known template names so we can detect new templates from
            // rename events (atomic writes use temp + rename, which fires
            // Modify instead of Create)
            let mut known_templates: HashSet<String> = std::fs::read_dir(&dir)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let p = e.path();
                    if p.extension().map_or(true, |x| x != "tpl") {
                        return None;
                    }
                    let stem = p.file_stem()?.to_str()?;
                    if stem.ends_with(".snapshot") {
                        return None;
                    }
                    Some(stem.to_string())
                })
                .collect();

            let mut watcher = recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in &event.paths {
                    if path.extension().map_or(true, |e| e != "tpl") {
                        continue;
                    }
                    let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if name.ends_with(".snapshot") {
                        continue;
                    }
                    {
                        let mut guard = writes.lock().unwrap();
                        if let Some(written_at) = guard.get(name) {
                            if written_at.elapsed().as_millis() < 1000 {
                                continue; // written by UI recently, skip
                            }
                            // Stale entry — clean it up
                            guard.remove(name);
                        }
                    }
                    if known_templates.insert(name.to_string()) {
                        let _ = handle.emit("template-created", name.to_string());
                    }
                    let _ = handle.emit("template-changed", name.to_string());
                }
            })
            .map_err(|e| e.to_string())?;

            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| e.to_string())?;

            // Keep watcher alive for the app's lifetime
            app.manage(Mutex::new(watcher));

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            list_templates,
            read_template,
            write_template,
            delete_template,
            next_block_id,
            compile_proposal,
            session_view,
            generate_pending,
            regenerate_blocks,
            begin_block_edit,
            set_block_draft,
            commit_block_edit,
            cancel_block_edit,
            rewrite_text,
            analyze_template,
            export_proposal,
            read_snapshot,
            get_ai_settings,
            save_ai_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
