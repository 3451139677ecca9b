use crate::cli::SideArg;
use anyhow::{bail, Context};
use rulebook_chat::config::Config;
use rulebook_chat::provider::{self, Document, GeminiClient, GoogleAuth};
use rulebook_chat::session::{Message, Session, Side};
use rulebook_chat::store::SessionStore;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

pub fn build_client(
    http: &reqwest::Client,
    cfg: Option<&Config>,
    config_dir: &Path,
    model: Option<String>,
) -> anyhow::Result<GeminiClient> {
    let gemini = cfg.map(|c| c.gemini.clone()).unwrap_or_default();

    let api_key = std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .or_else(|| gemini.api_key.clone());

    let auth = match (api_key, std::env::var("GEMINI_ACCESS_TOKEN").ok()) {
        (Some(key), _) => GoogleAuth::ApiKey(key),
        (None, Some(tok)) if !tok.is_empty() => GoogleAuth::BearerToken(tok),
        _ => bail!("No API key found. Set GEMINI_API_KEY, GEMINI_ACCESS_TOKEN or gemini.api_key in config.toml"),
    };

    let mut options = gemini.client_options(config_dir)?;
    if let Some(model) = model {
        options.model = model;
    }

    GeminiClient::new(http.clone(), auth, options).context("failed to build Gemini client")
}

fn load_or_new(store: &SessionStore, id: Option<Uuid>) -> anyhow::Result<Session> {
    match id {
        Some(id) => store
            .load(id)?
            .with_context(|| format!("session not found: {id}")),
        None => Ok(Session::new()),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        _ => provider::request::DEFAULT_MIME_TYPE,
    }
}

async fn read_document(path: &Path) -> anyhow::Result<Document> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read document: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    Ok(Document {
        bytes,
        file_name,
        mime_type: mime_for(path).to_string(),
    })
}

pub async fn cmd_upload(
    client: &GeminiClient,
    store: &SessionStore,
    session_id: Option<Uuid>,
    path: &Path,
    system_instruction: Option<String>,
    owner: Option<String>,
) -> anyhow::Result<()> {
    let mut session = load_or_new(store, session_id)?;
    if owner.is_some() {
        session.owner_id = owner;
    }
    if system_instruction.is_some() {
        session.system_instruction = system_instruction;
    }

    let doc = read_document(path).await?;
    let owner_id = session.owner_id.clone().unwrap_or_else(|| session.id.to_string());
    let upload = client
        .upload_document(&owner_id, &doc, session.system_instruction.as_deref())
        .await
        .context("document upload failed")?;

    session.apply_upload(&upload);
    session.source_path = Some(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
    store.save(&session)?;

    let mut out = std::io::stdout();
    writeln!(out, "session: {}", session.id)?;
    writeln!(out, "file:    {}", upload.file_id)?;
    if let Some(cache) = &upload.cache_id {
        writeln!(out, "cache:   {cache}")?;
    }
    Ok(())
}

/// Re-uploads the session's document when the provider copy has expired.
async fn refresh_file_if_expired(
    client: &GeminiClient,
    store: &SessionStore,
    session: &mut Session,
) -> anyhow::Result<()> {
    if !session.needs_file_refresh(chrono::Utc::now()) {
        return Ok(());
    }
    let Some(path) = session.source_path.clone() else {
        return Ok(());
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "source document missing; continuing without file context");
        return Ok(());
    }

    tracing::info!(session = %session.id, "provider file expired; re-uploading");
    let doc = read_document(&path).await?;
    let owner_id = session.owner_id.clone().unwrap_or_else(|| session.id.to_string());
    let upload = client
        .upload_document(&owner_id, &doc, session.system_instruction.as_deref())
        .await
        .context("document re-upload failed")?;
    session.apply_upload(&upload);
    store.save(session)
}

pub async fn cmd_chat(
    client: &GeminiClient,
    store: &SessionStore,
    session_id: Option<Uuid>,
    prompt: String,
    stream: bool,
) -> anyhow::Result<()> {
    let mut session = load_or_new(store, session_id)?;
    refresh_file_if_expired(client, store, &mut session).await?;

    let mut out = std::io::stdout();
    let answer = if stream {
        use tokio_stream::StreamExt;

        let mut fragments = client
            .generate_streaming(&session, &prompt)
            .await
            .context("failed to start streaming")?;
        let mut answer = String::new();
        while let Some(item) = fragments.next().await {
            let chunk = item.context("stream chunk error")?;
            print!("{chunk}");
            out.flush().ok();
            answer.push_str(&chunk);
        }
        answer
    } else {
        let completion = client.generate(&session, &prompt).await?;
        print!("{}", completion.text);
        completion.text
    };
    println!();

    session.record_turn(Message::user(prompt.clone()), Message::model(answer));

    if session.turns.len() == 1 && session.has_default_title() {
        let ask = format!("Give a short title for a chat that opens with: {prompt}");
        if let Some(title) = client.generate_title(&session, &ask).await {
            session.title = title;
        }
    }

    store.save(&session)?;
    tracing::info!(session = %session.id, title = %session.title, "saved session");
    Ok(())
}

pub fn cmd_forget(
    store: &SessionStore,
    session_id: Option<Uuid>,
    turn: usize,
    side: SideArg,
) -> anyhow::Result<()> {
    let Some(id) = session_id else {
        bail!("--session is required to edit history");
    };
    let mut session = load_or_new(store, Some(id))?;
    let side = match side {
        SideArg::User => Side::User,
        SideArg::Model => Side::Assistant,
    };
    session.delete_message(turn, side)?;
    store.save(&session)?;

    let mut out = std::io::stdout();
    for (i, t) in session.turns.iter().enumerate() {
        let user = t.user.as_ref().map(|m| m.text.as_str()).unwrap_or("-");
        let model = t.assistant.as_ref().map(|m| m.text.as_str()).unwrap_or("-");
        writeln!(out, "[{i}] {user} => {model}")?;
    }
    Ok(())
}

pub async fn cmd_cache(
    client: &GeminiClient,
    store: &SessionStore,
    session_id: Option<Uuid>,
    id: Option<String>,
) -> anyhow::Result<()> {
    let id = match (id, session_id) {
        (Some(id), _) => id,
        (None, Some(sid)) => load_or_new(store, Some(sid))?
            .cache_id
            .with_context(|| format!("session {sid} has no cache"))?,
        (None, None) => bail!("give a cache id or --session"),
    };

    let mut out = std::io::stdout();
    match client.get_cache(&id).await? {
        Some(view) => writeln!(out, "{}  expires {}", view.id, view.expires_at.to_rfc3339())?,
        None => writeln!(out, "{id}: not found or expired")?,
    }
    Ok(())
}

pub fn cmd_sessions(store: &SessionStore) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    for s in store.list()? {
        let doc = s.file_name.as_deref().unwrap_or("-");
        writeln!(
            out,
            "{}  {:<24}  {:>3} turns  {}",
            s.id,
            s.title,
            s.turns.len(),
            doc
        )?;
    }
    Ok(())
}
