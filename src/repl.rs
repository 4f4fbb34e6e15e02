// Terminal front ends: an interactive chat against the model API, and a
// one-shot ask that goes through the companion backend.

use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use tracing::{info, warn};

use crate::chat::ChatService;
use crate::config::ChatConfig;
use crate::constants::{CONVERSATION_KEY, USER_ID_KEY};
use crate::helpers::{generate_user_id, truncate_default};
use crate::storage::{KeyValueStore, StorageService};
use crate::transport::BackendClient;
use crate::Conversation;

/// Returns the stored user id, creating and storing one on first use.
pub fn load_user_id<S: KeyValueStore>(storage: &StorageService<S>) -> String {
    if let Some(user_id) = storage.get(USER_ID_KEY) {
        return user_id;
    }
    let user_id = generate_user_id();
    if !storage.set(USER_ID_KEY, &user_id) {
        warn!("User id could not be persisted; a new one will be generated next time");
    }
    user_id
}

fn load_conversation<S: KeyValueStore>(
    storage: &StorageService<S>,
    service: &ChatService,
    user_id: &str,
) -> Conversation {
    match storage.get_json::<Conversation>(CONVERSATION_KEY) {
        Some(conversation) if conversation.user_id == user_id => conversation,
        _ => Conversation::new(user_id.to_string(), service.welcome_message()),
    }
}

/// Reads one message per line until EOF or `/quit`.
/// `/history` prints the transcript, `/clear` starts over.
pub async fn run_chat<S, R, W>(
    service: &ChatService,
    config: &ChatConfig,
    storage: &StorageService<S>,
    input: R,
    mut output: W,
) -> Result<Conversation>
where
    S: KeyValueStore,
    R: BufRead,
    W: Write,
{
    if !storage.is_available() {
        warn!("Storage unavailable; the conversation will not be saved");
    }
    let user_id = load_user_id(storage);
    let mut conversation = load_conversation(storage, service, &user_id);

    if let Some(last) = conversation.display.last() {
        writeln!(output, "Assistant: {}", last.content)?;
    }

    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                writeln!(output, "{}", conversation.transcript())?;
                continue;
            }
            "/clear" => {
                conversation = Conversation::new(user_id.clone(), service.welcome_message());
                storage.remove(CONVERSATION_KEY);
                writeln!(output, "Assistant: {}", service.welcome_message().content)?;
                continue;
            }
            _ => {}
        }

        let reply = service.respond(text, &conversation.history, config).await?;
        conversation.push_user(service.user_message(text));

        if let Some(title) = reply.title.as_deref() {
            writeln!(output, "# {}", title)?;
        }
        writeln!(output, "Assistant: {}", reply.content)?;
        if let Some(usage) = reply.token_usage {
            info!(prompt = usage.prompt, completion = usage.completion, total = usage.total, "Token usage");
        }
        conversation.push_assistant(reply);

        storage.set_json(CONVERSATION_KEY, &conversation);
    }

    if let Some(title) = conversation.title.as_deref() {
        info!(title = %truncate_default(title), "Chat session ended");
    }
    Ok(conversation)
}

/// Posts `message` to the backend and prints the streamed answer.
pub async fn run_ask<W: Write>(
    client: &BackendClient,
    user_id: &str,
    message: &str,
    mut output: W,
) -> Result<()> {
    let accepted = client.send_message(message, user_id).await?;
    let message_id = accepted
        .get("messageId")
        .and_then(|id| id.as_str())
        .ok_or_else(|| anyhow!("Backend response has no messageId"))?;

    let mut events = client
        .open_stream(user_id, message_id)?
        .connect()
        .await
        .context("Failed to open answer stream")?;

    while let Some(event) = events.next().await {
        let event = event?;
        match event.event.as_str() {
            "data" => {
                write!(output, "{}", event.data)?;
                output.flush()?;
            }
            "done" => break,
            "error" => return Err(anyhow!(event.data)),
            _ => {}
        }
    }
    writeln!(output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_user_id_is_created_once() {
        let storage = StorageService::new(MemoryStore::new());
        let first = load_user_id(&storage);
        assert!(first.starts_with("user_"));
        assert_eq!(load_user_id(&storage), first);
    }

    #[tokio::test]
    async fn test_chat_without_key_reports_error() {
        let storage = StorageService::new(MemoryStore::new());
        let service = ChatService::default();
        let config = ChatConfig::new(None, "http://127.0.0.1:9");
        let mut output = Vec::new();

        let err = run_chat(&service, &config, &storage, "hello\n".as_bytes(), &mut output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key not provided"));
    }

    #[tokio::test]
    async fn test_history_and_quit_commands() {
        let storage = StorageService::new(MemoryStore::new());
        let service = ChatService::default();
        let config = ChatConfig::new(None, "http://127.0.0.1:9");
        let mut output = Vec::new();

        let conversation = run_chat(
            &service,
            &config,
            &storage,
            "/history\n/quit\nnever sent\n".as_bytes(),
            &mut output,
        )
        .await
        .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Assistant: Hello! I'm your AI assistant."));
        assert!(conversation.history.is_empty());
    }
}
