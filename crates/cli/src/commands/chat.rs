//! Terminal chat with a replica.
//!
//! Loads the web chat history first, then reads one message per line from
//! stdin. `/quit` or end of input leaves.

use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use replica_chat_core::{Email, Message, MessageRole, ReplicaId, SessionStore, UserId};
use replica_chat_server::services::Reconciler;
use replica_chat_server::store::UserCache;

use super::connect;

/// Who to chat as.
pub enum Identity {
    /// An upstream user id, used as-is.
    UserId(String),
    /// An email, resolved through check-or-create.
    Email(String),
}

/// Run the chat loop until `/quit` or end of input.
#[allow(clippy::print_stdout)]
pub async fn run(replica: &str, who: Identity, cache: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (client, resilience) = connect()?;
    let timeout = resilience.request_timeout;

    let user = match who {
        Identity::UserId(id) => UserId::new(id.trim()),
        Identity::Email(raw) => {
            let email = Email::parse(&raw)?;
            let reconciler = Reconciler::new(client.clone(), UserCache::new(cache), resilience);
            let outcome = reconciler.check_or_create_user(&email).await;
            info!(user_id = %outcome.user.id, existed = outcome.existed, "Signed in");
            outcome.user.id
        }
    };
    let replica = ReplicaId::new(replica.trim());

    let mut session = SessionStore::new();
    session.select_replica(replica.clone());
    session.set_loading(true);
    match client.chat_history(&replica, Some(&user), timeout).await {
        Ok(history) => session.merge_history(replica.clone(), history),
        Err(e) => warn!(error = %e, "Could not load chat history, starting empty"),
    }
    session.set_loading(false);

    for message in session.messages() {
        print_message(message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if content == "/quit" {
            break;
        }

        session.add_message(local_message(&session, MessageRole::User, content));

        let reply = client
            .chat_completion(&replica, Some(&user), content, timeout)
            .await
            .and_then(|response| response.error_for_status());
        match reply {
            Ok(response) => match completion_text(&response.body) {
                Some(text) => {
                    let message = local_message(&session, MessageRole::Assistant, text);
                    print_message(&message);
                    session.add_message(message);
                }
                None => warn!(body = %response.body, "Completion carried no content"),
            },
            Err(e) => error!(error = %e, "Failed to get response"),
        }
    }

    println!();
    Ok(())
}

fn local_message(session: &SessionStore, role: MessageRole, content: &str) -> Message {
    let id = format!("local-{}", session.messages().len() + 1);
    Message::new(id, role, content, Utc::now())
}

/// The reply text of a completion answer (`{"success": true, "content": "..."}`).
fn completion_text(body: &Value) -> Option<&str> {
    body.get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

#[allow(clippy::print_stdout)]
fn print_message(message: &Message) {
    let who = match message.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "replica",
    };
    println!(
        "[{}] {who}: {}",
        message.timestamp.format("%Y-%m-%d %H:%M"),
        message.content
    );
}
