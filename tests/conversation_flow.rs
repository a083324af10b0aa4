//! 会话集成测试：脚本化 LLM 驱动完整轮次

use std::sync::Arc;

use majordome::config::AppConfig;
use majordome::core::{
    create_session, CheckpointStore, Command, MemoryCheckpointStore, DEFAULT_THREAD_ID,
};
use majordome::llm::{MockLlmClient, StreamEvent};
use majordome::state::{Message, Role, ToolCall};
use tokio::sync::{mpsc, oneshot};

async fn submit(
    handle: &majordome::core::SessionHandle,
    input: &str,
) -> (
    Result<majordome::core::TurnSummary, String>,
    Vec<StreamEvent>,
) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    handle
        .cmd_tx
        .send(Command::Submit {
            input: input.to_string(),
            events: events_tx,
            done: done_tx,
        })
        .unwrap();
    let summary = done_rx.await.unwrap();
    let mut events = Vec::new();
    while let Ok(ev) = events_rx.try_recv() {
        events.push(ev);
    }
    (summary, events)
}

async fn snapshot(
    handle: &majordome::core::SessionHandle,
) -> majordome::state::ConversationState {
    let (tx, rx) = oneshot::channel();
    handle.cmd_tx.send(Command::Snapshot { done: tx }).unwrap();
    rx.await.unwrap()
}

#[tokio::test]
async fn test_multi_turn_with_tool_round_trip() {
    // Tour 1 : réponse directe. Tour 2 : current_time puis réponse finale.
    let script = vec![
        Message::assistant("# Réponse\n\nBonjour Quentin !"),
        Message::assistant_with_tools(
            "",
            vec![ToolCall::new("current_time", serde_json::json!({}))],
        ),
        Message::assistant("# Réponse\n\nNous sommes bien aujourd'hui."),
    ];
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = create_session(
        AppConfig::default(),
        store.clone(),
        Some(Arc::new(MockLlmClient::with_script(script))),
    );

    let (first, events) = submit(&handle, "salut !").await;
    assert_eq!(first.unwrap().response, "# Réponse\n\nBonjour Quentin !");
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::FinalMessage { .. })));

    let (second, events) = submit(&handle, "quel jour sommes-nous ?").await;
    let summary = second.unwrap();
    assert_eq!(summary.steps, 1);
    assert_eq!(summary.tools_invoked, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolLifecycle { tool_name, .. } if tool_name == "current_time")));

    // Historique : identité, user, assistant, user, assistant(tool_calls), tool, assistant
    let state = snapshot(&handle).await;
    let roles: Vec<Role> = state.messages().iter().map(|m| m.role.clone()).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    // Le message tool référence bien l'appel émis par l'assistant
    assert_eq!(
        state.messages()[5].tool_call_id.as_deref(),
        Some(state.messages()[4].tool_calls[0].id.as_str())
    );

    // Le checkpoint reflète l'état complet
    let saved = store.load(DEFAULT_THREAD_ID).unwrap().unwrap();
    assert_eq!(saved.messages().len(), 7);
}

#[tokio::test]
async fn test_routed_mail_turn_keeps_draft_in_state() {
    // Routage vers l'agent mail, brouillon composé mais pas envoyé :
    // le draft survit dans l'état (et donc dans le checkpoint).
    let outbox = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.router.enabled = true;
    cfg.tools.mail.outbox_dir = outbox.path().to_path_buf();

    let script = vec![
        // 1. décision du routeur
        Message::assistant(
            "{\"agent\": \"mail\", \"confidence\": 0.9, \"rationale\": \"demande d'email\", \"plan\": [\"rédiger\"]}",
        ),
        // 2. l'agent mail compose un brouillon
        Message::assistant_with_tools(
            "",
            vec![ToolCall::new(
                "compose_email",
                serde_json::json!({
                    "recipient": "quentin@exemple.fr",
                    "subject": "Compte-rendu",
                    "body": "Bonjour, voici le compte-rendu."
                }),
            )],
        ),
        // 3. réponse finale demandant confirmation
        Message::assistant("Brouillon prêt, veux-tu que je l'envoie ?"),
    ];
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = create_session(
        cfg,
        store.clone(),
        Some(Arc::new(MockLlmClient::with_script(script))),
    );

    let (summary, _) = submit(&handle, "écris un mail à Quentin").await;
    let summary = summary.unwrap();
    assert_eq!(summary.route.as_deref(), Some("mail"));
    assert!(summary.response.contains("Brouillon"));

    let state = snapshot(&handle).await;
    assert_eq!(state.intent.as_deref(), Some("mail"));
    assert_eq!(state.route_history.len(), 1);
    assert!(state.route_history[0].starts_with("router->mail"));
    let draft = state.draft.expect("draft should persist on state");
    assert_eq!(draft.recipient, "quentin@exemple.fr");

    // Rien ne part tant que send_email n'est pas appelé
    assert_eq!(std::fs::read_dir(outbox.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_turn_survives_unknown_tool_and_stays_resumable() {
    // Le modèle hallucine un outil : le tour continue via un message tool d'erreur,
    // puis la conversation reste utilisable au tour suivant.
    let script = vec![
        Message::assistant_with_tools(
            "",
            vec![ToolCall::new("calendrier_secret", serde_json::json!({}))],
        ),
        Message::assistant("Je n'ai pas cet outil, mais je peux chercher autrement."),
        Message::assistant("Deuxième tour sans souci."),
    ];
    let handle = create_session(
        AppConfig::default(),
        Arc::new(MemoryCheckpointStore::new()),
        Some(Arc::new(MockLlmClient::with_script(script))),
    );

    let (first, _) = submit(&handle, "regarde mon agenda").await;
    assert!(first.unwrap().response.contains("chercher autrement"));

    let state = snapshot(&handle).await;
    let tool_msg = state
        .messages()
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("one tool failure message");
    assert!(tool_msg.content.contains("Error:"));
    assert!(tool_msg.content.contains("calendrier_secret"));

    let (second, _) = submit(&handle, "ok merci").await;
    assert_eq!(second.unwrap().response, "Deuxième tour sans souci.");
}
