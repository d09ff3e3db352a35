//! A message's path through the bot without Telegram: triage, reply chain,
//! speech, storage, offset.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use voicegram::chatbot::message::{IncomingMessage, Sender};
use voicegram::chatbot::{
    AudioStore, ChatModel, ReplyChain, ServiceError, Triage, TtsClient, UpdateOffset, speak, triage,
};
use voicegram::config::Config;
use voicegram::tts_config::TtsConfig;

struct Canned {
    name: &'static str,
    reply: Result<Option<&'static str>, &'static str>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Canned {
    fn new(name: &'static str, reply: Result<Option<&'static str>, &'static str>) -> Self {
        Self { name, reply, prompts: Arc::new(Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl ChatModel for Canned {
    fn label(&self) -> String {
        self.name.to_string()
    }

    async fn complete(&self, prompt: &str) -> Result<Option<String>, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.reply {
            Ok(reply) => Ok(reply.map(str::to_string)),
            Err(msg) => Err(ServiceError::Api(msg.to_string())),
        }
    }
}

fn message(text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: -1001,
        sender: Some(Sender {
            user_id: 7,
            first_name: "Anna".into(),
            username: None,
            is_bot: false,
        }),
        text: Some(text.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_question_becomes_stored_voice_reply() {
    let mut server = mockito::Server::new_async().await;
    let tts_mock = server
        .mock("POST", "/v1/t2a_v2")
        .with_status(200)
        .with_body(r#"{"data":{"audio":"68656c6c6f"},"extra_info":{"audio_length":1200},"base_resp":{"status_code":0}}"#)
        .expect(1)
        .create_async()
        .await;

    let keywords = vec!["бот".to_string()];
    let Triage::Reply(text) = triage(&message("Как дела?"), Some("voice_bot"), &keywords) else {
        panic!("question should be answered");
    };

    let down = Canned::new("down", Err("service unavailable"));
    let empty = Canned::new("empty", Ok(None));
    let good = Canned::new("good", Ok(Some("Всё отлично!")));
    let seen = good.prompts.clone();
    let chain = ReplyChain::new(vec![Box::new(down), Box::new(empty), Box::new(good)], "default", None);

    let reply = chain.generate(&text).await.expect("a reply");
    assert_eq!(reply, "Всё отлично!");
    assert!(seen.lock().unwrap()[0].contains("Как дела?"));

    let dir = tempfile::tempdir().unwrap();
    let store = AudioStore::new(dir.path().join("audio"), 10);
    let tts = TtsClient::with_base_url("key".into(), TtsConfig::default(), &server.url());
    let spoken = speak(&tts, &store, &reply).await.unwrap();

    assert_eq!(spoken.audio_path, store.dir().join("1.mp3"));
    assert_eq!(std::fs::read(&spoken.audio_path).unwrap(), b"hello");
    let (_, metadata) = store.latest_metadata().unwrap();
    assert_eq!(metadata["extra_info"]["audio_length"], 1200);
    tts_mock.assert_async().await;
}

#[tokio::test]
async fn test_all_models_failing_gives_no_reply() {
    let chain = ReplyChain::new(
        vec![Box::new(Canned::new("a", Err("boom"))), Box::new(Canned::new("b", Ok(None)))],
        "default",
        None,
    );
    assert_eq!(chain.generate("hello?").await, None);
}

#[test]
fn test_offset_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("last_update_id.txt");

    let mut offset = UpdateOffset::load(&path);
    assert!(offset.advance(41));
    assert!(offset.advance(42));
    assert!(!offset.advance(40));

    let reloaded = UpdateOffset::load(&path);
    assert_eq!(reloaded.last(), 42);
    assert_eq!(reloaded.next(), 43);

    assert!(UpdateOffset::reset(&path).unwrap());
    assert_eq!(UpdateOffset::load(&path).next(), 1);
}

#[test]
fn test_chain_built_from_environment_only() {
    let dir = tempfile::tempdir().unwrap();
    let env = |key: &str| match key {
        "TELEGRAM_BOT_TOKEN" => Some("123456:secret".to_string()),
        "TELEGRAM_CHAT_ID" => Some("-1001".to_string()),
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "GROQ_API_KEY" => Some("gsk-test".to_string()),
        _ => None,
    };

    let config = Config::load_with_env(dir.path().join("telegram_config.json"), env).unwrap();
    assert_eq!(config.require_chat_id().unwrap().0, -1001);

    let chain = ReplyChain::from_config(&config);
    assert_eq!(chain.labels(), vec!["OpenAI (gpt-4o-mini)", "Groq (llama-3.3-70b-versatile)"]);
}
