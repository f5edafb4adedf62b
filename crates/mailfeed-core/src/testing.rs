//! Shared fixtures for unit tests

use crate::message::MessageDecoder;
use crate::token::{RandomTokens, TokenSource};
use mailfeed_common::config::DatabaseConfig;
use mailfeed_common::Config;
use mailfeed_storage::{
    AtomCodec, EntryContent, DatabasePool, DbFeedRepository, DocumentFeedRepository, FeedRepository,
    LocalStorage,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn config() -> Config {
    let mut config = Config::default();
    config.server.hostname = "feeds.example.com".to_string();
    config
}

/// One repository per backend, each under its own directory of `dir`
pub async fn backends(dir: &TempDir) -> Vec<(&'static str, Arc<dyn FeedRepository>)> {
    let config = config();
    let files = LocalStorage::from_path(&dir.path().join("fs")).unwrap();
    let documents = DocumentFeedRepository::new(files, AtomCodec::from_config(&config));

    let pool = DatabasePool::new(&DatabaseConfig {
        path: dir.path().join("db").join("mailfeed.db"),
        max_connections: 4,
        min_connections: 1,
    })
    .await
    .unwrap();
    pool.migrate().await.unwrap();

    vec![
        ("fs", Arc::new(documents) as Arc<dyn FeedRepository>),
        ("sqlite", Arc::new(DbFeedRepository::new(pool))),
    ]
}

/// Hands out scripted tokens, then random ones
pub struct ScriptedTokens {
    script: Mutex<VecDeque<String>>,
    fallback: RandomTokens,
}

impl ScriptedTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(tokens.into_iter().map(Into::into).collect()),
            fallback: RandomTokens::new(20),
        }
    }
}

impl TokenSource for ScriptedTokens {
    fn next_token(&self) -> String {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.next_token())
    }
}

pub fn message(subject: &str, body: &str) -> Vec<u8> {
    format!(
        concat!(
            "From: Weekly Digest <digest@news.example>\r\n",
            "Subject: {}\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "{}\r\n",
        ),
        subject, body
    )
    .into_bytes()
}

/// Decoder that rejects everything
pub struct Unparseable;

impl MessageDecoder for Unparseable {
    fn decode(&self, _data: &[u8]) -> Option<EntryContent> {
        None
    }
}
