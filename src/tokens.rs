//! Round-robin rotation over the configured Kimi access tokens.
//!
//! The pool is built once at startup from the `KIMI_TOKENS` environment
//! variable and shared by all request handlers. Each outbound backend call
//! takes the next token in order, wrapping at the end of the list.
use anyhow::anyhow;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct TokenPool {
    tokens: Vec<String>,
    cursor: Mutex<usize>,
}

impl TokenPool {
    /// Builds a pool from the configured token list. Blank entries (e.g.
    /// from a trailing comma) are dropped; an empty pool is a fatal
    /// configuration error.
    pub fn new(tokens: Vec<String>) -> Result<Self, anyhow::Error> {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(anyhow!("no Kimi tokens configured; set KIMI_TOKENS"));
        }
        Ok(TokenPool {
            tokens,
            cursor: Mutex::new(0),
        })
    }

    /// Returns the next token, advancing the cursor modulo the pool size.
    /// The read-and-advance is one critical section so concurrent callers
    /// rotate fairly.
    pub async fn next(&self) -> String {
        let mut cursor = self.cursor.lock().await;
        let token = self.tokens[*cursor].clone();
        *cursor = (*cursor + 1) % self.tokens.len();
        token
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
